use std::sync::Arc;

use axum::{
    extract::{ws::{Message, WebSocket, WebSocketUpgrade}, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use trip_detection_engine::{DetectionError, ExecutionContext};
use trip_detection_lib::TripId;

use crate::server_state::ServerState;

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/snapshot", get(get_snapshot))
        .route("/progress", get(get_progress))
        .route("/trips/pending", get(get_pending_trips))
        .route("/trips/pending/{trip_id}/path", get(get_pending_path))
        .route("/trips/pending/{trip_id}/confirm", post(confirm_trip))
        .route("/monitoring/start", post(start_monitoring))
        .route("/monitoring/stop", post(stop_monitoring))
        .route("/trip/start", post(start_trip))
        .route("/trip/stop", post(stop_trip))
        .route("/lifecycle/{context}", post(set_lifecycle))
        .route("/device", get(get_device))
        .route("/events", get(events))
        .with_state(state)
}

async fn get_snapshot(State(state): State<Arc<ServerState>>) -> Response {
    match state.engine.snapshot().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(err) => error_response(err),
    }
}

async fn get_device(State(state): State<Arc<ServerState>>) -> Response {
    Json(serde_json::json!({ "connected": state.hub.is_connected().await })).into_response()
}

async fn get_progress(State(state): State<Arc<ServerState>>) -> Response {
    let live = state.confirmations.live().await;
    let halted = state.confirmations.halted().await;
    Json(serde_json::json!({ "live": live, "halted": halted })).into_response()
}

async fn get_pending_trips(State(state): State<Arc<ServerState>>) -> Response {
    Json(state.confirmations.pending().await).into_response()
}

/// The recorded path as a bincode blob.
async fn get_pending_path(State(state): State<Arc<ServerState>>, Path(trip_id): Path<TripId>) -> Response {
    let Some(trip) = state.confirmations.get(trip_id).await else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match trip.get_path_blob() {
        Ok(blob) => blob.into_response(),
        Err(err) => {
            tracing::error!("Failed to encode path of trip {}: {}", trip_id, err);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn confirm_trip(State(state): State<Arc<ServerState>>, Path(trip_id): Path<TripId>) -> Response {
    match state.confirmations.confirm(trip_id).await {
        Some(trip) => {
            tracing::info!("Trip {} confirmed", trip_id);
            Json(trip).into_response()
        }
        None => {
            tracing::warn!("No pending trip {}", trip_id);
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

async fn start_monitoring(State(state): State<Arc<ServerState>>) -> Response {
    empty_response(state.engine.start_monitoring().await)
}

async fn stop_monitoring(State(state): State<Arc<ServerState>>) -> Response {
    empty_response(state.engine.stop_monitoring().await)
}

async fn start_trip(State(state): State<Arc<ServerState>>) -> Response {
    empty_response(state.engine.manual_start().await)
}

async fn stop_trip(State(state): State<Arc<ServerState>>) -> Response {
    empty_response(state.engine.manual_stop().await)
}

async fn set_lifecycle(State(state): State<Arc<ServerState>>, Path(context): Path<String>) -> Response {
    let context = match context.as_str() {
        "foreground" => ExecutionContext::Foreground,
        "background" => ExecutionContext::Background,
        other => {
            tracing::warn!("Unknown lifecycle state {}", other);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };
    empty_response(state.engine.set_app_state(context).await)
}

async fn events(ws: WebSocketUpgrade, State(state): State<Arc<ServerState>>) -> Response {
    let rx = state.tx.subscribe();
    ws.on_upgrade(move |socket| forward_events(socket, rx))
}

async fn forward_events(socket: WebSocket, mut rx: broadcast::Receiver<String>) {
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(json) => {
                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event listener lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    tracing::debug!("Event listener disconnected");
}

fn empty_response(result: Result<(), DetectionError>) -> Response {
    match result {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => error_response(err),
    }
}

fn error_response(err: DetectionError) -> Response {
    let status = match err {
        DetectionError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        DetectionError::SensorUnavailable(_) | DetectionError::EngineStopped => StatusCode::SERVICE_UNAVAILABLE,
        DetectionError::Config(_) => StatusCode::BAD_REQUEST,
        DetectionError::GpsFixTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        DetectionError::InvariantViolation(_) => StatusCode::CONFLICT,
    };
    tracing::error!("Request failed: {}", err);
    (status, err.to_string()).into_response()
}

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, Mutex};
use trip_detection_lib::{Location, Trip, TripEvent, TripId, TripProgress};

/// Unconfirmed trips kept at most. The oldest is dropped to make room.
const MAX_PENDING_TRIPS: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveTrip {
    pub trip_id: TripId,
    pub start_pos: Location,
    pub manual: bool,
    pub progress: TripProgress,
}

#[derive(Default)]
struct QueueState {
    live: Option<LiveTrip>,
    pending: Vec<Trip>,
    halted: Option<String>,
}

/// Receives the engine's events, tracks the live trip and holds ended trips until the user confirms them.
#[derive(Clone, Default)]
pub struct ConfirmationQueue {
    state: Arc<Mutex<QueueState>>,
}

impl ConfirmationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes events until the engine goes away. Each event is also published as JSON on `tx`.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<TripEvent>, tx: broadcast::Sender<String>) {
        while let Some(event) = events.recv().await {
            match serde_json::to_string(&event) {
                // No receivers is fine.
                Ok(json) => { let _ = tx.send(json); }
                Err(err) => tracing::error!("Failed to serialize trip event: {}", err),
            }
            self.apply(event).await;
        }
        tracing::info!("Trip event stream ended");
    }

    pub async fn apply(&self, event: TripEvent) {
        let mut state = self.state.lock().await;
        match event {
            TripEvent::TripStarted { trip_id, start_pos, manual, .. } => {
                tracing::info!("Trip {} started at {}", trip_id, start_pos);
                state.halted = None;
                state.live = Some(LiveTrip {
                    trip_id,
                    start_pos,
                    manual,
                    progress: TripProgress { trip_id, distance_km: 0.0, duration_sec: 0.0 },
                });
            }
            TripEvent::StartPositionUpdated { trip_id, start_pos } => {
                if let Some(live) = state.live.as_mut().filter(|live| live.trip_id == trip_id) {
                    live.start_pos = start_pos;
                }
            }
            TripEvent::ActiveTripProgress(progress) => {
                if let Some(live) = state.live.as_mut().filter(|live| live.trip_id == progress.trip_id) {
                    live.progress = progress;
                }
            }
            TripEvent::TripEnded(trip) => {
                tracing::info!("Trip {} awaiting confirmation: {:.2} km", trip.trip_id, trip.distance_km);
                if state.live.as_ref().is_some_and(|live| live.trip_id == trip.trip_id) {
                    state.live = None;
                }
                if state.pending.len() >= MAX_PENDING_TRIPS {
                    let dropped = state.pending.remove(0);
                    tracing::warn!("Confirmation queue full, dropping unconfirmed trip {}", dropped.trip_id);
                }
                state.pending.push(trip);
            }
            TripEvent::MonitoringHalted { reason } => {
                tracing::warn!("Monitoring halted: {}", reason);
                state.halted = Some(reason);
            }
        }
    }

    pub async fn live(&self) -> Option<LiveTrip> {
        self.state.lock().await.live.clone()
    }

    pub async fn pending(&self) -> Vec<Trip> {
        self.state.lock().await.pending.clone()
    }

    pub async fn halted(&self) -> Option<String> {
        self.state.lock().await.halted.clone()
    }

    pub async fn get(&self, trip_id: TripId) -> Option<Trip> {
        self.state.lock().await.pending.iter().find(|trip| trip.trip_id == trip_id).cloned()
    }

    /// Removes and returns the trip, if it was waiting.
    pub async fn confirm(&self, trip_id: TripId) -> Option<Trip> {
        let mut state = self.state.lock().await;
        let index = state.pending.iter().position(|trip| trip.trip_id == trip_id)?;
        Some(state.pending.remove(index))
    }
}

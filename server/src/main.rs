use server::{
    confirmation::ConfirmationQueue,
    device_endpoint,
    device_hub::{DeviceHub, RemoteFixProvider, RemoteMotionSource, RemotePositionSource},
    routes,
    server_config::{config_dir, ServerConfig, DETECTION_CONFIG_FILE, SERVER_CONFIG_FILE},
    server_state::ServerState,
};
use std::{fs::OpenOptions, sync::Arc};
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trip_detection_engine::{Engine, EngineConfig};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    std::fs::create_dir_all("server/log")?;
    let log_file = "server/log/server.log";

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| format!("{}=trace,trip_detection_engine=debug", env!("CARGO_CRATE_NAME")).into())
        )
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file))
        .init();

    tracing::info!("Starting server...");

    let config_dir = config_dir();
    let server_config = match ServerConfig::load(&config_dir.join(SERVER_CONFIG_FILE)) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Using default server config: {:#}", err);
            ServerConfig::default()
        }
    };
    let engine_config = match EngineConfig::load(&config_dir.join(DETECTION_CONFIG_FILE)) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!("Using default detection config: {}", err);
            EngineConfig::default()
        }
    };
    tracing::debug!("Detection config: {:?}", engine_config);

    let hub = DeviceHub::new();
    let (engine, events) = Engine::new(
        engine_config,
        RemoteMotionSource::new(hub.clone()),
        RemotePositionSource::new(hub.clone()),
        Arc::new(RemoteFixProvider::new(hub.clone())),
    )?
    .spawn();

    // Set up application state for use with with_state().
    let (tx, _rx) = broadcast::channel(100);
    let confirmations = ConfirmationQueue::new();
    tokio::spawn(confirmations.clone().run(events, tx.clone()));

    let server_state = Arc::new(ServerState {
        tx,
        engine: engine.clone(),
        confirmations,
        hub: hub.clone(),
    });

    let device_addr = server_config.device_addr();
    tokio::spawn(async move {
        if let Err(err) = device_endpoint::listen(device_addr, hub).await {
            tracing::error!("Device endpoint failed: {:#}", err);
        }
    });

    if let Err(err) = engine.start_monitoring().await {
        tracing::error!("Monitoring did not start: {}", err);
    }

    let app = routes::router(server_state);

    let listener = tokio::net::TcpListener::bind(server_config.http_addr()).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                tracing::error!("Failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    engine.shutdown().await?;
    tracing::info!("Server stopped");
    Ok(())
}

use tokio::sync::broadcast;
use trip_detection_engine::EngineHandle;

use crate::{confirmation::ConfirmationQueue, device_hub::DeviceHub};

pub struct ServerState {
    // Trip events as JSON, fanned out to websocket clients.
    pub tx: broadcast::Sender<String>,
    pub engine: EngineHandle,
    pub confirmations: ConfirmationQueue,
    pub hub: DeviceHub,
}

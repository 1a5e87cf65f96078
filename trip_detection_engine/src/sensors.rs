use tokio::sync::mpsc;
use trip_detection_lib::{AccelReading, PositionFix, SensorError};

use crate::{
    duty_cycle::{MotionSettings, PositionFilter},
    DetectionError,
};

pub type SensorReading<T> = Result<T, SensorError>;

/// The always-on accelerometer feed.
#[async_trait::async_trait]
pub trait MotionSource: Send {
    async fn subscribe(&mut self, settings: MotionSettings) -> Result<mpsc::Receiver<SensorReading<AccelReading>>, DetectionError>;

    async fn unsubscribe(&mut self);
}

/// The GPS feed. Off until the engine starts it.
#[async_trait::async_trait]
pub trait PositionSource: Send {
    async fn start(&mut self, filter: PositionFilter) -> Result<mpsc::Receiver<SensorReading<PositionFix>>, DetectionError>;

    async fn stop(&mut self);
}

/// One-shot "where am I now". Called from a detached task, bounded by the engine's fix timeout.
#[async_trait::async_trait]
pub trait FixProvider: Send + Sync {
    async fn current_fix(&self) -> SensorReading<PositionFix>;
}

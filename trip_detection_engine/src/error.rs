use std::time::Duration;

use trip_detection_lib::SensorError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DetectionError {
    /// Location or motion access is missing. Monitoring halts and the caller is told.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    /// Transient. Retried on the next event, never changes trip state.
    #[error("Sensor unavailable: {0}")]
    SensorUnavailable(String),
    /// Non-fatal, the boundary proceeds with an `Unknown` location.
    #[error("GPS fix timed out after {0:?}")]
    GpsFixTimeout(Duration),
    /// Logged and turned into a no-op inside the engine, never returned from it.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
    #[error("Engine is not running")]
    EngineStopped,
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl DetectionError {
    pub fn from_sensor(error: SensorError, source: &str) -> Self {
        match error {
            SensorError::PermissionDenied => DetectionError::PermissionDenied(source.to_string()),
            SensorError::Unavailable => DetectionError::SensorUnavailable(source.to_string()),
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, DetectionError::PermissionDenied(_))
    }
}

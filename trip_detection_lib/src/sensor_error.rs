use serde::{Deserialize, Serialize};

/// Error delivered on a sensor stream in place of a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum SensorError {
    /// Location or motion access was revoked. Monitoring has to halt.
    #[error("sensor permission denied")]
    PermissionDenied,
    /// The sensor could not deliver this time. Worth retrying.
    #[error("sensor unavailable")]
    Unavailable,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// m/s², subtracted from the raw accelerometer magnitude.
pub const STANDARD_GRAVITY: f64 = 9.81;

/// Raw accelerometer reading as delivered by the device, gravity included.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccelReading {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub timestamp: DateTime<Utc>,
}

impl AccelReading {
    pub fn new(x: f64, y: f64, z: f64, timestamp: DateTime<Utc>) -> Self {
        Self { x, y, z, timestamp }
    }

    /// Net acceleration with gravity removed.
    pub fn net_magnitude(&self) -> f64 {
        let raw = (self.x * self.x + self.y * self.y + self.z * self.z).sqrt();
        (raw - STANDARD_GRAVITY).abs()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    pub magnitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl MotionSample {
    pub fn new(magnitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            magnitude,
            timestamp,
        }
    }
}

impl From<AccelReading> for MotionSample {
    fn from(reading: AccelReading) -> Self {
        Self::new(reading.net_magnitude(), reading.timestamp)
    }
}

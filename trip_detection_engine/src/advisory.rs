use serde::{Deserialize, Serialize};

/// Minimum number of motion samples before features are extracted.
pub const MIN_SAMPLES: usize = 10;

const HIGH_MOTION: f64 = 2.0; // m/s²
const LOW_MOTION: f64 = 0.5; // m/s²

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionFeatures {
    pub accel_mean: f64,
    pub accel_std: f64,
    pub accel_max: f64,
    pub high_motion_ratio: f64,
    pub low_motion_ratio: f64,
    pub speed_mean: f64,
    pub samples: usize,
}

impl MotionFeatures {
    /// `None` until there are enough samples to say anything.
    pub fn extract(magnitudes: &[f64], speeds_kmh: &[f64]) -> Option<Self> {
        if magnitudes.len() < MIN_SAMPLES {
            return None;
        }

        let n = magnitudes.len() as f64;
        let mean = magnitudes.iter().sum::<f64>() / n;
        let variance = magnitudes.iter().map(|m| (m - mean).powi(2)).sum::<f64>() / n;
        let max = magnitudes.iter().copied().fold(f64::MIN, f64::max);
        let high = magnitudes.iter().filter(|m| **m > HIGH_MOTION).count() as f64;
        let low = magnitudes.iter().filter(|m| **m < LOW_MOTION).count() as f64;

        let speed_mean = if speeds_kmh.is_empty() {
            0.0
        } else {
            speeds_kmh.iter().sum::<f64>() / speeds_kmh.len() as f64
        };

        Some(Self {
            accel_mean: mean,
            accel_std: variance.sqrt(),
            accel_max: max,
            high_motion_ratio: high / n,
            low_motion_ratio: low / n,
            speed_mean,
            samples: magnitudes.len(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Advisory {
    pub trip_starting: bool,
    pub start_confidence: f64,
    pub trip_ending: bool,
    pub end_confidence: f64,
}

/// Second opinion on trip boundaries. Shown in diagnostics, never acted on.
pub trait TripAdvisor: Send {
    fn advise(&self, features: &MotionFeatures) -> Advisory;
}

#[derive(Debug, Clone, Default)]
pub struct RuleBasedAdvisor;

impl TripAdvisor for RuleBasedAdvisor {
    fn advise(&self, features: &MotionFeatures) -> Advisory {
        let trip_starting = features.accel_mean > 1.0
            && features.accel_std > 0.5
            && features.speed_mean > 1.0
            && features.high_motion_ratio > 0.3;

        let trip_ending = features.accel_mean < 0.8
            && features.speed_mean < 2.0
            && features.low_motion_ratio > 0.7;

        Advisory {
            trip_starting,
            start_confidence: if trip_starting { 0.6 } else { 0.4 },
            trip_ending,
            end_confidence: if trip_ending { 0.7 } else { 0.3 },
        }
    }
}

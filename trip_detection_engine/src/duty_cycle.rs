use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::controller::TripPhase;

/// Which host context holds the sensor subscriptions. Follows the app lifecycle signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionContext {
    Foreground,
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationAccuracy {
    High,
    Balanced,
}

/// What the engine asks of `PositionSource` when it turns GPS on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionFilter {
    pub accuracy: LocationAccuracy,
    /// Minimum movement in meters between delivered fixes.
    pub distance_filter_m: f64,
    pub interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionSettings {
    pub sample_interval: Duration,
}

/// Decides when GPS runs and how each execution context samples.
pub trait DutyCyclePolicy: Send {
    fn position_wanted(&self, phase: TripPhase) -> bool;

    fn position_filter(&self, context: ExecutionContext) -> PositionFilter;

    fn motion_settings(&self, context: ExecutionContext) -> MotionSettings;

    /// How often timeouts are evaluated when no sensor event arrives.
    fn tick_interval(&self, context: ExecutionContext) -> Duration;
}

/// GPS only while motion has to be confirmed, a trip is running, or a trip is being stamped.
#[derive(Debug, Clone, Default)]
pub struct MotionGatedPolicy;

impl DutyCyclePolicy for MotionGatedPolicy {
    fn position_wanted(&self, phase: TripPhase) -> bool {
        match phase {
            TripPhase::Idle => false,
            TripPhase::MotionPending | TripPhase::Active | TripPhase::Stopping => true,
        }
    }

    fn position_filter(&self, context: ExecutionContext) -> PositionFilter {
        match context {
            ExecutionContext::Foreground => PositionFilter {
                accuracy: LocationAccuracy::High,
                distance_filter_m: 5.0,
                interval: Duration::from_secs(1),
            },
            ExecutionContext::Background => PositionFilter {
                accuracy: LocationAccuracy::Balanced,
                distance_filter_m: 10.0,
                interval: Duration::from_secs(5),
            },
        }
    }

    fn motion_settings(&self, context: ExecutionContext) -> MotionSettings {
        let sample_interval = match context {
            ExecutionContext::Foreground => Duration::from_millis(200),
            ExecutionContext::Background => Duration::from_millis(1000),
        };
        MotionSettings { sample_interval }
    }

    fn tick_interval(&self, context: ExecutionContext) -> Duration {
        match context {
            ExecutionContext::Foreground => Duration::from_secs(1),
            ExecutionContext::Background => Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gps_is_off_only_when_idle() {
        let policy = MotionGatedPolicy;
        assert!(!policy.position_wanted(TripPhase::Idle));
        assert!(policy.position_wanted(TripPhase::MotionPending));
        assert!(policy.position_wanted(TripPhase::Active));
        assert!(policy.position_wanted(TripPhase::Stopping));
    }

    #[test]
    fn background_samples_less() {
        let policy = MotionGatedPolicy;
        let fg = policy.position_filter(ExecutionContext::Foreground);
        let bg = policy.position_filter(ExecutionContext::Background);
        assert!(bg.interval > fg.interval);
        assert!(bg.distance_filter_m > fg.distance_filter_m);
        assert!(policy.tick_interval(ExecutionContext::Background) > policy.tick_interval(ExecutionContext::Foreground));
    }
}

use std::{path::Path, str::FromStr, time::Duration};

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::DetectionError;

/// Every threshold the engine uses. Parsed from `key = value` lines, durations in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Rolling-average magnitude (m/s²) at which a sample window counts as moving.
    pub motion_threshold: f64,
    pub motion_required: u32,
    pub stationary_required: u32,
    /// Ring buffer size for the rolling average.
    pub motion_window: usize,

    pub speed_threshold_kmh: f64,
    /// Lower bound for accepting a trip immediately when speed drops after enough displacement.
    pub slow_speed_threshold_kmh: f64,
    pub speed_sustain_duration: Duration,
    pub min_distance_meters: f64,
    pub max_fix_accuracy_meters: f64,

    pub gps_fix_timeout: Duration,
    pub gps_idle_timeout: Duration,

    pub fix_retention: Duration,
    pub fix_buffer_size: usize,
    pub max_path_points: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            motion_threshold: 0.8,
            motion_required: 5,
            stationary_required: 10,
            motion_window: 10,
            speed_threshold_kmh: 2.0,
            slow_speed_threshold_kmh: 1.0,
            speed_sustain_duration: Duration::from_secs(30),
            min_distance_meters: 30.0,
            max_fix_accuracy_meters: 50.0,
            gps_fix_timeout: Duration::from_secs(10),
            gps_idle_timeout: Duration::from_secs(120),
            fix_retention: Duration::from_secs(5 * 60),
            fix_buffer_size: 1000,
            max_path_points: 1000,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, DetectionError> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| DetectionError::Config(format!("Failed to read {:?}: {}", path, err)))?;
        Self::parse(&text)
    }

    /// Starts from the defaults and overrides whatever keys are present.
    pub fn parse(text: &str) -> Result<Self, DetectionError> {
        let mut config = Self::default();

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(DetectionError::Config(format!("Expected key = value, got '{}'", line)));
            };
            let (key, value) = (key.trim(), value.trim());

            match key {
                "motion_threshold" => config.motion_threshold = parse_value(key, value)?,
                "motion_required" => config.motion_required = parse_value(key, value)?,
                "stationary_required" => config.stationary_required = parse_value(key, value)?,
                "motion_window" => config.motion_window = parse_value(key, value)?,
                "speed_threshold_kmh" => config.speed_threshold_kmh = parse_value(key, value)?,
                "slow_speed_threshold_kmh" => config.slow_speed_threshold_kmh = parse_value(key, value)?,
                "speed_sustain_secs" => config.speed_sustain_duration = parse_secs(key, value)?,
                "min_distance_meters" => config.min_distance_meters = parse_value(key, value)?,
                "max_fix_accuracy_meters" => config.max_fix_accuracy_meters = parse_value(key, value)?,
                "gps_fix_timeout_secs" => config.gps_fix_timeout = parse_secs(key, value)?,
                "gps_idle_timeout_secs" => config.gps_idle_timeout = parse_secs(key, value)?,
                "fix_retention_secs" => config.fix_retention = parse_secs(key, value)?,
                "fix_buffer_size" => config.fix_buffer_size = parse_value(key, value)?,
                "max_path_points" => config.max_path_points = parse_value(key, value)?,
                _ => {
                    tracing::warn!("Unknown config key: {}", key);
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), DetectionError> {
        let invalid = |message: &str| Err(DetectionError::Config(message.to_string()));

        if !(self.motion_threshold.is_finite() && self.motion_threshold >= 0.0) {
            return invalid("motion_threshold must be a non-negative number");
        }
        if self.motion_required == 0 || self.stationary_required == 0 {
            return invalid("motion_required and stationary_required must be at least 1");
        }
        if self.motion_window == 0 {
            return invalid("motion_window must be at least 1");
        }
        if self.slow_speed_threshold_kmh > self.speed_threshold_kmh {
            return invalid("slow_speed_threshold_kmh must not exceed speed_threshold_kmh");
        }
        if self.min_distance_meters < 0.0 || self.max_fix_accuracy_meters <= 0.0 {
            return invalid("distances must be positive");
        }
        if self.fix_buffer_size == 0 || self.max_path_points < 2 {
            return invalid("buffers must hold at least one fix and paths at least two");
        }
        Ok(())
    }

    pub(crate) fn speed_sustain(&self) -> TimeDelta {
        delta(self.speed_sustain_duration)
    }

    pub(crate) fn fix_timeout(&self) -> TimeDelta {
        delta(self.gps_fix_timeout)
    }

    pub(crate) fn idle_timeout(&self) -> TimeDelta {
        delta(self.gps_idle_timeout)
    }

    pub(crate) fn retention(&self) -> TimeDelta {
        delta(self.fix_retention)
    }
}

pub(crate) fn delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, DetectionError> {
    value.parse::<T>()
        .map_err(|_| DetectionError::Config(format!("Invalid value for {}: '{}'", key, value)))
}

fn parse_secs(key: &str, value: &str) -> Result<Duration, DetectionError> {
    let secs: f64 = parse_value(key, value)?;
    Duration::try_from_secs_f64(secs)
        .map_err(|_| DetectionError::Config(format!("Invalid duration for {}: '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_gives_defaults() {
        assert_eq!(EngineConfig::parse("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn shipped_config_matches_defaults() {
        let config = EngineConfig::parse(include_str!("../../config/detection.conf")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn overrides_and_comments() {
        let config = EngineConfig::parse("
            # thresholds from the walking profile
            motion_threshold = 0.5
            speed_threshold_kmh = 1.0
            slow_speed_threshold_kmh = 0.5
            speed_sustain_secs = 30
            gps_idle_timeout_secs = 90.5
            some_future_key = 3
        ").unwrap();

        assert_eq!(config.motion_threshold, 0.5);
        assert_eq!(config.speed_threshold_kmh, 1.0);
        assert_eq!(config.speed_sustain_duration, Duration::from_secs(30));
        assert_eq!(config.gps_idle_timeout, Duration::from_millis(90_500));
        assert_eq!(config.motion_required, 5);
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(matches!(EngineConfig::parse("motion_required = lots"), Err(DetectionError::Config(_))));
        assert!(matches!(EngineConfig::parse("gps_fix_timeout_secs = -1"), Err(DetectionError::Config(_))));
        assert!(matches!(EngineConfig::parse("motion_threshold"), Err(DetectionError::Config(_))));
    }

    #[test]
    fn inconsistent_thresholds_are_rejected() {
        let result = EngineConfig::parse("speed_threshold_kmh = 2\nslow_speed_threshold_kmh = 5");
        assert!(matches!(result, Err(DetectionError::Config(_))));
    }
}

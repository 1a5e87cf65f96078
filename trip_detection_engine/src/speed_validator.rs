use chrono::{DateTime, TimeDelta, Utc};
use trip_detection_lib::PositionFix;

use crate::EngineConfig;

/// A motion candidate waiting for GPS confirmation. Lives only in `MotionPending`.
#[derive(Debug, Clone)]
pub struct TripCandidate {
    pub motion_start_time: DateTime<Utc>,
    /// When GPS sampling was requested for this candidate. The idle timeout counts from here.
    pub gps_requested_at: DateTime<Utc>,
    pub speed_track_start_time: Option<DateTime<Utc>>,
    pub accumulated_distance_m: f64,
    pub tracked_fixes: Vec<PositionFix>,
}

impl TripCandidate {
    pub fn new(motion_start_time: DateTime<Utc>, gps_requested_at: DateTime<Utc>) -> Self {
        Self {
            motion_start_time,
            gps_requested_at,
            speed_track_start_time: None,
            accumulated_distance_m: 0.0,
            tracked_fixes: Vec::new(),
        }
    }

    pub fn first_fix(&self) -> Option<&PositionFix> {
        self.tracked_fixes.first()
    }

    fn close_window(&mut self) {
        self.speed_track_start_time = None;
        self.accumulated_distance_m = 0.0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// Above the speed threshold for the sustain duration, over the minimum distance.
    Sustained,
    /// Speed fell into the slow band after the minimum distance was already covered.
    SlowSpeed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedVerdict {
    BelowThreshold,
    Tracking,
    Confirmed(Confirmation),
    WindowReset,
}

#[derive(Debug, Clone)]
pub struct SpeedValidator {
    speed_threshold_kmh: f64,
    slow_speed_threshold_kmh: f64,
    sustain: TimeDelta,
    min_distance_m: f64,
    max_tracked: usize,
}

impl SpeedValidator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            speed_threshold_kmh: config.speed_threshold_kmh,
            slow_speed_threshold_kmh: config.slow_speed_threshold_kmh,
            sustain: config.speed_sustain(),
            min_distance_m: config.min_distance_meters,
            max_tracked: config.max_path_points,
        }
    }

    /// Feeds one fix into the candidate's speed window and records it as tracked.
    pub fn observe(&self, candidate: &mut TripCandidate, fix: &PositionFix) -> SpeedVerdict {
        let step_m = match (candidate.speed_track_start_time, candidate.tracked_fixes.last()) {
            (Some(_), Some(previous)) => previous.distance_m(fix),
            _ => 0.0,
        };

        candidate.tracked_fixes.push(*fix);
        if candidate.tracked_fixes.len() > self.max_tracked {
            candidate.tracked_fixes.remove(0);
        }

        if fix.speed_kmh >= self.speed_threshold_kmh {
            match candidate.speed_track_start_time {
                None => {
                    candidate.speed_track_start_time = Some(fix.timestamp);
                    candidate.accumulated_distance_m = 0.0;
                }
                Some(_) => candidate.accumulated_distance_m += step_m,
            }

            let sustained = candidate.speed_track_start_time
                .is_some_and(|start| fix.timestamp - start >= self.sustain);

            if sustained && candidate.accumulated_distance_m >= self.min_distance_m {
                return SpeedVerdict::Confirmed(Confirmation::Sustained);
            }
            return SpeedVerdict::Tracking;
        }

        if candidate.speed_track_start_time.is_none() {
            return SpeedVerdict::BelowThreshold;
        }

        let covered = candidate.accumulated_distance_m + step_m;
        if fix.speed_kmh >= self.slow_speed_threshold_kmh && covered >= self.min_distance_m {
            candidate.accumulated_distance_m = covered;
            return SpeedVerdict::Confirmed(Confirmation::SlowSpeed);
        }

        candidate.close_window();
        SpeedVerdict::WindowReset
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;

    use super::*;

    fn config() -> EngineConfig {
        EngineConfig {
            speed_threshold_kmh: 1.0,
            slow_speed_threshold_kmh: 0.5,
            speed_sustain_duration: Duration::from_secs(30),
            min_distance_meters: 30.0,
            ..EngineConfig::default()
        }
    }

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    /// Northbound fixes, `step_m` apart.
    fn fix(index: i64, step_m: f64, speed_kmh: f64, secs: i64) -> PositionFix {
        let lat = 55.0 + (index as f64 * step_m) / 111_195.0;
        PositionFix::new(lat, 12.0, speed_kmh, 5.0, t(secs))
    }

    #[test]
    fn dual_condition_confirms_once_both_hold() {
        let validator = SpeedValidator::new(&config());
        let mut candidate = TripCandidate::new(t(0), t(0));

        let verdicts: Vec<_> = (0..=4)
            .map(|i| validator.observe(&mut candidate, &fix(i, 15.0, 12.0, i * 10)))
            .collect();

        assert_eq!(verdicts[..3], [SpeedVerdict::Tracking; 3]);
        assert_eq!(verdicts[3], SpeedVerdict::Confirmed(Confirmation::Sustained));
        assert!(candidate.accumulated_distance_m >= 30.0);
    }

    #[test]
    fn duration_alone_is_not_enough() {
        let validator = SpeedValidator::new(&config());
        let mut candidate = TripCandidate::new(t(0), t(0));

        for i in 0..10 {
            let verdict = validator.observe(&mut candidate, &fix(i, 1.0, 12.0, i * 10));
            assert_eq!(verdict, SpeedVerdict::Tracking);
        }
    }

    #[test]
    fn slow_speed_after_enough_distance_accepts_immediately() {
        let validator = SpeedValidator::new(&config());
        let mut candidate = TripCandidate::new(t(0), t(0));

        validator.observe(&mut candidate, &fix(0, 20.0, 5.0, 0));
        validator.observe(&mut candidate, &fix(1, 20.0, 5.0, 5));
        let verdict = validator.observe(&mut candidate, &fix(2, 20.0, 0.7, 10));
        assert_eq!(verdict, SpeedVerdict::Confirmed(Confirmation::SlowSpeed));
    }

    #[test]
    fn stopping_short_resets_the_window() {
        let validator = SpeedValidator::new(&config());
        let mut candidate = TripCandidate::new(t(0), t(0));

        validator.observe(&mut candidate, &fix(0, 5.0, 5.0, 0));
        validator.observe(&mut candidate, &fix(1, 5.0, 5.0, 5));
        assert_eq!(validator.observe(&mut candidate, &fix(1, 5.0, 0.1, 10)), SpeedVerdict::WindowReset);
        assert_eq!(candidate.speed_track_start_time, None);
        assert_eq!(candidate.accumulated_distance_m, 0.0);
        assert_eq!(candidate.tracked_fixes.len(), 3);
    }

    #[test]
    fn below_threshold_without_a_window() {
        let validator = SpeedValidator::new(&config());
        let mut candidate = TripCandidate::new(t(0), t(0));
        assert_eq!(validator.observe(&mut candidate, &fix(0, 0.0, 0.2, 0)), SpeedVerdict::BelowThreshold);
    }
}

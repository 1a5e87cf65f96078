use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trip_detection_lib::TripProgress;

use crate::{
    advisory::Advisory,
    controller::{FixPurpose, TripPhase},
    duty_cycle::ExecutionContext,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub samples_processed: u64,
    pub fixes_processed: u64,
    pub fixes_rejected: u64,
    pub stale_fixes_dropped: u64,
    pub sensor_errors: u64,
    pub invariant_violations: u64,
    pub superseded_fix_results: u64,
    pub suppressed_auto_stops: u64,
    pub trips_started: u64,
    pub trips_ended: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSnapshot {
    pub motion_start_time: DateTime<Utc>,
    pub speed_track_start_time: Option<DateTime<Utc>>,
    pub accumulated_distance_m: f64,
    pub tracked_fixes: usize,
}

/// Internal state for diagnostics screens and logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugSnapshot {
    pub monitoring: bool,
    pub context: ExecutionContext,
    pub gps_running: bool,

    pub phase: TripPhase,
    pub manual_override: bool,
    pub rolling_average: f64,
    pub moving_streak: u32,
    pub stationary_streak: u32,
    pub motion_latched: bool,
    pub buffered_samples: usize,
    pub buffered_fixes: usize,

    pub candidate: Option<CandidateSnapshot>,
    pub active_trip: Option<TripProgress>,
    pub active_path_points: usize,

    pub fix_generation: u64,
    pub pending_fix: Option<FixPurpose>,
    pub counters: Counters,
    pub advisory: Option<Advisory>,
}

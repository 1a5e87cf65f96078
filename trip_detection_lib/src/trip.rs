use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::position_fix::{Location, PositionFix};

pub type TripId = i64;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Trip {
    pub trip_id: TripId,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub start_pos: Location,
    pub end_pos: Option<Location>,
    pub distance_km: f64,
    pub duration_sec: f64,
    /// Started through manual override rather than detection.
    pub manual: bool,
    pub path_log: VecDeque<PositionFix>,
}

impl Trip {
    pub fn new(trip_id: TripId, start_time: DateTime<Utc>, start_pos: Location, manual: bool) -> Self {
        Self {
            trip_id,
            start_time,
            end_time: None,
            start_pos,
            end_pos: None,
            distance_km: 0.0,
            duration_sec: 0.0,
            manual,
            path_log: VecDeque::new(),
        }
    }

    pub fn get_path_blob(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(&self.path_log)
    }
}

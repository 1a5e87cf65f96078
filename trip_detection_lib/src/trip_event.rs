use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{position_fix::Location, trip::{Trip, TripId}};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TripProgress {
    pub trip_id: TripId,
    pub distance_km: f64,
    pub duration_sec: f64,
}

/// Everything the engine tells the outside world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TripEvent {
    TripStarted {
        trip_id: TripId,
        start_time: DateTime<Utc>,
        start_pos: Location,
        manual: bool,
    },
    /// A late fix replaced the placeholder start position.
    StartPositionUpdated {
        trip_id: TripId,
        start_pos: Location,
    },
    ActiveTripProgress(TripProgress),
    /// Ownership of the finished trip moves to whoever receives this.
    TripEnded(Trip),
    MonitoringHalted {
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn events_are_tagged_by_variant_in_json() {
        let event = TripEvent::TripStarted {
            trip_id: 7,
            start_time: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            start_pos: Location::Unknown,
            manual: true,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["TripStarted"]["start_pos"], "Unknown");
        assert_eq!(json["TripStarted"]["manual"], true);

        let back: TripEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}

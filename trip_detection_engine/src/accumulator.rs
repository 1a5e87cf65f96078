use chrono::{DateTime, Utc};
use trip_detection_lib::{Location, PositionFix, Trip, TripProgress};

/// Owns the active trip and keeps its path, distance and duration current.
#[derive(Debug, Clone)]
pub struct TripAccumulator {
    trip: Trip,
    max_path_points: usize,
}

impl TripAccumulator {
    pub fn open(trip: Trip, max_path_points: usize) -> Self {
        Self {
            trip,
            max_path_points: max_path_points.max(2),
        }
    }

    /// Appends a fix. Fixes older than the end of the path are refused to keep it ordered.
    pub fn append(&mut self, fix: PositionFix) -> bool {
        if let Some(last) = self.trip.path_log.back() {
            if fix.timestamp < last.timestamp {
                return false;
            }
            // Segments are summed as they arrive so trimming the front never shrinks the distance.
            self.trip.distance_km += last.distance_m(&fix) / 1000.0;
        }

        self.trip.path_log.push_back(fix);
        while self.trip.path_log.len() > self.max_path_points {
            self.trip.path_log.pop_front();
        }

        self.touch(fix.timestamp);
        true
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        let elapsed = seconds_between(self.trip.start_time, now);
        if elapsed > self.trip.duration_sec {
            self.trip.duration_sec = elapsed;
        }
    }

    pub fn set_start_pos(&mut self, start_pos: Location) {
        self.trip.start_pos = start_pos;
    }

    pub fn last_fix(&self) -> Option<&PositionFix> {
        self.trip.path_log.back()
    }

    pub fn trip(&self) -> &Trip {
        &self.trip
    }

    pub fn progress(&self) -> TripProgress {
        TripProgress {
            trip_id: self.trip.trip_id,
            distance_km: self.trip.distance_km,
            duration_sec: self.trip.duration_sec,
        }
    }

    /// Stamps the end of the trip and gives it up.
    pub fn finalize(mut self, end_time: DateTime<Utc>, end_pos: Location) -> Trip {
        let end_time = end_time.max(self.trip.start_time);
        self.trip.end_time = Some(end_time);
        self.trip.end_pos = Some(end_pos);
        self.trip.duration_sec = seconds_between(self.trip.start_time, end_time);
        self.trip
    }
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    ((end - start).num_milliseconds() as f64 / 1000.0).max(0.0)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone};
    use trip_detection_lib::position_fix::path_distance_m;

    use super::*;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn open() -> TripAccumulator {
        TripAccumulator::open(Trip::new(1, t(0), Location::Unknown, false), 1000)
    }

    #[test]
    fn distance_follows_the_path_not_the_chord() {
        let mut acc = open();
        acc.append(PositionFix::new(55.0, 12.0, 10.0, 5.0, t(0)));
        acc.append(PositionFix::new(55.001, 12.0, 10.0, 5.0, t(10)));
        acc.append(PositionFix::new(55.0, 12.0, 10.0, 5.0, t(20)));

        let expected = path_distance_m(&acc.trip().path_log) / 1000.0;
        assert!((acc.trip().distance_km - expected).abs() < 1e-12);
        assert!(acc.trip().distance_km > 0.2);
        assert_eq!(acc.trip().duration_sec, 20.0);
    }

    #[test]
    fn distance_never_decreases() {
        let mut acc = open();
        let mut previous = 0.0;
        for i in 0..50 {
            // Zig-zag with some jitter and a repeated point.
            let lat = 55.0 + if i % 3 == 0 { 0.0 } else { 0.0002 * (i % 5) as f64 };
            acc.append(PositionFix::new(lat, 12.0, 8.0, 5.0, t(i)));
            assert!(acc.trip().distance_km >= previous);
            previous = acc.trip().distance_km;
        }
    }

    #[test]
    fn full_path_drops_oldest_but_keeps_distance() {
        let mut acc = TripAccumulator::open(Trip::new(1, t(0), Location::Unknown, false), 3);
        for i in 0..6 {
            acc.append(PositionFix::new(55.0 + i as f64 * 0.001, 12.0, 8.0, 5.0, t(i)));
        }
        assert_eq!(acc.trip().path_log.len(), 3);
        assert!(acc.trip().distance_km > path_distance_m(&acc.trip().path_log) / 1000.0);
    }

    #[test]
    fn out_of_order_fix_is_refused() {
        let mut acc = open();
        assert!(acc.append(PositionFix::new(55.0, 12.0, 8.0, 5.0, t(10))));
        assert!(!acc.append(PositionFix::new(55.1, 12.0, 8.0, 5.0, t(5))));
        assert_eq!(acc.trip().path_log.len(), 1);
    }

    #[test]
    fn finalize_clamps_end_before_start() {
        let acc = open();
        let trip = acc.finalize(t(0) - TimeDelta::seconds(5), Location::Unknown);
        assert_eq!(trip.end_time, Some(t(0)));
        assert_eq!(trip.duration_sec, 0.0);
        assert_eq!(trip.end_pos, Some(Location::Unknown));
    }
}

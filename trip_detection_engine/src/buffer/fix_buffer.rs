use std::collections::VecDeque;

use chrono::{DateTime, TimeDelta, Utc};
use trip_detection_lib::PositionFix;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixInsert {
    Stored,
    /// Older than the retention window relative to the newest fix. Dropped.
    Stale,
}

/// Recent fixes, ordered by timestamp, bounded by age and by count.
#[derive(Debug, Clone)]
pub struct FixBuffer {
    fixes: VecDeque<PositionFix>,
    retention: TimeDelta,
    capacity: usize,
}

impl FixBuffer {
    pub fn new(retention: TimeDelta, capacity: usize) -> Self {
        Self {
            fixes: VecDeque::new(),
            retention,
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, fix: PositionFix) -> FixInsert {
        let newest = self.fixes.back().map(|newest| newest.timestamp);

        if let Some(newest) = newest {
            if newest.checked_sub_signed(self.retention).is_some_and(|cutoff| fix.timestamp < cutoff) {
                return FixInsert::Stale;
            }
        }

        match newest {
            Some(newest) if fix.timestamp < newest => {
                let index = self.fixes.partition_point(|stored| stored.timestamp <= fix.timestamp);
                self.fixes.insert(index, fix);
            }
            _ => self.fixes.push_back(fix),
        }

        if let Some(newest) = self.fixes.back().map(|newest| newest.timestamp) {
            self.prune(newest);
        }
        FixInsert::Stored
    }

    /// Drops everything older than the retention window and trims to capacity.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        if let Some(cutoff) = now.checked_sub_signed(self.retention) {
            while self.fixes.front().is_some_and(|oldest| oldest.timestamp < cutoff) {
                self.fixes.pop_front();
            }
        }
        while self.fixes.len() > self.capacity {
            self.fixes.pop_front();
        }
    }

    /// The newest fix, if it is no older than `max_age` at `now`.
    pub fn latest_within(&self, now: DateTime<Utc>, max_age: TimeDelta) -> Option<&PositionFix> {
        self.fixes.back().filter(|fix| now - fix.timestamp <= max_age)
    }

    /// Speeds of the fixes recorded within `window` of the newest one.
    pub fn recent_speeds(&self, window: TimeDelta) -> Vec<f64> {
        let Some(newest) = self.fixes.back() else {
            return Vec::new();
        };
        let cutoff = newest.timestamp.checked_sub_signed(window);
        self.fixes.iter()
            .filter(|fix| cutoff.map_or(true, |cutoff| fix.timestamp >= cutoff))
            .map(|fix| fix.speed_kmh)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    pub fn clear(&mut self) {
        self.fixes.clear();
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(secs: i64) -> PositionFix {
        PositionFix::new(55.0, 12.0, 5.0, 5.0, Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap())
    }

    #[test]
    fn drops_fixes_outside_the_window() {
        let mut buffer = FixBuffer::new(TimeDelta::minutes(5), 1000);
        buffer.push(at(0));
        buffer.push(at(100));
        buffer.push(at(400));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.latest_within(at(400).timestamp, TimeDelta::zero()).map(|fix| fix.timestamp), Some(at(400).timestamp));
    }

    #[test]
    fn drops_oldest_beyond_capacity() {
        let mut buffer = FixBuffer::new(TimeDelta::minutes(5), 3);
        for secs in 0..10 {
            buffer.push(at(secs));
        }
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn stale_fix_is_not_stored() {
        let mut buffer = FixBuffer::new(TimeDelta::minutes(5), 1000);
        buffer.push(at(1000));
        assert_eq!(buffer.push(at(100)), FixInsert::Stale);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn late_fix_within_window_keeps_order() {
        let mut buffer = FixBuffer::new(TimeDelta::minutes(5), 1000);
        buffer.push(at(10));
        buffer.push(at(30));
        assert_eq!(buffer.push(at(20)), FixInsert::Stored);
        assert_eq!(buffer.latest_within(at(30).timestamp, TimeDelta::zero()).map(|fix| fix.timestamp), Some(at(30).timestamp));
        assert_eq!(buffer.recent_speeds(TimeDelta::seconds(15)).len(), 2);
    }

    #[test]
    fn latest_within_respects_age() {
        let mut buffer = FixBuffer::new(TimeDelta::minutes(5), 1000);
        buffer.push(at(0));
        assert!(buffer.latest_within(at(5).timestamp, TimeDelta::seconds(10)).is_some());
        assert!(buffer.latest_within(at(60).timestamp, TimeDelta::seconds(10)).is_none());
    }
}

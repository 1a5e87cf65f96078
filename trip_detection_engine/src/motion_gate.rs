use chrono::{DateTime, Utc};
use trip_detection_lib::MotionSample;

use crate::{buffer::MotionBuffer, EngineConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MotionClass {
    Moving,
    Stationary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateSignal {
    /// `motion_required` consecutive moving windows. Fires once until the gate resets.
    SustainedMotion,
    /// `stationary_required` consecutive stationary windows while a trip is active.
    SustainedStationary,
    /// The same stationary streak outside a trip, after motion had been signalled.
    /// Clears the motion latch.
    MotionCeased,
}

/// Hysteresis over the rolling average of recent motion magnitudes.
#[derive(Debug, Clone)]
pub struct MotionGate {
    threshold: f64,
    motion_required: u32,
    stationary_required: u32,

    buffer: MotionBuffer,
    last_class: Option<MotionClass>,
    moving_streak: u32,
    stationary_streak: u32,
    streak_started_at: Option<DateTime<Utc>>,
    motion_latched: bool,
    stationary_latched: bool,
}

impl MotionGate {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            threshold: config.motion_threshold,
            motion_required: config.motion_required,
            stationary_required: config.stationary_required,
            buffer: MotionBuffer::new(config.motion_window),
            last_class: None,
            moving_streak: 0,
            stationary_streak: 0,
            streak_started_at: None,
            motion_latched: false,
            stationary_latched: false,
        }
    }

    pub fn observe(&mut self, sample: MotionSample, trip_active: bool) -> Option<GateSignal> {
        self.buffer.push(sample);

        let class = if self.buffer.average() >= self.threshold {
            MotionClass::Moving
        } else {
            MotionClass::Stationary
        };

        if self.last_class != Some(class) {
            self.moving_streak = 0;
            self.stationary_streak = 0;
            self.stationary_latched = false;
            self.streak_started_at = Some(sample.timestamp);
        }
        self.last_class = Some(class);

        match class {
            MotionClass::Moving => {
                self.moving_streak = self.moving_streak.saturating_add(1);
                if !self.motion_latched && self.moving_streak >= self.motion_required {
                    self.motion_latched = true;
                    return Some(GateSignal::SustainedMotion);
                }
            }
            MotionClass::Stationary => {
                self.stationary_streak = self.stationary_streak.saturating_add(1);
                if self.stationary_latched || self.stationary_streak < self.stationary_required {
                    return None;
                }
                if trip_active {
                    self.stationary_latched = true;
                    return Some(GateSignal::SustainedStationary);
                }
                if self.motion_latched {
                    self.stationary_latched = true;
                    self.motion_latched = false;
                    return Some(GateSignal::MotionCeased);
                }
            }
        }
        None
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.last_class = None;
        self.moving_streak = 0;
        self.stationary_streak = 0;
        self.streak_started_at = None;
        self.motion_latched = false;
        self.stationary_latched = false;
    }

    /// When the current same-class streak began.
    pub fn streak_started_at(&self) -> Option<DateTime<Utc>> {
        self.streak_started_at
    }

    pub fn moving_streak(&self) -> u32 {
        self.moving_streak
    }

    pub fn stationary_streak(&self) -> u32 {
        self.stationary_streak
    }

    pub fn motion_latched(&self) -> bool {
        self.motion_latched
    }

    pub fn rolling_average(&self) -> f64 {
        self.buffer.average()
    }

    pub fn buffer(&self) -> &MotionBuffer {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone};

    use super::*;

    fn sample(magnitude: f64, index: i64) -> MotionSample {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        MotionSample::new(magnitude, start + TimeDelta::milliseconds(200 * index))
    }

    fn feed(gate: &mut MotionGate, magnitudes: &[f64], trip_active: bool) -> Vec<GateSignal> {
        magnitudes.iter()
            .enumerate()
            .filter_map(|(i, m)| gate.observe(sample(*m, i as i64), trip_active))
            .collect()
    }

    #[test]
    fn low_motion_never_signals() {
        let mut gate = MotionGate::new(&EngineConfig::default());
        let magnitudes: Vec<f64> = (0..500).map(|i| (i % 8) as f64 * 0.1).collect();
        let signals = feed(&mut gate, &magnitudes, false);
        assert!(!signals.contains(&GateSignal::SustainedMotion));
    }

    #[test]
    fn sustained_motion_fires_once_at_the_required_count() {
        let mut gate = MotionGate::new(&EngineConfig::default());
        for i in 0..4 {
            assert_eq!(gate.observe(sample(0.9, i), false), None);
        }
        assert_eq!(gate.observe(sample(0.9, 4), false), Some(GateSignal::SustainedMotion));

        let later = feed(&mut gate, &[0.9; 50], false);
        assert!(later.is_empty());
    }

    #[test]
    fn fires_again_after_reset() {
        let mut gate = MotionGate::new(&EngineConfig::default());
        assert_eq!(feed(&mut gate, &[0.9; 5], false), vec![GateSignal::SustainedMotion]);
        gate.reset();
        assert_eq!(feed(&mut gate, &[0.9; 5], false), vec![GateSignal::SustainedMotion]);
    }

    #[test]
    fn flicker_resets_the_streak() {
        let mut gate = MotionGate::new(&EngineConfig {
            motion_window: 1,
            ..EngineConfig::default()
        });
        let signals = feed(&mut gate, &[0.9, 0.9, 0.9, 0.9, 0.1, 0.9, 0.9, 0.9, 0.9], false);
        assert!(signals.is_empty());
        assert_eq!(gate.moving_streak(), 4);
    }

    #[test]
    fn stationary_only_signals_during_a_trip() {
        let mut gate = MotionGate::new(&EngineConfig::default());
        feed(&mut gate, &[0.9; 5], true);
        let signals = feed(&mut gate, &[0.1; 10], true);
        assert_eq!(signals, vec![GateSignal::SustainedStationary]);

        // Still latched for the rest of the streak.
        assert!(feed(&mut gate, &[0.1; 30], true).is_empty());
    }

    #[test]
    fn motion_ceasing_outside_a_trip_clears_the_latch() {
        let mut gate = MotionGate::new(&EngineConfig::default());
        assert_eq!(feed(&mut gate, &[0.9; 5], false), vec![GateSignal::SustainedMotion]);
        assert_eq!(feed(&mut gate, &[0.1; 12], false), vec![GateSignal::MotionCeased]);
        assert!(!gate.motion_latched());
        assert_eq!(feed(&mut gate, &[1.5; 10], false), vec![GateSignal::SustainedMotion]);
    }

    #[test]
    fn streak_start_is_tracked() {
        let mut gate = MotionGate::new(&EngineConfig::default());
        gate.observe(sample(0.1, 0), false);
        gate.observe(sample(2.0, 1), false);
        assert_eq!(gate.streak_started_at(), Some(sample(0.0, 1).timestamp));
    }
}

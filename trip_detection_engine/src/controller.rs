use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use trip_detection_lib::{Location, MotionSample, PositionFix, Trip, TripEvent, TripId};

use crate::{
    accumulator::TripAccumulator,
    advisory::{MotionFeatures, RuleBasedAdvisor, TripAdvisor},
    buffer::{FixBuffer, FixInsert},
    duty_cycle::ExecutionContext,
    motion_gate::{GateSignal, MotionGate},
    snapshot::{CandidateSnapshot, Counters, DebugSnapshot},
    speed_validator::{SpeedValidator, SpeedVerdict, TripCandidate},
    DetectionError, EngineConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TripPhase {
    Idle,
    /// GPS is on and the candidate waits for speed confirmation.
    MotionPending,
    Active,
    /// The trip has ended and waits for a location to stamp its end.
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixPurpose {
    StartStamp,
    StopStamp,
}

/// What the controller needs the surrounding engine to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    RequestFix { generation: u64 },
    Emit(TripEvent),
}

#[derive(Debug, Clone, Copy)]
struct PendingFix {
    generation: u64,
    purpose: FixPurpose,
    trip_id: TripId,
    requested_at: DateTime<Utc>,
}

#[derive(Debug)]
struct StoppingTrip {
    accumulator: TripAccumulator,
    stop_time: DateTime<Utc>,
}

/// The trip state machine and every buffer and counter it depends on.
///
/// Never fails: every input maps to a (possibly empty) list of effects. Misuse, such as a
/// second start while a trip is active, is logged and counted.
pub struct TripLifecycleController {
    config: EngineConfig,
    phase: TripPhase,

    gate: MotionGate,
    validator: SpeedValidator,
    fixes: FixBuffer,

    candidate: Option<TripCandidate>,
    active: Option<TripAccumulator>,
    stopping: Option<StoppingTrip>,
    manual: bool,

    generation: u64,
    pending_fix: Option<PendingFix>,

    last_trip_id: TripId,
    counters: Counters,
    advisor: Box<dyn TripAdvisor>,
}

impl TripLifecycleController {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            phase: TripPhase::Idle,
            gate: MotionGate::new(&config),
            validator: SpeedValidator::new(&config),
            fixes: FixBuffer::new(config.retention(), config.fix_buffer_size),
            candidate: None,
            active: None,
            stopping: None,
            manual: false,
            generation: 0,
            pending_fix: None,
            last_trip_id: 0,
            counters: Counters::default(),
            advisor: Box::new(RuleBasedAdvisor),
            config,
        }
    }

    pub fn with_advisor(mut self, advisor: impl TripAdvisor + 'static) -> Self {
        self.advisor = Box::new(advisor);
        self
    }

    pub fn phase(&self) -> TripPhase {
        self.phase
    }

    pub fn is_manual(&self) -> bool {
        self.manual
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn active_trip(&self) -> Option<&Trip> {
        self.active.as_ref().map(|acc| acc.trip())
    }

    pub fn on_motion(&mut self, sample: MotionSample) -> Vec<Effect> {
        self.counters.samples_processed += 1;
        let mut effects = self.check_timeouts(sample.timestamp);

        let signal = self.gate.observe(sample, self.phase == TripPhase::Active);
        match signal {
            Some(GateSignal::SustainedMotion) => {
                if self.phase == TripPhase::Idle {
                    let motion_start = self.gate.streak_started_at().unwrap_or(sample.timestamp);
                    tracing::info!("Sustained motion since {}, waiting for GPS confirmation", motion_start);
                    self.candidate = Some(TripCandidate::new(motion_start, sample.timestamp));
                    self.phase = TripPhase::MotionPending;
                } else {
                    tracing::debug!("Sustained motion while {:?}", self.phase);
                }
            }
            Some(GateSignal::MotionCeased) => {
                if self.phase == TripPhase::MotionPending {
                    self.abandon_candidate("motion ceased");
                }
            }
            Some(GateSignal::SustainedStationary) => {
                if self.phase == TripPhase::Active {
                    if self.manual {
                        self.counters.suppressed_auto_stops += 1;
                        tracing::debug!("Stationary, but the trip was started manually");
                    } else {
                        tracing::info!("Sustained stationary, ending trip");
                        effects.extend(self.begin_stop(sample.timestamp));
                    }
                }
            }
            None => {}
        }

        effects
    }

    pub fn on_position(&mut self, fix: PositionFix) -> Vec<Effect> {
        if !self.fix_usable(&fix) {
            self.counters.fixes_rejected += 1;
            tracing::debug!("Rejected fix with accuracy {} m at {}", fix.accuracy_m, fix.timestamp);
            return Vec::new();
        }
        if self.fixes.push(fix) == FixInsert::Stale {
            self.counters.stale_fixes_dropped += 1;
            tracing::debug!("Dropped stale fix from {}", fix.timestamp);
            return Vec::new();
        }
        self.counters.fixes_processed += 1;

        let mut effects = self.check_timeouts(fix.timestamp);

        match self.phase {
            TripPhase::MotionPending => {
                let Some(candidate) = self.candidate.as_mut() else {
                    return self.invariant_violation("MotionPending without a candidate");
                };
                match self.validator.observe(candidate, &fix) {
                    SpeedVerdict::Confirmed(kind) => {
                        tracing::info!("Trip confirmed by GPS ({:?})", kind);
                        effects.extend(self.activate_candidate(fix.timestamp));
                    }
                    SpeedVerdict::WindowReset => tracing::debug!("Speed window reset at {}", fix.timestamp),
                    SpeedVerdict::Tracking | SpeedVerdict::BelowThreshold => {}
                }
            }
            TripPhase::Active => {
                if let Some(acc) = self.active.as_mut() {
                    let awaiting_start = self.pending_fix
                        .filter(|pending| pending.purpose == FixPurpose::StartStamp && pending.trip_id == acc.trip().trip_id);
                    if let Some(pending) = awaiting_start {
                        self.pending_fix = None;
                        let start_pos = Location::from(&fix);
                        acc.set_start_pos(start_pos);
                        effects.push(Effect::Emit(TripEvent::StartPositionUpdated { trip_id: pending.trip_id, start_pos }));
                    }
                    if acc.append(fix) {
                        effects.push(Effect::Emit(TripEvent::ActiveTripProgress(acc.progress())));
                    } else {
                        tracing::debug!("Fix at {} is older than the trip path", fix.timestamp);
                    }
                }
            }
            TripPhase::Stopping => {
                if self.pending_fix.is_some_and(|pending| pending.purpose == FixPurpose::StopStamp) {
                    // A streamed fix answers the outstanding request.
                    self.pending_fix = None;
                    effects.extend(self.complete_stop(Location::from(&fix)));
                }
            }
            TripPhase::Idle => {}
        }

        effects
    }

    /// Result of a one-shot fix request. Results from superseded requests are dropped.
    pub fn on_fix_result(&mut self, generation: u64, result: Result<PositionFix, DetectionError>) -> Vec<Effect> {
        let Some(pending) = self.pending_fix.filter(|pending| pending.generation == generation) else {
            self.counters.superseded_fix_results += 1;
            tracing::debug!("Discarding fix result from superseded request {}", generation);
            return Vec::new();
        };
        self.pending_fix = None;

        let location = match result {
            Ok(fix) if self.fix_usable(&fix) => {
                self.fixes.push(fix);
                Location::from(&fix)
            }
            Ok(fix) => {
                tracing::warn!("One-shot fix too inaccurate ({} m), using placeholder", fix.accuracy_m);
                Location::Unknown
            }
            Err(err) => {
                tracing::warn!("No fix for {:?}: {}", pending.purpose, err);
                Location::Unknown
            }
        };

        match pending.purpose {
            FixPurpose::StartStamp => {
                let Some(acc) = self.active.as_mut().filter(|acc| acc.trip().trip_id == pending.trip_id) else {
                    return Vec::new();
                };
                if !location.is_known() {
                    return Vec::new();
                }
                acc.set_start_pos(location);
                vec![Effect::Emit(TripEvent::StartPositionUpdated {
                    trip_id: pending.trip_id,
                    start_pos: location,
                })]
            }
            FixPurpose::StopStamp => self.complete_stop(location),
        }
    }

    pub fn on_tick(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        let mut effects = self.check_timeouts(now);
        if let Some(acc) = self.active.as_ref() {
            effects.push(Effect::Emit(TripEvent::ActiveTripProgress(acc.progress())));
        }
        effects
    }

    pub fn record_sensor_error(&mut self) {
        self.counters.sensor_errors += 1;
    }

    pub fn manual_start(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        if matches!(self.phase, TripPhase::Active | TripPhase::Stopping) {
            return self.invariant_violation(&format!("Manual start ignored while {:?}", self.phase));
        }

        let candidate = self.candidate.take();
        let start_time = candidate.as_ref().map_or(now, |candidate| candidate.motion_start_time.min(now));
        let seed = candidate.map(|candidate| candidate.tracked_fixes).unwrap_or_default();

        let start_fix = seed.first().copied()
            .or_else(|| self.fixes.latest_within(now, self.config.fix_timeout()).copied());
        let start_pos = start_fix.as_ref().map_or(Location::Unknown, Location::from);

        let trip = self.new_trip(start_time, start_pos, true);
        let trip_id = trip.trip_id;
        let mut acc = TripAccumulator::open(trip, self.config.max_path_points);
        for fix in seed {
            acc.append(fix);
        }
        acc.touch(now);

        tracing::info!("Trip {} started manually at {}", trip_id, start_pos);
        self.manual = true;
        let mut effects = self.open_trip(acc);
        if !start_pos.is_known() {
            effects.push(self.request_fix(FixPurpose::StartStamp, trip_id, now));
        }
        effects
    }

    pub fn manual_stop(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        match self.phase {
            TripPhase::Idle => {
                tracing::debug!("Manual stop ignored, no trip");
                Vec::new()
            }
            TripPhase::MotionPending => {
                self.abandon_candidate("manual stop");
                Vec::new()
            }
            TripPhase::Active => {
                tracing::info!("Trip stopped manually");
                self.begin_stop(now)
            }
            TripPhase::Stopping => {
                tracing::debug!("Manual stop ignored, trip already stopping");
                Vec::new()
            }
        }
    }

    /// Monitoring is going away. Any trip is finished with what is known and handed off.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        self.generation += 1;
        self.pending_fix = None;

        let effects = match self.phase {
            TripPhase::Active => match self.active.take() {
                Some(accumulator) => {
                    let end_pos = accumulator.last_fix().map_or(Location::Unknown, Location::from);
                    self.stopping = Some(StoppingTrip { accumulator, stop_time: now });
                    self.complete_stop(end_pos)
                }
                None => Vec::new(),
            },
            TripPhase::Stopping => self.complete_stop(Location::Unknown),
            TripPhase::Idle | TripPhase::MotionPending => Vec::new(),
        };

        self.reset_to_idle();
        effects
    }

    pub fn snapshot(&self, monitoring: bool, context: ExecutionContext, gps_running: bool) -> DebugSnapshot {
        let advisory = MotionFeatures::extract(
            &self.gate.buffer().magnitudes(),
            &self.fixes.recent_speeds(TimeDelta::seconds(60)),
        ).map(|features| self.advisor.advise(&features));

        DebugSnapshot {
            monitoring,
            context,
            gps_running,
            phase: self.phase,
            manual_override: self.manual,
            rolling_average: self.gate.rolling_average(),
            moving_streak: self.gate.moving_streak(),
            stationary_streak: self.gate.stationary_streak(),
            motion_latched: self.gate.motion_latched(),
            buffered_samples: self.gate.buffer().len(),
            buffered_fixes: self.fixes.len(),
            candidate: self.candidate.as_ref().map(|candidate| CandidateSnapshot {
                motion_start_time: candidate.motion_start_time,
                speed_track_start_time: candidate.speed_track_start_time,
                accumulated_distance_m: candidate.accumulated_distance_m,
                tracked_fixes: candidate.tracked_fixes.len(),
            }),
            active_trip: self.active.as_ref().map(|acc| acc.progress()),
            active_path_points: self.active.as_ref().map_or(0, |acc| acc.trip().path_log.len()),
            fix_generation: self.generation,
            pending_fix: self.pending_fix.map(|pending| pending.purpose),
            counters: self.counters,
            advisory,
        }
    }

    fn fix_usable(&self, fix: &PositionFix) -> bool {
        fix.has_valid_coordinates()
            && fix.speed_kmh >= 0.0
            && fix.accuracy_m <= self.config.max_fix_accuracy_meters
    }

    fn check_timeouts(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        self.fixes.prune(now);

        match self.phase {
            TripPhase::MotionPending => {
                let expired = self.candidate.as_ref()
                    .is_some_and(|candidate| now - candidate.gps_requested_at >= self.config.idle_timeout());
                if expired {
                    self.abandon_candidate("GPS idle timeout");
                }
                Vec::new()
            }
            TripPhase::Active => {
                if let Some(acc) = self.active.as_mut() {
                    acc.touch(now);
                }
                Vec::new()
            }
            TripPhase::Stopping => {
                let expired = self.pending_fix.is_some_and(|pending| {
                    pending.purpose == FixPurpose::StopStamp && now - pending.requested_at >= self.config.fix_timeout()
                });
                if !expired {
                    return Vec::new();
                }
                tracing::warn!("{}", DetectionError::GpsFixTimeout(self.config.gps_fix_timeout));
                self.pending_fix = None;
                self.complete_stop(Location::Unknown)
            }
            TripPhase::Idle => Vec::new(),
        }
    }

    fn activate_candidate(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        let Some(candidate) = self.candidate.take() else {
            return self.invariant_violation("Confirmation without a candidate");
        };

        let start_pos = candidate.first_fix().map_or(Location::Unknown, Location::from);
        let trip = self.new_trip(candidate.motion_start_time, start_pos, false);
        let mut acc = TripAccumulator::open(trip, self.config.max_path_points);
        for fix in candidate.tracked_fixes {
            acc.append(fix);
        }
        acc.touch(now);

        tracing::info!("Trip {} started at {}", acc.trip().trip_id, start_pos);
        self.manual = false;
        self.open_trip(acc)
    }

    fn open_trip(&mut self, acc: TripAccumulator) -> Vec<Effect> {
        let trip = acc.trip();
        let started = TripEvent::TripStarted {
            trip_id: trip.trip_id,
            start_time: trip.start_time,
            start_pos: trip.start_pos,
            manual: trip.manual,
        };

        self.active = Some(acc);
        self.phase = TripPhase::Active;
        self.counters.trips_started += 1;
        vec![Effect::Emit(started)]
    }

    fn begin_stop(&mut self, now: DateTime<Utc>) -> Vec<Effect> {
        let Some(accumulator) = self.active.take() else {
            return self.invariant_violation("Active without a trip");
        };
        let trip_id = accumulator.trip().trip_id;
        let fix_timeout = self.config.fix_timeout();

        let end_fix = accumulator.last_fix()
            .filter(|fix| now - fix.timestamp <= fix_timeout)
            .or_else(|| self.fixes.latest_within(now, fix_timeout))
            .copied();

        self.phase = TripPhase::Stopping;
        self.stopping = Some(StoppingTrip { accumulator, stop_time: now });

        match end_fix {
            Some(fix) => self.complete_stop(Location::from(&fix)),
            None => {
                tracing::info!("No fresh fix at the end of trip {}, requesting one", trip_id);
                vec![self.request_fix(FixPurpose::StopStamp, trip_id, now)]
            }
        }
    }

    fn complete_stop(&mut self, end_pos: Location) -> Vec<Effect> {
        let Some(StoppingTrip { accumulator, stop_time }) = self.stopping.take() else {
            return self.invariant_violation("Stop completed without a stopping trip");
        };

        let trip = accumulator.finalize(stop_time, end_pos);
        tracing::info!(
            "Trip {} ended at {}: {:.3} km in {:.0} s, {} points",
            trip.trip_id, end_pos, trip.distance_km, trip.duration_sec, trip.path_log.len()
        );

        self.counters.trips_ended += 1;
        self.reset_to_idle();
        vec![Effect::Emit(TripEvent::TripEnded(trip))]
    }

    fn abandon_candidate(&mut self, reason: &str) {
        if self.candidate.take().is_some() {
            tracing::info!("Motion candidate dropped: {}", reason);
        }
        self.phase = TripPhase::Idle;
    }

    fn reset_to_idle(&mut self) {
        self.phase = TripPhase::Idle;
        self.candidate = None;
        self.active = None;
        self.stopping = None;
        self.pending_fix = None;
        self.manual = false;
        self.gate.reset();
        self.fixes.clear();
    }

    fn request_fix(&mut self, purpose: FixPurpose, trip_id: TripId, now: DateTime<Utc>) -> Effect {
        self.generation += 1;
        self.pending_fix = Some(PendingFix {
            generation: self.generation,
            purpose,
            trip_id,
            requested_at: now,
        });
        Effect::RequestFix { generation: self.generation }
    }

    fn new_trip(&mut self, start_time: DateTime<Utc>, start_pos: Location, manual: bool) -> Trip {
        let trip_id = start_time.timestamp_millis().max(self.last_trip_id + 1);
        self.last_trip_id = trip_id;
        Trip::new(trip_id, start_time, start_pos, manual)
    }

    fn invariant_violation(&mut self, message: &str) -> Vec<Effect> {
        self.counters.invariant_violations += 1;
        tracing::warn!("{}", DetectionError::InvariantViolation(message.to_string()));
        Vec::new()
    }
}

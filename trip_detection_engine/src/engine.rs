use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::{
    sync::{mpsc::{self, error::TryRecvError}, oneshot},
    time::{self, Instant, Interval, MissedTickBehavior},
};
use trip_detection_lib::{AccelReading, MotionSample, PositionFix, TripEvent};

use crate::{
    advisory::TripAdvisor,
    config::delta,
    controller::{Effect, TripLifecycleController},
    duty_cycle::{DutyCyclePolicy, ExecutionContext, MotionGatedPolicy},
    sensors::{FixProvider, MotionSource, PositionSource, SensorReading},
    snapshot::DebugSnapshot,
    DetectionError, EngineConfig,
};

const COMMAND_BUFFER: usize = 32;
const FIX_RESULT_BUFFER: usize = 8;

type Reply<T> = oneshot::Sender<T>;
type FixResult = (u64, Result<PositionFix, DetectionError>);

enum Command {
    StartMonitoring(Reply<Result<(), DetectionError>>),
    StopMonitoring(Reply<()>),
    ManualStart(Reply<Result<(), DetectionError>>),
    ManualStop(Reply<()>),
    AppState(ExecutionContext, Reply<()>),
    Snapshot(Reply<DebugSnapshot>),
    Shutdown(Reply<()>),
}

enum SensorEvent {
    Motion(SensorReading<AccelReading>),
    Position(SensorReading<PositionFix>),
    MotionClosed,
    PositionClosed,
}

/// Builder for the detection actor. Nothing runs until [`Engine::spawn`].
pub struct Engine {
    gps_fix_timeout: Duration,
    controller: TripLifecycleController,
    motion: Box<dyn MotionSource>,
    position: Box<dyn PositionSource>,
    fix_provider: Arc<dyn FixProvider>,
    policy: Box<dyn DutyCyclePolicy>,
    context: ExecutionContext,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        motion: impl MotionSource + 'static,
        position: impl PositionSource + 'static,
        fix_provider: Arc<dyn FixProvider>,
    ) -> Result<Self, DetectionError> {
        config.validate()?;

        Ok(Self {
            gps_fix_timeout: config.gps_fix_timeout,
            controller: TripLifecycleController::new(config),
            motion: Box::new(motion),
            position: Box::new(position),
            fix_provider,
            policy: Box::new(MotionGatedPolicy),
            context: ExecutionContext::Foreground,
        })
    }

    pub fn with_policy(mut self, policy: impl DutyCyclePolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn with_advisor(mut self, advisor: impl TripAdvisor + 'static) -> Self {
        self.controller = self.controller.with_advisor(advisor);
        self
    }

    /// The context the engine believes it starts in, until told otherwise.
    pub fn with_context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }

    /// Starts the actor on the current tokio runtime.
    pub fn spawn(self) -> (EngineHandle, mpsc::UnboundedReceiver<TripEvent>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (fix_tx, fix_rx) = mpsc::channel(FIX_RESULT_BUFFER);

        let actor = EngineActor {
            gps_fix_timeout: self.gps_fix_timeout,
            controller: self.controller,
            motion: self.motion,
            position: self.position,
            fix_provider: self.fix_provider,
            policy: self.policy,
            context: self.context,
            monitoring: false,
            owner: None,
            motion_rx: None,
            position_rx: None,
            motion_head: None,
            position_head: None,
            gps_running: false,
            gps_backoff: false,
            events: event_tx,
            fix_tx,
            clock: SensorClock::default(),
        };

        tokio::spawn(actor.run(command_rx, fix_rx));
        (EngineHandle { commands: command_tx }, event_rx)
    }
}

/// Cheap, cloneable access to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
}

impl EngineHandle {
    /// Subscribes to motion in the current execution context.
    /// A `PermissionDenied` here leaves monitoring off.
    pub async fn start_monitoring(&self) -> Result<(), DetectionError> {
        self.request(Command::StartMonitoring).await?
    }

    /// Cancels every subscription and finishes any trip in progress. Idempotent.
    pub async fn stop_monitoring(&self) -> Result<(), DetectionError> {
        self.request(Command::StopMonitoring).await
    }

    pub async fn manual_start(&self) -> Result<(), DetectionError> {
        self.request(Command::ManualStart).await?
    }

    pub async fn manual_stop(&self) -> Result<(), DetectionError> {
        self.request(Command::ManualStop).await
    }

    pub async fn set_app_state(&self, context: ExecutionContext) -> Result<(), DetectionError> {
        self.request(|reply| Command::AppState(context, reply)).await
    }

    pub async fn snapshot(&self) -> Result<DebugSnapshot, DetectionError> {
        self.request(Command::Snapshot).await
    }

    pub async fn shutdown(&self) -> Result<(), DetectionError> {
        self.request(Command::Shutdown).await
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> Command) -> Result<T, DetectionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands.send(command(reply_tx)).await
            .map_err(|_| DetectionError::EngineStopped)?;
        reply_rx.await.map_err(|_| DetectionError::EngineStopped)
    }
}

/// Wall-clock estimate anchored on the newest sensor timestamp.
#[derive(Debug, Default)]
struct SensorClock {
    anchor: Option<(DateTime<Utc>, Instant)>,
}

impl SensorClock {
    fn observe(&mut self, timestamp: DateTime<Utc>) {
        if self.anchor.map_or(true, |(anchor, _)| timestamp >= anchor) {
            self.anchor = Some((timestamp, Instant::now()));
        }
    }

    fn now(&self) -> DateTime<Utc> {
        match self.anchor {
            Some((timestamp, at)) => timestamp + delta(at.elapsed()),
            None => Utc::now(),
        }
    }
}

struct EngineActor {
    gps_fix_timeout: Duration,
    controller: TripLifecycleController,
    motion: Box<dyn MotionSource>,
    position: Box<dyn PositionSource>,
    fix_provider: Arc<dyn FixProvider>,
    policy: Box<dyn DutyCyclePolicy>,

    context: ExecutionContext,
    monitoring: bool,
    /// The context currently holding the sensor subscriptions, if any.
    owner: Option<ExecutionContext>,
    motion_rx: Option<mpsc::Receiver<SensorReading<AccelReading>>>,
    position_rx: Option<mpsc::Receiver<SensorReading<PositionFix>>>,
    /// Readings taken off a stream but not yet processed.
    motion_head: Option<SensorReading<AccelReading>>,
    position_head: Option<SensorReading<PositionFix>>,
    gps_running: bool,
    /// Set when GPS failed to start. Cleared on the next tick.
    gps_backoff: bool,

    events: mpsc::UnboundedSender<TripEvent>,
    fix_tx: mpsc::Sender<FixResult>,
    clock: SensorClock,
}

impl EngineActor {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>, mut fix_results: mpsc::Receiver<FixResult>) {
        tracing::info!("Trip detection engine started");
        let mut ticker = new_ticker(self.policy.tick_interval(self.context));
        let mut tick_context = self.context;

        loop {
            if tick_context != self.context {
                tick_context = self.context;
                ticker = new_ticker(self.policy.tick_interval(self.context));
            }

            tokio::select! {
                biased;

                Some((generation, result)) = fix_results.recv() => {
                    let effects = self.controller.on_fix_result(generation, result);
                    self.apply(effects);
                }
                event = self.next_sensor_event() => match event {
                    SensorEvent::Motion(reading) => self.on_motion(reading).await,
                    SensorEvent::Position(reading) => self.on_position(reading).await,
                    SensorEvent::MotionClosed => self.motion_closed().await,
                    SensorEvent::PositionClosed => self.position_closed().await,
                },
                command = commands.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        self.stop_monitoring().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.stop_monitoring().await;
                        break;
                    }
                },
                _ = ticker.tick() => self.on_tick().await,
            }

            self.reconcile_position().await;
        }

        tracing::info!("Trip detection engine stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartMonitoring(reply) => {
                let result = self.start_monitoring().await;
                let _ = reply.send(result);
            }
            Command::StopMonitoring(reply) => {
                self.stop_monitoring().await;
                let _ = reply.send(());
            }
            Command::ManualStart(reply) => {
                let result = self.manual_start().await;
                let _ = reply.send(result);
            }
            Command::ManualStop(reply) => {
                if self.monitoring {
                    let effects = self.controller.manual_stop(self.clock.now());
                    self.apply(effects);
                }
                let _ = reply.send(());
            }
            Command::AppState(context, reply) => {
                self.set_context(context).await;
                let _ = reply.send(());
            }
            Command::Snapshot(reply) => {
                let snapshot = self.controller.snapshot(self.monitoring, self.context, self.gps_running);
                let _ = reply.send(snapshot);
            }
            Command::Shutdown(reply) => {
                let _ = reply.send(());
            }
        }
    }

    async fn start_monitoring(&mut self) -> Result<(), DetectionError> {
        if self.monitoring {
            tracing::debug!("Monitoring already running");
            return Ok(());
        }

        if let Err(err) = self.subscribe(self.context).await {
            self.controller.record_sensor_error();
            tracing::error!("Failed to start monitoring: {}", err);
            return Err(err);
        }

        self.monitoring = true;
        tracing::info!("Monitoring started in {:?}", self.context);
        Ok(())
    }

    async fn stop_monitoring(&mut self) {
        if !self.monitoring {
            tracing::debug!("Monitoring already stopped");
            return;
        }

        let effects = self.controller.cancel(self.clock.now());
        self.apply(effects);
        self.release().await;
        self.monitoring = false;
        tracing::info!("Monitoring stopped");
    }

    /// Stops everything after a fatal sensor error and tells the listener why.
    async fn halt(&mut self, reason: String) {
        self.stop_monitoring().await;
        self.emit(TripEvent::MonitoringHalted { reason });
    }

    async fn manual_start(&mut self) -> Result<(), DetectionError> {
        self.start_monitoring().await?;
        let effects = self.controller.manual_start(self.clock.now());
        self.apply(effects);
        Ok(())
    }

    async fn set_context(&mut self, context: ExecutionContext) {
        if context == self.context {
            return;
        }
        tracing::info!("Execution context {:?} -> {:?}", self.context, context);
        self.context = context;

        if !self.monitoring {
            return;
        }

        // The old owner lets go of every sensor before the new one subscribes.
        self.release().await;
        if let Err(err) = self.subscribe(context).await {
            self.sensor_error(err).await;
        }
    }

    async fn subscribe(&mut self, context: ExecutionContext) -> Result<(), DetectionError> {
        if let Some(owner) = self.owner {
            tracing::warn!("{}", DetectionError::InvariantViolation(format!("{:?} still owns the sensors", owner)));
            self.release().await;
        }

        let settings = self.policy.motion_settings(context);
        let receiver = self.motion.subscribe(settings).await?;
        self.motion_rx = Some(receiver);
        self.owner = Some(context);
        tracing::debug!("Motion subscribed for {:?} every {:?}", context, settings.sample_interval);
        Ok(())
    }

    async fn release(&mut self) {
        self.stop_gps().await;
        if let Some(owner) = self.owner.take() {
            self.motion.unsubscribe().await;
            tracing::debug!("Motion released by {:?}", owner);
        }
        self.motion_rx = None;
        self.motion_head = None;
    }

    /// Turns GPS on or off to match what the policy wants for the current phase.
    async fn reconcile_position(&mut self) {
        let wanted = self.monitoring
            && self.owner.is_some()
            && self.policy.position_wanted(self.controller.phase());

        if wanted && !self.gps_running && !self.gps_backoff {
            let filter = self.policy.position_filter(self.context);
            match self.position.start(filter).await {
                Ok(receiver) => {
                    self.position_rx = Some(receiver);
                    self.gps_running = true;
                    tracing::debug!("GPS started ({:?}, {} m)", filter.accuracy, filter.distance_filter_m);
                }
                Err(err) => {
                    self.gps_backoff = true;
                    self.sensor_error(err).await;
                }
            }
        } else if !wanted && self.gps_running {
            self.stop_gps().await;
        }
    }

    async fn stop_gps(&mut self) {
        if self.gps_running {
            self.position.stop().await;
            self.gps_running = false;
            tracing::debug!("GPS stopped");
        }
        self.position_rx = None;
        self.position_head = None;
    }

    /// The next reading from either stream. When both have one queued the older
    /// timestamp goes first, so a fix is never overtaken by later motion.
    /// Cancel safe: a received reading is parked in its head slot before anything else awaits.
    async fn next_sensor_event(&mut self) -> SensorEvent {
        loop {
            if let Some(event) = self.take_oldest_head() {
                return event;
            }

            tokio::select! {
                reading = recv_opt(&mut self.motion_rx) => match reading {
                    Some(reading) => self.motion_head = Some(reading),
                    None => return SensorEvent::MotionClosed,
                },
                reading = recv_opt(&mut self.position_rx) => match reading {
                    Some(reading) => self.position_head = Some(reading),
                    None => return SensorEvent::PositionClosed,
                },
            }
        }
    }

    fn take_oldest_head(&mut self) -> Option<SensorEvent> {
        if self.motion_head.is_none() {
            self.motion_head = try_recv_opt(&mut self.motion_rx);
        }
        if self.position_head.is_none() {
            self.position_head = try_recv_opt(&mut self.position_rx);
        }

        let motion_first = match (&self.motion_head, &self.position_head) {
            (None, None) => return None,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            // Errors carry no timestamp and are handled as soon as they surface.
            (Some(Err(_)), _) => true,
            (_, Some(Err(_))) => false,
            (Some(Ok(reading)), Some(Ok(fix))) => reading.timestamp <= fix.timestamp,
        };

        if motion_first {
            self.motion_head.take().map(SensorEvent::Motion)
        } else {
            self.position_head.take().map(SensorEvent::Position)
        }
    }

    async fn on_motion(&mut self, reading: SensorReading<AccelReading>) {
        match reading {
            Ok(reading) => {
                self.clock.observe(reading.timestamp);
                let effects = self.controller.on_motion(MotionSample::from(reading));
                self.apply(effects);
            }
            Err(err) => self.sensor_error(DetectionError::from_sensor(err, "accelerometer")).await,
        }
    }

    async fn on_position(&mut self, reading: SensorReading<PositionFix>) {
        match reading {
            Ok(fix) => {
                self.clock.observe(fix.timestamp);
                let effects = self.controller.on_position(fix);
                self.apply(effects);
            }
            Err(err) => self.sensor_error(DetectionError::from_sensor(err, "location")).await,
        }
    }

    async fn on_tick(&mut self) {
        self.gps_backoff = false;

        if self.monitoring && self.owner.is_none() {
            tracing::debug!("Resubscribing motion");
            if let Err(err) = self.subscribe(self.context).await {
                self.sensor_error(err).await;
            }
        }

        let effects = self.controller.on_tick(self.clock.now());
        self.apply(effects);
    }

    async fn motion_closed(&mut self) {
        tracing::warn!("Motion stream closed");
        self.motion_rx = None;
        if self.owner.take().is_some() {
            self.motion.unsubscribe().await;
        }
    }

    async fn position_closed(&mut self) {
        tracing::warn!("Position stream closed");
        self.stop_gps().await;
    }

    async fn sensor_error(&mut self, err: DetectionError) {
        self.controller.record_sensor_error();
        if err.is_permission_denied() {
            tracing::error!("{}, halting monitoring", err);
            self.halt(err.to_string()).await;
        } else {
            tracing::warn!("{}", err);
        }
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Emit(event) => self.emit(event),
                Effect::RequestFix { generation } => self.request_fix(generation),
            }
        }
    }

    fn emit(&self, event: TripEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("No one is listening for trip events");
        }
    }

    /// Fire and forget. The result comes back through the fix-result channel tagged with its generation.
    fn request_fix(&self, generation: u64) {
        let provider = self.fix_provider.clone();
        let results = self.fix_tx.clone();
        let limit = self.gps_fix_timeout;

        tokio::spawn(async move {
            let result = match time::timeout(limit, provider.current_fix()).await {
                Ok(Ok(fix)) => Ok(fix),
                Ok(Err(err)) => Err(DetectionError::from_sensor(err, "one-shot fix")),
                Err(_) => Err(DetectionError::GpsFixTimeout(limit)),
            };
            if results.send((generation, result)).await.is_err() {
                tracing::debug!("Engine gone before fix request {} finished", generation);
            }
        });
    }
}

fn new_ticker(period: Duration) -> Interval {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn recv_opt<T>(receiver: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match receiver {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

/// Whatever is already queued. A closed stream is left for `recv_opt` to report.
fn try_recv_opt<T>(receiver: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match receiver.as_mut()?.try_recv() {
        Ok(item) => Some(item),
        Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
    }
}

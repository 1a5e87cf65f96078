use std::{sync::{Arc, Mutex, MutexGuard}, time::Duration};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use trip_detection_lib::{motion_sample::STANDARD_GRAVITY, AccelReading, PositionFix, SensorError};

use crate::{
    duty_cycle::{MotionSettings, PositionFilter},
    sensors::{FixProvider, MotionSource, PositionSource, SensorReading},
    DetectionError,
};

#[derive(Default)]
struct RigState {
    motion_tx: Option<mpsc::Sender<SensorReading<AccelReading>>>,
    position_tx: Option<mpsc::Sender<SensorReading<PositionFix>>>,
    calls: Vec<String>,
    active_subscriptions: usize,
    max_concurrent_subscriptions: usize,
    deny_motion: bool,
    one_shot: Option<SensorReading<PositionFix>>,
    one_shot_delay: Duration,
}

/// Fake sensors sharing one recorder, so tests can push readings and inspect what the engine asked for.
#[derive(Clone, Default)]
pub struct SensorRig {
    state: Arc<Mutex<RigState>>,
}

impl SensorRig {
    pub fn motion_source(&self) -> MockMotionSource {
        MockMotionSource { rig: self.clone() }
    }

    pub fn position_source(&self) -> MockPositionSource {
        MockPositionSource { rig: self.clone() }
    }

    pub fn fix_provider(&self) -> Arc<dyn FixProvider> {
        Arc::new(MockFixProvider { rig: self.clone() })
    }

    pub fn deny_motion(&self) {
        self.lock().deny_motion = true;
    }

    /// What the one-shot provider answers. Without one it never answers.
    pub fn set_one_shot(&self, reading: SensorReading<PositionFix>) {
        self.lock().one_shot = Some(reading);
    }

    /// Like `set_one_shot`, but the answer only comes after `delay`.
    pub fn set_slow_one_shot(&self, reading: SensorReading<PositionFix>, delay: Duration) {
        let mut state = self.lock();
        state.one_shot = Some(reading);
        state.one_shot_delay = delay;
    }

    /// A reading whose net magnitude is `magnitude`.
    pub async fn send_motion(&self, magnitude: f64, timestamp: DateTime<Utc>) {
        self.send_motion_reading(Ok(AccelReading::new(0.0, 0.0, STANDARD_GRAVITY + magnitude, timestamp))).await;
    }

    pub async fn send_motion_error(&self, error: SensorError) {
        self.send_motion_reading(Err(error)).await;
    }

    pub async fn send_fix(&self, fix: PositionFix) {
        let sender = self.lock().position_tx.clone().expect("GPS is not running");
        sender.send(Ok(fix)).await.expect("engine dropped the position stream");
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.lock().active_subscriptions
    }

    pub fn max_concurrent_subscriptions(&self) -> usize {
        self.lock().max_concurrent_subscriptions
    }

    async fn send_motion_reading(&self, reading: SensorReading<AccelReading>) {
        let sender = self.lock().motion_tx.clone().expect("motion is not subscribed");
        sender.send(reading).await.expect("engine dropped the motion stream");
    }

    fn lock(&self) -> MutexGuard<'_, RigState> {
        self.state.lock().expect("rig state poisoned")
    }
}

pub struct MockMotionSource {
    rig: SensorRig,
}

#[async_trait::async_trait]
impl MotionSource for MockMotionSource {
    async fn subscribe(&mut self, settings: MotionSettings) -> Result<mpsc::Receiver<SensorReading<AccelReading>>, DetectionError> {
        let mut state = self.rig.lock();
        if state.deny_motion {
            return Err(DetectionError::PermissionDenied("accelerometer".to_string()));
        }

        let (tx, rx) = mpsc::channel(64);
        state.motion_tx = Some(tx);
        state.calls.push(format!("motion.subscribe({}ms)", settings.sample_interval.as_millis()));
        state.active_subscriptions += 1;
        state.max_concurrent_subscriptions = state.max_concurrent_subscriptions.max(state.active_subscriptions);
        Ok(rx)
    }

    async fn unsubscribe(&mut self) {
        let mut state = self.rig.lock();
        state.motion_tx = None;
        state.calls.push("motion.unsubscribe".to_string());
        state.active_subscriptions = state.active_subscriptions.saturating_sub(1);
    }
}

pub struct MockPositionSource {
    rig: SensorRig,
}

#[async_trait::async_trait]
impl PositionSource for MockPositionSource {
    async fn start(&mut self, filter: PositionFilter) -> Result<mpsc::Receiver<SensorReading<PositionFix>>, DetectionError> {
        let mut state = self.rig.lock();
        let (tx, rx) = mpsc::channel(64);
        state.position_tx = Some(tx);
        state.calls.push(format!("position.start({:?})", filter.accuracy));
        Ok(rx)
    }

    async fn stop(&mut self) {
        let mut state = self.rig.lock();
        state.position_tx = None;
        state.calls.push("position.stop".to_string());
    }
}

struct MockFixProvider {
    rig: SensorRig,
}

#[async_trait::async_trait]
impl FixProvider for MockFixProvider {
    async fn current_fix(&self) -> SensorReading<PositionFix> {
        let (answer, delay) = {
            let state = self.rig.lock();
            (state.one_shot, state.one_shot_delay)
        };
        match answer {
            Some(reading) => {
                tokio::time::sleep(delay).await;
                reading
            }
            None => std::future::pending().await,
        }
    }
}

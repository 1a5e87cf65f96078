use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use trip_detection_engine::{DetectionError, FixProvider, MotionSettings, MotionSource, PositionFilter, PositionSource, SensorReading};
use trip_detection_lib::{
    comms::{DeviceFrame, SensorKind, COMMAND_FIX_REQUEST, COMMAND_GPS_OFF, COMMAND_GPS_ON},
    AccelReading, PositionFix, SensorError,
};

const SENSOR_BUFFER: usize = 256;
const COMMAND_BUFFER: usize = 16;

#[derive(Default)]
struct HubState {
    motion_tx: Option<mpsc::Sender<SensorReading<AccelReading>>>,
    position_tx: Option<mpsc::Sender<SensorReading<PositionFix>>>,
    device: Option<(DeviceLease, mpsc::Sender<u8>)>,
    next_lease: u64,
    gps_wanted: bool,
}

/// Marks one device connection. Detaching with an old lease leaves a newer device in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLease(u64);

/// Joins the connected tracker device to the engine's sensor seams.
#[derive(Clone)]
pub struct DeviceHub {
    state: Arc<Mutex<HubState>>,
    latest_fix: Arc<watch::Sender<Option<PositionFix>>>,
}

impl DeviceHub {
    pub fn new() -> Self {
        let (latest_fix, _) = watch::channel(None);
        Self {
            state: Arc::new(Mutex::new(HubState::default())),
            latest_fix: Arc::new(latest_fix),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.device.as_ref().is_some_and(|(_, device)| !device.is_closed())
    }

    /// Registers a device and returns its lease and the commands it should receive.
    pub async fn attach(&self) -> (DeviceLease, mpsc::Receiver<u8>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let mut state = self.state.lock().await;
        if state.gps_wanted && tx.try_send(COMMAND_GPS_ON).is_err() {
            tracing::warn!("Could not queue GPS_ON for the new device");
        }
        state.next_lease += 1;
        let lease = DeviceLease(state.next_lease);
        state.device = Some((lease, tx));
        (lease, rx)
    }

    pub async fn detach(&self, lease: DeviceLease) {
        let mut state = self.state.lock().await;
        if state.device.as_ref().is_some_and(|(current, _)| *current == lease) {
            state.device = None;
        } else {
            tracing::debug!("{:?} was already replaced", lease);
        }
    }

    pub async fn dispatch(&self, frame: DeviceFrame) {
        match frame {
            DeviceFrame::Accel(reading) => self.forward_motion(Ok(reading)).await,
            DeviceFrame::Position(fix) => {
                self.latest_fix.send_replace(Some(fix));
                self.forward_position(Ok(fix)).await;
            }
            DeviceFrame::Fault { sensor: SensorKind::Accelerometer, error } => self.forward_motion(Err(error)).await,
            DeviceFrame::Fault { sensor: SensorKind::Gnss, error } => self.forward_position(Err(error)).await,
        }
    }

    async fn forward_motion(&self, reading: SensorReading<AccelReading>) {
        let sender = self.state.lock().await.motion_tx.clone();
        if let Some(sender) = sender {
            if sender.send(reading).await.is_err() {
                tracing::debug!("Motion subscriber went away");
            }
        }
    }

    async fn forward_position(&self, reading: SensorReading<PositionFix>) {
        let sender = self.state.lock().await.position_tx.clone();
        if let Some(sender) = sender {
            if sender.send(reading).await.is_err() {
                tracing::debug!("Position subscriber went away");
            }
        }
    }

    /// Queues a one-byte command for the device. False when none is connected.
    async fn command(&self, command: u8) -> bool {
        let device = self.state.lock().await.device.as_ref().map(|(_, device)| device.clone());
        match device {
            Some(device) => device.send(command).await.is_ok(),
            None => false,
        }
    }
}

impl Default for DeviceHub {
    fn default() -> Self {
        Self::new()
    }
}

pub struct RemoteMotionSource {
    hub: DeviceHub,
}

impl RemoteMotionSource {
    pub fn new(hub: DeviceHub) -> Self {
        Self { hub }
    }
}

#[async_trait::async_trait]
impl MotionSource for RemoteMotionSource {
    async fn subscribe(&mut self, settings: MotionSettings) -> Result<mpsc::Receiver<SensorReading<AccelReading>>, DetectionError> {
        let (tx, rx) = mpsc::channel(SENSOR_BUFFER);
        self.hub.state.lock().await.motion_tx = Some(tx);
        // The device samples at its own rate. Faster readings are simply queued.
        tracing::debug!("Motion subscription opened, wanted every {:?}", settings.sample_interval);
        Ok(rx)
    }

    async fn unsubscribe(&mut self) {
        self.hub.state.lock().await.motion_tx = None;
    }
}

pub struct RemotePositionSource {
    hub: DeviceHub,
}

impl RemotePositionSource {
    pub fn new(hub: DeviceHub) -> Self {
        Self { hub }
    }
}

#[async_trait::async_trait]
impl PositionSource for RemotePositionSource {
    async fn start(&mut self, filter: PositionFilter) -> Result<mpsc::Receiver<SensorReading<PositionFix>>, DetectionError> {
        let (tx, rx) = mpsc::channel(SENSOR_BUFFER);
        {
            let mut state = self.hub.state.lock().await;
            state.position_tx = Some(tx);
            state.gps_wanted = true;
        }

        if !self.hub.command(COMMAND_GPS_ON).await {
            tracing::debug!("No device connected, GPS turns on when one connects");
        }
        tracing::debug!("GPS requested with {:?}", filter.accuracy);
        Ok(rx)
    }

    async fn stop(&mut self) {
        {
            let mut state = self.hub.state.lock().await;
            state.position_tx = None;
            state.gps_wanted = false;
        }
        self.hub.command(COMMAND_GPS_OFF).await;
    }
}

pub struct RemoteFixProvider {
    hub: DeviceHub,
}

impl RemoteFixProvider {
    pub fn new(hub: DeviceHub) -> Self {
        Self { hub }
    }
}

#[async_trait::async_trait]
impl FixProvider for RemoteFixProvider {
    /// Asks the device for a fix and waits for the next one it reports.
    async fn current_fix(&self) -> SensorReading<PositionFix> {
        let mut fixes = self.hub.latest_fix.subscribe();
        if !self.hub.command(COMMAND_FIX_REQUEST).await {
            return Err(SensorError::Unavailable);
        }

        fixes.changed().await.map_err(|_| SensorError::Unavailable)?;
        let fix = *fixes.borrow_and_update();
        fix.ok_or(SensorError::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use trip_detection_engine::{DutyCyclePolicy, ExecutionContext, MotionGatedPolicy};

    use super::*;

    #[tokio::test]
    async fn frames_reach_the_subscribed_streams() {
        let hub = DeviceHub::new();
        let mut motion = RemoteMotionSource::new(hub.clone());
        let mut readings = motion.subscribe(MotionSettings { sample_interval: std::time::Duration::from_millis(200) }).await.unwrap();

        let reading = AccelReading::new(0.1, 0.2, 9.9, Utc::now());
        hub.dispatch(DeviceFrame::Accel(reading)).await;
        hub.dispatch(DeviceFrame::Fault { sensor: SensorKind::Accelerometer, error: SensorError::Unavailable }).await;

        assert_eq!(readings.recv().await, Some(Ok(reading)));
        assert_eq!(readings.recv().await, Some(Err(SensorError::Unavailable)));
    }

    #[tokio::test]
    async fn gps_follows_the_position_source() {
        let hub = DeviceHub::new();
        let (_, mut commands) = hub.attach().await;
        let mut position = RemotePositionSource::new(hub.clone());

        let filter = MotionGatedPolicy.position_filter(ExecutionContext::Foreground);
        let mut fixes = position.start(filter).await.unwrap();
        assert_eq!(commands.recv().await, Some(COMMAND_GPS_ON));

        let fix = PositionFix::new(55.0, 12.0, 20.0, 5.0, Utc::now());
        hub.dispatch(DeviceFrame::Position(fix)).await;
        assert_eq!(fixes.recv().await, Some(Ok(fix)));

        position.stop().await;
        assert_eq!(commands.recv().await, Some(COMMAND_GPS_OFF));
    }

    #[tokio::test]
    async fn late_device_gets_gps_on() {
        let hub = DeviceHub::new();
        let mut position = RemotePositionSource::new(hub.clone());
        let filter = MotionGatedPolicy.position_filter(ExecutionContext::Background);
        let _fixes = position.start(filter).await.unwrap();

        let (_, mut commands) = hub.attach().await;
        assert_eq!(commands.recv().await, Some(COMMAND_GPS_ON));
    }

    #[tokio::test]
    async fn one_shot_fix_waits_for_the_next_report() {
        let hub = DeviceHub::new();
        let (_, mut commands) = hub.attach().await;
        let provider = RemoteFixProvider::new(hub.clone());

        let fix = PositionFix::new(55.0, 12.0, 0.0, 5.0, Utc::now());
        let device = hub.clone();
        tokio::spawn(async move {
            if commands.recv().await == Some(COMMAND_FIX_REQUEST) {
                device.dispatch(DeviceFrame::Position(fix)).await;
            }
        });

        assert_eq!(provider.current_fix().await, Ok(fix));
    }

    #[tokio::test]
    async fn old_connection_cannot_detach_its_replacement() {
        let hub = DeviceHub::new();
        let (old, _old_commands) = hub.attach().await;
        let (new, mut commands) = hub.attach().await;

        hub.detach(old).await;
        assert!(hub.is_connected().await);
        assert!(hub.command(COMMAND_GPS_OFF).await);
        assert_eq!(commands.recv().await, Some(COMMAND_GPS_OFF));

        hub.detach(new).await;
        assert!(!hub.is_connected().await);
    }

    #[tokio::test]
    async fn one_shot_fix_without_device_is_unavailable() {
        let provider = RemoteFixProvider::new(DeviceHub::new());
        assert_eq!(provider.current_fix().await, Err(SensorError::Unavailable));
    }
}

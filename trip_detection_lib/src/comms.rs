use serde::{Deserialize, Serialize};

use crate::{motion_sample::AccelReading, position_fix::PositionFix, sensor_error::SensorError};

// Device -> host frame headers. A frame is [header: u8][body length: u16 BE][bincode body].
pub const FRAME_ACCEL: u8 = 1;
pub const FRAME_POSITION: u8 = 2;
pub const FRAME_SENSOR_FAULT: u8 = 3;

pub const MAX_FRAME_BODY: usize = 256; // bytes

// Host -> device commands, one byte each.
pub const COMMAND_GPS_OFF: u8 = 0;
pub const COMMAND_GPS_ON: u8 = 1;
pub const COMMAND_FIX_REQUEST: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorKind {
    Accelerometer,
    Gnss,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceFrame {
    Accel(AccelReading),
    Position(PositionFix),
    Fault { sensor: SensorKind, error: SensorError },
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("unknown frame header {0}")]
    UnknownHeader(u8),
    #[error("frame body of {0} bytes exceeds the limit")]
    TooLarge(usize),
    #[error("malformed frame body: {0}")]
    Malformed(#[from] bincode::Error),
}

impl DeviceFrame {
    pub fn header(&self) -> u8 {
        match self {
            DeviceFrame::Accel(_) => FRAME_ACCEL,
            DeviceFrame::Position(_) => FRAME_POSITION,
            DeviceFrame::Fault { .. } => FRAME_SENSOR_FAULT,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let body = match self {
            DeviceFrame::Accel(reading) => bincode::serialize(reading)?,
            DeviceFrame::Position(fix) => bincode::serialize(fix)?,
            DeviceFrame::Fault { sensor, error } => bincode::serialize(&(sensor, error))?,
        };
        if body.len() > MAX_FRAME_BODY {
            return Err(FrameError::TooLarge(body.len()));
        }

        let mut bytes = Vec::with_capacity(3 + body.len());
        bytes.push(self.header());
        bytes.extend_from_slice(&(body.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    pub fn decode(header: u8, body: &[u8]) -> Result<Self, FrameError> {
        if body.len() > MAX_FRAME_BODY {
            return Err(FrameError::TooLarge(body.len()));
        }
        match header {
            FRAME_ACCEL => Ok(DeviceFrame::Accel(bincode::deserialize(body)?)),
            FRAME_POSITION => Ok(DeviceFrame::Position(bincode::deserialize(body)?)),
            FRAME_SENSOR_FAULT => {
                let (sensor, error) = bincode::deserialize(body)?;
                Ok(DeviceFrame::Fault { sensor, error })
            }
            other => Err(FrameError::UnknownHeader(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn fault_frame_survives_the_wire() {
        let frame = DeviceFrame::Fault { sensor: SensorKind::Gnss, error: SensorError::PermissionDenied };
        let bytes = frame.encode().unwrap();
        assert_eq!(bytes[0], FRAME_SENSOR_FAULT);
        let len = u16::from_be_bytes([bytes[1], bytes[2]]) as usize;
        assert_eq!(len, bytes.len() - 3);
        assert_eq!(DeviceFrame::decode(bytes[0], &bytes[3..]).unwrap(), frame);
    }

    #[test]
    fn position_frame_fits_in_a_frame() {
        let frame = DeviceFrame::Position(PositionFix::new(55.0, 12.0, 30.0, 4.0, Utc::now()));
        assert!(frame.encode().unwrap().len() <= 3 + MAX_FRAME_BODY);
    }

    #[test]
    fn unknown_header_is_rejected() {
        assert!(matches!(DeviceFrame::decode(9, &[]), Err(FrameError::UnknownHeader(9))));
    }
}

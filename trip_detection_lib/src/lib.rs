pub mod motion_sample;
pub mod position_fix;
pub mod sensor_error;
pub mod trip;
pub mod trip_event;
pub mod comms;

pub use motion_sample::{AccelReading, MotionSample};
pub use position_fix::{Location, PositionFix};
pub use sensor_error::SensorError;
pub use trip::{Trip, TripId};
pub use trip_event::{TripEvent, TripProgress};

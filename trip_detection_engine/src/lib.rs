mod error;
mod config;
mod buffer;
pub mod motion_gate;
pub mod speed_validator;
pub mod accumulator;
pub mod controller;
pub mod duty_cycle;
pub mod advisory;
pub mod sensors;
pub mod snapshot;
mod engine;

#[cfg(test)]
mod testing;

pub use error::DetectionError;
pub use config::EngineConfig;
pub use controller::{Effect, FixPurpose, TripLifecycleController, TripPhase};
pub use duty_cycle::{DutyCyclePolicy, ExecutionContext, LocationAccuracy, MotionGatedPolicy, MotionSettings, PositionFilter};
pub use advisory::{Advisory, RuleBasedAdvisor, TripAdvisor};
pub use sensors::{FixProvider, MotionSource, PositionSource, SensorReading};
pub use snapshot::{Counters, DebugSnapshot};
pub use engine::{Engine, EngineHandle};

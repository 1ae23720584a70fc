//! Simulated statistics block and reference estimation engines.
//!
//! `SimulatedSensor` renders colour-grid statistics from a synthetic scene and
//! the exposure last programmed through its `SensorFeedback` handle, so the
//! control loop can be exercised end to end without hardware.
pub mod engines;
pub mod error;
pub mod sensor;

pub use engines::{SimExposureEngine, SimFocusEngine, SimWhiteBalanceEngine};
pub use error::SimError;
pub use sensor::{Scene, SensorFeedback, SimulatedSensor};

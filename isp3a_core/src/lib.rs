#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Camera 3A exposure control core (engine-agnostic).
//!
//! This crate sits between the hardware statistics block and the estimation
//! engines. Engines are reached only through
//! `isp3a_traits::EstimationCapability`; statistics arrive through
//! `isp3a_traits::StatisticsSource` or directly as `FrameStatistics`.
//!
//! ## Architecture
//!
//! - **Metering**: weighted window aggregation over the colour grid (`metering`)
//! - **Convergence**: damping and clamping of exposure proposals (`convergence`)
//! - **Scheduling**: recompute-or-reuse decision per frame (`scheduler`)
//! - **Timing**: time ↔ lines and gain code ↔ multiplier (`timing`)
//! - **Handlers**: per-domain state behind one mutex each (`handler`)
//! - **Pipeline**: type-state assembly and the per-frame pass (`pipeline`)
//!
//! ## Units
//!
//! Integration time is carried in sensor lines, exposure time in microseconds
//! and analog gain both as a register code and as a linear multiplier.

pub mod convergence;
pub mod conversions;
pub mod error;
pub mod frame_source;
pub mod handler;
pub mod metering;
pub mod mocks;
pub mod pipeline;
pub mod runner;
pub mod scheduler;
pub mod source_error;
pub mod timing;
pub mod util;

pub use convergence::{
    ConvergenceController, ConvergenceSpeed, ExposureLimits, ExposureState, damp,
};
pub use error::{BuildError, ControlError, Report, Result};
pub use handler::exposure::{ExposureControls, ExposureHandler, ExposureSettings};
pub use handler::focus::{FocusControls, FocusHandler, FocusState};
pub use handler::white_balance::{
    WhiteBalanceControls, WhiteBalanceHandler, WhiteBalanceMode, WhiteBalanceSettings,
    WhiteBalanceState,
};
pub use handler::{Disposition, FrameStatus};
pub use metering::{
    Aggregation, MeteringWindow, MeteringWindowAggregator, WeightedRegionResult,
};
pub use pipeline::{FrameResult, LockRequests, Pipeline, PipelineBuilder};
pub use runner::{AcquisitionMode, RunParams, RunSummary};
pub use scheduler::{Decision, LockState, RecomputeReason, RecomputeScheduler};
pub use timing::{GainCodeScale, SensorModeData, SensorModel, SensorTimingDescriptor};

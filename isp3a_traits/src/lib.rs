//! Seam traits and frame data shared by the 3A control stack.
//!
//! This crate carries no dependencies so that statistics producers and
//! estimation engines can be implemented without pulling in the core.
pub mod clock;
pub mod estimation;
pub mod stats;

pub use clock::{Clock, FramePacer, MonotonicClock};
pub use estimation::{
    Domain, Estimate, EstimationCapability, EstimationInput, FrameContext, RawExposure, RawFocus,
    RawWhiteBalance,
};
pub use stats::{AppliedExposure, ColorCell, ColorGrid, FrameStatistics, WeightGrid};

/// Producer of per-frame hardware statistics.
pub trait StatisticsSource {
    fn next_frame(
        &mut self,
        timeout: std::time::Duration,
    ) -> Result<FrameStatistics, Box<dyn std::error::Error + Send + Sync>>;
}

//! The estimation engine seam.
//!
//! Exposure, white balance and focus engines all sit behind the same
//! capability trait and tag themselves with a [`Domain`].

use crate::stats::FrameStatistics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Domain {
    Exposure,
    WhiteBalance,
    Focus,
}

/// Raw exposure parameters in sensor register units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawExposure {
    pub coarse_integration_time: u32,
    pub analog_gain_code: u32,
    pub converged: bool,
}

/// Raw white balance gains in Q8 (256 == 1.0x).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawWhiteBalance {
    pub red_gain: u16,
    pub green_r_gain: u16,
    pub green_b_gain: u16,
    pub blue_gain: u16,
    pub cct_kelvin: u32,
    pub converged: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawFocus {
    pub next_lens_position: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Estimate {
    Exposure(RawExposure),
    WhiteBalance(RawWhiteBalance),
    Focus(RawFocus),
}

impl Estimate {
    pub fn domain(&self) -> Domain {
        match self {
            Estimate::Exposure(_) => Domain::Exposure,
            Estimate::WhiteBalance(_) => Domain::WhiteBalance,
            Estimate::Focus(_) => Domain::Focus,
        }
    }
}

/// Per-frame parameters that accompany the statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameContext {
    pub frame_id: u64,
    /// Exposure compensation in EV.
    pub ev_shift: f32,
    /// Integration range in lines after sensor and configured limits.
    pub min_coarse_integration_time: u32,
    pub max_coarse_integration_time: u32,
    /// Largest analog gain code the sensor accepts.
    pub max_analog_gain_code: u32,
    /// Colour temperature to hold in manual white balance.
    pub cct_hint_kelvin: Option<u32>,
}

/// What an engine sees: weighted statistics plus context.
#[derive(Debug, Clone, Copy)]
pub struct EstimationInput<'a> {
    pub stats: &'a FrameStatistics,
    pub context: FrameContext,
}

/// A black-box estimator for one 3A domain.
///
/// `Ok(None)` means the engine produced nothing for this frame; the caller
/// keeps its previous output.
pub trait EstimationCapability: Send {
    fn domain(&self) -> Domain;

    fn analyze(
        &mut self,
        input: &EstimationInput<'_>,
    ) -> Result<Option<Estimate>, Box<dyn std::error::Error + Send + Sync>>;
}

impl<T: EstimationCapability + ?Sized> EstimationCapability for Box<T> {
    fn domain(&self) -> Domain {
        (**self).domain()
    }

    fn analyze(
        &mut self,
        input: &EstimationInput<'_>,
    ) -> Result<Option<Estimate>, Box<dyn std::error::Error + Send + Sync>> {
        (**self).analyze(input)
    }
}

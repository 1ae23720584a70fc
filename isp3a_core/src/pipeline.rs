//! Type-state builder for `Pipeline`, the per-frame 3A pass.
//!
//! The builder enforces at compile time that all three engines are provided
//! before `build()` is available. `try_build()` is always available for dynamic
//! checks and additionally verifies that each engine reports the domain it was
//! registered for.

use std::marker::PhantomData;

use isp3a_traits::{Domain, EstimationCapability, FrameStatistics};

use crate::convergence::ExposureState;
use crate::error::{BuildError, Result};
use crate::handler::FrameStatus;
use crate::handler::exposure::{ExposureControls, ExposureHandler, ExposureSettings};
use crate::handler::focus::{FocusControls, FocusHandler, FocusState};
use crate::handler::white_balance::{
    WhiteBalanceControls, WhiteBalanceHandler, WhiteBalanceSettings, WhiteBalanceState,
};
use crate::scheduler::LockState;
use crate::timing::SensorModel;

/// Lock requests coming from the control layer for one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockRequests {
    pub exposure: bool,
    pub white_balance: bool,
}

/// Everything the pipeline produced for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameResult {
    pub frame_id: u64,
    pub exposure: FrameStatus<ExposureState>,
    pub white_balance: FrameStatus<WhiteBalanceState>,
    pub focus: FrameStatus<FocusState>,
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

/// Exposure, white balance and focus handlers run in that order per frame.
#[derive(Debug)]
pub struct Pipeline {
    exposure: ExposureHandler,
    white_balance: WhiteBalanceHandler,
    focus: FocusHandler,
}

impl Pipeline {
    /// Start building a Pipeline.
    pub fn builder() -> PipelineBuilder<Missing, Missing, Missing> {
        PipelineBuilder::default()
    }

    pub fn exposure_controls(&self) -> ExposureControls {
        self.exposure.controls()
    }

    pub fn white_balance_controls(&self) -> WhiteBalanceControls {
        self.white_balance.controls()
    }

    pub fn focus_controls(&self) -> FocusControls {
        self.focus.controls()
    }

    /// Install the timing model for a new sensor mode.
    pub fn set_sensor_model(&self, model: SensorModel) {
        self.exposure.controls().set_sensor_model(model);
    }

    /// Lock states for this frame from the requests and last convergence flags.
    pub fn derive_locks(&self, requests: LockRequests) -> (LockState, LockState) {
        let ae = LockState::from_controls(requests.exposure, self.exposure.controls().is_converged());
        let awb = LockState::from_controls(
            requests.white_balance,
            self.white_balance.controls().is_converged(),
        );
        (ae, awb)
    }

    /// Run one frame through all three handlers.
    ///
    /// Fails only when no sensor timing has been installed.
    pub fn process_frame(
        &mut self,
        frame: &FrameStatistics,
        requests: LockRequests,
    ) -> Result<FrameResult> {
        let (ae_lock, awb_lock) = self.derive_locks(requests);
        let exposure = self
            .exposure
            .analyze(frame, ae_lock)
            .map_err(eyre::Report::new)?;
        let white_balance = self.white_balance.analyze(frame, awb_lock);
        let focus = self.focus.analyze(frame);
        tracing::trace!(
            frame_id = frame.frame_id,
            ae = ?exposure.disposition,
            awb = ?white_balance.disposition,
            af = ?focus.disposition,
            "frame processed"
        );
        Ok(FrameResult {
            frame_id: frame.frame_id,
            exposure,
            white_balance,
            focus,
        })
    }
}

// ── Type-state markers ───────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Missing;
#[derive(Debug)]
pub struct Set;

/// Builder for `Pipeline`. Engines are checked on `build()`.
pub struct PipelineBuilder<E, W, F> {
    exposure_engine: Option<Box<dyn EstimationCapability>>,
    white_balance_engine: Option<Box<dyn EstimationCapability>>,
    focus_engine: Option<Box<dyn EstimationCapability>>,
    exposure: Option<ExposureSettings>,
    white_balance: Option<WhiteBalanceSettings>,
    sensor_model: Option<SensorModel>,
    _e: PhantomData<E>,
    _w: PhantomData<W>,
    _f: PhantomData<F>,
}

impl Default for PipelineBuilder<Missing, Missing, Missing> {
    fn default() -> Self {
        Self {
            exposure_engine: None,
            white_balance_engine: None,
            focus_engine: None,
            exposure: None,
            white_balance: None,
            sensor_model: None,
            _e: PhantomData,
            _w: PhantomData,
            _f: PhantomData,
        }
    }
}

fn check_domain(
    engine: &dyn EstimationCapability,
    expected: Domain,
    what: &'static str,
) -> Result<()> {
    if engine.domain() == expected {
        Ok(())
    } else {
        Err(eyre::Report::new(BuildError::WrongDomain(what)))
    }
}

impl<E, W, F> PipelineBuilder<E, W, F> {
    /// Fallible build available in any type-state; returns detailed error for missing pieces.
    pub fn try_build(self) -> Result<Pipeline> {
        let exposure_engine = self
            .exposure_engine
            .ok_or_else(|| eyre::Report::new(BuildError::MissingExposureEngine))?;
        let white_balance_engine = self
            .white_balance_engine
            .ok_or_else(|| eyre::Report::new(BuildError::MissingWhiteBalanceEngine))?;
        let focus_engine = self
            .focus_engine
            .ok_or_else(|| eyre::Report::new(BuildError::MissingFocusEngine))?;

        check_domain(exposure_engine.as_ref(), Domain::Exposure, "exposure")?;
        check_domain(
            white_balance_engine.as_ref(),
            Domain::WhiteBalance,
            "white balance",
        )?;
        check_domain(focus_engine.as_ref(), Domain::Focus, "focus")?;

        let exposure = self.exposure.unwrap_or_default();
        if !exposure.ev_shift.is_finite() {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "ev_shift must be finite",
            )));
        }
        if let Some(max) = exposure.limits.analog_gain_max
            && max.is_nan()
        {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "analog_gain_max must not be NaN",
            )));
        }

        let pipeline = Pipeline {
            exposure: ExposureHandler::new(exposure_engine, exposure),
            white_balance: WhiteBalanceHandler::new(
                white_balance_engine,
                self.white_balance.unwrap_or_default(),
            ),
            focus: FocusHandler::new(focus_engine),
        };
        if let Some(model) = self.sensor_model {
            pipeline.set_sensor_model(model);
        }
        Ok(pipeline)
    }
}

/// Chainable setters that do not affect type-state.
impl<E, W, F> PipelineBuilder<E, W, F> {
    pub fn with_exposure_settings(mut self, settings: ExposureSettings) -> Self {
        self.exposure = Some(settings);
        self
    }
    pub fn with_white_balance_settings(mut self, settings: WhiteBalanceSettings) -> Self {
        self.white_balance = Some(settings);
        self
    }
    pub fn with_sensor_model(mut self, model: SensorModel) -> Self {
        self.sensor_model = Some(model);
        self
    }
}

// Setters that advance type-state
impl<W, F> PipelineBuilder<Missing, W, F> {
    pub fn with_exposure_engine(
        self,
        engine: impl EstimationCapability + 'static,
    ) -> PipelineBuilder<Set, W, F> {
        PipelineBuilder {
            exposure_engine: Some(Box::new(engine)),
            white_balance_engine: self.white_balance_engine,
            focus_engine: self.focus_engine,
            exposure: self.exposure,
            white_balance: self.white_balance,
            sensor_model: self.sensor_model,
            _e: PhantomData,
            _w: PhantomData,
            _f: PhantomData,
        }
    }
}

impl<E, F> PipelineBuilder<E, Missing, F> {
    pub fn with_white_balance_engine(
        self,
        engine: impl EstimationCapability + 'static,
    ) -> PipelineBuilder<E, Set, F> {
        PipelineBuilder {
            exposure_engine: self.exposure_engine,
            white_balance_engine: Some(Box::new(engine)),
            focus_engine: self.focus_engine,
            exposure: self.exposure,
            white_balance: self.white_balance,
            sensor_model: self.sensor_model,
            _e: PhantomData,
            _w: PhantomData,
            _f: PhantomData,
        }
    }
}

impl<E, W> PipelineBuilder<E, W, Missing> {
    pub fn with_focus_engine(
        self,
        engine: impl EstimationCapability + 'static,
    ) -> PipelineBuilder<E, W, Set> {
        PipelineBuilder {
            exposure_engine: self.exposure_engine,
            white_balance_engine: self.white_balance_engine,
            focus_engine: Some(Box::new(engine)),
            exposure: self.exposure,
            white_balance: self.white_balance,
            sensor_model: self.sensor_model,
            _e: PhantomData,
            _w: PhantomData,
            _f: PhantomData,
        }
    }
}

impl PipelineBuilder<Set, Set, Set> {
    /// Validate and build the Pipeline. Only available when all engines are set.
    pub fn build(self) -> Result<Pipeline> {
        self.try_build()
    }
}

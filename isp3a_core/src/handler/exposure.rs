//! Auto-exposure handler: scheduling, metering, estimation, damping.

use std::sync::Arc;

use isp3a_traits::{
    Domain, Estimate, EstimationCapability, EstimationInput, FrameContext, FrameStatistics,
    RawExposure,
};
use parking_lot::Mutex;

use crate::convergence::{ConvergenceController, ConvergenceSpeed, ExposureLimits, ExposureState};
use crate::error::ControlError;
use crate::handler::{FrameStatus, estimate};
use crate::metering::{MAX_METERING_WINDOWS, MeteringWindow, MeteringWindowAggregator};
use crate::scheduler::{Decision, LockState, RecomputeScheduler};
use crate::timing::SensorModel;

/// Tunables for the exposure loop.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExposureSettings {
    pub windows: Vec<MeteringWindow>,
    pub speed: ConvergenceSpeed,
    pub limits: ExposureLimits,
    /// Exposure compensation in EV; a change forces a recompute under lock.
    pub ev_shift: f32,
}

#[derive(Debug)]
struct ExposureShared {
    settings: ExposureSettings,
    controller: Option<ConvergenceController>,
    last: Option<ExposureState>,
    last_converged: bool,
    scheduler: RecomputeScheduler<f32>,
}

impl ExposureShared {
    /// Floor output used before any estimate has been accepted.
    fn initial_state(&self, controller: &ConvergenceController) -> ExposureState {
        let floor = RawExposure {
            coarse_integration_time: controller.model().timing().coarse_min(),
            analog_gain_code: 0,
            converged: false,
        };
        controller.apply(&floor, None, ConvergenceSpeed::IMMEDIATE, &self.settings.limits)
    }
}

/// Cloneable handle for reading and changing exposure settings from another thread.
#[derive(Debug, Clone)]
pub struct ExposureControls {
    shared: Arc<Mutex<ExposureShared>>,
}

impl ExposureControls {
    /// Replace the metering windows; entries past the supported count are dropped.
    pub fn set_windows(&self, windows: &[MeteringWindow]) {
        if windows.len() > MAX_METERING_WINDOWS {
            tracing::warn!(
                count = windows.len(),
                max = MAX_METERING_WINDOWS,
                "too many metering windows; extra entries dropped"
            );
        }
        let kept = windows.iter().take(MAX_METERING_WINDOWS).copied().collect();
        self.shared.lock().settings.windows = kept;
    }

    pub fn windows(&self) -> Vec<MeteringWindow> {
        self.shared.lock().settings.windows.clone()
    }

    pub fn set_speed(&self, speed: f64) {
        let speed = ConvergenceSpeed::new(speed);
        tracing::debug!(speed = speed.get(), "exposure convergence speed set");
        self.shared.lock().settings.speed = speed;
    }

    pub fn speed(&self) -> ConvergenceSpeed {
        self.shared.lock().settings.speed
    }

    pub fn set_limits(&self, limits: ExposureLimits) {
        self.shared.lock().settings.limits = limits;
    }

    pub fn limits(&self) -> ExposureLimits {
        self.shared.lock().settings.limits
    }

    pub fn set_ev_shift(&self, ev: f32) {
        self.shared.lock().settings.ev_shift = ev;
    }

    pub fn ev_shift(&self) -> f32 {
        self.shared.lock().settings.ev_shift
    }

    /// Install the timing model for a new sensor mode. The accepted state
    /// belongs to the old mode and is discarded.
    pub fn set_sensor_model(&self, model: SensorModel) {
        let mut g = self.shared.lock();
        g.controller = Some(ConvergenceController::new(model));
        g.last = None;
        g.last_converged = false;
        g.scheduler.reset();
        tracing::info!(
            pclk_mhz = model.timing().pixel_clock_freq_mhz,
            ppl = model.timing().pixel_periods_per_line,
            lpf = model.timing().line_periods_per_field,
            "sensor timing installed"
        );
    }

    pub fn sensor_model(&self) -> Option<SensorModel> {
        self.shared.lock().controller.map(|c| *c.model())
    }

    /// Last accepted exposure, if any.
    pub fn current(&self) -> Option<ExposureState> {
        self.shared.lock().last
    }

    /// Whether the engine reported convergence on its last accepted estimate.
    pub fn is_converged(&self) -> bool {
        self.shared.lock().last_converged
    }
}

pub struct ExposureHandler {
    shared: Arc<Mutex<ExposureShared>>,
    engine: Box<dyn EstimationCapability>,
}

impl core::fmt::Debug for ExposureHandler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ExposureHandler")
            .field("shared", &self.shared)
            .finish_non_exhaustive()
    }
}

impl ExposureHandler {
    pub fn new(engine: Box<dyn EstimationCapability>, settings: ExposureSettings) -> Self {
        let shared = ExposureShared {
            settings,
            controller: None,
            last: None,
            last_converged: false,
            scheduler: RecomputeScheduler::new(),
        };
        Self {
            shared: Arc::new(Mutex::new(shared)),
            engine,
        }
    }

    pub fn controls(&self) -> ExposureControls {
        ExposureControls {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Produce the exposure for one frame.
    ///
    /// Fails only when no sensor timing is installed; every other problem
    /// degrades to re-emitting the previous output.
    pub fn analyze(
        &mut self,
        frame: &FrameStatistics,
        lock: LockState,
    ) -> Result<FrameStatus<ExposureState>, ControlError> {
        let (windows, context, controller) = {
            let g = self.shared.lock();
            let Some(controller) = g.controller else {
                return Err(ControlError::MissingSensorTiming);
            };
            let ev = g.settings.ev_shift;
            let decision = g.scheduler.evaluate(lock, &ev);
            if decision == Decision::Reuse
                && let Some(last) = g.last
            {
                return Ok(FrameStatus::reused(last));
            }
            let (min_lines, max_lines) = g.settings.limits.line_bounds(controller.model().timing());
            let context = FrameContext {
                frame_id: frame.frame_id,
                ev_shift: ev,
                min_coarse_integration_time: min_lines,
                max_coarse_integration_time: max_lines,
                max_analog_gain_code: controller.model().gain().max_code(),
                cct_hint_kelvin: None,
            };
            (g.settings.windows.clone(), context, controller)
        };

        let mut weighted = frame.clone();
        let aggregator = MeteringWindowAggregator::new(&windows, frame.image_width, frame.image_height);
        if let Err(e) = aggregator.apply_color(&mut weighted.color) {
            tracing::warn!(error = %e, frame_id = frame.frame_id, "metering aggregation failed; reusing previous exposure");
            return Ok(self.fallback(&controller, e));
        }
        aggregator.apply_hist_weights(&mut weighted.hist_weights);

        let input = EstimationInput {
            stats: &weighted,
            context,
        };
        let raw = match estimate(self.engine.as_mut(), &input, Domain::Exposure) {
            Ok(Estimate::Exposure(raw)) => raw,
            Ok(_) => return Ok(self.fallback(&controller, ControlError::NullEngineOutput)),
            Err(e) => return Ok(self.fallback(&controller, e)),
        };

        let mut g = self.shared.lock();
        // the mode may have changed while the engine ran
        let controller = g.controller.unwrap_or(controller);
        let state = controller.apply(&raw, g.last.as_ref(), g.settings.speed, &g.settings.limits);
        g.last = Some(state);
        g.last_converged = raw.converged;
        g.scheduler.mark_result(&context.ev_shift);
        tracing::trace!(
            frame_id = frame.frame_id,
            lines = state.coarse_integration_time,
            code = state.analog_gain_code,
            exposure_us = state.exposure_time_us,
            converged = raw.converged,
            "exposure accepted"
        );
        Ok(FrameStatus::recomputed(state))
    }

    fn fallback(
        &self,
        controller: &ConvergenceController,
        reason: ControlError,
    ) -> FrameStatus<ExposureState> {
        let g = self.shared.lock();
        let state = g.last.unwrap_or_else(|| g.initial_state(controller));
        FrameStatus::fallback(state, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Disposition;
    use crate::mocks::ScriptedEngine;
    use crate::timing::{GainCodeScale, SensorTimingDescriptor};
    use isp3a_traits::{ColorCell, ColorGrid, WeightGrid};

    fn frame() -> FrameStatistics {
        FrameStatistics {
            frame_id: 0,
            image_width: 1920,
            image_height: 1080,
            color: ColorGrid::filled(15, 15, ColorCell::splat(100)).unwrap(),
            hist_weights: WeightGrid::filled(5, 5, 1).unwrap(),
            applied: None,
        }
    }

    #[test]
    fn allocation_failure_keeps_previous_exposure() {
        let raw = RawExposure {
            coarse_integration_time: 420,
            analog_gain_code: 12,
            converged: false,
        };
        let engine = ScriptedEngine::new(Domain::Exposure, [Some(Estimate::Exposure(raw))]);
        let mut h = ExposureHandler::new(Box::new(engine), ExposureSettings::default());
        let model =
            SensorModel::new(SensorTimingDescriptor::IMX185_1080P30, GainCodeScale::IMX185).unwrap();
        h.controls().set_sensor_model(model);
        let accepted = h.analyze(&frame(), LockState::Converging).unwrap();

        let controller = ConvergenceController::new(model);
        let st = h.fallback(&controller, ControlError::AllocationFailure { cells: 225 });
        assert_eq!(st.disposition, Disposition::Fallback(ControlError::AllocationFailure { cells: 225 }));
        assert_eq!(st.state, accepted.state);
        assert_eq!(h.controls().current(), Some(accepted.state));
    }
}

//! Damping and limiting of raw exposure estimates.
//!
//! Each frame the raw estimate is blended with the previously accepted state
//! (`prev * (1 - speed) + raw * speed`) and then clamped into the sensor's
//! structural range intersected with the configured exposure limits.

use crate::timing::{GainCodeScale, SensorModel, SensorTimingDescriptor};
use isp3a_traits::RawExposure;

/// Two values closer than this are treated as converged.
pub const VALUE_EQUAL_RANGE: f64 = 1e-6;

/// Blend `previous` toward `raw`; returns `raw` exactly once they agree.
#[inline]
pub fn damp(previous: f64, raw: f64, speed: f64) -> f64 {
    if (raw - previous).abs() <= VALUE_EQUAL_RANGE {
        raw
    } else {
        previous * (1.0 - speed) + raw * speed
    }
}

/// Round a damped integer quantity in the direction of travel so that every
/// non-frozen step moves at least one unit toward `raw`.
#[inline]
fn round_toward(value: f64, previous: u32, raw: u32) -> u32 {
    let v = if raw > previous {
        (value - VALUE_EQUAL_RANGE).ceil()
    } else {
        (value + VALUE_EQUAL_RANGE).floor()
    };
    let (lo, hi) = if raw > previous {
        (previous, raw)
    } else {
        (raw, previous)
    };
    if v <= f64::from(lo) {
        lo
    } else if v >= f64::from(hi) {
        hi
    } else {
        v as u32
    }
}

/// Convergence speed in [0.0, 1.0]; 1.0 applies the raw value immediately.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceSpeed(f64);

impl ConvergenceSpeed {
    pub const IMMEDIATE: Self = Self(1.0);

    /// Clamp into [0.0, 1.0]; NaN falls back to immediate.
    pub fn new(v: f64) -> Self {
        if v.is_nan() {
            Self::IMMEDIATE
        } else {
            Self(v.clamp(0.0, 1.0))
        }
    }

    pub fn get(self) -> f64 {
        self.0
    }

    pub fn is_immediate(self) -> bool {
        (1.0 - self.0).abs() <= VALUE_EQUAL_RANGE
    }
}

impl Default for ConvergenceSpeed {
    fn default() -> Self {
        Self::IMMEDIATE
    }
}

/// Configured exposure limits; unset fields do not constrain.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ExposureLimits {
    pub exposure_min_us: Option<u64>,
    pub exposure_max_us: Option<u64>,
    pub analog_gain_max: Option<f64>,
}

impl ExposureLimits {
    /// Effective integration bounds in lines. Always inside the structural
    /// range; an empty intersection collapses onto the upper bound.
    pub fn line_bounds(&self, t: &SensorTimingDescriptor) -> (u32, u32) {
        let (smin, smax) = (t.coarse_min(), t.coarse_max());
        let mut lo = smin;
        let mut hi = smax;
        if let Some(us) = self.exposure_min_us.filter(|us| *us > 0) {
            lo = lo.max(t.time_to_lines(us as f64));
        }
        if let Some(us) = self.exposure_max_us.filter(|us| *us > 0) {
            hi = hi.min(t.time_to_lines(us as f64));
        }
        let hi = hi.clamp(smin, smax);
        let lo = lo.clamp(smin, hi);
        (lo, hi)
    }

    fn gain_ceiling(&self) -> Option<f64> {
        self.analog_gain_max.filter(|g| g.is_finite() && *g >= 1.0)
    }
}

/// Accepted exposure for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExposureState {
    pub coarse_integration_time: u32,
    pub analog_gain_code: u32,
    pub analog_gain_multiplier: f64,
    pub exposure_time_us: f64,
}

impl ExposureState {
    pub fn from_raw(raw: &RawExposure, model: &SensorModel) -> Self {
        Self {
            coarse_integration_time: raw.coarse_integration_time,
            analog_gain_code: raw.analog_gain_code,
            analog_gain_multiplier: model.gain().code_to_multiplier(raw.analog_gain_code),
            exposure_time_us: model.timing().lines_to_time(raw.coarse_integration_time),
        }
    }

    /// Shortest structural exposure at unity gain.
    pub fn sensor_floor(model: &SensorModel) -> Self {
        let lines = model.timing().coarse_min();
        Self {
            coarse_integration_time: lines,
            analog_gain_code: 0,
            analog_gain_multiplier: 1.0,
            exposure_time_us: model.timing().lines_to_time(lines),
        }
    }

    /// Total exposure in line-gain units.
    pub fn total_exposure(&self) -> f64 {
        f64::from(self.coarse_integration_time) * self.analog_gain_multiplier
    }
}

/// Damps raw exposure estimates and clamps them to sensor limits.
#[derive(Debug, Clone, Copy)]
pub struct ConvergenceController {
    model: SensorModel,
}

impl ConvergenceController {
    pub fn new(model: SensorModel) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &SensorModel {
        &self.model
    }

    /// Damp `raw` against `previous` then apply limits. Without a previous
    /// state (first frame) the raw value is only clamped.
    pub fn apply(
        &self,
        raw: &RawExposure,
        previous: Option<&ExposureState>,
        speed: ConvergenceSpeed,
        limits: &ExposureLimits,
    ) -> ExposureState {
        let damped = match previous {
            Some(prev) if !speed.is_immediate() => self.damp_state(raw, prev, speed),
            _ => ExposureState::from_raw(raw, &self.model),
        };
        self.limit(damped, limits)
    }

    fn damp_state(
        &self,
        raw: &RawExposure,
        prev: &ExposureState,
        speed: ConvergenceSpeed,
    ) -> ExposureState {
        let s = speed.get();
        let gain: &GainCodeScale = self.model.gain();

        let lines_f = damp(
            f64::from(prev.coarse_integration_time),
            f64::from(raw.coarse_integration_time),
            s,
        );
        let lines = round_toward(
            lines_f,
            prev.coarse_integration_time,
            raw.coarse_integration_time,
        );

        let prev_mult = gain.code_to_multiplier(prev.analog_gain_code);
        let raw_mult = gain.code_to_multiplier(raw.analog_gain_code);
        let mult = damp(prev_mult, raw_mult, s);
        let code = if mult.to_bits() == raw_mult.to_bits() {
            raw.analog_gain_code
        } else {
            round_toward(
                gain.multiplier_to_code_f(mult),
                prev.analog_gain_code,
                raw.analog_gain_code,
            )
        };

        tracing::trace!(
            prev_lines = prev.coarse_integration_time,
            raw_lines = raw.coarse_integration_time,
            lines,
            prev_code = prev.analog_gain_code,
            raw_code = raw.analog_gain_code,
            code,
            speed = s,
            "exposure damped"
        );

        ExposureState {
            coarse_integration_time: lines,
            analog_gain_code: code,
            analog_gain_multiplier: mult,
            exposure_time_us: self.model.timing().lines_to_time(lines),
        }
    }

    fn limit(&self, mut state: ExposureState, limits: &ExposureLimits) -> ExposureState {
        let timing = self.model.timing();
        let gain = self.model.gain();

        let (lo, hi) = limits.line_bounds(timing);
        let lines = state.coarse_integration_time.clamp(lo, hi);
        if lines != state.coarse_integration_time {
            tracing::debug!(
                from = state.coarse_integration_time,
                to = lines,
                lo,
                hi,
                "integration time clamped"
            );
        }
        state.coarse_integration_time = lines;
        state.exposure_time_us = timing.lines_to_time(lines);

        if let Some(ceiling) = limits.gain_ceiling() {
            if state.analog_gain_multiplier > ceiling {
                tracing::debug!(
                    from = state.analog_gain_multiplier,
                    to = ceiling,
                    "analog gain clamped"
                );
                state.analog_gain_multiplier = ceiling;
                state.analog_gain_code = gain.multiplier_to_code(ceiling);
            } else if state.analog_gain_multiplier < 1.0 {
                state.analog_gain_multiplier = 1.0;
                state.analog_gain_code = 0;
            }
        }

        let max_code = gain.max_code();
        if state.analog_gain_code > max_code {
            state.analog_gain_code = max_code;
            state.analog_gain_multiplier = state.analog_gain_multiplier.min(gain.max_multiplier());
        }
        state
    }
}

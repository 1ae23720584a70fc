//! Auto white balance handler.
//!
//! Recomputes on the same contract as exposure (unlocked, watched parameter
//! change, or no result yet). The watched parameter is the white balance
//! mode, including the manual colour temperature.

use std::sync::Arc;

use isp3a_traits::{
    Domain, Estimate, EstimationCapability, EstimationInput, FrameContext, FrameStatistics,
    RawWhiteBalance,
};
use parking_lot::Mutex;

use crate::convergence::{ConvergenceSpeed, damp};
use crate::error::ControlError;
use crate::handler::{FrameStatus, estimate};
use crate::scheduler::{Decision, LockState, RecomputeScheduler};

/// Gains substituted when the engine reports zero for a channel.
pub const DEFAULT_RED_GAIN: u16 = 394;
pub const DEFAULT_GREEN_R_GAIN: u16 = 256;
pub const DEFAULT_GREEN_B_GAIN: u16 = 256;
pub const DEFAULT_BLUE_GAIN: u16 = 296;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WhiteBalanceMode {
    #[default]
    Auto,
    Manual {
        cct_kelvin: u32,
    },
}

impl WhiteBalanceMode {
    fn cct_hint(self) -> Option<u32> {
        match self {
            WhiteBalanceMode::Auto => None,
            WhiteBalanceMode::Manual { cct_kelvin } => Some(cct_kelvin),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WhiteBalanceSettings {
    pub speed: ConvergenceSpeed,
    pub mode: WhiteBalanceMode,
}

/// Accepted white balance gains in Q8 (256 == 1.0x).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WhiteBalanceState {
    pub red_gain: u16,
    pub green_r_gain: u16,
    pub green_b_gain: u16,
    pub blue_gain: u16,
    pub cct_kelvin: u32,
    pub converged: bool,
}

impl Default for WhiteBalanceState {
    fn default() -> Self {
        Self {
            red_gain: DEFAULT_RED_GAIN,
            green_r_gain: DEFAULT_GREEN_R_GAIN,
            green_b_gain: DEFAULT_GREEN_B_GAIN,
            blue_gain: DEFAULT_BLUE_GAIN,
            cct_kelvin: 0,
            converged: false,
        }
    }
}

#[inline]
fn or_default(v: u16, d: u16) -> u16 {
    if v == 0 { d } else { v }
}

impl WhiteBalanceState {
    pub fn from_raw(raw: &RawWhiteBalance) -> Self {
        Self {
            red_gain: or_default(raw.red_gain, DEFAULT_RED_GAIN),
            green_r_gain: or_default(raw.green_r_gain, DEFAULT_GREEN_R_GAIN),
            green_b_gain: or_default(raw.green_b_gain, DEFAULT_GREEN_B_GAIN),
            blue_gain: or_default(raw.blue_gain, DEFAULT_BLUE_GAIN),
            cct_kelvin: raw.cct_kelvin,
            converged: raw.converged,
        }
    }

    /// Blend toward `target` at `speed`, moving at least one step per channel.
    fn damped_toward(&self, target: &Self, speed: ConvergenceSpeed) -> Self {
        if speed.is_immediate() {
            return *target;
        }
        let s = speed.get();
        let step = |prev: u16, raw: u16| -> u16 {
            let v = damp(f64::from(prev), f64::from(raw), s);
            let r = if raw > prev { v.ceil() } else { v.floor() };
            r.clamp(f64::from(prev.min(raw)), f64::from(prev.max(raw))) as u16
        };
        let cct = damp(f64::from(self.cct_kelvin), f64::from(target.cct_kelvin), s).round();
        Self {
            red_gain: step(self.red_gain, target.red_gain),
            green_r_gain: step(self.green_r_gain, target.green_r_gain),
            green_b_gain: step(self.green_b_gain, target.green_b_gain),
            blue_gain: step(self.blue_gain, target.blue_gain),
            cct_kelvin: cct as u32,
            converged: target.converged,
        }
    }
}

#[derive(Debug)]
struct WhiteBalanceShared {
    settings: WhiteBalanceSettings,
    last: Option<WhiteBalanceState>,
    scheduler: RecomputeScheduler<WhiteBalanceMode>,
}

#[derive(Debug, Clone)]
pub struct WhiteBalanceControls {
    shared: Arc<Mutex<WhiteBalanceShared>>,
}

impl WhiteBalanceControls {
    pub fn set_speed(&self, speed: f64) {
        self.shared.lock().settings.speed = ConvergenceSpeed::new(speed);
    }

    pub fn speed(&self) -> ConvergenceSpeed {
        self.shared.lock().settings.speed
    }

    pub fn set_mode(&self, mode: WhiteBalanceMode) {
        self.shared.lock().settings.mode = mode;
    }

    pub fn mode(&self) -> WhiteBalanceMode {
        self.shared.lock().settings.mode
    }

    pub fn current(&self) -> Option<WhiteBalanceState> {
        self.shared.lock().last
    }

    pub fn is_converged(&self) -> bool {
        self.shared.lock().last.is_some_and(|s| s.converged)
    }
}

pub struct WhiteBalanceHandler {
    shared: Arc<Mutex<WhiteBalanceShared>>,
    engine: Box<dyn EstimationCapability>,
}

impl core::fmt::Debug for WhiteBalanceHandler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WhiteBalanceHandler")
            .field("shared", &self.shared)
            .finish_non_exhaustive()
    }
}

impl WhiteBalanceHandler {
    pub fn new(engine: Box<dyn EstimationCapability>, settings: WhiteBalanceSettings) -> Self {
        Self {
            shared: Arc::new(Mutex::new(WhiteBalanceShared {
                settings,
                last: None,
                scheduler: RecomputeScheduler::new(),
            })),
            engine,
        }
    }

    pub fn controls(&self) -> WhiteBalanceControls {
        WhiteBalanceControls {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn analyze(
        &mut self,
        frame: &FrameStatistics,
        lock: LockState,
    ) -> FrameStatus<WhiteBalanceState> {
        let mode = {
            let g = self.shared.lock();
            let mode = g.settings.mode;
            if g.scheduler.evaluate(lock, &mode) == Decision::Reuse
                && let Some(last) = g.last
            {
                return FrameStatus::reused(last);
            }
            mode
        };

        let input = EstimationInput {
            stats: frame,
            context: FrameContext {
                frame_id: frame.frame_id,
                cct_hint_kelvin: mode.cct_hint(),
                ..FrameContext::default()
            },
        };
        let raw = match estimate(self.engine.as_mut(), &input, Domain::WhiteBalance) {
            Ok(Estimate::WhiteBalance(raw)) => raw,
            Ok(_) => return self.fallback(ControlError::NullEngineOutput),
            Err(e) => return self.fallback(e),
        };

        let target = WhiteBalanceState::from_raw(&raw);
        let mut g = self.shared.lock();
        let state = match g.last {
            Some(prev) => prev.damped_toward(&target, g.settings.speed),
            None => target,
        };
        g.last = Some(state);
        g.scheduler.mark_result(&mode);
        tracing::trace!(
            frame_id = frame.frame_id,
            r = state.red_gain,
            b = state.blue_gain,
            cct = state.cct_kelvin,
            "white balance accepted"
        );
        FrameStatus::recomputed(state)
    }

    fn fallback(&self, reason: ControlError) -> FrameStatus<WhiteBalanceState> {
        let state = self.shared.lock().last.unwrap_or_default();
        FrameStatus::fallback(state, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_gains_take_defaults() {
        let s = WhiteBalanceState::from_raw(&RawWhiteBalance {
            red_gain: 0,
            green_r_gain: 300,
            green_b_gain: 0,
            blue_gain: 0,
            cct_kelvin: 4000,
            converged: true,
        });
        assert_eq!(s.red_gain, DEFAULT_RED_GAIN);
        assert_eq!(s.green_r_gain, 300);
        assert_eq!(s.green_b_gain, DEFAULT_GREEN_B_GAIN);
        assert_eq!(s.blue_gain, DEFAULT_BLUE_GAIN);
        assert!(s.converged);
    }

    #[test]
    fn damping_moves_each_gain_toward_target() {
        let prev = WhiteBalanceState::default();
        let target = WhiteBalanceState {
            red_gain: 494,
            green_r_gain: 257,
            green_b_gain: 256,
            blue_gain: 196,
            cct_kelvin: 6000,
            converged: false,
        };
        let out = prev.damped_toward(&target, ConvergenceSpeed::new(0.5));
        assert_eq!(out.red_gain, 444);
        assert_eq!(out.green_r_gain, 257);
        assert_eq!(out.green_b_gain, 256);
        assert_eq!(out.blue_gain, 246);
        assert_eq!(out.cct_kelvin, 3000);
    }

    #[test]
    fn immediate_speed_jumps_to_target() {
        let prev = WhiteBalanceState::default();
        let target = WhiteBalanceState {
            red_gain: 500,
            ..WhiteBalanceState::default()
        };
        assert_eq!(prev.damped_toward(&target, ConvergenceSpeed::IMMEDIATE), target);
    }
}

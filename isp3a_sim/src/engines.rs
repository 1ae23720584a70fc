//! Reference engines behind `EstimationCapability`.
//!
//! Deliberately simple: mean-luma AE, grey-world AWB and contrast hill-climb
//! AF. Good enough to close the loop against `SimulatedSensor`.

use isp3a_traits::{
    ColorGrid, Domain, Estimate, EstimationCapability, EstimationInput, RawExposure, RawFocus,
    RawWhiteBalance,
};

type EngineResult = Result<Option<Estimate>, Box<dyn std::error::Error + Send + Sync>>;

/// Mean green over cells that carry any signal; `None` when nothing is lit.
fn lit_means(grid: &ColorGrid) -> Option<(f64, f64, f64)> {
    let mut n = 0u32;
    let (mut r, mut g, mut b) = (0.0, 0.0, 0.0);
    for c in grid.cells() {
        if c.avg_gr == 0 && c.avg_gb == 0 && c.avg_r == 0 && c.avg_b == 0 {
            continue;
        }
        n += 1;
        r += f64::from(c.avg_r);
        g += (f64::from(c.avg_gr) + f64::from(c.avg_gb)) / 2.0;
        b += f64::from(c.avg_b);
    }
    (n > 0).then(|| {
        let n = f64::from(n);
        (r / n, g / n, b / n)
    })
}

// ── Exposure ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimExposureEngine {
    pub target_luma: f64,
    /// Relative luma error accepted as converged.
    pub tolerance: f64,
    pub db_per_code: f64,
}

impl Default for SimExposureEngine {
    fn default() -> Self {
        Self {
            target_luma: 110.0,
            tolerance: 0.05,
            db_per_code: 0.3,
        }
    }
}

impl SimExposureEngine {
    fn multiplier(&self, code: u32) -> f64 {
        10f64.powf(f64::from(code) * self.db_per_code / 20.0)
    }
}

impl EstimationCapability for SimExposureEngine {
    fn domain(&self) -> Domain {
        Domain::Exposure
    }

    fn analyze(&mut self, input: &EstimationInput<'_>) -> EngineResult {
        let ctx = &input.context;
        let min_lines = ctx.min_coarse_integration_time.max(1);
        let max_lines = ctx.max_coarse_integration_time.max(min_lines);
        let (lines, code) = input
            .stats
            .applied
            .map_or((min_lines, 0), |a| (a.coarse_integration_time.max(1), a.analog_gain_code));

        let target = (self.target_luma * 2f64.powf(f64::from(ctx.ev_shift))).clamp(1.0, 254.0);
        let mean = lit_means(&input.stats.color).map_or(0.0, |(_, g, _)| g);
        let ratio = if mean < 1.0 {
            4.0
        } else {
            (target / mean).clamp(0.25, 4.0)
        };

        let desired = f64::from(lines) * self.multiplier(code) * ratio;
        let new_lines = desired.round().clamp(f64::from(min_lines), f64::from(max_lines));
        let max_mult = self.multiplier(ctx.max_analog_gain_code);
        let gain = (desired / new_lines).clamp(1.0, max_mult.max(1.0));
        let new_code = (20.0 * gain.log10() / self.db_per_code)
            .round()
            .clamp(0.0, f64::from(ctx.max_analog_gain_code));

        let converged = (mean - target).abs() <= self.tolerance * target;
        tracing::trace!(mean, target, ratio, converged, "sim exposure estimate");
        Ok(Some(Estimate::Exposure(RawExposure {
            coarse_integration_time: new_lines as u32,
            analog_gain_code: new_code as u32,
            converged,
        })))
    }
}

// ── White balance ────────────────────────────────────────────────────────────

const REFERENCE_CCT: f64 = 5000.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimWhiteBalanceEngine {
    last: Option<(u16, u16)>,
}

fn q8(v: f64) -> u16 {
    (v * 256.0).round().clamp(64.0, 1023.0) as u16
}

impl EstimationCapability for SimWhiteBalanceEngine {
    fn domain(&self) -> Domain {
        Domain::WhiteBalance
    }

    fn analyze(&mut self, input: &EstimationInput<'_>) -> EngineResult {
        let (red, blue, cct, converged) = if let Some(k) = input.context.cct_hint_kelvin {
            let k = f64::from(k.max(1));
            (q8(k / REFERENCE_CCT), q8(REFERENCE_CCT / k), k, true)
        } else {
            let Some((r, g, b)) = lit_means(&input.stats.color) else {
                return Ok(None);
            };
            if r <= 0.0 || b <= 0.0 {
                return Ok(None);
            }
            let red = q8(g / r);
            let blue = q8(g / b);
            let cct = REFERENCE_CCT * (f64::from(red) / f64::from(blue)).sqrt();
            let converged = self.last.is_some_and(|(lr, lb)| {
                lr.abs_diff(red) <= 2 && lb.abs_diff(blue) <= 2
            });
            (red, blue, cct, converged)
        };
        self.last = Some((red, blue));
        Ok(Some(Estimate::WhiteBalance(RawWhiteBalance {
            red_gain: red,
            green_r_gain: 256,
            green_b_gain: 256,
            blue_gain: blue,
            cct_kelvin: cct.round() as u32,
            converged,
        })))
    }
}

// ── Focus ────────────────────────────────────────────────────────────────────

/// Contrast hill-climb: reverse and halve the step when sharpness drops.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimFocusEngine {
    pub position: i32,
    pub step: i32,
    pub min_step: i32,
    pub range: (i32, i32),
    direction: i32,
    last_metric: Option<f64>,
}

impl Default for SimFocusEngine {
    fn default() -> Self {
        Self {
            position: 0,
            step: 64,
            min_step: 1,
            range: (0, 1023),
            direction: 1,
            last_metric: None,
        }
    }
}

fn sharpness(grid: &ColorGrid) -> f64 {
    let mut s = 0.0;
    for y in 0..grid.height() {
        for x in 1..grid.width() {
            if let (Some(a), Some(b)) = (grid.get(x - 1, y), grid.get(x, y)) {
                s += f64::from(a.avg_gr.abs_diff(b.avg_gr));
            }
        }
    }
    s
}

impl EstimationCapability for SimFocusEngine {
    fn domain(&self) -> Domain {
        Domain::Focus
    }

    fn analyze(&mut self, input: &EstimationInput<'_>) -> EngineResult {
        let metric = sharpness(&input.stats.color);
        if self.last_metric.is_some_and(|m| metric < m) {
            self.direction = -self.direction;
            self.step = (self.step / 2).max(self.min_step);
        }
        self.last_metric = Some(metric);
        let (lo, hi) = self.range;
        let next = self.position.saturating_add(self.direction * self.step).clamp(lo, hi);
        if next == self.position {
            self.direction = -self.direction;
        }
        self.position = next;
        Ok(Some(Estimate::Focus(RawFocus {
            next_lens_position: next,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isp3a_traits::{AppliedExposure, ColorCell, FrameContext, FrameStatistics, WeightGrid};

    fn frame(v: u8, applied: Option<AppliedExposure>) -> FrameStatistics {
        FrameStatistics {
            frame_id: 0,
            image_width: 1920,
            image_height: 1080,
            color: ColorGrid::filled(15, 15, ColorCell::splat(v)).unwrap(),
            hist_weights: WeightGrid::filled(5, 5, 1).unwrap(),
            applied,
        }
    }

    fn ctx() -> FrameContext {
        FrameContext {
            min_coarse_integration_time: 2,
            max_coarse_integration_time: 1123,
            max_analog_gain_code: 160,
            ..FrameContext::default()
        }
    }

    #[test]
    fn dark_frame_raises_exposure() {
        let stats = frame(
            20,
            Some(AppliedExposure {
                coarse_integration_time: 100,
                analog_gain_code: 0,
            }),
        );
        let mut e = SimExposureEngine::default();
        let out = e
            .analyze(&EstimationInput {
                stats: &stats,
                context: ctx(),
            })
            .unwrap();
        let Some(Estimate::Exposure(raw)) = out else {
            panic!("expected exposure estimate");
        };
        assert!(raw.coarse_integration_time > 100);
        assert!(!raw.converged);
    }

    #[test]
    fn on_target_frame_reports_converged() {
        let stats = frame(
            110,
            Some(AppliedExposure {
                coarse_integration_time: 500,
                analog_gain_code: 0,
            }),
        );
        let mut e = SimExposureEngine::default();
        let Some(Estimate::Exposure(raw)) = e
            .analyze(&EstimationInput {
                stats: &stats,
                context: ctx(),
            })
            .unwrap()
        else {
            panic!("expected exposure estimate");
        };
        assert!(raw.converged);
        assert_eq!(raw.coarse_integration_time, 500);
        assert_eq!(raw.analog_gain_code, 0);
    }

    #[test]
    fn exposure_beyond_line_range_moves_into_gain() {
        let stats = frame(
            10,
            Some(AppliedExposure {
                coarse_integration_time: 1123,
                analog_gain_code: 0,
            }),
        );
        let mut e = SimExposureEngine::default();
        let Some(Estimate::Exposure(raw)) = e
            .analyze(&EstimationInput {
                stats: &stats,
                context: ctx(),
            })
            .unwrap()
        else {
            panic!("expected exposure estimate");
        };
        assert_eq!(raw.coarse_integration_time, 1123);
        // 4x is ~12 dB
        assert_eq!(raw.analog_gain_code, 40);
    }

    #[test]
    fn manual_white_balance_follows_hint() {
        let stats = frame(100, None);
        let mut e = SimWhiteBalanceEngine::default();
        let Some(Estimate::WhiteBalance(wb)) = e
            .analyze(&EstimationInput {
                stats: &stats,
                context: FrameContext {
                    cct_hint_kelvin: Some(5000),
                    ..FrameContext::default()
                },
            })
            .unwrap()
        else {
            panic!("expected white balance estimate");
        };
        assert_eq!((wb.red_gain, wb.blue_gain), (256, 256));
        assert_eq!(wb.cct_kelvin, 5000);
        assert!(wb.converged);
    }

    #[test]
    fn black_frame_gives_no_white_balance() {
        let stats = frame(0, None);
        let mut e = SimWhiteBalanceEngine::default();
        let out = e
            .analyze(&EstimationInput {
                stats: &stats,
                context: FrameContext::default(),
            })
            .unwrap();
        assert_eq!(out, None);
    }

    #[test]
    fn focus_reverses_when_sharpness_drops() {
        let mut e = SimFocusEngine::default();
        let flat = frame(50, None);
        let mut sharp = frame(50, None);
        sharp.color.get_mut(3, 3).unwrap().avg_gr = 200;
        let run = |e: &mut SimFocusEngine, f: &FrameStatistics| {
            e.analyze(&EstimationInput {
                stats: f,
                context: FrameContext::default(),
            })
            .unwrap()
        };
        assert_eq!(run(&mut e, &sharp), Some(Estimate::Focus(RawFocus { next_lens_position: 64 })));
        // sharpness dropped: step halves and direction flips
        assert_eq!(run(&mut e, &flat), Some(Estimate::Focus(RawFocus { next_lens_position: 32 })));
    }
}

//! `From` implementations bridging `isp3a_config` types to `isp3a_core` types.

use crate::convergence::{ConvergenceSpeed, ExposureLimits};
use crate::handler::exposure::ExposureSettings;
use crate::handler::white_balance::{WhiteBalanceMode, WhiteBalanceSettings};
use crate::metering::MeteringWindow;
use crate::timing::{GainCodeScale, SensorModeData, SensorTimingDescriptor};

// ── SensorTiming ─────────────────────────────────────────────────────────────

impl From<&isp3a_config::SensorTiming> for SensorTimingDescriptor {
    fn from(c: &isp3a_config::SensorTiming) -> Self {
        Self {
            pixel_clock_freq_mhz: c.pixel_clock_freq_mhz,
            pixel_periods_per_line: c.pixel_periods_per_line,
            line_periods_per_field: c.line_periods_per_field,
            line_periods_vertical_blanking: c.line_periods_vertical_blanking,
            fine_integration_time_min: c.fine_integration_time_min,
            fine_integration_time_max_margin: c.fine_integration_time_max_margin,
            coarse_integration_time_min: c.coarse_integration_time_min,
            coarse_integration_time_max_margin: c.coarse_integration_time_max_margin,
        }
    }
}

// ── SensorMode ───────────────────────────────────────────────────────────────

impl From<&isp3a_config::SensorMode> for SensorModeData {
    fn from(c: &isp3a_config::SensorMode) -> Self {
        Self {
            vt_pix_clk_freq_hz: c.vt_pix_clk_freq_hz,
            line_length_pck: c.line_length_pck,
            frame_length_lines: c.frame_length_lines,
            crop_vertical_start: c.crop_vertical_start,
            crop_vertical_end: c.crop_vertical_end,
            binning_factor_y: c.binning_factor_y,
            fine_integration_time_def: c.fine_integration_time_def,
            coarse_integration_time_min: c.coarse_integration_time_min,
            coarse_integration_time_max_margin: c.coarse_integration_time_max_margin,
        }
    }
}

impl From<&isp3a_config::SensorMode> for SensorTimingDescriptor {
    fn from(c: &isp3a_config::SensorMode) -> Self {
        Self::from_sensor_mode(&SensorModeData::from(c))
    }
}

// ── GainScale ────────────────────────────────────────────────────────────────

impl From<&isp3a_config::GainScale> for GainCodeScale {
    fn from(c: &isp3a_config::GainScale) -> Self {
        Self {
            db_per_code: c.db_per_code,
            max_db: c.max_db,
        }
    }
}

// ── Windows ──────────────────────────────────────────────────────────────────

impl From<&isp3a_config::WindowRow> for MeteringWindow {
    fn from(c: &isp3a_config::WindowRow) -> Self {
        Self::new(c.x_start, c.y_start, c.x_end, c.y_end, c.weight)
    }
}

// ── ExposureCfg ──────────────────────────────────────────────────────────────

impl From<&isp3a_config::ExposureCfg> for ExposureSettings {
    fn from(c: &isp3a_config::ExposureCfg) -> Self {
        Self {
            windows: c.windows.iter().map(MeteringWindow::from).collect(),
            speed: ConvergenceSpeed::new(c.speed),
            limits: ExposureLimits {
                exposure_min_us: c.exposure_min_us,
                exposure_max_us: c.exposure_max_us,
                analog_gain_max: c.analog_gain_max,
            },
            ev_shift: c.ev_shift,
        }
    }
}

// ── WhiteBalanceCfg ──────────────────────────────────────────────────────────

impl From<&isp3a_config::WhiteBalanceCfg> for WhiteBalanceSettings {
    fn from(c: &isp3a_config::WhiteBalanceCfg) -> Self {
        // validation guarantees a temperature in manual mode
        let mode = match (c.mode, c.manual_cct_kelvin) {
            (isp3a_config::WhiteBalanceMode::Manual, Some(cct_kelvin)) => {
                WhiteBalanceMode::Manual { cct_kelvin }
            }
            _ => WhiteBalanceMode::Auto,
        };
        Self {
            speed: ConvergenceSpeed::new(c.speed),
            mode,
        }
    }
}

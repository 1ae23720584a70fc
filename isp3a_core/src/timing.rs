//! Conversions between physical exposure units and sensor register units.
//!
//! Time to lines rounds to the nearest line through a half-line bias, lines
//! to time is exact. The pair is therefore lossy in one direction only:
//! `time_to_lines(lines_to_time(n)) == n`, while a time survives the round
//! trip to within half a line period.

use crate::error::ControlError;

/// Nudge applied before truncating a dB value to a code so that exact code
/// multiples survive floating-point noise.
const CODE_EPSILON: f64 = 1e-9;

/// Per-mode sensor timing, fixed while the mode is active.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorTimingDescriptor {
    pub pixel_clock_freq_mhz: f32,
    pub pixel_periods_per_line: u32,
    pub line_periods_per_field: u32,
    pub line_periods_vertical_blanking: u32,
    pub fine_integration_time_min: u32,
    pub fine_integration_time_max_margin: u32,
    pub coarse_integration_time_min: u32,
    pub coarse_integration_time_max_margin: u32,
}

/// Sensor mode data as the driver reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorModeData {
    pub vt_pix_clk_freq_hz: u64,
    pub line_length_pck: u32,
    pub frame_length_lines: u32,
    pub crop_vertical_start: u32,
    pub crop_vertical_end: u32,
    pub binning_factor_y: u32,
    pub fine_integration_time_def: u32,
    pub coarse_integration_time_min: u32,
    pub coarse_integration_time_max_margin: u32,
}

impl SensorTimingDescriptor {
    /// IMX185 1920x1080 at 30 fps (74.25 MHz, 2200 x 1125).
    pub const IMX185_1080P30: Self = Self {
        pixel_clock_freq_mhz: 74.25,
        pixel_periods_per_line: 2200,
        line_periods_per_field: 1125,
        line_periods_vertical_blanking: 45,
        fine_integration_time_min: 0,
        fine_integration_time_max_margin: 2200,
        coarse_integration_time_min: 1,
        coarse_integration_time_max_margin: 2,
    };

    /// Derive the descriptor from driver mode data.
    pub fn from_sensor_mode(mode: &SensorModeData) -> Self {
        let active_lines = mode
            .crop_vertical_end
            .saturating_sub(mode.crop_vertical_start)
            .saturating_add(1)
            / mode.binning_factor_y.max(1);
        Self {
            pixel_clock_freq_mhz: (mode.vt_pix_clk_freq_hz as f64 / 1_000_000.0) as f32,
            pixel_periods_per_line: mode.line_length_pck,
            line_periods_per_field: mode.frame_length_lines,
            line_periods_vertical_blanking: mode.frame_length_lines.saturating_sub(active_lines),
            fine_integration_time_min: mode.fine_integration_time_def,
            fine_integration_time_max_margin: mode
                .line_length_pck
                .saturating_sub(mode.fine_integration_time_def),
            coarse_integration_time_min: mode.coarse_integration_time_min,
            coarse_integration_time_max_margin: mode.coarse_integration_time_max_margin,
        }
    }

    pub fn validate(&self) -> Result<(), ControlError> {
        if !(self.pixel_clock_freq_mhz.is_finite() && self.pixel_clock_freq_mhz > 0.0) {
            return Err(ControlError::InvalidTiming("pixel clock must be > 0"));
        }
        if self.pixel_periods_per_line == 0 {
            return Err(ControlError::InvalidTiming("pixel periods per line must be > 0"));
        }
        if self.line_periods_per_field <= self.coarse_integration_time_max_margin {
            return Err(ControlError::InvalidTiming(
                "line periods per field must exceed the coarse integration margin",
            ));
        }
        if self.coarse_integration_time_min
            > self.line_periods_per_field - self.coarse_integration_time_max_margin
        {
            return Err(ControlError::InvalidTiming(
                "coarse integration minimum exceeds the structural maximum",
            ));
        }
        Ok(())
    }

    #[inline]
    pub fn coarse_min(&self) -> u32 {
        self.coarse_integration_time_min
    }

    /// Structural integration ceiling, never below [`Self::coarse_min`].
    #[inline]
    pub fn coarse_max(&self) -> u32 {
        self.line_periods_per_field
            .saturating_sub(self.coarse_integration_time_max_margin)
            .max(self.coarse_integration_time_min)
    }

    #[inline]
    fn pclk(&self) -> f64 {
        f64::from(self.pixel_clock_freq_mhz)
    }

    #[inline]
    fn ppl(&self) -> f64 {
        f64::from(self.pixel_periods_per_line)
    }

    /// Duration of one line in microseconds.
    pub fn line_period_us(&self) -> f64 {
        self.ppl() / self.pclk()
    }

    /// Frame duration in microseconds (`ppl * lpf / pclk`).
    pub fn frame_duration_us(&self) -> f64 {
        self.ppl() * f64::from(self.line_periods_per_field) / self.pclk()
    }

    /// Exposure time (µs) to integration lines, rounded to the nearest line.
    pub fn time_to_lines(&self, time_us: f64) -> u32 {
        let v = (time_us * self.pclk() + self.ppl() / 2.0) / self.ppl();
        if !v.is_finite() || v <= 0.0 {
            return 0;
        }
        let lines = v.floor();
        if lines >= f64::from(u32::MAX) {
            u32::MAX
        } else {
            lines as u32
        }
    }

    /// Integration lines to exposure time (µs).
    pub fn lines_to_time(&self, lines: u32) -> f64 {
        f64::from(lines) * self.ppl() / self.pclk()
    }
}

/// Analog gain code scale: `multiplier = 10^(code * db_per_code / 20)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainCodeScale {
    pub db_per_code: f64,
    pub max_db: f64,
}

impl Default for GainCodeScale {
    fn default() -> Self {
        Self::IMX185
    }
}

impl GainCodeScale {
    /// 160 codes spanning 48 dB.
    pub const IMX185: Self = Self {
        db_per_code: 48.0 / 160.0,
        max_db: 48.0,
    };

    pub fn validate(&self) -> Result<(), ControlError> {
        if !(self.db_per_code.is_finite() && self.db_per_code > 0.0) {
            return Err(ControlError::InvalidTiming("gain dB per code must be > 0"));
        }
        if !(self.max_db.is_finite() && self.max_db > 0.0) {
            return Err(ControlError::InvalidTiming("gain ceiling must be > 0 dB"));
        }
        Ok(())
    }

    #[inline]
    fn db_to_code(&self, db: f64) -> u32 {
        let code = (db / self.db_per_code + CODE_EPSILON).floor();
        if code <= 0.0 { 0 } else { code as u32 }
    }

    /// Largest code inside the dB ceiling.
    pub fn max_code(&self) -> u32 {
        self.db_to_code(self.max_db)
    }

    pub fn max_multiplier(&self) -> f64 {
        self.code_to_multiplier(self.max_code())
    }

    pub fn code_to_multiplier(&self, code: u32) -> f64 {
        10f64.powf(f64::from(code) * self.db_per_code / 20.0)
    }

    /// Multiplier to code, clamped to `[0, max_db]` and truncated.
    pub fn multiplier_to_code(&self, multiplier: f64) -> u32 {
        if multiplier.is_nan() || multiplier <= 1.0 {
            return 0;
        }
        let db = (20.0 * multiplier.log10()).min(self.max_db);
        self.db_to_code(db)
    }

    /// Fractional code position of a multiplier, clamped to `[0, max_code]`.
    pub fn multiplier_to_code_f(&self, multiplier: f64) -> f64 {
        if multiplier.is_nan() || multiplier <= 1.0 {
            return 0.0;
        }
        let db = (20.0 * multiplier.log10()).min(self.max_db);
        (db / self.db_per_code).min(f64::from(self.max_code()))
    }
}

/// Validated timing plus gain scale for the active sensor mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorModel {
    timing: SensorTimingDescriptor,
    gain: GainCodeScale,
}

impl SensorModel {
    pub fn new(timing: SensorTimingDescriptor, gain: GainCodeScale) -> Result<Self, ControlError> {
        timing.validate()?;
        gain.validate()?;
        Ok(Self { timing, gain })
    }

    pub fn timing(&self) -> &SensorTimingDescriptor {
        &self.timing
    }

    pub fn gain(&self) -> &GainCodeScale {
        &self.gain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn imx185_1080p() -> SensorTimingDescriptor {
        SensorTimingDescriptor::IMX185_1080P30
    }

    #[test]
    fn line_period_and_frame_duration() {
        let t = imx185_1080p();
        assert!((t.line_period_us() - 29.6296).abs() < 1e-3);
        // 1125 lines of 2200 pixels at 74.25 MHz is one 30 fps frame
        assert!((t.frame_duration_us() - 33_333.333).abs() < 1e-2);
    }

    #[rstest]
    #[case(0.0, 0)]
    #[case(-5.0, 0)]
    #[case(14.0, 0)]
    #[case(15.0, 1)]
    #[case(29.6296, 1)]
    #[case(10_000.0, 338)]
    fn time_to_lines_rounds_to_nearest(#[case] us: f64, #[case] lines: u32) {
        assert_eq!(imx185_1080p().time_to_lines(us), lines);
    }

    #[test]
    fn odd_pixel_periods_keep_exact_lines() {
        let mut t = imx185_1080p();
        t.pixel_periods_per_line = 1;
        for n in [0u32, 1, 7, 1000] {
            assert_eq!(t.time_to_lines(t.lines_to_time(n)), n);
        }
    }

    #[rstest]
    #[case(0, 1.0)]
    #[case(20, 1.995_262)]
    #[case(160, 251.188_643)]
    fn code_to_multiplier_follows_db_scale(#[case] code: u32, #[case] mult: f64) {
        let g = GainCodeScale::IMX185;
        assert!((g.code_to_multiplier(code) - mult).abs() < 1e-5);
    }

    #[test]
    fn multiplier_to_code_truncates_and_clamps() {
        let g = GainCodeScale::IMX185;
        assert_eq!(g.max_code(), 160);
        assert_eq!(g.multiplier_to_code(0.5), 0);
        assert_eq!(g.multiplier_to_code(1.0), 0);
        assert_eq!(g.multiplier_to_code(2.0), 20); // 6.02 dB -> 20.07 codes
        assert_eq!(g.multiplier_to_code(1.0e6), 160);
        assert_eq!(g.multiplier_to_code(f64::NAN), 0);
    }

    #[test]
    fn exact_codes_survive_round_trip() {
        let g = GainCodeScale::IMX185;
        for code in 0..=g.max_code() {
            assert_eq!(g.multiplier_to_code(g.code_to_multiplier(code)), code);
        }
    }

    #[test]
    fn sensor_mode_data_maps_to_descriptor() {
        let mode = SensorModeData {
            vt_pix_clk_freq_hz: 74_250_000,
            line_length_pck: 2200,
            frame_length_lines: 1125,
            crop_vertical_start: 0,
            crop_vertical_end: 1079,
            binning_factor_y: 1,
            fine_integration_time_def: 100,
            coarse_integration_time_min: 1,
            coarse_integration_time_max_margin: 2,
        };
        let d = SensorTimingDescriptor::from_sensor_mode(&mode);
        assert!((d.pixel_clock_freq_mhz - 74.25).abs() < 1e-4);
        assert_eq!(d.pixel_periods_per_line, 2200);
        assert_eq!(d.line_periods_per_field, 1125);
        assert_eq!(d.line_periods_vertical_blanking, 45);
        assert_eq!(d.fine_integration_time_min, 100);
        assert_eq!(d.fine_integration_time_max_margin, 2100);
        assert_eq!(d.coarse_max(), 1123);
    }

    #[test]
    fn binning_halves_active_lines() {
        let mode = SensorModeData {
            vt_pix_clk_freq_hz: 74_250_000,
            line_length_pck: 2200,
            frame_length_lines: 600,
            crop_vertical_start: 0,
            crop_vertical_end: 1079,
            binning_factor_y: 2,
            fine_integration_time_def: 0,
            coarse_integration_time_min: 1,
            coarse_integration_time_max_margin: 2,
        };
        let d = SensorTimingDescriptor::from_sensor_mode(&mode);
        assert_eq!(d.line_periods_vertical_blanking, 60);
    }

    #[rstest]
    #[case(0.0, 2200, 1125, 1, 2)]
    #[case(74.25, 0, 1125, 1, 2)]
    #[case(74.25, 2200, 2, 1, 2)]
    #[case(74.25, 2200, 10, 9, 2)]
    fn invalid_descriptors_are_rejected(
        #[case] pclk: f32,
        #[case] ppl: u32,
        #[case] lpf: u32,
        #[case] cmin: u32,
        #[case] margin: u32,
    ) {
        let mut d = imx185_1080p();
        d.pixel_clock_freq_mhz = pclk;
        d.pixel_periods_per_line = ppl;
        d.line_periods_per_field = lpf;
        d.coarse_integration_time_min = cmin;
        d.coarse_integration_time_max_margin = margin;
        assert!(matches!(
            SensorModel::new(d, GainCodeScale::IMX185),
            Err(ControlError::InvalidTiming(_))
        ));
    }

    proptest! {
        #[test]
        fn lines_survive_time_round_trip(n in 0u32..100_000) {
            let t = imx185_1080p();
            prop_assert_eq!(t.time_to_lines(t.lines_to_time(n)), n);
        }

        #[test]
        fn time_survives_within_half_a_line(us in 0.0f64..1_000_000.0) {
            let t = imx185_1080p();
            let back = t.lines_to_time(t.time_to_lines(us));
            prop_assert!((back - us).abs() <= t.line_period_us() / 2.0 + 1e-6);
        }

        #[test]
        fn multiplier_survives_within_one_code(m in 1.0f64..251.0) {
            let g = GainCodeScale::IMX185;
            let back = g.code_to_multiplier(g.multiplier_to_code(m));
            let step = 10f64.powf(g.db_per_code / 20.0);
            prop_assert!(back <= m * (1.0 + 1e-9));
            prop_assert!(m < back * step * (1.0 + 1e-9));
        }
    }
}

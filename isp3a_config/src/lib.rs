#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and metering-window parsing for the 3A control stack.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - The metering-window CSV loader enforces exact headers.
use serde::Deserialize;
use serde::de::Deserializer;

/// Upper bound on metering windows considered per frame.
pub const MAX_WINDOWS: usize = 6;
/// Upper bound on a metering window weight (the histogram table stores 4 bits).
pub const MAX_WINDOW_WEIGHT: u8 = 15;
/// Upper bound on statistics grid dimensions.
pub const MAX_GRID_DIM: u16 = 150;

/// Metering window row, shared by the TOML table form and the CSV loader.
///
/// Expected CSV headers:
/// x_start,y_start,x_end,y_end,weight
///
/// Example:
/// x_start,y_start,x_end,y_end,weight
/// 0,0,959,539,5
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct WindowRow {
    pub x_start: u32,
    pub y_start: u32,
    pub x_end: u32,
    pub y_end: u32,
    pub weight: u8,
}

/// Sensor timing descriptor given directly.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct SensorTiming {
    pub pixel_clock_freq_mhz: f32,
    pub pixel_periods_per_line: u32,
    pub line_periods_per_field: u32,
    #[serde(default)]
    pub line_periods_vertical_blanking: u32,
    #[serde(default)]
    pub fine_integration_time_min: u32,
    #[serde(default)]
    pub fine_integration_time_max_margin: u32,
    pub coarse_integration_time_min: u32,
    pub coarse_integration_time_max_margin: u32,
}

/// Raw sensor mode data as reported by the sensor driver.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct SensorMode {
    pub vt_pix_clk_freq_hz: u64,
    pub line_length_pck: u32,
    pub frame_length_lines: u32,
    pub crop_vertical_start: u32,
    pub crop_vertical_end: u32,
    #[serde(default = "default_binning")]
    pub binning_factor_y: u32,
    #[serde(default)]
    pub fine_integration_time_def: u32,
    pub coarse_integration_time_min: u32,
    pub coarse_integration_time_max_margin: u32,
}

fn default_binning() -> u32 {
    1
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct GainScale {
    /// Decibels per analog gain code step
    pub db_per_code: f64,
    /// Ceiling of the analog gain range in dB
    pub max_db: f64,
}

impl Default for GainScale {
    fn default() -> Self {
        // IMX185: 160 codes over 48 dB
        Self {
            db_per_code: 0.3,
            max_db: 48.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct Image {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct Statistics {
    pub grid_width: u16,
    pub grid_height: u16,
    pub hist_grid_width: u16,
    pub hist_grid_height: u16,
    /// Max wait for one statistics frame (ms)
    pub timeout_ms: u64,
}

impl Default for Statistics {
    fn default() -> Self {
        Self {
            grid_width: 15,
            grid_height: 15,
            hist_grid_width: 5,
            hist_grid_height: 5,
            timeout_ms: 100,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExposureCfg {
    /// Convergence speed in [0.0, 1.0]; 1.0 disables damping
    pub speed: f64,
    /// Exposure compensation in EV
    pub ev_shift: f32,
    pub exposure_min_us: Option<u64>,
    pub exposure_max_us: Option<u64>,
    /// Maximum analog gain multiplier (>= 1.0)
    pub analog_gain_max: Option<f64>,
    /// Metering windows. Accepts either:
    /// - array of tables: [{ x_start = 0, y_start = 0, x_end = 959, y_end = 539, weight = 5 }, ...]
    /// - array of tuples: [[0, 0, 959, 539, 5], ...]
    #[serde(deserialize_with = "de_windows")]
    pub windows: Vec<WindowRow>,
}

impl Default for ExposureCfg {
    fn default() -> Self {
        Self {
            speed: 1.0,
            ev_shift: 0.0,
            exposure_min_us: None,
            exposure_max_us: None,
            analog_gain_max: None,
            windows: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WhiteBalanceMode {
    #[default]
    Auto,
    Manual,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct WhiteBalanceCfg {
    pub speed: f64,
    pub mode: WhiteBalanceMode,
    /// Colour temperature hint used in manual mode
    pub manual_cct_kelvin: Option<u32>,
}

impl Default for WhiteBalanceCfg {
    fn default() -> Self {
        Self {
            speed: 1.0,
            mode: WhiteBalanceMode::Auto,
            manual_cct_kelvin: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Threaded,
    Direct,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct RunnerCfg {
    /// Default orchestration mode: "threaded" (frame source thread) or "direct"
    pub mode: RunMode,
    pub fps: u32,
    /// Request AE/AWB lock after this many frames
    pub lock_after: Option<u64>,
}

impl Default for RunnerCfg {
    fn default() -> Self {
        Self {
            mode: RunMode::Threaded,
            fps: 30,
            lock_after: None,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    /// Timing descriptor; mutually exclusive with `sensor_mode`
    #[serde(default)]
    pub sensor: Option<SensorTiming>,
    #[serde(default)]
    pub sensor_mode: Option<SensorMode>,
    #[serde(default)]
    pub gain: GainScale,
    pub image: Image,
    #[serde(default)]
    pub statistics: Statistics,
    #[serde(default)]
    pub exposure: ExposureCfg,
    #[serde(default)]
    pub white_balance: WhiteBalanceCfg,
    #[serde(default)]
    pub runner: RunnerCfg,
    #[serde(default)]
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WindowToml {
    Tuple((u32, u32, u32, u32, u8)),
    Table(WindowRow),
}

fn de_windows<'de, D>(deserializer: D) -> Result<Vec<WindowRow>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<Vec<WindowToml>> = Option::deserialize(deserializer)?;
    let mut out = Vec::new();
    if let Some(items) = opt {
        for w in items {
            match w {
                WindowToml::Tuple((x_start, y_start, x_end, y_end, weight)) => out.push(WindowRow {
                    x_start,
                    y_start,
                    x_end,
                    y_end,
                    weight,
                }),
                WindowToml::Table(row) => out.push(row),
            }
        }
    }
    Ok(out)
}

pub fn load_windows_csv(path: &std::path::Path) -> eyre::Result<Vec<WindowRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open metering window CSV {:?}: {}", path, e))?;

    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["x_start", "y_start", "x_end", "y_end", "weight"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "metering window CSV must have headers 'x_start,y_start,x_end,y_end,weight', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<WindowRow>().enumerate() {
        match rec {
            Ok(row) => rows.push(row),
            Err(e) => {
                eyre::bail!("invalid CSV row {}: {}", idx + 2, e);
            }
        }
    }
    if rows.len() > MAX_WINDOWS {
        eyre::bail!(
            "metering window CSV has {} rows; at most {} are supported",
            rows.len(),
            MAX_WINDOWS
        );
    }
    Ok(rows)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Sensor
        match (&self.sensor, &self.sensor_mode) {
            (Some(_), Some(_)) => {
                eyre::bail!("sensor and sensor_mode are mutually exclusive; set only one")
            }
            (None, None) => eyre::bail!("one of [sensor] or [sensor_mode] must be present"),
            (Some(s), None) => {
                if !(s.pixel_clock_freq_mhz.is_finite() && s.pixel_clock_freq_mhz > 0.0) {
                    eyre::bail!("sensor.pixel_clock_freq_mhz must be > 0");
                }
                if s.pixel_periods_per_line == 0 {
                    eyre::bail!("sensor.pixel_periods_per_line must be > 0");
                }
                if s.line_periods_per_field <= s.coarse_integration_time_max_margin {
                    eyre::bail!(
                        "sensor.line_periods_per_field must exceed coarse_integration_time_max_margin"
                    );
                }
                if s.coarse_integration_time_min
                    > s.line_periods_per_field - s.coarse_integration_time_max_margin
                {
                    eyre::bail!(
                        "sensor.coarse_integration_time_min must be <= line_periods_per_field - coarse_integration_time_max_margin"
                    );
                }
            }
            (None, Some(m)) => {
                if m.vt_pix_clk_freq_hz == 0 {
                    eyre::bail!("sensor_mode.vt_pix_clk_freq_hz must be > 0");
                }
                if m.line_length_pck == 0 {
                    eyre::bail!("sensor_mode.line_length_pck must be > 0");
                }
                if m.binning_factor_y == 0 {
                    eyre::bail!("sensor_mode.binning_factor_y must be >= 1");
                }
                if m.crop_vertical_end < m.crop_vertical_start {
                    eyre::bail!("sensor_mode.crop_vertical_end must be >= crop_vertical_start");
                }
                if m.fine_integration_time_def > m.line_length_pck {
                    eyre::bail!("sensor_mode.fine_integration_time_def must be <= line_length_pck");
                }
                if m.frame_length_lines <= m.coarse_integration_time_max_margin {
                    eyre::bail!(
                        "sensor_mode.frame_length_lines must exceed coarse_integration_time_max_margin"
                    );
                }
                if m.coarse_integration_time_min
                    > m.frame_length_lines - m.coarse_integration_time_max_margin
                {
                    eyre::bail!(
                        "sensor_mode.coarse_integration_time_min must be <= frame_length_lines - coarse_integration_time_max_margin"
                    );
                }
            }
        }

        // Gain
        if !(self.gain.db_per_code.is_finite() && self.gain.db_per_code > 0.0) {
            eyre::bail!("gain.db_per_code must be > 0");
        }
        if !(self.gain.max_db.is_finite() && self.gain.max_db > 0.0) {
            eyre::bail!("gain.max_db must be > 0");
        }

        // Image
        if self.image.width == 0 || self.image.height == 0 {
            eyre::bail!("image.width and image.height must be > 0");
        }

        // Statistics
        let s = &self.statistics;
        for (name, v) in [
            ("grid_width", s.grid_width),
            ("grid_height", s.grid_height),
            ("hist_grid_width", s.hist_grid_width),
            ("hist_grid_height", s.hist_grid_height),
        ] {
            if !(1..=MAX_GRID_DIM).contains(&v) {
                eyre::bail!("statistics.{name} must be in [1, {MAX_GRID_DIM}]");
            }
        }
        if s.timeout_ms == 0 {
            eyre::bail!("statistics.timeout_ms must be >= 1");
        }

        // Exposure
        let e = &self.exposure;
        if !(0.0..=1.0).contains(&e.speed) {
            eyre::bail!("exposure.speed must be in [0.0, 1.0]");
        }
        if !e.ev_shift.is_finite() || e.ev_shift.abs() > 4.0 {
            eyre::bail!("exposure.ev_shift must be in [-4.0, 4.0]");
        }
        if let (Some(lo), Some(hi)) = (e.exposure_min_us, e.exposure_max_us)
            && lo > hi
        {
            eyre::bail!("exposure.exposure_min_us must be <= exposure_max_us");
        }
        if let Some(g) = e.analog_gain_max
            && !(g.is_finite() && g >= 1.0)
        {
            eyre::bail!("exposure.analog_gain_max must be >= 1.0");
        }
        if e.windows.len() > MAX_WINDOWS {
            eyre::bail!("exposure.windows must have at most {MAX_WINDOWS} entries");
        }
        for (i, w) in e.windows.iter().enumerate() {
            if w.weight > MAX_WINDOW_WEIGHT {
                eyre::bail!("exposure.windows[{i}].weight must be <= {MAX_WINDOW_WEIGHT}");
            }
        }

        // White balance
        let wb = &self.white_balance;
        if !(0.0..=1.0).contains(&wb.speed) {
            eyre::bail!("white_balance.speed must be in [0.0, 1.0]");
        }
        if wb.mode == WhiteBalanceMode::Manual {
            match wb.manual_cct_kelvin {
                Some(k) if (1000..=15000).contains(&k) => {}
                _ => eyre::bail!(
                    "white_balance.manual_cct_kelvin must be in [1000, 15000] when mode = \"manual\""
                ),
            }
        }

        // Runner
        if self.runner.fps == 0 || self.runner.fps > 1000 {
            eyre::bail!("runner.fps must be in [1, 1000]");
        }

        // Logging
        if let Some(r) = self.logging.rotation.as_deref()
            && !matches!(r, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        Ok(())
    }
}

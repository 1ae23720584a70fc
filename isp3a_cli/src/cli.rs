//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();
/// Effective run knobs used for the current run (for JSON details).
pub static LAST_RUN: OnceLock<CliRun> = OnceLock::new();

#[derive(Copy, Clone, Debug)]
pub struct CliRun {
    pub frames: u64,
    pub timeout_ms: u64,
    pub max_run_ms: u64,
}

#[derive(Parser, Debug)]
#[command(name = "isp3a", version, about = "3A exposure control CLI (simulated sensor)")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/isp3a_config.toml")]
    pub config: PathBuf,

    /// Optional metering window CSV (strict header); replaces exposure.windows
    #[arg(long, value_name = "FILE")]
    pub windows: Option<PathBuf>,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Drive the 3A pipeline against the simulated sensor
    Run {
        /// Number of statistics frames to process
        #[arg(long, default_value_t = 60)]
        frames: u64,
        /// Abort if the run takes longer than this (ms)
        #[arg(long, value_name = "MS")]
        max_run_ms: Option<u64>,
        /// Read statistics inside the control loop (no frame source thread)
        #[arg(long, action = ArgAction::SetTrue)]
        direct: bool,
        /// Request AE/AWB lock after this many frames (overrides runner.lock_after)
        #[arg(long, value_name = "N")]
        lock_after: Option<u64>,
        /// Print one line per processed frame
        #[arg(long, action = ArgAction::SetTrue)]
        trace_frames: bool,
        /// Print total runtime on completion
        #[arg(long, action = ArgAction::SetTrue)]
        print_runtime: bool,
    },
    /// Process a single simulated frame end to end
    SelfCheck,
    /// Print the sensor timing model and convert exposure times to lines
    Timing {
        /// Exposure time(s) in microseconds to convert
        #[arg(long = "exposure-us", value_name = "US")]
        exposure_us: Vec<f64>,
        /// Analog gain multiplier(s) to convert to sensor codes
        #[arg(long = "gain", value_name = "X")]
        gain: Vec<f64>,
    },
}

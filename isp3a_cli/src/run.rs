//! Run logic: config mapping, simulator assembly, and pipeline execution.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use isp3a_config::Config;
use isp3a_core::error::Result as CoreResult;
use isp3a_core::runner::{self, AcquisitionMode, RunParams, RunSummary};
use isp3a_core::{
    ControlError, ExposureSettings, FrameResult, GainCodeScale, LockRequests, Pipeline,
    SensorModel, SensorTimingDescriptor, WhiteBalanceSettings,
};
use isp3a_sim::{
    Scene, SensorFeedback, SimExposureEngine, SimFocusEngine, SimWhiteBalanceEngine,
    SimulatedSensor,
};
use isp3a_traits::{AppliedExposure, StatisticsSource};

use crate::cli::{CliRun, LAST_RUN};

/// Per-invocation knobs for `run`.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub frames: u64,
    pub max_run_ms: Option<u64>,
    pub direct: bool,
    pub lock_after: Option<u64>,
    pub trace_frames: bool,
}

#[derive(Debug)]
pub struct RunReport {
    pub summary: RunSummary,
    pub elapsed: Duration,
    pub interrupted: bool,
}

pub fn sensor_model(cfg: &Config) -> CoreResult<SensorModel> {
    let timing = match (&cfg.sensor, &cfg.sensor_mode) {
        (Some(t), _) => SensorTimingDescriptor::from(t),
        (None, Some(m)) => SensorTimingDescriptor::from(m),
        (None, None) => return Err(eyre::Report::new(ControlError::MissingSensorTiming)),
    };
    SensorModel::new(timing, GainCodeScale::from(&cfg.gain)).map_err(eyre::Report::new)
}

/// Scene matching the configured image and grid geometry.
///
/// Test hooks: `ISP3A_TEST_SIM_TIMEOUT_EVERY` and `ISP3A_TEST_SIM_FRAME_LIMIT`
/// inject statistics timeouts and end-of-stream.
pub fn scene(cfg: &Config) -> Scene {
    let env_u64 = |key: &str| std::env::var(key).ok().and_then(|v| v.parse::<u64>().ok());
    Scene {
        image_width: cfg.image.width,
        image_height: cfg.image.height,
        grid_width: cfg.statistics.grid_width,
        grid_height: cfg.statistics.grid_height,
        hist_grid_width: cfg.statistics.hist_grid_width,
        hist_grid_height: cfg.statistics.hist_grid_height,
        timeout_every: env_u64("ISP3A_TEST_SIM_TIMEOUT_EVERY"),
        frame_limit: env_u64("ISP3A_TEST_SIM_FRAME_LIMIT"),
        ..Scene::default()
    }
}

pub fn build_pipeline(cfg: &Config, model: SensorModel) -> CoreResult<Pipeline> {
    Pipeline::builder()
        .with_sensor_model(model)
        .with_exposure_settings(ExposureSettings::from(&cfg.exposure))
        .with_white_balance_settings(WhiteBalanceSettings::from(&cfg.white_balance))
        .with_exposure_engine(SimExposureEngine {
            db_per_code: cfg.gain.db_per_code,
            ..SimExposureEngine::default()
        })
        .with_white_balance_engine(SimWhiteBalanceEngine::default())
        .with_focus_engine(SimFocusEngine::default())
        .build()
}

/// Program the accepted exposure and lens position into the simulated sensor.
fn apply(feedback: &SensorFeedback, r: &FrameResult) {
    let s = r.exposure.state;
    feedback.apply_exposure(
        AppliedExposure {
            coarse_integration_time: s.coarse_integration_time,
            analog_gain_code: s.analog_gain_code,
        },
        s.exposure_time_us,
        s.analog_gain_multiplier,
    );
    feedback.move_lens(r.focus.state.lens_position);
}

pub fn run_sim(cfg: &Config, opts: &RunOptions, shutdown: Arc<AtomicBool>) -> CoreResult<RunReport> {
    let model = sensor_model(cfg)?;
    let mut pipeline = build_pipeline(cfg, model)?;
    let sensor = SimulatedSensor::new(scene(cfg)).map_err(|e| eyre::eyre!("simulated sensor: {e}"))?;
    let feedback = sensor.feedback();

    let defaults = RunParams::default();
    let params = RunParams {
        frames: opts.frames,
        fps: cfg.runner.fps,
        timeout_ms: cfg.statistics.timeout_ms,
        mode: if opts.direct {
            AcquisitionMode::Direct
        } else {
            cfg.runner.mode.into()
        },
        lock_after: opts.lock_after.or(cfg.runner.lock_after),
        max_run_ms: opts.max_run_ms.unwrap_or(defaults.max_run_ms),
    };
    let _ = LAST_RUN.set(CliRun {
        frames: params.frames,
        timeout_ms: params.timeout_ms,
        max_run_ms: params.max_run_ms,
    });

    let started = Instant::now();
    let mut interrupted = false;
    let summary = runner::run(&mut pipeline, sensor, &params, |r| {
        if shutdown.load(Ordering::Relaxed) {
            tracing::warn!(frame_id = r.frame_id, "interrupted; stopping run");
            interrupted = true;
            return false;
        }
        apply(&feedback, r);
        if opts.trace_frames {
            println!("{}", frame_line(r));
        }
        true
    })?;

    Ok(RunReport {
        summary,
        elapsed: started.elapsed(),
        interrupted,
    })
}

/// Push one simulated frame through the pipeline.
pub fn self_check(cfg: &Config) -> CoreResult<FrameResult> {
    let model = sensor_model(cfg)?;
    let mut pipeline = build_pipeline(cfg, model)?;
    let mut sensor =
        SimulatedSensor::new(scene(cfg)).map_err(|e| eyre::eyre!("simulated sensor: {e}"))?;
    let frame = sensor
        .next_frame(Duration::from_millis(cfg.statistics.timeout_ms))
        .map_err(|e| eyre::Report::new(isp3a_core::source_error::map_source_error(e.as_ref())))?;
    pipeline.process_frame(&frame, LockRequests::default())
}

pub fn frame_line(r: &FrameResult) -> String {
    let e = &r.exposure.state;
    let wb = &r.white_balance.state;
    format!(
        "frame {:>5}  lines={:<5} code={:<3} t={:>9.1}us [{}]  wb r={} b={} cct={}K [{}]  lens={} [{}]",
        r.frame_id,
        e.coarse_integration_time,
        e.analog_gain_code,
        e.exposure_time_us,
        r.exposure.disposition.name(),
        wb.red_gain,
        wb.blue_gain,
        wb.cct_kelvin,
        r.white_balance.disposition.name(),
        r.focus.state.lens_position,
        r.focus.disposition.name(),
    )
}

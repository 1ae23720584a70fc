use crate::error::{ControlError, Result as CoreResult};
use crate::frame_source::FrameSource;
use crate::handler::{Disposition, FrameStatus};
use crate::pipeline::{FrameResult, LockRequests, Pipeline};
use crate::source_error::map_source_error;
use isp3a_traits::StatisticsSource;
use isp3a_traits::clock::MonotonicClock;
use std::time::{Duration, Instant};

/// How statistics should be acquired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcquisitionMode {
    /// Read inside the capture loop using `StatisticsSource::next_frame(timeout)`
    Direct,
    /// Read on a background `FrameSource` thread paced at the frame rate
    #[default]
    Threaded,
}

impl From<isp3a_config::RunMode> for AcquisitionMode {
    fn from(m: isp3a_config::RunMode) -> Self {
        match m {
            isp3a_config::RunMode::Direct => AcquisitionMode::Direct,
            isp3a_config::RunMode::Threaded => AcquisitionMode::Threaded,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunParams {
    /// Frames to process before returning.
    pub frames: u64,
    pub fps: u32,
    /// Per-read statistics timeout.
    pub timeout_ms: u64,
    pub mode: AcquisitionMode,
    /// Request AE/AWB lock from this frame index on.
    pub lock_after: Option<u64>,
    /// Hard cap on wall time for the threaded loop.
    pub max_run_ms: u64,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            frames: 30,
            fps: 30,
            timeout_ms: 100,
            mode: AcquisitionMode::Threaded,
            lock_after: None,
            max_run_ms: 60_000,
        }
    }
}

impl RunParams {
    fn locks_for(&self, index: u64) -> LockRequests {
        let locked = self.lock_after.is_some_and(|n| index >= n);
        LockRequests {
            exposure: locked,
            white_balance: locked,
        }
    }
}

/// Per-disposition frame counts for one domain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispositionCounts {
    pub recomputed: u64,
    pub reused: u64,
    pub fallback: u64,
}

impl DispositionCounts {
    fn record<S>(&mut self, status: &FrameStatus<S>) {
        match status.disposition {
            Disposition::Recomputed => self.recomputed += 1,
            Disposition::Reused => self.reused += 1,
            Disposition::Fallback(_) => self.fallback += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub frames: u64,
    pub exposure: DispositionCounts,
    pub white_balance: DispositionCounts,
    pub focus: DispositionCounts,
    /// Frame index at which exposure first reported convergence.
    pub exposure_converged_at: Option<u64>,
    pub last: Option<FrameResult>,
}

impl RunSummary {
    fn record(&mut self, index: u64, result: FrameResult, converged: bool) {
        self.frames += 1;
        self.exposure.record(&result.exposure);
        self.white_balance.record(&result.white_balance);
        self.focus.record(&result.focus);
        if converged && self.exposure_converged_at.is_none() {
            self.exposure_converged_at = Some(index);
        }
        self.last = Some(result);
    }
}

/// Compute the stall watchdog threshold in milliseconds.
///
/// Starts from four read timeouts, never shorter than two frame periods so a
/// single dropped frame does not trip it, and always strictly below
/// `max_run_ms` so the stall watchdog fires before the hard cap.
#[inline]
fn compute_stall_threshold_ms(timeout_ms: u64, period_ms: u64, max_run_ms: u64) -> u64 {
    debug_assert!((1..=crate::util::MILLIS_PER_SEC).contains(&period_ms));

    let fast = fast_threshold_ms(timeout_ms);
    let two_p = two_periods_ms(period_ms);

    if max_run_ms < two_p {
        return cap_below_max_run(fast, max_run_ms);
    }

    let safe = std::cmp::max(fast, two_p);
    cap_below_max_run(safe, max_run_ms)
}

#[inline]
fn fast_threshold_ms(timeout_ms: u64) -> u64 {
    timeout_ms.saturating_mul(4)
}

#[inline]
fn two_periods_ms(period_ms: u64) -> u64 {
    period_ms.saturating_mul(2)
}

/// Cap a threshold to be strictly below `max_run_ms` and at least 1ms.
#[inline]
fn cap_below_max_run(threshold: u64, max_run_ms: u64) -> u64 {
    threshold.min(max_run_ms.saturating_sub(1)).max(1)
}

#[inline]
fn stalled_now(elapsed_ms: u64, stalled_ms: u64, threshold_ms: u64) -> bool {
    elapsed_ms >= threshold_ms && stalled_ms > threshold_ms
}

/// Drive `params.frames` frames through the pipeline.
///
/// `on_frame` sees every result (e.g. to program the sensor with the accepted
/// exposure) and returns `false` to stop early.
pub fn run<S, F>(
    pipeline: &mut Pipeline,
    source: S,
    params: &RunParams,
    on_frame: F,
) -> CoreResult<RunSummary>
where
    S: StatisticsSource + Send + 'static,
    F: FnMut(&FrameResult) -> bool,
{
    tracing::info!(
        frames = params.frames,
        fps = params.fps,
        mode = ?params.mode,
        lock_after = ?params.lock_after,
        "run start"
    );
    let summary = match params.mode {
        AcquisitionMode::Direct => run_direct(pipeline, source, params, on_frame),
        AcquisitionMode::Threaded => run_threaded(pipeline, source, params, on_frame),
    }?;
    tracing::info!(
        frames = summary.frames,
        ae_fallbacks = summary.exposure.fallback,
        converged_at = ?summary.exposure_converged_at,
        "run complete"
    );
    Ok(summary)
}

fn step<F>(
    pipeline: &mut Pipeline,
    summary: &mut RunSummary,
    params: &RunParams,
    frame: &isp3a_traits::FrameStatistics,
    on_frame: &mut F,
) -> CoreResult<bool>
where
    F: FnMut(&FrameResult) -> bool,
{
    let index = summary.frames;
    let result = pipeline.process_frame(frame, params.locks_for(index))?;
    let keep_going = on_frame(&result);
    let converged = pipeline.exposure_controls().is_converged();
    summary.record(index, result, converged);
    Ok(keep_going)
}

fn run_direct<S, F>(
    pipeline: &mut Pipeline,
    mut source: S,
    params: &RunParams,
    mut on_frame: F,
) -> CoreResult<RunSummary>
where
    S: StatisticsSource,
    F: FnMut(&FrameResult) -> bool,
{
    let timeout = Duration::from_millis(params.timeout_ms);
    let mut summary = RunSummary::default();
    while summary.frames < params.frames {
        let frame = source
            .next_frame(timeout)
            .map_err(|e| crate::error::Report::new(map_source_error(e.as_ref())))?;
        if !step(pipeline, &mut summary, params, &frame, &mut on_frame)? {
            tracing::info!(frames = summary.frames, "run stopped by caller");
            break;
        }
    }
    Ok(summary)
}

fn run_threaded<S, F>(
    pipeline: &mut Pipeline,
    source: S,
    params: &RunParams,
    mut on_frame: F,
) -> CoreResult<RunSummary>
where
    S: StatisticsSource + Send + 'static,
    F: FnMut(&FrameResult) -> bool,
{
    let period_ms = crate::util::period_ms(params.fps);
    let stall_threshold_ms =
        compute_stall_threshold_ms(params.timeout_ms, period_ms, params.max_run_ms);
    let frames = FrameSource::spawn(
        source,
        params.fps,
        Duration::from_millis(params.timeout_ms),
        MonotonicClock::new(),
    );

    let mut summary = RunSummary::default();
    let start = Instant::now();
    while summary.frames < params.frames {
        let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        if stalled_now(elapsed_ms, frames.stalled_for_now(), stall_threshold_ms) {
            tracing::error!(
                threshold_ms = stall_threshold_ms,
                errors = frames.error_count(),
                "statistics stalled"
            );
            return Err(crate::error::Report::new(ControlError::Timeout));
        }
        if elapsed_ms >= params.max_run_ms {
            return Err(crate::error::Report::new(ControlError::Source(
                "max run time exceeded".into(),
            )));
        }

        let Some(frame) = frames.recv_timeout(Duration::from_millis(period_ms)) else {
            continue;
        };
        if !step(pipeline, &mut summary, params, &frame, &mut on_frame)? {
            tracing::info!(frames = summary.frames, "run stopped by caller");
            break;
        }
    }
    if frames.replaced_count() > 0 {
        tracing::debug!(replaced = frames.replaced_count(), "frames replaced before processing");
    }
    Ok(summary)
}

//! Background statistics acquisition.
//!
//! Spawns a thread that owns the `StatisticsSource`, hands the newest frame to
//! the capture loop through a bounded channel, and tracks the last-ok timestamp
//! for watchdog logic. A frame the consumer has not picked up yet is replaced
//! by the newer one.
//!
//! Each `FrameSource` spawns exactly one thread that is shut down and joined
//! when the `FrameSource` is dropped.
use crossbeam_channel as xch;
use isp3a_traits::clock::{Clock, FramePacer};
use isp3a_traits::{FrameStatistics, StatisticsSource};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

type SharedClock = Arc<dyn Clock + Send + Sync>;

pub struct FrameSource {
    rx: xch::Receiver<FrameStatistics>,
    last_ok: Arc<AtomicU64>,
    errors: Arc<AtomicU64>,
    replaced: Arc<AtomicU64>,
    epoch: Instant,
    clock: SharedClock,
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl FrameSource {
    /// Pull frames at `fps`; pass `0` to rely on the source's own blocking.
    pub fn spawn<S, C>(mut source: S, fps: u32, timeout: Duration, clock: C) -> Self
    where
        S: StatisticsSource + Send + 'static,
        C: Clock + Send + Sync + 'static,
    {
        let (tx, rx) = xch::bounded(1);
        let stale = rx.clone();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);
        let last_ok = Arc::new(AtomicU64::new(0));
        let last_ok_clone = Arc::clone(&last_ok);
        let errors = Arc::new(AtomicU64::new(0));
        let errors_clone = Arc::clone(&errors);
        let replaced = Arc::new(AtomicU64::new(0));
        let replaced_clone = Arc::clone(&replaced);
        let mut pacer =
            (fps > 0).then(|| FramePacer::new(Duration::from_micros(crate::util::period_us(fps))));
        let clock: SharedClock = Arc::new(clock);
        let thread_clock = Arc::clone(&clock);
        let epoch = clock.now();

        let join_handle = std::thread::spawn(move || {
            loop {
                if shutdown_clone.load(Ordering::Relaxed) {
                    tracing::debug!("frame source thread received shutdown signal");
                    break;
                }

                match source.next_frame(timeout) {
                    Ok(frame) => {
                        let frame_id = frame.frame_id;
                        if let Err(xch::TrySendError::Full(frame)) = tx.try_send(frame) {
                            // consumer is behind; keep only the newest frame
                            let _ = stale.try_recv();
                            replaced_clone.fetch_add(1, Ordering::Relaxed);
                            let _ = tx.try_send(frame);
                        }
                        last_ok_clone.store(thread_clock.ms_since(epoch), Ordering::Relaxed);
                        tracing::trace!(frame_id, "frame queued");
                    }
                    Err(e) => {
                        errors_clone.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(error = %e, "statistics source read failed");
                    }
                }

                if shutdown_clone.load(Ordering::Relaxed) {
                    break;
                }
                if let Some(p) = pacer.as_mut() {
                    p.wait(thread_clock.as_ref());
                }
            }
            let late = pacer.as_ref().map_or(0, FramePacer::late_frames);
            tracing::trace!(late, "frame source thread exiting cleanly");
        });

        Self {
            rx,
            last_ok,
            errors,
            replaced,
            epoch,
            clock,
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    /// Newest queued frame, if any.
    pub fn latest(&self) -> Option<FrameStatistics> {
        self.rx.try_iter().last()
    }

    /// Wait up to `timeout` for the next frame.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<FrameStatistics> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Source reads that failed so far.
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Frames replaced before the consumer picked them up.
    pub fn replaced_count(&self) -> u64 {
        self.replaced.load(Ordering::Relaxed)
    }

    pub fn stalled_for(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_ok.load(Ordering::Relaxed))
    }

    /// Stall measured on the clock the source was spawned with.
    pub fn stalled_for_now(&self) -> u64 {
        self.stalled_for(self.clock.ms_since(self.epoch))
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        // the thread exits after its current read returns (bounded by the source timeout)
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => {
                    tracing::trace!("frame source thread joined successfully");
                }
                Err(e) => {
                    tracing::warn!(?e, "frame source thread panicked during shutdown");
                }
            }
        }
    }
}

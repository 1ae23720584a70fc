use std::thread;
use std::time::{Duration, Instant};

/// Time source for frame pacing and stall detection.
///
/// `sleep` may be simulated; `TestClock` only advances its offset.
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);

    /// Milliseconds elapsed since `epoch`, saturating at 0 on underflow.
    fn ms_since(&self, epoch: Instant) -> u64 {
        let dur = self.now().saturating_duration_since(epoch);
        u64::try_from(dur.as_millis()).unwrap_or(u64::MAX)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline]
    fn sleep(&self, d: Duration) {
        if !d.is_zero() {
            thread::sleep(d);
        }
    }
}

/// Fixed-rate frame deadlines on top of a [`Clock`].
///
/// Deadlines advance one period per frame, so time spent reading a frame is
/// not added to the period. A caller more than one period late is resynced to
/// `now` instead of bursting through the missed deadlines.
#[derive(Debug, Clone)]
pub struct FramePacer {
    period: Duration,
    next: Option<Instant>,
    late_frames: u64,
}

impl FramePacer {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next: None,
            late_frames: 0,
        }
    }

    #[inline]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Deadlines that were missed by more than a period.
    #[inline]
    pub fn late_frames(&self) -> u64 {
        self.late_frames
    }

    /// Block until the next frame deadline.
    pub fn wait<C: Clock + ?Sized>(&mut self, clock: &C) {
        let now = clock.now();
        let deadline = self.next.unwrap_or(now + self.period);
        if deadline > now {
            clock.sleep(deadline - now);
            self.next = Some(deadline + self.period);
        } else if now - deadline > self.period {
            self.late_frames += 1;
            self.next = Some(now + self.period);
        } else {
            self.next = Some(deadline + self.period);
        }
    }
}

/// Manually advanced clock for deterministic pacing tests.
pub mod test_clock {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// now() = origin + offset; sleep(d) advances the offset without blocking.
    #[derive(Debug, Clone)]
    pub struct TestClock {
        origin: Instant,
        offset: Arc<Mutex<Duration>>,
    }

    impl Default for TestClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl TestClock {
        pub fn new() -> Self {
            Self {
                origin: Instant::now(),
                offset: Arc::new(Mutex::new(Duration::ZERO)),
            }
        }

        pub fn advance(&self, d: Duration) {
            if let Ok(mut off) = self.offset.lock() {
                *off = off.saturating_add(d);
            }
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> Instant {
            let off = self.offset.lock().map(|g| *g).unwrap_or(Duration::ZERO);
            self.origin + off
        }

        fn sleep(&self, d: Duration) {
            self.advance(d);
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        const FRAME: Duration = Duration::from_millis(33);

        #[test]
        fn pacer_waits_one_period_per_frame() {
            let c = TestClock::new();
            let epoch = c.now();
            let mut p = FramePacer::new(FRAME);
            for _ in 0..3 {
                p.wait(&c);
            }
            assert_eq!(c.ms_since(epoch), 99);
            assert_eq!(p.late_frames(), 0);
        }

        #[test]
        fn read_time_is_absorbed_by_the_deadline() {
            let c = TestClock::new();
            let epoch = c.now();
            let mut p = FramePacer::new(FRAME);
            p.wait(&c);
            c.advance(Duration::from_millis(20));
            p.wait(&c);
            assert_eq!(c.ms_since(epoch), 66);
        }

        #[test]
        fn late_caller_is_resynced() {
            let c = TestClock::new();
            let epoch = c.now();
            let mut p = FramePacer::new(FRAME);
            p.wait(&c);
            c.advance(Duration::from_millis(100));
            p.wait(&c);
            assert_eq!(p.late_frames(), 1);
            assert_eq!(c.ms_since(epoch), 133);
            p.wait(&c);
            assert_eq!(c.ms_since(epoch), 166);
        }
    }
}

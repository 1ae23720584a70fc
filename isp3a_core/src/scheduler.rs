//! Per-frame decision between running the estimation engine and re-emitting
//! the last accepted result.

/// Lock/convergence state as reported by the control state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockState {
    #[default]
    Converging,
    ConvergedUnlocked,
    Locked,
}

impl LockState {
    /// A lock request wins; otherwise the engine's convergence flag decides.
    pub fn from_controls(lock_requested: bool, converged: bool) -> Self {
        match (lock_requested, converged) {
            (true, _) => LockState::Locked,
            (false, true) => LockState::ConvergedUnlocked,
            (false, false) => LockState::Converging,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecomputeReason {
    FirstFrame,
    ParameterChanged,
    Unlocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Recompute(RecomputeReason),
    Reuse,
}

impl Decision {
    pub fn is_recompute(&self) -> bool {
        matches!(self, Decision::Recompute(_))
    }
}

/// Tracks watched parameters and whether a result exists yet.
///
/// `Reuse` is only ever returned after [`RecomputeScheduler::mark_result`].
/// A parameter value counts as seen only once a result computed with it has
/// been accepted, so a change on a frame whose recompute failed is retried.
#[derive(Debug, Clone)]
pub struct RecomputeScheduler<P> {
    last_params: Option<P>,
    has_result: bool,
}

impl<P> Default for RecomputeScheduler<P> {
    fn default() -> Self {
        Self {
            last_params: None,
            has_result: false,
        }
    }
}

impl<P: PartialEq + Clone> RecomputeScheduler<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide for this frame against the parameters of the last accepted result.
    pub fn evaluate(&self, lock: LockState, params: &P) -> Decision {
        let changed = self.last_params.as_ref().is_some_and(|p| p != params);
        let decision = if !self.has_result {
            Decision::Recompute(RecomputeReason::FirstFrame)
        } else if changed {
            Decision::Recompute(RecomputeReason::ParameterChanged)
        } else if lock != LockState::Locked {
            Decision::Recompute(RecomputeReason::Unlocked)
        } else {
            Decision::Reuse
        };
        tracing::trace!(?lock, ?decision, "recompute decision");
        decision
    }

    /// Record an accepted result computed with `params`.
    pub fn mark_result(&mut self, params: &P) {
        self.has_result = true;
        self.last_params = Some(params.clone());
    }

    pub fn has_result(&self) -> bool {
        self.has_result
    }

    /// Forget the result, e.g. after a sensor mode change.
    pub fn reset(&mut self) {
        self.has_result = false;
        self.last_params = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(true, true, LockState::Locked)]
    #[case(true, false, LockState::Locked)]
    #[case(false, true, LockState::ConvergedUnlocked)]
    #[case(false, false, LockState::Converging)]
    fn lock_state_from_controls(#[case] lock: bool, #[case] conv: bool, #[case] want: LockState) {
        assert_eq!(LockState::from_controls(lock, conv), want);
    }

    #[test]
    fn first_frame_always_recomputes_even_when_locked() {
        let s = RecomputeScheduler::<u32>::new();
        assert_eq!(
            s.evaluate(LockState::Locked, &0),
            Decision::Recompute(RecomputeReason::FirstFrame)
        );
        // still no result recorded
        assert_eq!(
            s.evaluate(LockState::Locked, &0),
            Decision::Recompute(RecomputeReason::FirstFrame)
        );
    }

    #[test]
    fn locked_and_unchanged_reuses() {
        let mut s = RecomputeScheduler::<u32>::new();
        s.evaluate(LockState::Converging, &0);
        s.mark_result(&0);
        assert_eq!(s.evaluate(LockState::Locked, &0), Decision::Reuse);
        assert_eq!(s.evaluate(LockState::Locked, &0), Decision::Reuse);
    }

    #[rstest]
    #[case(LockState::Converging)]
    #[case(LockState::ConvergedUnlocked)]
    fn unlocked_recomputes(#[case] lock: LockState) {
        let mut s = RecomputeScheduler::<u32>::new();
        s.evaluate(lock, &0);
        s.mark_result(&0);
        assert_eq!(
            s.evaluate(lock, &0),
            Decision::Recompute(RecomputeReason::Unlocked)
        );
    }

    #[test]
    fn parameter_change_under_lock_recomputes_once() {
        let mut s = RecomputeScheduler::<i32>::new();
        s.evaluate(LockState::Locked, &0);
        s.mark_result(&0);
        assert_eq!(
            s.evaluate(LockState::Locked, &1),
            Decision::Recompute(RecomputeReason::ParameterChanged)
        );
        s.mark_result(&1);
        assert_eq!(s.evaluate(LockState::Locked, &1), Decision::Reuse);
    }

    #[test]
    fn change_without_accepted_result_is_retried() {
        let mut s = RecomputeScheduler::<i32>::new();
        s.mark_result(&0);
        // recompute for the new value failed, nothing marked
        assert!(s.evaluate(LockState::Locked, &1).is_recompute());
        assert_eq!(
            s.evaluate(LockState::Locked, &1),
            Decision::Recompute(RecomputeReason::ParameterChanged)
        );
        s.mark_result(&1);
        assert_eq!(s.evaluate(LockState::Locked, &1), Decision::Reuse);
    }

    #[test]
    fn reset_forgets_result() {
        let mut s = RecomputeScheduler::<u8>::new();
        s.mark_result(&0);
        s.reset();
        assert!(!s.has_result());
        assert!(s.evaluate(LockState::Locked, &0).is_recompute());
    }
}

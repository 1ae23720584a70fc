//! Per-domain handlers wrapping an estimation engine.
//!
//! Each handler keeps its mutable state in one struct behind a single mutex
//! shared with a cloneable controls handle. The guard is taken for reads,
//! writes and the final accept step, never across the engine call.

pub mod exposure;
pub mod focus;
pub mod white_balance;

use crate::error::ControlError;
use isp3a_traits::{Domain, Estimate, EstimationCapability, EstimationInput};

/// How a frame's output was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// The engine ran and its output was accepted.
    Recomputed,
    /// Locked and unchanged; the previous output was re-emitted.
    Reused,
    /// Estimation did not produce a usable result; the previous output (or
    /// the safe default on the first frame) was re-emitted.
    Fallback(ControlError),
}

impl Disposition {
    /// Stable name for logs and structured output.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Recomputed => "recomputed",
            Self::Reused => "reused",
            Self::Fallback(_) => "fallback",
        }
    }
}

/// Output of one handler for one frame. Every frame has one.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameStatus<S> {
    pub state: S,
    pub disposition: Disposition,
}

impl<S> FrameStatus<S> {
    pub fn recomputed(state: S) -> Self {
        Self {
            state,
            disposition: Disposition::Recomputed,
        }
    }

    pub fn reused(state: S) -> Self {
        Self {
            state,
            disposition: Disposition::Reused,
        }
    }

    pub fn fallback(state: S, reason: ControlError) -> Self {
        Self {
            state,
            disposition: Disposition::Fallback(reason),
        }
    }

    pub fn is_recomputed(&self) -> bool {
        matches!(self.disposition, Disposition::Recomputed)
    }
}

/// Run `engine` and insist on an estimate for `domain`.
pub(crate) fn estimate(
    engine: &mut dyn EstimationCapability,
    input: &EstimationInput<'_>,
    domain: Domain,
) -> Result<Estimate, ControlError> {
    match engine.analyze(input) {
        Ok(Some(e)) if e.domain() == domain => Ok(e),
        Ok(Some(e)) => {
            tracing::warn!(expected = ?domain, got = ?e.domain(), "engine returned estimate for another domain");
            Err(ControlError::Engine(format!(
                "expected {domain:?} estimate, got {:?}",
                e.domain()
            )))
        }
        Ok(None) => {
            tracing::debug!(?domain, frame_id = input.context.frame_id, "engine produced no output");
            Err(ControlError::NullEngineOutput)
        }
        Err(e) => {
            tracing::warn!(?domain, error = %e, "estimation engine failed");
            Err(ControlError::Engine(e.to_string()))
        }
    }
}

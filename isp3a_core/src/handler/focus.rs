//! Auto-focus handler. Runs the engine every frame; there is no lock.

use std::sync::Arc;

use isp3a_traits::{
    Domain, Estimate, EstimationCapability, EstimationInput, FrameContext, FrameStatistics,
};
use parking_lot::Mutex;

use crate::error::ControlError;
use crate::handler::{FrameStatus, estimate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FocusState {
    pub lens_position: i32,
}

#[derive(Debug, Clone)]
pub struct FocusControls {
    last: Arc<Mutex<Option<FocusState>>>,
}

impl FocusControls {
    pub fn current(&self) -> Option<FocusState> {
        *self.last.lock()
    }
}

pub struct FocusHandler {
    last: Arc<Mutex<Option<FocusState>>>,
    engine: Box<dyn EstimationCapability>,
}

impl core::fmt::Debug for FocusHandler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FocusHandler")
            .field("last", &self.last)
            .finish_non_exhaustive()
    }
}

impl FocusHandler {
    pub fn new(engine: Box<dyn EstimationCapability>) -> Self {
        Self {
            last: Arc::new(Mutex::new(None)),
            engine,
        }
    }

    pub fn controls(&self) -> FocusControls {
        FocusControls {
            last: Arc::clone(&self.last),
        }
    }

    pub fn analyze(&mut self, frame: &FrameStatistics) -> FrameStatus<FocusState> {
        let input = EstimationInput {
            stats: frame,
            context: FrameContext {
                frame_id: frame.frame_id,
                ..FrameContext::default()
            },
        };
        match estimate(self.engine.as_mut(), &input, Domain::Focus) {
            Ok(Estimate::Focus(raw)) => {
                let state = FocusState {
                    lens_position: raw.next_lens_position,
                };
                *self.last.lock() = Some(state);
                FrameStatus::recomputed(state)
            }
            Ok(_) => self.fallback(ControlError::NullEngineOutput),
            Err(e) => self.fallback(e),
        }
    }

    fn fallback(&self, reason: ControlError) -> FrameStatus<FocusState> {
        let state = self.last.lock().unwrap_or_default();
        FrameStatus::fallback(state, reason)
    }
}

//! Test and helper engines for isp3a_core

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use isp3a_traits::{Domain, Estimate, EstimationCapability, EstimationInput};

type EngineResult = Result<Option<Estimate>, Box<dyn std::error::Error + Send + Sync>>;

/// An engine that never produces output.
#[derive(Debug, Clone, Copy)]
pub struct NullEngine(pub Domain);

impl EstimationCapability for NullEngine {
    fn domain(&self) -> Domain {
        self.0
    }

    fn analyze(&mut self, _input: &EstimationInput<'_>) -> EngineResult {
        Ok(None)
    }
}

/// An engine that always errors.
#[derive(Debug, Clone, Copy)]
pub struct FailingEngine(pub Domain);

impl EstimationCapability for FailingEngine {
    fn domain(&self) -> Domain {
        self.0
    }

    fn analyze(&mut self, _input: &EstimationInput<'_>) -> EngineResult {
        Err(Box::new(std::io::Error::other("engine failure")))
    }
}

/// Replays a script of outputs; the final entry repeats once the script
/// runs out. Counts calls so tests can assert when the engine ran.
#[derive(Debug)]
pub struct ScriptedEngine {
    domain: Domain,
    script: VecDeque<Option<Estimate>>,
    last: Option<Estimate>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedEngine {
    pub fn new(domain: Domain, script: impl IntoIterator<Item = Option<Estimate>>) -> Self {
        Self {
            domain,
            script: script.into_iter().collect(),
            last: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared call counter; stays valid after the engine is boxed.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl EstimationCapability for ScriptedEngine {
    fn domain(&self) -> Domain {
        self.domain
    }

    fn analyze(&mut self, _input: &EstimationInput<'_>) -> EngineResult {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if let Some(next) = self.script.pop_front() {
            self.last = next;
        }
        Ok(self.last)
    }
}

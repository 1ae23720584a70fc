//! Maps `Box<dyn Error>` from the statistics source boundary to `ControlError`.
//!
//! `StatisticsSource` returns `Box<dyn Error + Send + Sync>`; this module turns
//! those into the typed enum, downcasting the simulator's error type when the
//! `sim-errors` feature is on.

use crate::error::ControlError;

/// Map a source-boundary error to a typed `ControlError`.
///
/// Known source error types are downcast first, then the message is inspected.
pub fn map_source_error(e: &(dyn std::error::Error + 'static)) -> ControlError {
    #[cfg(feature = "sim-errors")]
    {
        if let Some(sim) = e.downcast_ref::<isp3a_sim::SimError>() {
            return match sim {
                isp3a_sim::SimError::Timeout => ControlError::Timeout,
                other => ControlError::Source(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("timeout") || s.to_lowercase().contains("timed out") {
        ControlError::Timeout
    } else {
        ControlError::Source(s)
    }
}

//! Global switch for admitting and promoting jobs

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Whether job execution is enabled
///
/// Created once by the application and shared by every coordinator that
/// should be frozen together (e.g. during a restart). Turning it off stops new
/// admissions and promotions; jobs already executing run to completion.
/// Toggling is not synchronised with queue mutations and only affects
/// decisions taken afterwards.
#[derive(Debug, Clone)]
pub struct ExecutionGate {
    enabled: Arc<AtomicBool>,
}

impl ExecutionGate {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(enabled)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        let previous = self.enabled.swap(enabled, Ordering::AcqRel);
        if previous != enabled {
            info!("Job execution {}", if enabled { "enabled" } else { "disabled" });
        }
    }

    pub fn enable(&self) {
        self.set_enabled(true);
    }

    pub fn disable(&self) {
        self.set_enabled(false);
    }
}

impl Default for ExecutionGate {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_is_shared_between_clones() {
        let gate = ExecutionGate::default();
        let other = gate.clone();
        assert!(other.is_enabled());

        gate.disable();
        assert!(!other.is_enabled());

        other.enable();
        assert!(gate.is_enabled());
    }
}

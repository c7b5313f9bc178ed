//! Live-adjustable global concurrency limit

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

/// Maximum number of queue keys executing at once; 0 means unbounded
///
/// The value is read on every admission decision, so `set` takes effect for
/// the next submission or promotion without restarting anything.
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyLimit {
    max: Arc<AtomicUsize>,
}

impl ConcurrencyLimit {
    pub fn new(max: usize) -> Self {
        Self {
            max: Arc::new(AtomicUsize::new(max)),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0)
    }

    /// Current limit, `None` when unbounded
    pub fn get(&self) -> Option<usize> {
        match self.max.load(Ordering::Relaxed) {
            0 => None,
            max => Some(max),
        }
    }

    /// Update the limit at runtime
    pub fn set(&self, max: usize) {
        let old = self.max.swap(max, Ordering::Relaxed);
        info!(
            "Updated global concurrent jobs limit from {} to {}",
            describe(old),
            describe(max)
        );
    }

    /// Whether one more key may start while `executing` keys are running
    pub fn has_capacity(&self, executing: usize) -> bool {
        self.get().is_none_or(|max| executing < max)
    }
}

fn describe(max: usize) -> String {
    if max == 0 {
        "unbounded".to_string()
    } else {
        max.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 0, true)]
    #[case(0, 1000, true)]
    #[case(1, 0, true)]
    #[case(1, 1, false)]
    #[case(3, 2, true)]
    #[case(3, 3, false)]
    #[case(3, 4, false)]
    fn test_has_capacity(#[case] max: usize, #[case] executing: usize, #[case] expected: bool) {
        assert_eq!(ConcurrencyLimit::new(max).has_capacity(executing), expected);
    }

    #[test]
    fn test_set_is_visible_to_clones() {
        let limit = ConcurrencyLimit::unbounded();
        let shared = limit.clone();
        assert_eq!(shared.get(), None);

        limit.set(2);
        assert_eq!(shared.get(), Some(2));
        assert!(!shared.has_capacity(2));
    }
}

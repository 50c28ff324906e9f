//! Lifecycle observers.

use std::sync::Arc;

/// Runs before an attempt; returning `false` blocks it.
pub type BeforeObserver = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// Runs when the target is not reachable from the current state.
pub type FailedObserver = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Runs after the enter hooks of a committed attempt.
pub type AfterObserver = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Observers for each lifecycle event, in registration order.
#[derive(Clone, Default)]
pub(crate) struct Observers {
    pub before: Vec<BeforeObserver>,
    pub failed: Vec<FailedObserver>,
    pub after: Vec<AfterObserver>,
}

impl Observers {
    /// Run every before-observer and report whether all of them agreed.
    ///
    /// All observers run even after one has refused.
    pub fn approve(before: &[BeforeObserver], current: &str, next: &str) -> bool {
        let verdicts: Vec<bool> = before.iter().map(|o| o(current, next)).collect();
        verdicts.iter().all(|v| *v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn every_observer_runs_even_after_a_refusal() {
        let calls = Arc::new(AtomicUsize::new(0));
        let a = Arc::clone(&calls);
        let b = Arc::clone(&calls);
        let before: Vec<BeforeObserver> = vec![
            Arc::new(move |_, _| {
                a.fetch_add(1, Ordering::SeqCst);
                false
            }),
            Arc::new(move |_, _| {
                b.fetch_add(1, Ordering::SeqCst);
                true
            }),
        ];

        assert!(!Observers::approve(&before, "a", "b"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn no_observers_approve() {
        assert!(Observers::approve(&[], "a", "b"));
    }
}

//! Per-instance epoch counters.
//!
//! An epoch is a strictly increasing integer stamped into an instance's
//! envelope on every init or restart. Delayed events carry the epoch that was
//! current when they were scheduled; a restart bumps the counter and thereby
//! invalidates every timer issued before it. Counters live for the process
//! lifetime; ids are small-cardinality and long-lived, so entries are never
//! torn down.

use crate::store::InstanceId;
use std::collections::HashMap;

/// Authoritative owner of the per-instance epoch counters.
///
/// Only the lifecycle controller advances epochs; everything else reads.
///
/// # Example
///
/// ```rust
/// use fsmbind::{EpochTracker, InstanceId};
///
/// let mut epochs = EpochTracker::new();
/// let id = InstanceId::key("doc");
///
/// assert_eq!(epochs.current(&id), 0);
/// assert_eq!(epochs.advance(&id), 1);
/// assert_eq!(epochs.advance(&id), 2);
/// assert_eq!(epochs.current(&id), 2);
/// ```
#[derive(Clone, Debug, Default)]
pub struct EpochTracker {
    counters: HashMap<InstanceId, u64>,
}

impl EpochTracker {
    /// Create a tracker with no recorded instances.
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the counter for `id` and return the new epoch.
    ///
    /// Called exactly once per init or restart of that id.
    pub fn advance(&mut self, id: &InstanceId) -> u64 {
        let counter = self.counters.entry(id.clone()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// The current epoch for `id`; zero if the id was never initialized.
    pub fn current(&self, id: &InstanceId) -> u64 {
        self.counters.get(id).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_ids_start_at_zero() {
        let epochs = EpochTracker::new();
        assert_eq!(epochs.current(&InstanceId::key("doc")), 0);
    }

    #[test]
    fn advance_is_strictly_increasing() {
        let mut epochs = EpochTracker::new();
        let id = InstanceId::key("doc");

        let mut previous = epochs.current(&id);
        for _ in 0..10 {
            let next = epochs.advance(&id);
            assert!(next > previous);
            previous = next;
        }
    }

    #[test]
    fn counters_are_independent_per_id() {
        let mut epochs = EpochTracker::new();
        let a = InstanceId::key("a");
        let b = InstanceId::key("b");

        epochs.advance(&a);
        epochs.advance(&a);
        epochs.advance(&b);

        assert_eq!(epochs.current(&a), 2);
        assert_eq!(epochs.current(&b), 1);
    }

    #[test]
    fn key_and_path_shapes_do_not_collide() {
        let mut epochs = EpochTracker::new();
        epochs.advance(&InstanceId::key("doc"));

        assert_eq!(epochs.current(&InstanceId::path(["doc"])), 0);
    }
}

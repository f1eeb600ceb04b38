//! Waiter - a counting-semaphore readiness tracker
//!
//! A Waiter counts asynchronous operations in progress and runs queued
//! callbacks once the count reaches zero. Waiters form a tree: a child's
//! wait/unwait propagates additively to every registered parent, so a Load
//! is not "ready" until every asset it references has settled.
//!
//! Two callback queues exist: the once-queue is drained (and cleared) the
//! first time each ready transition fires, while the persistent queue fires
//! again on every future transition back to zero.

use std::sync::{Arc, Mutex, Weak};

type OnceCallback = Box<dyn FnOnce() + Send>;
type ReadyCallback = Arc<dyn Fn() + Send + Sync>;

/// Shared readiness tracker handle.
///
/// Cloning a Waiter clones the handle, not the state; every clone observes
/// the same count and queues. Handles are safe to move across threads, and
/// callbacks may fire on whichever thread performed the final `unwait`.
#[derive(Clone)]
pub struct Waiter {
    core: Arc<WaiterCore>,
}

struct WaiterCore {
    state: Mutex<WaiterState>,
}

struct WaiterState {
    wait_count: u64,
    parents: Vec<Weak<WaiterCore>>,
    is_ready: bool,
    once_queue: Vec<OnceCallback>,
    ready_queue: Vec<ReadyCallback>,
}

impl Default for Waiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Waiter {
    pub fn new() -> Self {
        Self {
            core: Arc::new(WaiterCore {
                state: Mutex::new(WaiterState {
                    wait_count: 0,
                    parents: Vec::new(),
                    is_ready: false,
                    once_queue: Vec::new(),
                    ready_queue: Vec::new(),
                }),
            }),
        }
    }

    /// Create a Waiter already registered under a parent.
    pub fn with_parent(parent: &Waiter) -> Self {
        let waiter = Self::new();
        waiter.add_parent(parent);
        waiter
    }

    /// Register a parent that must wait for this Waiter's operations.
    ///
    /// If work is already in flight, the parent's count is back-filled so it
    /// cannot become ready while this child is mid-flight. The parent is held
    /// weakly; a Waiter never keeps its parents alive.
    pub fn add_parent(&self, parent: &Waiter) {
        let outstanding = {
            let mut state = self.core.state.lock().unwrap();
            state.parents.push(Arc::downgrade(&parent.core));
            state.wait_count
        };
        if outstanding > 0 {
            parent.wait(outstanding);
        }
    }

    /// Increment the number of waiting operations in progress.
    ///
    /// Propagates to parents before adding to the local count.
    pub fn wait(&self, count: u64) {
        if count == 0 {
            return;
        }
        let parents = {
            let state = self.core.state.lock().unwrap();
            upgrade_parents(&state.parents)
        };
        for parent in parents {
            parent.wait(count);
        }
        let mut state = self.core.state.lock().unwrap();
        state.wait_count += count;
    }

    /// Decrement the number of waiting operations in progress.
    ///
    /// On reaching exactly zero, the Waiter becomes ready and fires its
    /// queues (once-queue drained, persistent queue retained) before
    /// propagating the decrement to parents, so a parent may still be
    /// non-zero when a child's callback runs.
    pub fn unwait(&self, count: u64) {
        if count == 0 {
            return;
        }
        let (once, ready, parents) = {
            let mut state = self.core.state.lock().unwrap();
            if count > state.wait_count {
                // Unbalanced unwait is a caller bug. Clamp rather than wrap.
                debug_assert!(false, "unwait below zero");
                tracing::error!(target: "hopper", "unwait called more times than wait");
                state.wait_count = 0;
            } else {
                state.wait_count -= count;
            }
            let parents = upgrade_parents(&state.parents);
            if state.wait_count == 0 {
                state.is_ready = true;
                let once = std::mem::take(&mut state.once_queue);
                let ready = state.ready_queue.clone();
                (once, ready, parents)
            } else {
                (Vec::new(), Vec::new(), parents)
            }
        };
        for callback in once {
            callback();
        }
        for callback in ready {
            callback();
        }
        for parent in parents {
            parent.unwait(count);
        }
    }

    /// Run a callback once this Waiter is ready.
    ///
    /// Fires synchronously if already ready with no work in flight,
    /// otherwise queues until the next ready transition.
    pub fn once_ready(&self, callback: impl FnOnce() + Send + 'static) {
        let mut state = self.core.state.lock().unwrap();
        if state.is_ready && state.wait_count == 0 {
            drop(state);
            callback();
        } else {
            state.once_queue.push(Box::new(callback));
        }
    }

    /// Run a callback on every ready transition, starting now if ready.
    pub fn on_ready(&self, callback: impl Fn() + Send + Sync + 'static) {
        let callback: ReadyCallback = Arc::new(callback);
        let run_now = {
            let mut state = self.core.state.lock().unwrap();
            state.ready_queue.push(callback.clone());
            state.is_ready && state.wait_count == 0
        };
        if run_now {
            callback();
        }
    }

    /// Number of operations currently in flight (transitively counted).
    pub fn wait_count(&self) -> u64 {
        self.core.state.lock().unwrap().wait_count
    }

    /// Whether the initial load has settled at least once.
    pub fn is_ready(&self) -> bool {
        let state = self.core.state.lock().unwrap();
        state.is_ready && state.wait_count == 0
    }
}

fn upgrade_parents(parents: &[Weak<WaiterCore>]) -> Vec<Waiter> {
    parents
        .iter()
        .filter_map(|weak| weak.upgrade().map(|core| Waiter { core }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn starts_not_ready() {
        let waiter = Waiter::new();
        assert!(!waiter.is_ready());
        assert_eq!(waiter.wait_count(), 0);
    }

    #[test]
    fn becomes_ready_when_count_returns_to_zero() {
        let waiter = Waiter::new();
        waiter.wait(2);
        assert!(!waiter.is_ready());
        waiter.unwait(1);
        assert!(!waiter.is_ready());
        waiter.unwait(1);
        assert!(waiter.is_ready());
        assert_eq!(waiter.wait_count(), 0);
    }

    #[test]
    fn once_ready_fires_once_per_registration() {
        let waiter = Waiter::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        waiter.once_ready(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        waiter.wait(1);
        waiter.unwait(1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // A second ready transition does not re-fire the drained queue.
        waiter.wait(1);
        waiter.unwait(1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn once_ready_runs_synchronously_when_already_ready() {
        let waiter = Waiter::new();
        waiter.wait(1);
        waiter.unwait(1);

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        waiter.once_ready(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn on_ready_refires_on_every_transition() {
        let waiter = Waiter::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        waiter.on_ready(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        waiter.wait(1);
        waiter.unwait(1);
        waiter.wait(1);
        waiter.unwait(1);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn child_wait_propagates_to_parent() {
        let parent = Waiter::new();
        let child = Waiter::with_parent(&parent);

        child.wait(3);
        assert_eq!(parent.wait_count(), 3);
        child.unwait(3);
        assert_eq!(parent.wait_count(), 0);
        assert!(parent.is_ready());
    }

    #[test]
    fn add_parent_backfills_outstanding_work() {
        let parent = Waiter::new();
        let child = Waiter::new();

        child.wait(2);
        child.add_parent(&parent);
        assert_eq!(parent.wait_count(), 2);

        child.unwait(2);
        assert_eq!(parent.wait_count(), 0);
    }

    #[test]
    fn parent_aggregates_multiple_children() {
        let parent = Waiter::new();
        let a = Waiter::with_parent(&parent);
        let b = Waiter::with_parent(&parent);

        a.wait(1);
        b.wait(2);
        assert_eq!(parent.wait_count(), 3);

        a.unwait(1);
        assert_eq!(parent.wait_count(), 2);
        assert!(!parent.is_ready());

        b.unwait(2);
        assert!(parent.is_ready());
    }

    #[test]
    fn child_fires_before_parent() {
        let parent = Waiter::new();
        let child = Waiter::with_parent(&parent);

        parent.wait(1); // parent has its own work besides the child's
        child.wait(1);

        let parent_count_at_child_ready = Arc::new(AtomicUsize::new(0));
        let observed = parent_count_at_child_ready.clone();
        let parent_clone = parent.clone();
        child.once_ready(move || {
            observed.store(parent_clone.wait_count() as usize, Ordering::SeqCst);
        });

        child.unwait(1);
        // The child's callback ran while the parent still counted the
        // child's in-flight operation plus its own.
        assert_eq!(parent_count_at_child_ready.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unwait_underflow_clamps_at_zero() {
        let waiter = Waiter::new();
        waiter.wait(1);
        waiter.unwait(1);
        // Double-unwait is a caller bug but must not wrap. Release builds
        // clamp; this test exercises the release path.
        if !cfg!(debug_assertions) {
            waiter.unwait(1);
            assert_eq!(waiter.wait_count(), 0);
        }
    }

    proptest! {
        /// Any balanced sequence of waits and unwaits ends ready at zero.
        #[test]
        fn balanced_sequences_end_ready(counts in prop::collection::vec(1u64..8, 1..20)) {
            let waiter = Waiter::new();
            for &count in &counts {
                waiter.wait(count);
            }
            for &count in &counts {
                waiter.unwait(count);
            }
            prop_assert!(waiter.is_ready());
            prop_assert_eq!(waiter.wait_count(), 0);
        }

        /// A parent's aggregate equals the sum of outstanding child counts,
        /// regardless of when parentage was attached.
        #[test]
        fn parent_matches_child_sum(
            before in prop::collection::vec(1u64..5, 0..5),
            after in prop::collection::vec(1u64..5, 0..5),
        ) {
            let parent = Waiter::new();
            let child = Waiter::new();
            for &count in &before {
                child.wait(count);
            }
            child.add_parent(&parent);
            for &count in &after {
                child.wait(count);
            }
            let total: u64 = before.iter().sum::<u64>() + after.iter().sum::<u64>();
            prop_assert_eq!(parent.wait_count(), total);
        }
    }
}

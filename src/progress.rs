//! Progress Tracking
//!
//! Listener-based progress reporting for long-running generation work.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

/// Snapshot handed to listeners.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub progress: u64,
    pub total: u64,
}

type Listener = Arc<dyn Fn(Progress) + Send + Sync>;

/// Handle returned by [`ProgressTracker::on_progress`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

// == Progress Tracker ==
#[derive(Default)]
pub struct ProgressTracker {
    state: Mutex<Progress>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
}

impl fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("progress", &self.progress())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback fired on every update.
    pub fn on_progress<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        id
    }

    /// Unsubscribes a listener; returns whether it was registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(registered, _)| *registered != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    // == Update ==
    /// Sets the current value, keeping the previous total.
    pub fn update(&self, current: u64) {
        let total = self.progress().total;
        self.update_with_total(current, total);
    }

    /// Sets both the current value and the total, then notifies listeners.
    pub fn update_with_total(&self, current: u64, total: u64) {
        let snapshot = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            *state = Progress {
                progress: current,
                total,
            };
            *state
        };
        // Listeners run outside the lock so they may call back in
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(snapshot);
        }
    }

    pub fn progress(&self) -> Progress {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_notifies_listeners() {
        let tracker = ProgressTracker::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        tracker.on_progress(move |p| sink.lock().unwrap().push(p));

        tracker.update_with_total(1, 4);
        tracker.update(3);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                Progress { progress: 1, total: 4 },
                Progress { progress: 3, total: 4 }
            ]
        );
        assert_eq!(tracker.progress(), Progress { progress: 3, total: 4 });
    }

    #[test]
    fn test_removed_listener_is_silent() {
        let tracker = ProgressTracker::new();
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        let id = tracker.on_progress(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tracker.update(1);
        assert!(tracker.remove_listener(id));
        assert!(!tracker.remove_listener(id));
        tracker.update(2);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.listener_count(), 0);
    }

    #[test]
    fn test_starts_at_zero() {
        assert_eq!(ProgressTracker::new().progress(), Progress::default());
    }
}

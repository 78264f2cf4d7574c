//! "Something changed, re-read everything" signal for stores.
//!
//! Each store owns one [`ChangeNotifier`]. Observers register with
//! [`ChangeNotifier::subscribe`] and, on every wake-up, rescan the store.
//! The payload is only a generation counter, so several mutations that land
//! before an observer runs collapse into a single wake-up.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    tx: Arc<watch::Sender<u64>>,
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeNotifier {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    /// Signal observers. Works with zero observers registered.
    pub fn notify(&self) {
        self.tx.send_modify(|generation| *generation = generation.wrapping_add(1));
    }

    /// Register an observer. Changes that happened before this call are not reported.
    pub fn subscribe(&self) -> ChangeListener {
        ChangeListener {
            rx: self.tx.subscribe(),
        }
    }

    /// Number of notifications emitted so far
    pub fn generation(&self) -> u64 {
        *self.tx.borrow()
    }
}

#[derive(Debug)]
pub struct ChangeListener {
    rx: watch::Receiver<u64>,
}

impl ChangeListener {
    /// Wait for the next change. Returns `false` once the store is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Whether a change arrived that has not been consumed yet
    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    /// Consume any pending change without waiting
    pub fn mark_seen(&mut self) {
        self.rx.borrow_and_update();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_listener_wakes_on_notify() {
        let notifier = ChangeNotifier::new();
        let mut listener = notifier.subscribe();
        assert!(!listener.has_changed());

        notifier.notify();

        let woke = tokio::time::timeout(Duration::from_secs(1), listener.changed())
            .await
            .unwrap();
        assert!(woke);
        assert!(!listener.has_changed());
    }

    #[tokio::test]
    async fn test_bursts_collapse_into_one_wakeup() {
        let notifier = ChangeNotifier::new();
        let mut listener = notifier.subscribe();

        notifier.notify();
        notifier.notify();
        notifier.notify();

        assert!(listener.changed().await);
        assert!(!listener.has_changed());
        assert_eq!(notifier.generation(), 3);
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_only_new_changes() {
        let notifier = ChangeNotifier::new();
        notifier.notify();

        let listener = notifier.subscribe();
        assert!(!listener.has_changed());

        notifier.notify();
        assert!(listener.has_changed());
    }

    #[tokio::test]
    async fn test_changed_returns_false_when_store_dropped() {
        let notifier = ChangeNotifier::new();
        let mut listener = notifier.subscribe();
        drop(notifier);
        assert!(!listener.changed().await);
    }
}

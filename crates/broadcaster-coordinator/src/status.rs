//! `map<radioId, StatusMessage>` plus a change latch shared with the web
//! status pusher (component k).

use std::collections::HashMap;
use std::sync::Mutex;

use broadcaster_protocol::StatusMessage;

use crate::broadcast::{ChangeNotifier, ChangeWatcher};

/// Owns the most recent status report from every connected radio. Endpoint
/// sessions call [`ServerStatus::merge_status`] as frames arrive and
/// [`ServerStatus::radio_disconnected`] when their socket dies; both fire
/// the shared change latch so web subscribers re-render.
pub struct ServerStatus {
    statuses: Mutex<HashMap<i64, StatusMessage>>,
    notifier: ChangeNotifier,
}

impl ServerStatus {
    pub fn new() -> Self {
        let (notifier, _) = ChangeNotifier::new();
        Self {
            statuses: Mutex::new(HashMap::new()),
            notifier,
        }
    }

    pub fn watch(&self) -> ChangeWatcher {
        self.notifier.watch()
    }

    pub fn merge_status(&self, radio_id: i64, status: StatusMessage) {
        self.statuses
            .lock()
            .expect("server status mutex poisoned")
            .insert(radio_id, status);
        self.notifier.notify();
    }

    pub fn radio_disconnected(&self, radio_id: i64) {
        let removed = self
            .statuses
            .lock()
            .expect("server status mutex poisoned")
            .remove(&radio_id)
            .is_some();
        if removed {
            self.notifier.notify();
        }
    }

    /// A snapshot of every radio's latest status, keyed by `radioId`.
    pub fn snapshot(&self) -> HashMap<i64, StatusMessage> {
        self.statuses
            .lock()
            .expect("server status mutex poisoned")
            .clone()
    }
}

impl Default for ServerStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broadcaster_protocol::PlaybackStatus;
    use std::time::Duration;

    fn sample_status() -> StatusMessage {
        StatusMessage::idle("Australia/Hobart")
    }

    #[tokio::test]
    async fn merge_status_notifies_watchers() {
        let server_status = ServerStatus::new();
        let mut watcher = server_status.watch();

        server_status.merge_status(1, sample_status());
        assert!(tokio::time::timeout(Duration::from_millis(50), watcher.changed())
            .await
            .unwrap());
        assert_eq!(server_status.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn disconnect_removes_and_notifies() {
        let server_status = ServerStatus::new();
        server_status.merge_status(1, sample_status());
        let mut watcher = server_status.watch();

        server_status.radio_disconnected(1);
        assert!(tokio::time::timeout(Duration::from_millis(50), watcher.changed())
            .await
            .unwrap());
        assert!(server_status.snapshot().is_empty());
    }

    #[tokio::test]
    async fn disconnecting_an_unknown_radio_does_not_notify() {
        let server_status = ServerStatus::new();
        let mut watcher = server_status.watch();

        server_status.radio_disconnected(99);
        assert!(
            tokio::time::timeout(Duration::from_millis(30), watcher.changed())
                .await
                .is_err(),
            "no status was ever present for radio 99, so nothing should fire"
        );
    }

    #[test]
    fn snapshot_reflects_playing_status() {
        let server_status = ServerStatus::new();
        let mut status = sample_status();
        status.status = PlaybackStatus::Playing;
        server_status.merge_status(5, status.clone());
        assert_eq!(server_status.snapshot().get(&5), Some(&status));
    }
}

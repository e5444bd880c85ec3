//! Per-subscriber "watch" abstraction used to fan catalogue and status
//! changes out to every connected endpoint/web subscriber (component h,
//! plus the matching latch for 4.k).
//!
//! The original implementation represents "something changed" as a channel
//! that is closed and replaced under a mutex on every write — a hand-rolled
//! condition variable. Per the REDESIGN FLAGS this is reimplemented as an
//! immutable version counter behind a `tokio::sync::watch` channel: writers
//! bump the counter, waiters `changed().await` and compare. This gives every
//! waiter exactly the same "wake on next change" semantics without a mutex
//! around channel replacement.

use tokio::sync::watch;

/// Owned by whatever mutates the watched collection (the catalogue store,
/// the server status map). Call [`ChangeNotifier::notify`] after every
/// committed write.
#[derive(Clone)]
pub struct ChangeNotifier {
    tx: watch::Sender<u64>,
}

/// Held by a task that wants to wake up on the next change. Cheap to clone;
/// each clone tracks its own "last seen version" so one notifier can serve
/// any number of independent watchers.
#[derive(Clone)]
pub struct ChangeWatcher {
    rx: watch::Receiver<u64>,
}

impl ChangeNotifier {
    pub fn new() -> (Self, ChangeWatcher) {
        let (tx, rx) = watch::channel(0u64);
        (Self { tx }, ChangeWatcher { rx })
    }

    /// Signal that the watched collection changed. Every outstanding and
    /// future `ChangeWatcher::changed()` caller that hasn't already
    /// observed this version wakes up.
    pub fn notify(&self) {
        self.tx.send_modify(|version| *version = version.wrapping_add(1));
    }

    pub fn watch(&self) -> ChangeWatcher {
        ChangeWatcher {
            rx: self.tx.subscribe(),
        }
    }
}

impl ChangeWatcher {
    /// Waits until the watched collection has changed since the last call
    /// (or since this watcher was created). Returns `false` if the notifier
    /// was dropped, meaning no further changes will ever come.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

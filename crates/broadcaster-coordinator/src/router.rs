//! Thread-safe `radioId -> session` map for out-of-band stop delivery
//! (component j).

use std::collections::HashMap;
use std::sync::Mutex;

use broadcaster_protocol::{Message, StopMessage};
use tokio::sync::mpsc;
use tracing::warn;

/// A handle the router can use to push a frame onto a live endpoint
/// session's write side without touching its read loop.
pub type SessionHandle = mpsc::UnboundedSender<Message>;

/// `stop(radioId)` writes a `stop` frame to the connection if present.
/// Insertion and removal share a single mutex. Each coordinator session
/// knows its own `radioId` once authenticated, so removal is a direct key
/// lookup rather than a scan by connection identity.
#[derive(Default)]
pub struct CommandRouter {
    sessions: Mutex<HashMap<i64, SessionHandle>>,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, radio_id: i64, handle: SessionHandle) {
        self.sessions
            .lock()
            .expect("command router mutex poisoned")
            .insert(radio_id, handle);
    }

    pub fn remove(&self, radio_id: i64) {
        self.sessions
            .lock()
            .expect("command router mutex poisoned")
            .remove(&radio_id);
    }

    /// Deliver a `stop` frame to `radio_id`'s session, if currently
    /// connected. Returns `true` if a session was found and the frame was
    /// queued for send.
    pub fn stop(&self, radio_id: i64) -> bool {
        let handle = {
            let sessions = self.sessions.lock().expect("command router mutex poisoned");
            sessions.get(&radio_id).cloned()
        };
        match handle {
            Some(handle) => match handle.send(Message::Stop(StopMessage)) {
                Ok(()) => true,
                Err(_) => {
                    warn!(radio_id, "command router: session channel closed");
                    false
                }
            },
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_on_unregistered_radio_is_a_noop() {
        let router = CommandRouter::new();
        assert!(!router.stop(42));
    }

    #[test]
    fn stop_delivers_to_the_registered_session() {
        let router = CommandRouter::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        router.register(1, tx);

        assert!(router.stop(1));
        assert_eq!(rx.try_recv().unwrap(), Message::Stop(StopMessage));
    }

    #[test]
    fn removed_session_no_longer_receives_stop() {
        let router = CommandRouter::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        router.register(1, tx);
        router.remove(1);
        assert!(!router.stop(1));
    }
}

//! On change, re-render radio status as an HTML fragment and push it to
//! every connected web subscriber (component l).
//!
//! The admin HTML forms themselves are out of scope; this module only owns
//! turning a `StatusMessage` into a presentation record and a DOM-patchable
//! fragment, and the websocket loop that streams those fragments.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use broadcaster_protocol::{PlaybackStatus, StatusMessage};
use tracing::{info, warn};

use crate::status::ServerStatus;

/// Channel class used for CSS styling in the admin page: actively
/// transmitting, channel busy, or idle/clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelClass {
    Ptt,
    Cos,
    Clear,
}

impl ChannelClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelClass::Ptt => "ptt",
            ChannelClass::Cos => "cos",
            ChannelClass::Clear => "clear",
        }
    }
}

/// The presentation record rendered into an HTML fragment for one radio row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebRadioStatus {
    pub radio_id: i64,
    pub radio_name: String,
    pub channel_class: ChannelClass,
    pub status_text: String,
    pub cancel_disabled: bool,
}

/// Collapse a raw `StatusMessage` into its presentation record.
pub fn render_status(radio_id: i64, radio_name: &str, status: &StatusMessage) -> WebRadioStatus {
    let channel_class = if status.ptt {
        ChannelClass::Ptt
    } else if status.cos {
        ChannelClass::Cos
    } else {
        ChannelClass::Clear
    };

    let status_text = match status.status {
        PlaybackStatus::Idle => "Idle".to_string(),
        PlaybackStatus::Delay => {
            format!("Starts in {}s", status.delay_seconds_remaining)
        }
        PlaybackStatus::ChannelInUse => {
            format!("Waiting for channel ({}s)", status.waiting_for_channel_seconds)
        }
        PlaybackStatus::Playing => {
            let elapsed = status.playback_seconds_elapsed.max(0);
            format!("Playing: {}:{:02}", elapsed / 60, elapsed % 60)
        }
    };

    WebRadioStatus {
        radio_id,
        radio_name: radio_name.to_string(),
        channel_class,
        status_text,
        cancel_disabled: status.status == PlaybackStatus::Idle,
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Render every radio's current status as one HTML fragment suitable for
/// direct DOM patching (an out-of-band swap target per radio row).
pub fn render_fragment(rows: &[WebRadioStatus]) -> String {
    let mut out = String::from("<div id=\"radio-status\">\n");
    for row in rows {
        out.push_str(&format!(
            "  <div id=\"radio-{id}\" class=\"radio-row {class}\">\n    <span class=\"radio-name\">{name}</span>\n    <span class=\"status-text\">{status}</span>\n    <button class=\"cancel\" data-radio-id=\"{id}\"{disabled}>Stop</button>\n  </div>\n",
            id = row.radio_id,
            class = row.channel_class.as_str(),
            name = escape_html(&row.radio_name),
            status = escape_html(&row.status_text),
            disabled = if row.cancel_disabled { " disabled" } else { "" },
        ));
    }
    out.push_str("</div>\n");
    out
}

/// Validates the one-shot session token a web subscriber sends as its first
/// frame. The full user/password/cookie system that issues these tokens is
/// out of scope here; this is the narrow boundary the core consumes.
pub trait SessionAuthenticator: Send + Sync {
    fn validate(&self, token: &str) -> bool;
}

/// Accepts any token present in a fixed set, standing in for the session
/// store a real admin login flow would maintain.
pub struct StaticTokenAuthenticator {
    valid_tokens: std::collections::HashSet<String>,
}

impl StaticTokenAuthenticator {
    pub fn new(valid_tokens: impl IntoIterator<Item = String>) -> Self {
        Self {
            valid_tokens: valid_tokens.into_iter().collect(),
        }
    }
}

impl SessionAuthenticator for StaticTokenAuthenticator {
    fn validate(&self, token: &str) -> bool {
        self.valid_tokens.contains(token)
    }
}

/// Radio id -> display name, needed only for rendering (the status map
/// itself is keyed by id).
pub type RadioNames = Arc<std::sync::RwLock<HashMap<i64, String>>>;

/// Drives one web subscriber's websocket: read the session-token frame,
/// then loop rendering the current statuses and awaiting the next change.
pub async fn run_web_subscriber(
    mut socket: WebSocket,
    server_status: Arc<ServerStatus>,
    radio_names: RadioNames,
    authenticator: Arc<dyn SessionAuthenticator>,
) {
    let token = match socket.recv().await {
        Some(Ok(WsMessage::Text(text))) => text,
        _ => {
            warn!("web subscriber closed before sending a session token");
            return;
        }
    };

    if !authenticator.validate(token.as_str().trim()) {
        warn!("web subscriber sent an invalid session token");
        let _ = socket.close().await;
        return;
    }

    let mut watcher = server_status.watch();
    info!("web subscriber authenticated");

    loop {
        let names = radio_names.read().expect("radio name map poisoned").clone();
        let rows: Vec<WebRadioStatus> = server_status
            .snapshot()
            .into_iter()
            .map(|(id, status)| {
                let name = names.get(&id).cloned().unwrap_or_else(|| format!("radio-{id}"));
                render_status(id, &name, &status)
            })
            .collect();

        if socket
            .send(WsMessage::Text(render_fragment(&rows)))
            .await
            .is_err()
        {
            info!("web subscriber socket closed");
            return;
        }

        if !watcher.changed().await {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(status: PlaybackStatus) -> StatusMessage {
        let mut m = StatusMessage::idle("Australia/Hobart");
        m.status = status;
        m
    }

    #[test]
    fn playing_renders_minutes_seconds() {
        let mut m = status(PlaybackStatus::Playing);
        m.playback_seconds_elapsed = 125;
        let row = render_status(1, "Transmitter A", &m);
        assert_eq!(row.status_text, "Playing: 2:05");
        assert!(!row.cancel_disabled);
    }

    #[test]
    fn idle_disables_cancel() {
        let row = render_status(1, "A", &status(PlaybackStatus::Idle));
        assert!(row.cancel_disabled);
        assert_eq!(row.status_text, "Idle");
    }

    #[test]
    fn ptt_takes_priority_over_cos_for_channel_class() {
        let mut m = status(PlaybackStatus::Playing);
        m.ptt = true;
        m.cos = true;
        let row = render_status(1, "A", &m);
        assert_eq!(row.channel_class, ChannelClass::Ptt);
    }

    #[test]
    fn fragment_escapes_radio_name() {
        let row = WebRadioStatus {
            radio_id: 1,
            radio_name: "<script>".to_string(),
            channel_class: ChannelClass::Clear,
            status_text: "Idle".to_string(),
            cancel_disabled: true,
        };
        let html = render_fragment(&[row]);
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn static_authenticator_only_accepts_known_tokens() {
        let auth = StaticTokenAuthenticator::new(["abc".to_string()]);
        assert!(auth.validate("abc"));
        assert!(!auth.validate("xyz"));
    }
}

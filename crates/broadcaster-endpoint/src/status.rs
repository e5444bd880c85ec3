//! Status aggregator (component e).
//!
//! Owns the single `StatusMessage` describing this endpoint and applies the
//! typed event alphabet from spec §4.e. Runs as its own task so the
//! scheduler, the cache reconciler, and the session's connection churn can
//! all push events without touching shared mutable state directly.

use std::sync::Arc;

use broadcaster_protocol::protocol::LOCAL_TIME_FORMAT;
use broadcaster_protocol::{Message, PlaybackStatus, StatusMessage};
use tokio::sync::mpsc;
use tokio::time::{interval, interval_at, Duration, Instant, Interval};
use tracing::debug;

use crate::cache::CacheStatusSink;
use crate::ptt::Cos;

const ACTIVE_TICK: Duration = Duration::from_secs(1);
const IDLE_TICK: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub enum StatusEvent {
    /// Installs or clears the channel the aggregator writes status frames
    /// to. Cleared automatically when a write fails; re-installed by the
    /// session once it has reconnected.
    SetOutbound(Option<mpsc::UnboundedSender<Message>>),
    BeginIdle,
    BeginDelay {
        playlist: String,
        filename: String,
        delay_seconds: i64,
    },
    BeginWaitForChannel {
        playlist: String,
        filename: String,
    },
    BeginPlayback {
        playlist: String,
        filename: String,
    },
    Ptt(bool),
    FilesInSync(bool),
    Tick,
}

/// Cheaply-cloned front door to the aggregator task.
#[derive(Clone)]
pub struct StatusHandle {
    tx: mpsc::UnboundedSender<StatusEvent>,
}

impl StatusHandle {
    pub fn set_outbound(&self, sender: Option<mpsc::UnboundedSender<Message>>) {
        let _ = self.tx.send(StatusEvent::SetOutbound(sender));
    }

    pub fn begin_idle(&self) {
        let _ = self.tx.send(StatusEvent::BeginIdle);
    }

    pub fn begin_delay(&self, playlist: String, filename: String, delay_seconds: i64) {
        let _ = self.tx.send(StatusEvent::BeginDelay {
            playlist,
            filename,
            delay_seconds,
        });
    }

    pub fn begin_wait_for_channel(&self, playlist: String, filename: String) {
        let _ = self
            .tx
            .send(StatusEvent::BeginWaitForChannel { playlist, filename });
    }

    pub fn begin_playback(&self, playlist: String, filename: String) {
        let _ = self
            .tx
            .send(StatusEvent::BeginPlayback { playlist, filename });
    }

    pub fn ptt(&self, engaged: bool) {
        let _ = self.tx.send(StatusEvent::Ptt(engaged));
    }
}

impl CacheStatusSink for StatusHandle {
    fn report_files_in_sync(&self, in_sync: bool) {
        let _ = self.tx.send(StatusEvent::FilesInSync(in_sync));
    }
}

/// Spawns the aggregator task, returning a handle and its join handle.
pub fn spawn(time_zone: String, cos: Arc<dyn Cos>) -> (StatusHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = StatusHandle { tx };
    let join = tokio::spawn(run(rx, time_zone, cos));
    (handle, join)
}

async fn run(mut rx: mpsc::UnboundedReceiver<StatusEvent>, time_zone: String, cos: Arc<dyn Cos>) {
    let mut message = StatusMessage::idle(&time_zone);
    let mut last_sent: Option<StatusMessage> = None;
    let mut outbound: Option<mpsc::UnboundedSender<Message>> = None;
    let mut ticker = interval(IDLE_TICK);
    ticker.tick().await;

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(event) => {
                        if let StatusEvent::SetOutbound(sender) = event {
                            outbound = sender;
                        } else {
                            apply_event(&mut message, &mut ticker, event);
                        }
                    }
                    None => return,
                }
            }
            _ = ticker.tick() => {
                apply_tick(&mut message);
            }
        }

        message.cos = cos.value().await;
        message.local_time = chrono::Local::now().format(LOCAL_TIME_FORMAT).to_string();

        publish(&message, &mut last_sent, &mut outbound);
    }
}

fn apply_event(message: &mut StatusMessage, ticker: &mut Interval, event: StatusEvent) {
    match event {
        StatusEvent::SetOutbound(_) => unreachable!("handled by caller"),
        StatusEvent::BeginIdle => {
            message.status = PlaybackStatus::Idle;
            message.playlist.clear();
            message.filename.clear();
            reset_counters(message);
            *ticker = interval_at(Instant::now() + IDLE_TICK, IDLE_TICK);
        }
        StatusEvent::BeginDelay {
            playlist,
            filename,
            delay_seconds,
        } => {
            message.status = PlaybackStatus::Delay;
            message.playlist = playlist;
            message.filename = filename;
            reset_counters(message);
            message.delay_seconds_remaining = delay_seconds;
            *ticker = interval_at(Instant::now() + ACTIVE_TICK, ACTIVE_TICK);
        }
        StatusEvent::BeginWaitForChannel { playlist, filename } => {
            message.status = PlaybackStatus::ChannelInUse;
            message.playlist = playlist;
            message.filename = filename;
            reset_counters(message);
            *ticker = interval_at(Instant::now() + ACTIVE_TICK, ACTIVE_TICK);
        }
        StatusEvent::BeginPlayback { playlist, filename } => {
            message.status = PlaybackStatus::Playing;
            message.playlist = playlist;
            message.filename = filename;
            reset_counters(message);
            *ticker = interval_at(Instant::now() + ACTIVE_TICK, ACTIVE_TICK);
        }
        StatusEvent::Ptt(engaged) => {
            message.ptt = engaged;
        }
        StatusEvent::FilesInSync(in_sync) => {
            message.files_in_sync = in_sync;
        }
        StatusEvent::Tick => unreachable!("ticks are generated by the ticker, not forwarded"),
    }
}

fn reset_counters(message: &mut StatusMessage) {
    message.delay_seconds_remaining = 0;
    message.playback_seconds_elapsed = 0;
    message.waiting_for_channel_seconds = 0;
}

fn apply_tick(message: &mut StatusMessage) {
    match message.status {
        PlaybackStatus::Delay => {
            if message.delay_seconds_remaining > 0 {
                message.delay_seconds_remaining -= 1;
            }
        }
        PlaybackStatus::ChannelInUse => {
            message.waiting_for_channel_seconds += 1;
        }
        PlaybackStatus::Playing => {
            message.playback_seconds_elapsed += 1;
        }
        PlaybackStatus::Idle => {}
    }
}

fn publish(
    message: &StatusMessage,
    last_sent: &mut Option<StatusMessage>,
    outbound: &mut Option<mpsc::UnboundedSender<Message>>,
) {
    if last_sent.as_ref() == Some(message) {
        return;
    }
    if let Some(sender) = outbound.as_ref() {
        if sender.send(Message::Status(message.clone())).is_err() {
            debug!("status write failed, forgetting outbound channel");
            *outbound = None;
            return;
        }
        *last_sent = Some(message.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ptt::DefaultCos;
    use std::time::Duration as StdDuration;

    #[tokio::test]
    async fn begin_playback_then_tick_increments_elapsed() {
        let (handle, _join) = spawn("UTC".to_string(), Arc::new(DefaultCos));
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        handle.set_outbound(Some(out_tx));
        handle.begin_playback("Morning Show".to_string(), "a.wav".to_string());

        let first = tokio::time::timeout(StdDuration::from_millis(200), out_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let Message::Status(status) = first else {
            panic!("expected status message");
        };
        assert_eq!(status.status, PlaybackStatus::Playing);
        assert_eq!(status.playback_seconds_elapsed, 0);
    }

    #[tokio::test]
    async fn duplicate_status_is_not_resent() {
        let (handle, _join) = spawn("UTC".to_string(), Arc::new(DefaultCos));
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        handle.set_outbound(Some(out_tx));
        handle.ptt(true);
        handle.ptt(true);

        let _first = tokio::time::timeout(StdDuration::from_millis(200), out_rx.recv())
            .await
            .unwrap();
        let second = tokio::time::timeout(StdDuration::from_millis(100), out_rx.recv()).await;
        assert!(second.is_err(), "identical status must be deduplicated");
    }

    #[tokio::test]
    async fn begin_idle_clears_playlist_and_filename() {
        let (handle, _join) = spawn("UTC".to_string(), Arc::new(DefaultCos));
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        handle.set_outbound(Some(out_tx));
        handle.begin_playback("Show".to_string(), "a.wav".to_string());
        out_rx.recv().await.unwrap();
        handle.begin_idle();

        let update = tokio::time::timeout(StdDuration::from_millis(200), out_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let Message::Status(status) = update else {
            panic!("expected status message");
        };
        assert_eq!(status.status, PlaybackStatus::Idle);
        assert!(status.playlist.is_empty());
        assert!(status.filename.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn begin_delay_does_not_tick_immediately() {
        let (handle, _join) = spawn("UTC".to_string(), Arc::new(DefaultCos));
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        handle.set_outbound(Some(out_tx));
        handle.begin_delay("Morning Show".to_string(), "a.wav".to_string(), 10);

        let first = out_rx.recv().await.unwrap();
        let Message::Status(status) = first else {
            panic!("expected status message");
        };
        assert_eq!(status.delay_seconds_remaining, 10);

        // A reprogrammed ticker must not fire in the same instant it was
        // armed; the next status update should only arrive one full tick
        // later, still showing the untouched countdown.
        let second = tokio::time::timeout(StdDuration::from_millis(500), out_rx.recv()).await;
        assert!(
            second.is_err(),
            "ticker fired immediately after BeginDelay instead of one period later"
        );

        tokio::time::advance(ACTIVE_TICK).await;
        let third = tokio::time::timeout(StdDuration::from_millis(200), out_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let Message::Status(status) = third else {
            panic!("expected status message");
        };
        assert_eq!(status.delay_seconds_remaining, 9);
    }
}

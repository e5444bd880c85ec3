//! Playback scheduler (component d).
//!
//! Picks the next-due playlist by wall-clock start time, arms a timer for
//! it, and on fire walks its entries: delay, wait for the channel to clear,
//! play. A `STOP` frame cancels whichever of those three phases is in
//! flight. Grounded in `examples/original_source/radio/main.go`'s
//! `playlistWorker`/`playPlaylist` pair; ties in the "next due" selection
//! are broken by smallest playlist id rather than that source's
//! iteration-order bug (see SPEC_FULL.md §10).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use broadcaster_protocol::protocol::START_TIME_FORMAT;
use broadcaster_protocol::PlaylistSpec;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::audio::{self, PlayOutcome};
use crate::ptt::{Cos, Ptt};
use crate::status::StatusHandle;

/// Runs forever, re-selecting the next-due playlist each time the manifest
/// changes or the previous one finishes. Never returns except when the
/// manifest channel is dropped (process shutdown).
pub async fn run(
    cache_dir: PathBuf,
    time_zone: Tz,
    mut manifest_rx: watch::Receiver<Vec<PlaylistSpec>>,
    mut stop_rx: watch::Receiver<u64>,
    ptt: Arc<dyn Ptt>,
    cos: Arc<dyn Cos>,
    status: StatusHandle,
) {
    loop {
        let playlists = manifest_rx.borrow_and_update().clone();
        let Some((playlist, fire_at)) = select_next(&playlists, time_zone) else {
            status.begin_idle();
            if manifest_rx.changed().await.is_err() {
                return;
            }
            continue;
        };

        info!(playlist = %playlist.name, id = playlist.id, at = %fire_at, "armed");
        status.begin_idle();

        let sleep = time_until(fire_at);
        tokio::select! {
            _ = tokio::time::sleep(sleep) => {}
            changed = manifest_rx.changed() => {
                if changed.is_err() {
                    return;
                }
                continue;
            }
        }

        // A STOP that arrived while idle/armed is not a cancellation of
        // anything in flight; discard it before the run so it doesn't
        // immediately cancel this playlist's first entry.
        stop_rx.borrow_and_update();

        run_playlist(&playlist, fire_at, &cache_dir, ptt.as_ref(), cos.as_ref(), &status, &mut stop_rx).await;
        status.begin_idle();
    }
}

/// Among playlists whose `start_time` is still in the future, picks the one
/// starting soonest; ties broken by smallest `id`.
fn select_next(playlists: &[PlaylistSpec], tz: Tz) -> Option<(PlaylistSpec, DateTime<Tz>)> {
    let now = Utc::now().with_timezone(&tz);
    playlists
        .iter()
        .filter_map(|p| parse_start_time(&p.start_time, tz).map(|t| (p, t)))
        .filter(|(_, t)| *t > now)
        .min_by(|(pa, ta), (pb, tb)| ta.cmp(tb).then(pa.id.cmp(&pb.id)))
        .map(|(p, t)| (p.clone(), t))
}

fn parse_start_time(s: &str, tz: Tz) -> Option<DateTime<Tz>> {
    let naive = NaiveDateTime::parse_from_str(s, START_TIME_FORMAT).ok()?;
    tz.from_local_datetime(&naive).single()
}

fn time_until<T: TimeZone>(target: DateTime<T>) -> Duration {
    let now = Utc::now().with_timezone(&target.timezone());
    (target - now).to_std().unwrap_or(Duration::ZERO)
}

/// Walks a playlist's entries in order: delay, wait for channel clear, play.
/// Returns early (leaving remaining entries unplayed) the moment `stop_rx`
/// fires during any of the three phases.
async fn run_playlist(
    playlist: &PlaylistSpec,
    start_time: DateTime<Tz>,
    cache_dir: &Path,
    ptt: &dyn Ptt,
    cos: &dyn Cos,
    status: &StatusHandle,
    stop_rx: &mut watch::Receiver<u64>,
) {
    info!(playlist = %playlist.name, entries = playlist.entries.len(), "beginning playback");

    for entry in &playlist.entries {
        let delay = if entry.is_relative {
            Duration::from_secs(entry.delay_seconds.max(0) as u64)
        } else {
            time_until(start_time + ChronoDuration::seconds(entry.delay_seconds))
        };

        status.begin_delay(
            playlist.name.clone(),
            entry.filename.clone(),
            delay.as_secs() as i64,
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop_rx.changed() => {
                info!(filename = %entry.filename, "cancelled during delay");
                return;
            }
        }

        status.begin_wait_for_channel(playlist.name.clone(), entry.filename.clone());
        tokio::select! {
            _ = cos.wait_for_clear() => {}
            _ = stop_rx.changed() => {
                info!(filename = %entry.filename, "cancelled while waiting for channel");
                return;
            }
        }

        let path = cache_dir.join(&entry.filename);
        let supported_ext = matches!(
            path.extension()
                .and_then(|e| e.to_str())
                .map(|s| s.to_ascii_lowercase())
                .as_deref(),
            Some("wav") | Some("mp3")
        );
        if !supported_ext || !path.exists() {
            warn!(filename = %entry.filename, "skipping entry: missing file or unsupported extension");
            continue;
        }

        status.begin_playback(playlist.name.clone(), entry.filename.clone());
        ptt.engage().await;
        status.ptt(true);

        let outcome = audio::play_file(&path, stop_rx).await;

        ptt.disengage().await;
        status.ptt(false);

        match outcome {
            Ok(PlayOutcome::Finished) => {
                info!(filename = %entry.filename, "playback complete");
            }
            Ok(PlayOutcome::Cancelled) => {
                info!(filename = %entry.filename, "cancelled during playback");
                return;
            }
            Err(e) => {
                warn!(filename = %entry.filename, "playback error, skipping entry: {e}");
            }
        }
    }

    info!(playlist = %playlist.name, "playlist finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use broadcaster_protocol::EntrySpec;

    fn playlist(id: i64, start_time: &str) -> PlaylistSpec {
        PlaylistSpec {
            id,
            name: format!("playlist-{id}"),
            start_time: start_time.to_string(),
            entries: vec![EntrySpec {
                filename: "a.wav".to_string(),
                delay_seconds: 0,
                is_relative: true,
            }],
        }
    }

    #[test]
    fn selects_soonest_future_playlist() {
        let tz = chrono_tz::UTC;
        let now = Utc::now().with_timezone(&tz);
        let soon = now + ChronoDuration::minutes(1);
        let later = now + ChronoDuration::minutes(5);
        let playlists = vec![
            playlist(1, &later.format(START_TIME_FORMAT).to_string()),
            playlist(2, &soon.format(START_TIME_FORMAT).to_string()),
        ];

        let (selected, _) = select_next(&playlists, tz).unwrap();
        assert_eq!(selected.id, 2);
    }

    #[test]
    fn ignores_playlists_entirely_in_the_past() {
        let tz = chrono_tz::UTC;
        let now = Utc::now().with_timezone(&tz);
        let past = now - ChronoDuration::minutes(5);
        let playlists = vec![playlist(1, &past.format(START_TIME_FORMAT).to_string())];

        assert!(select_next(&playlists, tz).is_none());
    }

    #[test]
    fn ties_break_on_smallest_id() {
        let tz = chrono_tz::UTC;
        let now = Utc::now().with_timezone(&tz);
        let at = (now + ChronoDuration::minutes(1))
            .format(START_TIME_FORMAT)
            .to_string();
        let playlists = vec![playlist(7, &at), playlist(3, &at), playlist(9, &at)];

        let (selected, _) = select_next(&playlists, tz).unwrap();
        assert_eq!(selected.id, 3);
    }

    #[test]
    fn malformed_start_time_is_skipped() {
        let tz = chrono_tz::UTC;
        let playlists = vec![playlist(1, "not-a-timestamp")];
        assert!(select_next(&playlists, tz).is_none());
    }
}

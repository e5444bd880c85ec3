//! Endpoint session (component f).
//!
//! Dials the coordinator, authenticates, and pumps frames in both
//! directions: inbound `files`/`playlists` snapshots are republished onto
//! watch channels the cache reconciler and scheduler already hold, inbound
//! `stop` bumps a generation counter the scheduler treats as a cancel
//! signal, and outbound `status` frames come from whatever the status
//! aggregator hands the per-connection writer. On any failure the
//! connection is torn down and retried after a fixed backoff. Grounded in
//! `examples/original_source/radio/main.go`'s `runWebsocket` (including its
//! 30-second retry sleep) adapted to the length-framed TCP transport
//! decided in SPEC_FULL.md §10.

use std::time::Duration;

use broadcaster_protocol::{AuthenticateMessage, FileSpec, Frame, Message, PlaylistSpec};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::status::StatusHandle;

const RECONNECT_BACKOFF: Duration = Duration::from_secs(30);
const READ_CHUNK: usize = 4096;

/// Runs forever: dial, authenticate, pump frames, and on disconnect sleep
/// [`RECONNECT_BACKOFF`] before retrying. The cache reconciler and scheduler
/// tasks outlive any individual connection; they simply keep reading
/// whatever these watch channels last held.
pub async fn run(
    dial_address: String,
    token: String,
    files_tx: watch::Sender<Vec<FileSpec>>,
    playlists_tx: watch::Sender<Vec<PlaylistSpec>>,
    stop_tx: watch::Sender<u64>,
    status: StatusHandle,
) {
    loop {
        match connect_and_authenticate(&dial_address, &token).await {
            Ok(stream) => {
                info!(%dial_address, "connected to coordinator");
                run_connected(stream, &files_tx, &playlists_tx, &stop_tx, &status).await;
                warn!("lost connection to coordinator");
            }
            Err(e) => {
                warn!(%dial_address, "connect failed: {e}");
            }
        }
        status.set_outbound(None);
        tokio::time::sleep(RECONNECT_BACKOFF).await;
    }
}

async fn connect_and_authenticate(dial_address: &str, token: &str) -> std::io::Result<TcpStream> {
    let mut stream = TcpStream::connect(dial_address).await?;
    let frame = Frame::encode(&Message::Authenticate(AuthenticateMessage {
        token: token.to_string(),
    }))
    .expect("authenticate message always encodes");
    stream.write_all(&frame).await?;
    Ok(stream)
}

async fn run_connected(
    stream: TcpStream,
    files_tx: &watch::Sender<Vec<FileSpec>>,
    playlists_tx: &watch::Sender<Vec<PlaylistSpec>>,
    stop_tx: &watch::Sender<u64>,
    status: &StatusHandle,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    status.set_outbound(Some(out_tx));

    let writer_task = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let frame = match Frame::encode(&message) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("dropping outgoing status frame that failed to encode: {e}");
                    continue;
                }
            };
            if write_half.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    let mut read_buf = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = match read_half.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        read_buf.extend_from_slice(&chunk[..n]);

        loop {
            match Frame::try_decode(&read_buf) {
                Ok(None) => break,
                Ok(Some((message, consumed))) => {
                    read_buf.drain(..consumed);
                    apply_message(message, files_tx, playlists_tx, stop_tx);
                }
                Err((e, consumed)) => {
                    warn!("dropping bad frame from coordinator: {e}");
                    read_buf.drain(..consumed);
                }
            }
        }
    }

    writer_task.abort();
}

fn apply_message(
    message: Message,
    files_tx: &watch::Sender<Vec<FileSpec>>,
    playlists_tx: &watch::Sender<Vec<PlaylistSpec>>,
    stop_tx: &watch::Sender<u64>,
) {
    match message {
        Message::Files(m) => {
            let _ = files_tx.send(m.files);
        }
        Message::Playlists(m) => {
            let _ = playlists_tx.send(m.playlists);
        }
        Message::Stop(_) => {
            stop_tx.send_modify(|generation| *generation = generation.wrapping_add(1));
        }
        other => {
            warn!(tag = other.tag(), "endpoint received unexpected message tag");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broadcaster_protocol::{EntrySpec, PlaylistSpec, StopMessage};

    fn channels() -> (
        watch::Sender<Vec<FileSpec>>,
        watch::Receiver<Vec<FileSpec>>,
        watch::Sender<Vec<PlaylistSpec>>,
        watch::Receiver<Vec<PlaylistSpec>>,
        watch::Sender<u64>,
        watch::Receiver<u64>,
    ) {
        let (ftx, frx) = watch::channel(Vec::new());
        let (ptx, prx) = watch::channel(Vec::new());
        let (stx, srx) = watch::channel(0u64);
        (ftx, frx, ptx, prx, stx, srx)
    }

    #[test]
    fn files_message_republishes_onto_watch_channel() {
        let (ftx, mut frx, ptx, _prx, stx, _srx) = channels();
        frx.borrow_and_update();
        let files = vec![FileSpec {
            name: "a.wav".into(),
            hash: "abc".into(),
        }];
        apply_message(Message::Files(broadcaster_protocol::FilesMessage { files: files.clone() }), &ftx, &ptx, &stx);
        assert!(frx.has_changed().unwrap());
        assert_eq!(*frx.borrow_and_update(), files);
    }

    #[test]
    fn playlists_message_republishes_onto_watch_channel() {
        let (ftx, _frx, ptx, mut prx, stx, _srx) = channels();
        prx.borrow_and_update();
        let playlists = vec![PlaylistSpec {
            id: 1,
            name: "Morning".into(),
            start_time: "2026-02-03T08:00".into(),
            entries: vec![EntrySpec {
                filename: "a.wav".into(),
                delay_seconds: 0,
                is_relative: true,
            }],
        }];
        apply_message(
            Message::Playlists(broadcaster_protocol::PlaylistsMessage {
                playlists: playlists.clone(),
            }),
            &ftx,
            &ptx,
            &stx,
        );
        assert_eq!(*prx.borrow_and_update(), playlists);
    }

    #[test]
    fn stop_message_bumps_generation_counter() {
        let (ftx, _frx, ptx, _prx, stx, mut srx) = channels();
        srx.borrow_and_update();
        apply_message(Message::Stop(StopMessage), &ftx, &ptx, &stx);
        assert!(srx.has_changed().unwrap());
        assert_eq!(*srx.borrow_and_update(), 1);
    }

    #[tokio::test]
    async fn connect_and_authenticate_sends_authenticate_frame_first() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 256];
            let n = socket.read(&mut buf).await.unwrap();
            let (message, consumed) = Frame::try_decode(&buf[..n]).unwrap().unwrap();
            assert_eq!(consumed, n);
            message
        });

        let _stream = connect_and_authenticate(&addr.to_string(), "deadbeef")
            .await
            .unwrap();
        let message = server.await.unwrap();
        assert_eq!(
            message,
            Message::Authenticate(AuthenticateMessage {
                token: "deadbeef".to_string()
            })
        );
    }
}

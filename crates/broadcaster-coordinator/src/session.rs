//! Per-endpoint TCP session (component i) plus the per-endpoint change
//! broadcast tasks (component h).
//!
//! Adapted from the teacher's `socket.rs` client-handling loop: one reader
//! task per connection decoding length-prefixed frames out of a growing
//! buffer, and a writer side fed by an unbounded channel so any other task
//! (the change broadcasters, the command router) can queue a frame without
//! touching the socket directly.

use std::sync::Arc;

use broadcaster_protocol::{
    AuthenticateMessage, FileSpec, FilesMessage, Frame, Message, PlaylistSpec, PlaylistsMessage,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::state::CoordinatorState;

const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthState {
    Unauthenticated,
    Authenticated { radio_id: i64 },
}

/// Accept-loop body: owns one endpoint's connection end to end.
pub async fn run_session(stream: TcpStream, peer: std::net::SocketAddr, state: Arc<CoordinatorState>) {
    let (mut read_half, mut write_half) = stream.into_split();
    let (write_tx, mut write_rx) = mpsc::unbounded_channel::<Message>();

    let writer_task = tokio::spawn(async move {
        while let Some(message) = write_rx.recv().await {
            let frame = match Frame::encode(&message) {
                Ok(f) => f,
                Err(e) => {
                    warn!("failed to encode outgoing {:?}: {e}", message.tag());
                    continue;
                }
            };
            if write_half.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    let mut auth = AuthState::Unauthenticated;
    let mut broadcaster_handles: Vec<tokio::task::JoinHandle<()>> = Vec::new();
    let mut read_buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let n = match read_half.read(&mut chunk).await {
            Ok(0) => {
                info!(?peer, "endpoint closed connection");
                break;
            }
            Ok(n) => n,
            Err(e) => {
                warn!(?peer, "read error: {e}");
                break;
            }
        };
        read_buf.extend_from_slice(&chunk[..n]);

        loop {
            match Frame::try_decode(&read_buf) {
                Ok(None) => break,
                Ok(Some((message, consumed))) => {
                    read_buf.drain(..consumed);
                    auth = handle_message(
                        message,
                        auth,
                        &state,
                        &write_tx,
                        &mut broadcaster_handles,
                        peer,
                    )
                    .await;
                }
                Err((e, consumed)) => {
                    warn!(?peer, "dropping bad frame: {e}");
                    read_buf.drain(..consumed);
                }
            }
        }
    }

    for handle in broadcaster_handles {
        handle.abort();
    }
    writer_task.abort();
    if let AuthState::Authenticated { radio_id } = auth {
        state.router.remove(radio_id);
        state.server_status.radio_disconnected(radio_id);
        info!(radio_id, "endpoint session torn down");
    }
}

async fn handle_message(
    message: Message,
    auth: AuthState,
    state: &Arc<CoordinatorState>,
    write_tx: &mpsc::UnboundedSender<Message>,
    broadcaster_handles: &mut Vec<tokio::task::JoinHandle<()>>,
    peer: std::net::SocketAddr,
) -> AuthState {
    match (auth, message) {
        (AuthState::Unauthenticated, Message::Authenticate(AuthenticateMessage { token })) => {
            match state.radio_by_token(&token).await {
                Ok(Some(radio)) => {
                    info!(radio_id = radio.id, ?peer, "endpoint authenticated");
                    state.router.register(radio.id, write_tx.clone());

                    broadcaster_handles.push(tokio::spawn(keep_files_updated(
                        state.clone(),
                        write_tx.clone(),
                    )));
                    broadcaster_handles.push(tokio::spawn(keep_playlists_updated(
                        state.clone(),
                        write_tx.clone(),
                    )));

                    AuthState::Authenticated { radio_id: radio.id }
                }
                Ok(None) => {
                    warn!(?peer, "authenticate with unknown token");
                    AuthState::Unauthenticated
                }
                Err(e) => {
                    warn!(?peer, "catalogue lookup failed during authenticate: {e}");
                    AuthState::Unauthenticated
                }
            }
        }
        (AuthState::Unauthenticated, other) => {
            debug!(?peer, tag = other.tag(), "ignoring message before authenticate");
            AuthState::Unauthenticated
        }
        (AuthState::Authenticated { radio_id }, Message::Status(status)) => {
            state.server_status.merge_status(radio_id, status);
            AuthState::Authenticated { radio_id }
        }
        (authenticated @ AuthState::Authenticated { radio_id }, other) => {
            debug!(radio_id, tag = other.tag(), "ignoring unexpected message tag");
            authenticated
        }
    }
}

/// `KeepFilesUpdated`: fetch the files snapshot, send it, wait for the next
/// change, repeat. Exits (and is aborted by the session teardown anyway) if
/// the write channel has closed.
async fn keep_files_updated(state: Arc<CoordinatorState>, write_tx: mpsc::UnboundedSender<Message>) {
    let mut watcher = state.watch_files();
    loop {
        let files: Vec<FileSpec> = match state.get_files().await {
            Ok(files) => files,
            Err(e) => {
                warn!("failed to load files snapshot: {e}");
                Vec::new()
            }
        };
        if write_tx.send(Message::Files(FilesMessage { files })).is_err() {
            return;
        }
        if !watcher.changed().await {
            return;
        }
    }
}

/// `KeepPlaylistsUpdated`: same shape as [`keep_files_updated`] for the
/// playlists collection.
async fn keep_playlists_updated(
    state: Arc<CoordinatorState>,
    write_tx: mpsc::UnboundedSender<Message>,
) {
    let mut watcher = state.watch_playlists();
    loop {
        let playlists: Vec<PlaylistSpec> = match state.get_playlists_with_entries().await {
            Ok(playlists) => playlists,
            Err(e) => {
                warn!("failed to load playlists snapshot: {e}");
                Vec::new()
            }
        };
        if write_tx
            .send(Message::Playlists(PlaylistsMessage { playlists }))
            .is_err()
        {
            return;
        }
        if !watcher.changed().await {
            return;
        }
    }
}

//! `GET /file-downloads/<name>` — serves the raw bytes of a named audio
//! file from the coordinator's audio files directory; 404 if absent.
//! Adapted from the teacher's stream proxy (`proxy.rs`), trading upstream
//! fetch-and-forward for a local file read since files here live on disk
//! rather than behind another HTTP origin.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

#[derive(Clone)]
pub struct DownloadState {
    audio_files_path: Arc<PathBuf>,
}

impl DownloadState {
    pub fn new(audio_files_path: PathBuf) -> Self {
        Self {
            audio_files_path: Arc::new(audio_files_path),
        }
    }
}

async fn file_download(
    Path(name): Path<String>,
    State(state): State<DownloadState>,
) -> impl IntoResponse {
    // Reject path traversal outright — a `name` like `../coordinator.toml`
    // must never escape the audio files directory.
    if name.contains('/') || name.contains("..") {
        warn!(name, "rejected file-download request with unsafe name");
        return Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(axum::body::Body::empty())
            .unwrap();
    }

    let path = state.audio_files_path.join(&name);
    let file = match File::open(&path).await {
        Ok(f) => f,
        Err(_) => {
            return Response::builder()
                .status(StatusCode::NOT_FOUND)
                .body(axum::body::Body::empty())
                .unwrap();
        }
    };

    info!(name, "serving file download");
    let stream = ReaderStream::new(file);
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .body(axum::body::Body::from_stream(stream))
        .unwrap()
}

pub fn router(audio_files_path: PathBuf) -> Router {
    Router::new()
        .route("/file-downloads/{name}", get(file_download))
        .with_state(DownloadState::new(audio_files_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn serves_existing_file_bytes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.wav"), b"RIFF....").unwrap();
        let app = router(dir.path().to_path_buf());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/file-downloads/a.wav")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn returns_404_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(dir.path().to_path_buf());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/file-downloads/missing.wav")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(dir.path().to_path_buf());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/file-downloads/..%2Fsecret.toml")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

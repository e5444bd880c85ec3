//! Composition of the catalogue store with the change latches that fire
//! whenever any of its collections are mutated.
//!
//! The original source keeps three independent package-level singletons
//! (`files`, `playlists`, `status`), each pairing its data with its own
//! `changeWait` latch. This crate keeps the same shape but as one explicit
//! handle constructed in the composition root and passed to every task that
//! needs it, per REDESIGN FLAGS' "re-architect package-level singletons as
//! explicit capability handles" note.

use std::sync::Arc;

use broadcaster_protocol::{FileSpec, PlaylistSpec};

use crate::broadcast::{ChangeNotifier, ChangeWatcher};
use crate::catalogue::{CatalogueError, CatalogueStore, Radio};
use crate::router::CommandRouter;
use crate::status::ServerStatus;
use crate::web::RadioNames;

/// Shared, process-wide state the coordinator's tasks are constructed with.
pub struct CoordinatorState {
    pub store: Arc<dyn CatalogueStore>,
    files_changed: ChangeNotifier,
    playlists_changed: ChangeNotifier,
    pub server_status: Arc<ServerStatus>,
    pub router: Arc<CommandRouter>,
    pub radio_names: RadioNames,
}

impl CoordinatorState {
    pub fn new(store: Arc<dyn CatalogueStore>) -> Self {
        let (files_changed, _) = ChangeNotifier::new();
        let (playlists_changed, _) = ChangeNotifier::new();
        Self {
            store,
            files_changed,
            playlists_changed,
            server_status: Arc::new(ServerStatus::new()),
            router: Arc::new(CommandRouter::new()),
            radio_names: Arc::new(std::sync::RwLock::new(std::collections::HashMap::new())),
        }
    }

    pub fn watch_files(&self) -> ChangeWatcher {
        self.files_changed.watch()
    }

    pub fn watch_playlists(&self) -> ChangeWatcher {
        self.playlists_changed.watch()
    }

    pub async fn get_files(&self) -> Result<Vec<FileSpec>, CatalogueError> {
        self.store.get_files().await
    }

    pub async fn get_playlists_with_entries(&self) -> Result<Vec<PlaylistSpec>, CatalogueError> {
        self.store.get_playlists_with_entries().await
    }

    pub async fn radio_by_token(&self, token: &str) -> Result<Option<Radio>, CatalogueError> {
        self.store.radio_by_token(token).await
    }

    /// Populates the in-memory radio-id -> name cache from the durable
    /// store. Called once at startup so the web status view shows real
    /// transmitter names immediately, without waiting for a `submit_radio`
    /// call to refresh them after a coordinator restart.
    pub async fn refresh_radio_names(&self) -> Result<(), CatalogueError> {
        let radios = self.store.list_radios().await?;
        let mut names = self.radio_names.write().expect("radio name map poisoned");
        names.clear();
        for radio in radios {
            names.insert(radio.id, radio.name);
        }
        Ok(())
    }

    pub async fn submit_playlist(&self, playlist: PlaylistSpec) -> Result<(), CatalogueError> {
        self.store.submit_playlist(playlist).await?;
        self.playlists_changed.notify();
        Ok(())
    }

    pub async fn delete_playlist(&self, id: i64) -> Result<(), CatalogueError> {
        self.store.delete_playlist(id).await?;
        self.playlists_changed.notify();
        Ok(())
    }

    pub async fn submit_radio(&self, radio: Radio) -> Result<(), CatalogueError> {
        self.radio_names
            .write()
            .expect("radio name map poisoned")
            .insert(radio.id, radio.name.clone());
        self.store.submit_radio(radio).await
    }

    pub async fn delete_radio(&self, id: i64) -> Result<(), CatalogueError> {
        self.radio_names
            .write()
            .expect("radio name map poisoned")
            .remove(&id);
        self.store.delete_radio(id).await
    }

    pub async fn upload_file(&self, name: &str, bytes: &[u8]) -> Result<FileSpec, CatalogueError> {
        let spec = self.store.upload_file(name, bytes).await?;
        self.files_changed.notify();
        Ok(spec)
    }

    pub async fn delete_file(&self, name: &str) -> Result<(), CatalogueError> {
        self.store.delete_file(name).await?;
        self.files_changed.notify();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::SqliteCatalogueStore;
    use std::time::Duration;

    fn new_state() -> (CoordinatorState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteCatalogueStore::open(
            &dir.path().join("db.sqlite3"),
            &dir.path().join("files"),
        )
        .unwrap();
        (CoordinatorState::new(Arc::new(store)), dir)
    }

    #[tokio::test]
    async fn refresh_radio_names_loads_existing_rows() {
        let (state, _dir) = new_state();
        state
            .submit_radio(Radio {
                id: 1,
                name: "Stale Name".into(),
                token: "tok".into(),
            })
            .await
            .unwrap();
        state
            .radio_names
            .write()
            .expect("radio name map poisoned")
            .clear();

        state.refresh_radio_names().await.unwrap();

        assert_eq!(
            state.radio_names.read().unwrap().get(&1).cloned(),
            Some("Stale Name".to_string())
        );
    }

    #[tokio::test]
    async fn uploading_a_file_notifies_the_files_watcher() {
        let (state, _dir) = new_state();
        let mut watcher = state.watch_files();
        state.upload_file("a.wav", b"hi").await.unwrap();
        assert!(tokio::time::timeout(Duration::from_millis(50), watcher.changed())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn submitting_a_playlist_notifies_the_playlists_watcher_only() {
        let (state, _dir) = new_state();
        let mut files_watcher = state.watch_files();
        let mut playlists_watcher = state.watch_playlists();

        state
            .submit_playlist(PlaylistSpec {
                id: 1,
                name: "Morning".into(),
                start_time: "2026-01-01T00:00".into(),
                entries: vec![],
            })
            .await
            .unwrap();

        assert!(
            tokio::time::timeout(Duration::from_millis(50), playlists_watcher.changed())
                .await
                .unwrap()
        );
        assert!(
            tokio::time::timeout(Duration::from_millis(30), files_watcher.changed())
                .await
                .is_err()
        );
    }
}

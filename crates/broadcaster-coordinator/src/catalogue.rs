//! Durable playlist/radio/file metadata (component g).
//!
//! `CatalogueStore` is the narrow interface the rest of the coordinator
//! consumes; `radioByToken`/`getPlaylistsWithEntries`/`getFiles` are the
//! calls the core actually needs. The rusqlite-backed implementation
//! additionally exposes the CRUD surface the change broadcaster's triggers
//! (submit/delete playlist, radio, file) hang off of.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use broadcaster_protocol::{EntrySpec, FileSpec, PlaylistSpec};
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Radio {
    pub id: i64,
    pub name: String,
    pub token: String,
}

#[derive(Debug, Error)]
pub enum CatalogueError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("playlist {0} does not exist")]
    UnknownPlaylist(i64),
    #[error("radio {0} does not exist")]
    UnknownRadio(i64),
}

/// The durable catalogue the coordinator serves to endpoints. Every mutating
/// method is expected to call the appropriate `ChangeNotifier` (owned by the
/// caller, not the store) once the write commits.
#[async_trait]
pub trait CatalogueStore: Send + Sync {
    async fn get_files(&self) -> Result<Vec<FileSpec>, CatalogueError>;
    async fn get_playlists_with_entries(&self) -> Result<Vec<PlaylistSpec>, CatalogueError>;
    async fn radio_by_token(&self, token: &str) -> Result<Option<Radio>, CatalogueError>;
    async fn list_radios(&self) -> Result<Vec<Radio>, CatalogueError>;

    async fn submit_playlist(&self, playlist: PlaylistSpec) -> Result<(), CatalogueError>;
    async fn delete_playlist(&self, id: i64) -> Result<(), CatalogueError>;

    async fn submit_radio(&self, radio: Radio) -> Result<(), CatalogueError>;
    async fn delete_radio(&self, id: i64) -> Result<(), CatalogueError>;

    async fn upload_file(&self, name: &str, bytes: &[u8]) -> Result<FileSpec, CatalogueError>;
    async fn delete_file(&self, name: &str) -> Result<(), CatalogueError>;
}

/// A `rusqlite`-backed `CatalogueStore`. The connection is wrapped in a
/// blocking `Mutex` and every call runs inside `spawn_blocking`, matching how
/// the pack's own SQLite-backed crate isolates synchronous database access
/// from the async runtime.
pub struct SqliteCatalogueStore {
    conn: std::sync::Arc<Mutex<Connection>>,
    audio_files_path: PathBuf,
}

impl SqliteCatalogueStore {
    pub fn open(database_path: &Path, audio_files_path: &Path) -> Result<Self, CatalogueError> {
        std::fs::create_dir_all(audio_files_path)?;
        let conn = Connection::open(database_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS radios (
                id    INTEGER PRIMARY KEY,
                name  TEXT NOT NULL,
                token TEXT NOT NULL UNIQUE
            );
            CREATE TABLE IF NOT EXISTS files (
                name TEXT PRIMARY KEY,
                hash TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS playlists (
                id         INTEGER PRIMARY KEY,
                name       TEXT NOT NULL,
                start_time TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS playlist_entries (
                playlist_id   INTEGER NOT NULL REFERENCES playlists(id) ON DELETE CASCADE,
                position      INTEGER NOT NULL,
                filename      TEXT NOT NULL,
                delay_seconds INTEGER NOT NULL,
                is_relative   INTEGER NOT NULL,
                PRIMARY KEY (playlist_id, position)
            );
            ",
        )?;
        Ok(Self {
            conn: std::sync::Arc::new(Mutex::new(conn)),
            audio_files_path: audio_files_path.to_path_buf(),
        })
    }

    fn with_conn<T, F>(&self, f: F) -> Result<T, CatalogueError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    {
        let conn = self.conn.lock().expect("catalogue connection poisoned");
        f(&conn).map_err(CatalogueError::from)
    }
}

#[async_trait]
impl CatalogueStore for SqliteCatalogueStore {
    async fn get_files(&self) -> Result<Vec<FileSpec>, CatalogueError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("catalogue connection poisoned");
            let mut stmt = conn.prepare("SELECT name, hash FROM files ORDER BY name")?;
            let rows = stmt.query_map([], |row| {
                Ok(FileSpec {
                    name: row.get(0)?,
                    hash: row.get(1)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(CatalogueError::from)
        })
        .await
        .expect("blocking task panicked")
    }

    async fn get_playlists_with_entries(&self) -> Result<Vec<PlaylistSpec>, CatalogueError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("catalogue connection poisoned");
            let mut stmt =
                conn.prepare("SELECT id, name, start_time FROM playlists ORDER BY id")?;
            let playlists = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut out = Vec::with_capacity(playlists.len());
            for (id, name, start_time) in playlists {
                let mut entry_stmt = conn.prepare(
                    "SELECT filename, delay_seconds, is_relative FROM playlist_entries \
                     WHERE playlist_id = ?1 ORDER BY position",
                )?;
                let entries = entry_stmt
                    .query_map([id], |row| {
                        Ok(EntrySpec {
                            filename: row.get(0)?,
                            delay_seconds: row.get(1)?,
                            is_relative: row.get::<_, i64>(2)? != 0,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                out.push(PlaylistSpec {
                    id,
                    name,
                    start_time,
                    entries,
                });
            }
            Ok(out)
        })
        .await
        .expect("blocking task panicked")
    }

    async fn radio_by_token(&self, token: &str) -> Result<Option<Radio>, CatalogueError> {
        let conn = self.conn.clone();
        let token = token.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("catalogue connection poisoned");
            conn.query_row(
                "SELECT id, name, token FROM radios WHERE token = ?1",
                [&token],
                |row| {
                    Ok(Radio {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        token: row.get(2)?,
                    })
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(CatalogueError::from(other)),
            })
        })
        .await
        .expect("blocking task panicked")
    }

    async fn list_radios(&self) -> Result<Vec<Radio>, CatalogueError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("catalogue connection poisoned");
            let mut stmt = conn.prepare("SELECT id, name, token FROM radios ORDER BY id")?;
            let rows = stmt.query_map([], |row| {
                Ok(Radio {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    token: row.get(2)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(CatalogueError::from)
        })
        .await
        .expect("blocking task panicked")
    }

    async fn submit_playlist(&self, playlist: PlaylistSpec) -> Result<(), CatalogueError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO playlists (id, name, start_time) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name, start_time = excluded.start_time",
                rusqlite::params![playlist.id, playlist.name, playlist.start_time],
            )?;
            conn.execute(
                "DELETE FROM playlist_entries WHERE playlist_id = ?1",
                [playlist.id],
            )?;
            for (position, entry) in playlist.entries.iter().enumerate() {
                conn.execute(
                    "INSERT INTO playlist_entries \
                     (playlist_id, position, filename, delay_seconds, is_relative) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![
                        playlist.id,
                        position as i64,
                        entry.filename,
                        entry.delay_seconds,
                        entry.is_relative as i64,
                    ],
                )?;
            }
            Ok(())
        })
    }

    async fn delete_playlist(&self, id: i64) -> Result<(), CatalogueError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM playlists WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    async fn submit_radio(&self, radio: Radio) -> Result<(), CatalogueError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO radios (id, name, token) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name, token = excluded.token",
                rusqlite::params![radio.id, radio.name, radio.token],
            )?;
            Ok(())
        })
    }

    async fn delete_radio(&self, id: i64) -> Result<(), CatalogueError> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM radios WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    async fn upload_file(&self, name: &str, bytes: &[u8]) -> Result<FileSpec, CatalogueError> {
        let dest = self.audio_files_path.join(name);
        tokio::fs::write(&dest, bytes).await?;
        let hash = hex::encode(Sha256::digest(bytes));
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO files (name, hash) VALUES (?1, ?2) \
                 ON CONFLICT(name) DO UPDATE SET hash = excluded.hash",
                rusqlite::params![name, hash],
            )?;
            Ok(())
        })?;
        Ok(FileSpec {
            name: name.to_string(),
            hash,
        })
    }

    async fn delete_file(&self, name: &str) -> Result<(), CatalogueError> {
        let dest = self.audio_files_path.join(name);
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            tokio::fs::remove_file(&dest).await?;
        }
        self.with_conn(|conn| {
            conn.execute("DELETE FROM files WHERE name = ?1", [name])?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> (SqliteCatalogueStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("catalogue.sqlite3");
        let files_path = dir.path().join("files");
        let store = SqliteCatalogueStore::open(&db_path, &files_path).unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn radio_round_trips_by_token() {
        let (store, _dir) = open_store();
        store
            .submit_radio(Radio {
                id: 1,
                name: "Transmitter A".into(),
                token: "secret-token".into(),
            })
            .await
            .unwrap();

        let found = store.radio_by_token("secret-token").await.unwrap();
        assert_eq!(found.unwrap().name, "Transmitter A");
        assert!(store.radio_by_token("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_radios_returns_every_row() {
        let (store, _dir) = open_store();
        store
            .submit_radio(Radio {
                id: 1,
                name: "A".into(),
                token: "tok-a".into(),
            })
            .await
            .unwrap();
        store
            .submit_radio(Radio {
                id: 2,
                name: "B".into(),
                token: "tok-b".into(),
            })
            .await
            .unwrap();

        let radios = store.list_radios().await.unwrap();
        assert_eq!(radios.len(), 2);
        assert_eq!(radios[0].name, "A");
        assert_eq!(radios[1].name, "B");
    }

    #[tokio::test]
    async fn playlist_entries_preserve_order() {
        let (store, _dir) = open_store();
        let playlist = PlaylistSpec {
            id: 7,
            name: "Morning".into(),
            start_time: "2026-02-03T08:00".into(),
            entries: vec![
                EntrySpec {
                    filename: "a.wav".into(),
                    delay_seconds: 0,
                    is_relative: true,
                },
                EntrySpec {
                    filename: "b.wav".into(),
                    delay_seconds: 3,
                    is_relative: true,
                },
            ],
        };
        store.submit_playlist(playlist.clone()).await.unwrap();

        let fetched = store.get_playlists_with_entries().await.unwrap();
        assert_eq!(fetched, vec![playlist]);
    }

    #[tokio::test]
    async fn deleting_a_playlist_removes_its_entries() {
        let (store, _dir) = open_store();
        store
            .submit_playlist(PlaylistSpec {
                id: 1,
                name: "X".into(),
                start_time: "2026-01-01T00:00".into(),
                entries: vec![EntrySpec {
                    filename: "a.wav".into(),
                    delay_seconds: 0,
                    is_relative: true,
                }],
            })
            .await
            .unwrap();

        store.delete_playlist(1).await.unwrap();
        assert!(store.get_playlists_with_entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_a_playlist_cascades_to_entry_rows() {
        let (store, _dir) = open_store();
        store
            .submit_playlist(PlaylistSpec {
                id: 1,
                name: "X".into(),
                start_time: "2026-01-01T00:00".into(),
                entries: vec![EntrySpec {
                    filename: "a.wav".into(),
                    delay_seconds: 0,
                    is_relative: true,
                }],
            })
            .await
            .unwrap();

        store.delete_playlist(1).await.unwrap();

        let conn = store.conn.lock().unwrap();
        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM playlist_entries", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0, "orphaned playlist_entries row survived delete");
    }

    #[tokio::test]
    async fn upload_file_hashes_and_writes_bytes() {
        let (store, dir) = open_store();
        let spec = store.upload_file("a.wav", b"hello").await.unwrap();
        assert_eq!(spec.name, "a.wav");
        assert_eq!(spec.hash, hex::encode(Sha256::digest(b"hello")));

        let files = store.get_files().await.unwrap();
        assert_eq!(files, vec![spec]);
        assert!(dir.path().join("files").join("a.wav").exists());
    }

    #[tokio::test]
    async fn delete_file_removes_bytes_and_row() {
        let (store, dir) = open_store();
        store.upload_file("a.wav", b"hello").await.unwrap();
        store.delete_file("a.wav").await.unwrap();
        assert!(store.get_files().await.unwrap().is_empty());
        assert!(!dir.path().join("files").join("a.wav").exists());
    }
}

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use retrace_common::{Error, Result};
use retrace_core::{SetState, Store};
use tokio::io::AsyncWriteExt;
use tracing::debug;

pub const DEFAULT_STATE_FILE: &str = ".migrate";

/// Keeps the set's state as JSON in a single file.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| DEFAULT_STATE_FILE.into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Flush the directory entry so the rename itself survives a crash.
    #[cfg(unix)]
    async fn sync_parent(&self) -> Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let handle = tokio::fs::File::open(dir).await.map_err(|e| {
            Error::Store(format!("failed to open {}: {e}", dir.display()))
        })?;
        handle.sync_all().await.map_err(|e| {
            Error::Store(format!("failed to sync {}: {e}", dir.display()))
        })
    }

    #[cfg(not(unix))]
    async fn sync_parent(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl Store for FileStore {
    async fn load(&self) -> Result<Option<SetState>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("no state file at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => {
                return Err(Error::Store(format!(
                    "failed to read {}: {e}",
                    self.path.display()
                )));
            }
        };

        // Only a missing file means "never saved"; an empty one is damage.
        if contents.trim().is_empty() {
            return Err(Error::Store(format!(
                "state file {} is empty",
                self.path.display()
            )));
        }

        let state = serde_json::from_str(&contents).map_err(|e| {
            Error::Store(format!("invalid state file {}: {e}", self.path.display()))
        })?;
        Ok(Some(state))
    }

    async fn save(&self, state: &SetState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)?;

        // Write beside the target, flush it, and rename over it so readers
        // never see a partial file.
        let temp = self.temp_path();
        let write_err =
            |e: std::io::Error| Error::Store(format!("failed to write {}: {e}", temp.display()));
        let mut file = tokio::fs::File::create(&temp).await.map_err(write_err)?;
        file.write_all(json.as_bytes()).await.map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;
        drop(file);

        tokio::fs::rename(&temp, &self.path).await.map_err(|e| {
            Error::Store(format!(
                "failed to move state into {}: {e}",
                self.path.display()
            ))
        })?;
        self.sync_parent().await?;

        debug!("state written to {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use retrace_core::MigrationRecord;

    use super::*;

    #[tokio::test]
    async fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join(DEFAULT_STATE_FILE));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_file_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "  \n").unwrap();
        assert!(matches!(
            FileStore::new(path).load().await,
            Err(Error::Store(_))
        ));
    }

    #[tokio::test]
    async fn repeated_saves_replace_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested.json"));
        store.save(&SetState::default()).await.unwrap();
        store.save(&SetState::default()).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(SetState::default()));
    }

    #[tokio::test]
    async fn save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join(DEFAULT_STATE_FILE));
        let state = SetState {
            last_run: Some("0001-init".to_string()),
            migrations: vec![MigrationRecord {
                title: "0001-init".to_string(),
                description: Some("init".to_string()),
                timestamp: Some(chrono::Utc::now()),
            }],
        };

        store.save(&state).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(state));
        assert!(!store.temp_path().exists());
    }

    #[tokio::test]
    async fn reads_state_written_by_other_tools() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_STATE_FILE);
        std::fs::write(
            &path,
            r#"{"lastRun":"1-add-pets","migrations":[{"title":"1-add-pets","description":null,"timestamp":"2024-03-01T10:00:00Z"}]}"#,
        )
        .unwrap();

        let state = FileStore::new(path).load().await.unwrap().unwrap();
        assert_eq!(state.last_run.as_deref(), Some("1-add-pets"));
        assert!(state.migrations[0].timestamp.is_some());
    }

    #[tokio::test]
    async fn corrupt_file_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_STATE_FILE);
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            FileStore::new(path).load().await,
            Err(Error::Store(_))
        ));
    }
}

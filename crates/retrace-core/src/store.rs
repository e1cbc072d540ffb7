use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use retrace_common::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Persisted run-state of a migration set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetState {
    pub last_run: Option<String>,
    #[serde(default)]
    pub migrations: Vec<MigrationRecord>,
}

/// One migration as the store sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Backend that persists a set's progress between runs.
///
/// `save` must be atomic: a later `load` sees either the previous state or the
/// new one, never a mix.
#[async_trait]
pub trait Store: Send + Sync {
    /// Previously saved state, or `None` if nothing was ever saved.
    async fn load(&self) -> Result<Option<SetState>>;

    async fn save(&self, state: &SetState) -> Result<()>;
}

/// In-process store. Useful for embedding and tests.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<Option<SetState>>,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: SetState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            saves: AtomicUsize::new(0),
        }
    }

    /// Number of successful `save` calls.
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> Option<SetState> {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load(&self) -> Result<Option<SetState>> {
        Ok(self.state.lock().await.clone())
    }

    async fn save(&self, state: &SetState) -> Result<()> {
        *self.state.lock().await = Some(state.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_serializes_with_last_run_key() {
        let state = SetState {
            last_run: Some("0001-init".to_string()),
            migrations: vec![MigrationRecord {
                title: "0001-init".to_string(),
                description: None,
                timestamp: None,
            }],
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["lastRun"], "0001-init");
        assert_eq!(json["migrations"][0]["title"], "0001-init");
    }

    #[test]
    fn state_without_migrations_deserializes() {
        let state: SetState = serde_json::from_str(r#"{"lastRun":null}"#).unwrap();
        assert_eq!(state, SetState::default());
    }

    #[tokio::test]
    async fn memory_store_round_trips_and_counts_saves() {
        let store = MemoryStore::new();
        assert!(store.load().await.unwrap().is_none());

        let state = SetState {
            last_run: Some("a".to_string()),
            migrations: Vec::new(),
        };
        store.save(&state).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(state));
        assert_eq!(store.saves(), 1);
    }
}

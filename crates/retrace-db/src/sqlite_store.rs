use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use retrace_common::{Error, Result};
use retrace_core::{MigrationRecord, SetState, Store};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

/// Keeps the set's state in two bookkeeping tables of a SQLite database.
///
/// Reads and writes hold the connection lock on a blocking thread, never on
/// an async worker.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening migration state store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let conn = Arc::new(Mutex::new(conn));
        create_tables(&conn)?;
        Ok(Self { conn })
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| Error::Database("state store lock poisoned".into()))
}

fn create_tables(conn: &Mutex<Connection>) -> Result<()> {
    let conn = lock(conn)?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _retrace_meta (
            key TEXT PRIMARY KEY,
            value TEXT
        );

        CREATE TABLE IF NOT EXISTS _retrace_migrations (
            position INTEGER PRIMARY KEY,
            title TEXT NOT NULL UNIQUE,
            description TEXT,
            applied_at TEXT
        );",
    )
    .map_err(|e| Error::Database(format!("failed to create state tables: {e}")))?;

    Ok(())
}

fn read_state(conn: &Mutex<Connection>) -> Result<Option<SetState>> {
    let conn = lock(conn)?;

    // The meta row is written by every save; its absence means "never saved".
    let last_run: Option<Option<String>> = conn
        .query_row(
            "SELECT value FROM _retrace_meta WHERE key = 'last_run'",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| Error::Database(format!("failed to read last run: {e}")))?;
    let Some(last_run) = last_run else {
        return Ok(None);
    };

    let mut stmt = conn
        .prepare(
            "SELECT title, description, applied_at
             FROM _retrace_migrations
             ORDER BY position ASC",
        )
        .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

    let rows = stmt
        .query_map([], |row| {
            Ok(MigrationRecord {
                title: row.get(0)?,
                description: row.get(1)?,
                timestamp: row.get::<_, Option<String>>(2)?.and_then(parse_timestamp),
            })
        })
        .map_err(|e| Error::Database(format!("failed to query migrations: {e}")))?;

    let mut migrations = Vec::new();
    for row in rows {
        migrations.push(
            row.map_err(|e| Error::Database(format!("failed to read migration row: {e}")))?,
        );
    }

    Ok(Some(SetState {
        last_run,
        migrations,
    }))
}

fn write_state(conn: &Mutex<Connection>, state: &SetState) -> Result<()> {
    let mut conn = lock(conn)?;
    let tx = conn
        .transaction()
        .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;

    tx.execute("DELETE FROM _retrace_migrations", [])
        .map_err(|e| Error::Database(format!("failed to clear migrations: {e}")))?;

    for (position, record) in state.migrations.iter().enumerate() {
        tx.execute(
            "INSERT INTO _retrace_migrations (position, title, description, applied_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                position as i64,
                record.title,
                record.description,
                record.timestamp.map(|t| t.to_rfc3339()),
            ],
        )
        .map_err(|e| Error::Database(format!("failed to record migration: {e}")))?;
    }

    tx.execute(
        "INSERT INTO _retrace_meta (key, value) VALUES ('last_run', ?1)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![state.last_run],
    )
    .map_err(|e| Error::Database(format!("failed to record last run: {e}")))?;

    tx.commit()
        .map_err(|e| Error::Database(format!("failed to commit state: {e}")))?;
    Ok(())
}

#[async_trait]
impl Store for SqliteStore {
    async fn load(&self) -> Result<Option<SetState>> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || read_state(&conn))
            .await
            .map_err(|e| Error::Database(format!("state load task failed: {e}")))?
    }

    async fn save(&self, state: &SetState) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        let state = state.clone();
        tokio::task::spawn_blocking(move || write_state(&conn, &state))
            .await
            .map_err(|e| Error::Database(format!("state save task failed: {e}")))?
    }
}

fn parse_timestamp(s: String) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(title: &str, applied: bool) -> MigrationRecord {
        MigrationRecord {
            title: title.to_string(),
            description: Some(title.replace('-', " ")),
            timestamp: applied.then(Utc::now),
        }
    }

    #[tokio::test]
    async fn fresh_database_has_no_state() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_and_load_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        let state = SetState {
            last_run: Some("add-users".to_string()),
            migrations: vec![record("add-users", true), record("add-pets", false)],
        };

        store.save(&state).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();

        assert_eq!(loaded.last_run.as_deref(), Some("add-users"));
        assert_eq!(loaded.migrations.len(), 2);
        assert_eq!(loaded.migrations[0].title, "add-users");
        assert!(loaded.migrations[0].timestamp.is_some());
        assert_eq!(loaded.migrations[1].title, "add-pets");
        assert!(loaded.migrations[1].timestamp.is_none());
    }

    #[tokio::test]
    async fn later_save_replaces_earlier_one() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .save(&SetState {
                last_run: Some("a".to_string()),
                migrations: vec![record("a", true), record("b", false)],
            })
            .await
            .unwrap();
        store
            .save(&SetState {
                last_run: None,
                migrations: vec![record("a", false)],
            })
            .await
            .unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert!(loaded.last_run.is_none());
        assert_eq!(loaded.migrations.len(), 1);
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .save(&SetState {
                    last_run: Some("a".to_string()),
                    migrations: vec![record("a", true)],
                })
                .await
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.last_run.as_deref(), Some("a"));
    }

    #[test]
    fn creates_both_bookkeeping_tables() {
        let store = SqliteStore::in_memory().unwrap();
        let conn = lock(&store.conn).unwrap();
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(tables, vec!["_retrace_meta", "_retrace_migrations"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shared_store_serves_concurrent_callers() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        store
            .save(&SetState {
                last_run: Some("a".to_string()),
                migrations: vec![record("a", true)],
            })
            .await
            .unwrap();

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.load().await })
            })
            .collect();
        for reader in readers {
            let loaded = reader.await.unwrap().unwrap().unwrap();
            assert_eq!(loaded.last_run.as_deref(), Some("a"));
        }
    }
}

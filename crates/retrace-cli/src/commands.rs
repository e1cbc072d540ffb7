use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use retrace_config::{AppConfig, StateBackend};
use retrace_core::{Direction, MigrateOptions, MigrationEvent, MigrationSet, Store};
use retrace_db::{FileStore, SqliteStore, create_migration_file, load_sql_migrations};
use rusqlite::Connection;
use tracing::info;

use crate::output;

/// Open the target database and state store, register every migration file
/// and restore stored progress.
async fn open_set(config: &AppConfig) -> Result<MigrationSet> {
    let conn = Connection::open(&config.database)
        .with_context(|| format!("failed to open database {}", config.database.display()))?;
    let conn = Arc::new(Mutex::new(conn));

    let state_path = config.state_path();
    let store: Arc<dyn Store> = match config.state.backend {
        StateBackend::File => Arc::new(FileStore::new(&state_path)),
        StateBackend::Sqlite => Arc::new(SqliteStore::open(&state_path)?),
    };
    info!(
        "using {:?} state store at {}",
        config.state.backend,
        state_path.display()
    );

    let mut set = MigrationSet::new(store);
    for migration in load_sql_migrations(&config.migrations_dir, &conn)? {
        set.add_migration(migration);
    }
    set.load()
        .await
        .context("failed to restore migration state")?;
    Ok(set)
}

pub async fn run(config: &AppConfig, direction: Direction, to: Option<String>) -> Result<()> {
    let mut set = open_set(config).await?;
    set.subscribe(Box::new(|event: &MigrationEvent| {
        if let Some(line) = output::event_line(event) {
            println!("{line}");
        }
    }));

    set.migrate(direction, MigrateOptions { migration: to })
        .await
        .with_context(|| format!("migrating {direction} failed"))?;
    Ok(())
}

pub async fn list(config: &AppConfig) -> Result<()> {
    let set = open_set(config).await?;
    if set.is_empty() {
        println!(
            "no migrations in {}",
            config.migrations_dir.display()
        );
        return Ok(());
    }

    for line in output::status_lines(&set) {
        println!("{line}");
    }
    Ok(())
}

pub fn create(config: &AppConfig, title: &str) -> Result<()> {
    let path = create_migration_file(&config.migrations_dir, title)?;
    println!("  create : {}", path.display());
    Ok(())
}

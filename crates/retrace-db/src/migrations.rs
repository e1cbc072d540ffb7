//! SQL migration files.
//!
//! Each migration is one `*.sql` file whose stem is the migration title. The
//! file holds an up section and an optional down section:
//!
//! ```sql
//! -- migrate:up
//! CREATE TABLE pets (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
//!
//! -- migrate:down
//! DROP TABLE pets;
//! ```
//!
//! Files are ordered by file name, so a sortable prefix (the timestamp written
//! by [`create_migration_file`]) fixes the application order.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use retrace_common::{Error, Result};
use retrace_core::{Action, Migration, action, noop};
use rusqlite::Connection;
use tracing::debug;

const UP_MARKER: &str = "-- migrate:up";
const DOWN_MARKER: &str = "-- migrate:down";

const TEMPLATE: &str = "-- migrate:up\n\n\n-- migrate:down\n\n";

enum Section {
    Preamble,
    Up,
    Down,
}

/// Parsed contents of one migration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlMigration {
    pub title: String,
    pub up: String,
    pub down: Option<String>,
}

impl SqlMigration {
    pub fn parse(title: impl Into<String>, contents: &str) -> Result<Self> {
        let title = title.into();
        let mut up: Option<Vec<&str>> = None;
        let mut down: Option<Vec<&str>> = None;
        let mut section = Section::Preamble;

        for line in contents.lines() {
            match line.trim().to_ascii_lowercase().as_str() {
                UP_MARKER => {
                    if up.is_some() {
                        return Err(Error::InvalidMigration(format!(
                            "{title}: duplicate '{UP_MARKER}' section"
                        )));
                    }
                    up = Some(Vec::new());
                    section = Section::Up;
                }
                DOWN_MARKER => {
                    if down.is_some() {
                        return Err(Error::InvalidMigration(format!(
                            "{title}: duplicate '{DOWN_MARKER}' section"
                        )));
                    }
                    down = Some(Vec::new());
                    section = Section::Down;
                }
                _ => {
                    let lines = match section {
                        Section::Preamble => None,
                        Section::Up => up.as_mut(),
                        Section::Down => down.as_mut(),
                    };
                    if let Some(lines) = lines {
                        lines.push(line);
                    }
                }
            }
        }

        let up = up.ok_or_else(|| {
            Error::InvalidMigration(format!("{title}: missing '{UP_MARKER}' section"))
        })?;

        let join = |lines: Vec<&str>| lines.join("\n").trim().to_string();
        Ok(Self {
            title,
            up: join(up),
            down: down.map(join).filter(|sql| !sql.is_empty()),
        })
    }

    /// Turn this file into a migration that runs against `conn`.
    pub fn into_migration(self, conn: &Arc<Mutex<Connection>>) -> Result<Migration> {
        let up = sql_action(conn, &self.title, self.up);
        let down = match self.down {
            Some(sql) => sql_action(conn, &self.title, sql),
            None => noop(),
        };
        Ok(Migration::new(self.title, up)?.with_down(down))
    }
}

/// Each run executes the whole section inside one transaction.
fn sql_action(conn: &Arc<Mutex<Connection>>, title: &str, sql: String) -> Action {
    let conn = Arc::clone(conn);
    let title = title.to_string();
    let sql = Arc::new(sql);
    action(move || {
        let conn = Arc::clone(&conn);
        let title = title.clone();
        let sql = Arc::clone(&sql);
        async move {
            tokio::task::spawn_blocking(move || execute(&conn, &title, &sql))
                .await
                .map_err(|e| Error::Migration(format!("migration task failed: {e}")))?
        }
    })
}

fn execute(conn: &Mutex<Connection>, title: &str, sql: &str) -> Result<()> {
    if sql.is_empty() {
        return Ok(());
    }

    let mut conn = conn
        .lock()
        .map_err(|_| Error::Database("target database lock poisoned".into()))?;
    let tx = conn
        .transaction()
        .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;
    tx.execute_batch(sql)
        .map_err(|e| Error::Migration(format!("{title}: {e}")))?;
    tx.commit()
        .map_err(|e| Error::Database(format!("failed to commit {title}: {e}")))?;
    Ok(())
}

/// `*.sql` files directly inside `dir`, sorted by file name.
pub fn discover(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        Error::Config(format!(
            "failed to read migrations directory {}: {e}",
            dir.display()
        ))
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "sql") {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Read every migration file in `dir` into a migration bound to `conn`.
pub fn load_sql_migrations(dir: &Path, conn: &Arc<Mutex<Connection>>) -> Result<Vec<Migration>> {
    let mut migrations = Vec::new();
    for path in discover(dir)? {
        let title = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| {
                Error::InvalidMigration(format!("unusable file name: {}", path.display()))
            })?
            .to_string();
        let contents = std::fs::read_to_string(&path)?;
        migrations.push(SqlMigration::parse(title, &contents)?.into_migration(conn)?);
    }

    debug!(
        "loaded {} sql migrations from {}",
        migrations.len(),
        dir.display()
    );
    Ok(migrations)
}

/// Write an empty migration file named `<unix-seconds>-<slug>.sql` and return its path.
pub fn create_migration_file(dir: &Path, title: &str) -> Result<PathBuf> {
    let slug = slugify(title);
    if slug.is_empty() {
        return Err(Error::InvalidMigration(format!(
            "cannot derive a file name from '{title}'"
        )));
    }

    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}-{slug}.sql", chrono::Utc::now().timestamp()));
    if path.exists() {
        return Err(Error::InvalidMigration(format!(
            "{} already exists",
            path.display()
        )));
    }
    std::fs::write(&path, TEMPLATE)?;
    Ok(path)
}

fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

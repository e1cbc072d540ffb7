use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding `*.sql` migration files.
    pub migrations_dir: PathBuf,
    /// SQLite database the migrations run against.
    pub database: PathBuf,
    pub state: StateConfig,
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            migrations_dir: PathBuf::from("migrations"),
            database: PathBuf::from("app.db"),
            state: StateConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// Where run progress is kept between invocations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub backend: StateBackend,
    /// State file for `file`, database for `sqlite`. Defaults to `.migrate` or
    /// the target database respectively.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    #[default]
    File,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    pub fn state_path(&self) -> PathBuf {
        match (&self.state.path, self.state.backend) {
            (Some(path), _) => path.clone(),
            (None, StateBackend::File) => PathBuf::from(".migrate"),
            (None, StateBackend::Sqlite) => self.database.clone(),
        }
    }
}

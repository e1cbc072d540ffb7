use std::path::{Path, PathBuf};

use retrace_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

pub const DEFAULT_CONFIG_FILE: &str = "retrace.yml";

/// Environment variable that overrides `database`.
pub const DATABASE_ENV: &str = "RETRACE_DATABASE";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load `path`, or `retrace.yml` in the working directory when `path` is
    /// `None`. A missing default file yields the built-in defaults; a missing
    /// explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<AppConfig> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(&default)?
                } else {
                    debug!("no {DEFAULT_CONFIG_FILE} found, using defaults");
                    AppConfig::default()
                }
            }
        };

        if let Ok(database) = std::env::var(DATABASE_ENV)
            && !database.is_empty()
        {
            debug!("database overridden by {DATABASE_ENV}");
            config.database = PathBuf::from(database);
        }

        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<AppConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config = Self::parse(ext, &contents)?;
        info!("config loaded from {}", path.display());
        Ok(config)
    }

    pub fn parse(ext: &str, contents: &str) -> Result<AppConfig> {
        match ext {
            "yml" | "yaml" => serde_yaml::from_str(contents)
                .map_err(|e| Error::Config(format!("YAML parse error: {e}"))),
            "toml" => {
                toml::from_str(contents).map_err(|e| Error::Config(format!("TOML parse error: {e}")))
            }
            other => Err(Error::Config(format!(
                "unsupported config extension: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StateBackend;

    #[test]
    fn parses_yaml() {
        let config = ConfigLoader::parse(
            "yml",
            "migrations_dir: db/migrations\ndatabase: data/app.db\nstate:\n  backend: sqlite\nlog:\n  level: debug\n",
        )
        .unwrap();
        assert_eq!(config.migrations_dir, PathBuf::from("db/migrations"));
        assert_eq!(config.database, PathBuf::from("data/app.db"));
        assert_eq!(config.state.backend, StateBackend::Sqlite);
        assert_eq!(config.log.level, "debug");
        assert!(!config.log.json);
    }

    #[test]
    fn parses_toml_with_defaults() {
        let config = ConfigLoader::parse("toml", "[state]\npath = \"state.json\"\n").unwrap();
        assert_eq!(config.state.backend, StateBackend::File);
        assert_eq!(config.state_path(), PathBuf::from("state.json"));
        assert_eq!(config.migrations_dir, PathBuf::from("migrations"));
    }

    #[test]
    fn rejects_unknown_extension_and_bad_input() {
        assert!(matches!(
            ConfigLoader::parse("ini", ""),
            Err(Error::Config(_))
        ));
        assert!(ConfigLoader::parse("yml", "state: [unclosed").is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ConfigLoader::from_file(&dir.path().join("nope.yml")).is_err());
    }

    #[test]
    fn from_file_reads_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("retrace.toml");
        std::fs::write(&path, "database = \"x.db\"\n").unwrap();
        let config = ConfigLoader::from_file(&path).unwrap();
        assert_eq!(config.database, PathBuf::from("x.db"));
    }
}

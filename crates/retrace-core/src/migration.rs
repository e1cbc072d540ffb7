use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use retrace_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// An up or down body. Each call yields a future that resolves exactly once.
pub type Action = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Wrap an async closure as an [`Action`].
pub fn action<F, Fut>(f: F) -> Action
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(move || -> BoxFuture<'static, Result<()>> { Box::pin(f()) })
}

/// An action that does nothing and succeeds. Default down for forward-only migrations.
pub fn noop() -> Action {
    action(|| async { Ok(()) })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.pad("up"),
            Direction::Down => f.pad("down"),
        }
    }
}

/// A named, reversible unit of change.
#[derive(Clone)]
pub struct Migration {
    title: String,
    up: Action,
    down: Action,
    description: Option<String>,
    timestamp: Option<DateTime<Utc>>,
}

impl Migration {
    pub fn new(title: impl Into<String>, up: Action) -> Result<Self> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(Error::InvalidMigration(
                "migration title must not be empty".to_string(),
            ));
        }

        Ok(Self {
            title,
            up,
            down: noop(),
            description: None,
            timestamp: None,
        })
    }

    pub fn with_down(mut self, down: Action) -> Self {
        self.down = down;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// The explicit description, or one derived from the title.
    pub fn description(&self) -> String {
        match &self.description {
            Some(d) => d.clone(),
            None => describe_title(&self.title),
        }
    }

    /// When this migration was last applied; `None` while pending or after revert.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    pub(crate) fn action(&self, direction: Direction) -> Action {
        match direction {
            Direction::Up => Arc::clone(&self.up),
            Direction::Down => Arc::clone(&self.down),
        }
    }

    pub(crate) fn set_timestamp(&mut self, timestamp: Option<DateTime<Utc>>) {
        self.timestamp = timestamp;
    }

    /// Take over another definition's actions and description, keeping title and timestamp.
    pub(crate) fn redefine(&mut self, other: Migration) {
        self.up = other.up;
        self.down = other.down;
        self.description = other.description;
    }
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration")
            .field("title", &self.title)
            .field("description", &self.description)
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}

/// "0003-add_user-index" -> "add user index"
fn describe_title(title: &str) -> String {
    // Only a digit run followed by a separator is a prefix: "2fa-setup" keeps its "2".
    let digits = title.trim_start_matches(|c: char| c.is_ascii_digit());
    let rest = match digits.strip_prefix(['-', '_']) {
        Some(rest) if digits.len() < title.len() && !rest.is_empty() => rest,
        _ => title,
    };
    rest.replace(['-', '_'], " ")
}

use retrace_common::{Error, Result};
use tracing::{debug, info, warn};

use crate::event::MigrationEvent;
use crate::migration::Direction;
use crate::set::MigrationSet;

/// Options for a single up/down run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrateOptions {
    /// Inclusive boundary migration. `None` runs to the end (up) or the start (down).
    pub migration: Option<String>,
}

impl MigrateOptions {
    pub fn to(title: impl Into<String>) -> Self {
        Self {
            migration: Some(title.into()),
        }
    }
}

/// Positions of the migrations a run must execute, in execution order.
///
/// An unknown target fails before anything else is looked at.
pub(crate) fn plan(
    set: &MigrationSet,
    direction: Direction,
    target: Option<&str>,
) -> Result<Vec<usize>> {
    let target = match target {
        Some(title) => Some(
            set.position(title)
                .ok_or_else(|| Error::MigrationNotFound(title.to_string()))?,
        ),
        None => None,
    };

    if set.is_empty() {
        return Ok(Vec::new());
    }

    let last_run = set.last_run().and_then(|title| set.position(title));

    let steps = match direction {
        Direction::Up => {
            let start = last_run.map_or(0, |i| i + 1);
            let end = target.unwrap_or(set.len() - 1);
            (start..=end).collect()
        }
        Direction::Down => match last_run {
            Some(last) => {
                let end = target.unwrap_or(0);
                (end..=last).rev().collect()
            }
            None => Vec::new(),
        },
    };

    Ok(steps)
}

/// Execute one run. Each successful step is persisted before the next starts;
/// the first failing step stops the run and its error is returned unchanged.
pub(crate) async fn run(
    set: &mut MigrationSet,
    direction: Direction,
    options: &MigrateOptions,
) -> Result<()> {
    let steps = plan(set, direction, options.migration.as_deref())?;

    if steps.is_empty() {
        debug!(%direction, last_run = ?set.last_run(), "no pending migrations");
        set.emit(&MigrationEvent::Complete {
            direction,
            steps: 0,
        });
        return Ok(());
    }

    info!(%direction, steps = steps.len(), "running migrations");

    for &position in &steps {
        let (title, action) = {
            let migration = set.migration_at(position);
            (migration.title().to_string(), migration.action(direction))
        };

        set.emit(&MigrationEvent::Migration {
            title: title.clone(),
            direction,
        });
        info!(%direction, migration = %title, "running migration");

        if let Err(e) = action().await {
            warn!(%direction, migration = %title, "migration failed: {e}");
            return Err(e);
        }

        // Run-then-persist: if this save fails the in-memory pointer is
        // already past the step while the stored one is not.
        set.record_step(position, direction);
        if let Err(e) = set.save().await {
            warn!(%direction, migration = %title, "failed to persist migration state: {e}");
            return Err(e);
        }
    }

    info!(%direction, steps = steps.len(), last_run = ?set.last_run(), "migrations complete");
    set.emit(&MigrationEvent::Complete {
        direction,
        steps: steps.len(),
    });
    Ok(())
}

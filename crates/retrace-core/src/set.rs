use std::collections::HashMap;
use std::sync::Arc;

use retrace_common::{Error, Result};
use tracing::{debug, warn};

use crate::event::{Listener, Listeners, MigrationEvent, SubscriberId};
use crate::migration::{Action, Direction, Migration};
use crate::migrator::{self, MigrateOptions};
use crate::store::{MigrationRecord, SetState, Store};

/// Ordered collection of migrations plus the progress pointer.
///
/// Registration order is the only order used for applying migrations. The
/// title index and the sequence are only mutated through [`add_migration`],
/// so every sequence entry is reachable by title and vice versa.
///
/// [`add_migration`]: MigrationSet::add_migration
pub struct MigrationSet {
    store: Arc<dyn Store>,
    migrations: Vec<Migration>,
    index: HashMap<String, usize>,
    last_run: Option<String>,
    listeners: Listeners,
}

impl MigrationSet {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            migrations: Vec::new(),
            index: HashMap::new(),
            last_run: None,
            listeners: Listeners::default(),
        }
    }

    /// Insert a migration, or redefine the one already registered under its title.
    ///
    /// Redefinition replaces the actions and description but keeps the
    /// migration's position and applied timestamp.
    pub fn add_migration(&mut self, migration: Migration) {
        if let Some(&position) = self.index.get(migration.title()) {
            debug!(migration = %migration.title(), "redefining migration");
            self.migrations[position].redefine(migration);
            return;
        }

        self.index
            .insert(migration.title().to_string(), self.migrations.len());
        self.migrations.push(migration);
    }

    /// Build a migration from raw parts and add it.
    pub fn add(&mut self, title: impl Into<String>, up: Action, down: Action) -> Result<()> {
        let migration = Migration::new(title, up)?.with_down(down);
        self.add_migration(migration);
        Ok(())
    }

    pub fn get(&self, title: &str) -> Option<&Migration> {
        self.index.get(title).map(|&i| &self.migrations[i])
    }

    pub fn position(&self, title: &str) -> Option<usize> {
        self.index.get(title).copied()
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Title of the most recently applied migration, `None` if nothing is applied.
    pub fn last_run(&self) -> Option<&str> {
        self.last_run.as_deref()
    }

    pub fn state(&self) -> SetState {
        SetState {
            last_run: self.last_run.clone(),
            migrations: self
                .migrations
                .iter()
                .map(|m| MigrationRecord {
                    title: m.title().to_string(),
                    description: Some(m.description()),
                    timestamp: m.timestamp(),
                })
                .collect(),
        }
    }

    /// Persist the current state, then notify `Save` listeners.
    pub async fn save(&mut self) -> Result<()> {
        let state = self.state();
        self.store.save(&state).await?;
        debug!(last_run = ?self.last_run, "migration state saved");
        self.emit(&MigrationEvent::Save);
        Ok(())
    }

    /// Restore progress from the store. Returns `false` if nothing was stored.
    ///
    /// Register migrations before loading: applied timestamps are matched by
    /// title, and a stored `last_run` must name a registered migration.
    pub async fn load(&mut self) -> Result<bool> {
        let Some(state) = self.store.load().await? else {
            debug!("no stored migration state");
            return Ok(false);
        };

        if let Some(last_run) = &state.last_run
            && !self.index.contains_key(last_run)
        {
            return Err(Error::State(format!(
                "last run migration '{last_run}' is not registered"
            )));
        }

        for record in &state.migrations {
            if let Some(&position) = self.index.get(&record.title) {
                self.migrations[position].set_timestamp(record.timestamp);
            }
        }
        self.last_run = state.last_run;
        debug!(last_run = ?self.last_run, "migration state loaded");

        for title in self.unapplied_before_last_run() {
            warn!(
                migration = %title,
                last_run = ?self.last_run,
                "migration sorts before the last run but was never applied; up will not run it"
            );
        }
        Ok(true)
    }

    /// Migrations ordered before `last_run` that carry no applied timestamp.
    ///
    /// These are typically files added out of order after later ones ran.
    /// `up` starts after `last_run`, so they stay unapplied.
    pub fn unapplied_before_last_run(&self) -> Vec<&str> {
        let Some(end) = self.last_run.as_deref().and_then(|t| self.position(t)) else {
            return Vec::new();
        };
        self.migrations[..end]
            .iter()
            .filter(|m| m.timestamp().is_none())
            .map(|m| m.title())
            .collect()
    }

    pub async fn up(&mut self, options: MigrateOptions) -> Result<()> {
        self.migrate(Direction::Up, options).await
    }

    pub async fn down(&mut self, options: MigrateOptions) -> Result<()> {
        self.migrate(Direction::Down, options).await
    }

    pub async fn migrate(&mut self, direction: Direction, options: MigrateOptions) -> Result<()> {
        migrator::run(self, direction, &options).await
    }

    pub fn subscribe(&mut self, listener: Listener) -> SubscriberId {
        self.listeners.register(listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        self.listeners.deregister(id)
    }

    pub(crate) fn emit(&self, event: &MigrationEvent) {
        self.listeners.emit(event);
    }

    pub(crate) fn migration_at(&self, position: usize) -> &Migration {
        &self.migrations[position]
    }

    /// Advance or retreat `last_run` after the step at `position` succeeded.
    pub(crate) fn record_step(&mut self, position: usize, direction: Direction) {
        match direction {
            Direction::Up => {
                let migration = &mut self.migrations[position];
                migration.set_timestamp(Some(chrono::Utc::now()));
                self.last_run = Some(migration.title().to_string());
            }
            Direction::Down => {
                self.migrations[position].set_timestamp(None);
                self.last_run = position
                    .checked_sub(1)
                    .map(|prev| self.migrations[prev].title().to_string());
            }
        }
    }
}

//! Applying and reverting registered migrations.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::db::Connection;
use crate::error::{DbError, DbResult};
use crate::models::UnitOutcome;

use super::registry::{MigrationEntry, MigrationRegistry};
use super::repository::MigrationRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

/// A registered or executed migration and where it stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub name: String,
    /// `false` for executed migrations that are no longer registered.
    pub registered: bool,
    pub batch: Option<i64>,
    pub executed_at: Option<String>,
}

impl MigrationStatus {
    pub fn is_pending(&self) -> bool {
        self.batch.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationListing {
    pub name: String,
    pub handler: String,
}

/// Runs migrations against one connection.
///
/// Clones share the run lock, so runs through clones never interleave.
#[derive(Debug, Clone)]
pub struct MigrationRunner {
    conn: Connection,
    registry: Arc<MigrationRegistry>,
    repository: MigrationRepository,
    lock: Arc<Mutex<()>>,
}

impl MigrationRunner {
    pub fn new(conn: Connection, registry: MigrationRegistry) -> Self {
        let repository = MigrationRepository::new(conn.clone());
        Self {
            conn,
            registry: Arc::new(registry),
            repository,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Use a bookkeeping table other than `migrations`.
    pub fn with_table(mut self, table: &str) -> Self {
        self.repository = MigrationRepository::with_table(self.conn.clone(), table);
        self
    }

    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    pub fn repository(&self) -> &MigrationRepository {
        &self.repository
    }

    /// Names of registered migrations that have not run.
    pub async fn pending(&self) -> DbResult<Vec<String>> {
        let executed = self.executed_names().await?;
        Ok(self
            .registry
            .iter()
            .filter(|e| !executed.contains(&e.name))
            .map(|e| e.name.clone())
            .collect())
    }

    async fn executed_names(&self) -> DbResult<HashSet<String>> {
        if !self.repository.exists().await? {
            return Ok(HashSet::new());
        }
        Ok(self
            .repository
            .executed()
            .await?
            .into_iter()
            .map(|r| r.migration)
            .collect())
    }

    /// Apply every pending migration as one new batch.
    pub async fn run(&self) -> DbResult<Vec<UnitOutcome>> {
        let _guard = self.lock.lock().await;
        self.run_locked().await
    }

    async fn run_locked(&self) -> DbResult<Vec<UnitOutcome>> {
        self.repository.ensure_table().await?;
        let executed = self.executed_names().await?;
        let pending: Vec<&MigrationEntry> = self
            .registry
            .iter()
            .filter(|e| !executed.contains(&e.name))
            .collect();
        if pending.is_empty() {
            info!(group = %self.conn.group(), "Nothing to migrate");
            return Ok(Vec::new());
        }

        let batch = self.repository.last_batch().await? + 1;
        info!(group = %self.conn.group(), batch, pending = pending.len(), "Running migrations");

        let mut outcomes = Vec::with_capacity(pending.len());
        for entry in pending {
            outcomes.push(self.run_unit(entry, Direction::Up, batch).await);
        }
        Ok(outcomes)
    }

    /// Revert up to `steps` migrations of the latest batch, newest first.
    pub async fn rollback(&self, steps: usize) -> DbResult<Vec<UnitOutcome>> {
        let _guard = self.lock.lock().await;
        self.rollback_locked(steps).await
    }

    async fn rollback_locked(&self, steps: usize) -> DbResult<Vec<UnitOutcome>> {
        if !self.repository.exists().await? {
            return Ok(Vec::new());
        }
        let records = self.repository.last_batch_records().await?;
        if records.is_empty() {
            info!(group = %self.conn.group(), "Nothing to roll back");
            return Ok(Vec::new());
        }

        let mut outcomes = Vec::new();
        for record in records.into_iter().take(steps) {
            let outcome = match self.registry.get(&record.migration) {
                Some(entry) => self.run_unit(entry, Direction::Down, record.batch).await,
                None => {
                    warn!(migration = %record.migration, "Executed migration is not registered");
                    UnitOutcome::failed(&record.migration, "Migration is not registered")
                }
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Roll back batch by batch until nothing is left or a pass makes no
    /// progress.
    pub async fn reset(&self) -> DbResult<Vec<UnitOutcome>> {
        let _guard = self.lock.lock().await;
        self.reset_locked().await
    }

    async fn reset_locked(&self) -> DbResult<Vec<UnitOutcome>> {
        let mut outcomes = Vec::new();
        loop {
            let pass = self.rollback_locked(usize::MAX).await?;
            let progressed = pass.iter().any(UnitOutcome::is_success);
            outcomes.extend(pass);
            if !progressed {
                break;
            }
        }
        Ok(outcomes)
    }

    /// `reset` followed by `run`.
    pub async fn refresh(&self) -> DbResult<Vec<UnitOutcome>> {
        let _guard = self.lock.lock().await;
        let mut outcomes = self.reset_locked().await?;
        outcomes.extend(self.run_locked().await?);
        Ok(outcomes)
    }

    /// Drop every table, then run all migrations. Requires `confirm`.
    pub async fn fresh(&self, confirm: bool) -> DbResult<Vec<UnitOutcome>> {
        if !confirm {
            return Err(DbError::unsafe_operation(
                "fresh",
                "Dropping every table requires explicit confirmation",
            ));
        }
        let _guard = self.lock.lock().await;
        let dropped = self.conn.schema().drop_all_tables().await?;
        warn!(group = %self.conn.group(), dropped, "Dropped all tables for a fresh migration");
        self.run_locked().await
    }

    /// Registered migrations with their batch, plus executed ones that are no
    /// longer registered.
    pub async fn status(&self) -> DbResult<Vec<MigrationStatus>> {
        let records = if self.repository.exists().await? {
            self.repository.executed().await?
        } else {
            Vec::new()
        };
        let mut by_name: HashMap<String, _> = records
            .into_iter()
            .map(|r| (r.migration.clone(), r))
            .collect();

        let mut statuses: Vec<MigrationStatus> = self
            .registry
            .iter()
            .map(|entry| {
                let record = by_name.remove(&entry.name);
                MigrationStatus {
                    name: entry.name.clone(),
                    registered: true,
                    batch: record.as_ref().map(|r| r.batch),
                    executed_at: record.and_then(|r| r.executed_at),
                }
            })
            .collect();

        let mut orphans: Vec<MigrationStatus> = by_name
            .into_values()
            .map(|r| MigrationStatus {
                name: r.migration,
                registered: false,
                batch: Some(r.batch),
                executed_at: r.executed_at,
            })
            .collect();
        orphans.sort_by(|a, b| a.name.cmp(&b.name));
        statuses.extend(orphans);
        Ok(statuses)
    }

    /// Registered migrations in execution order.
    pub fn list(&self) -> Vec<MigrationListing> {
        self.registry
            .iter()
            .map(|e| MigrationListing {
                name: e.name.clone(),
                handler: e.handler.clone(),
            })
            .collect()
    }

    /// Run one migration in its own transaction on its own session.
    async fn run_unit(&self, entry: &MigrationEntry, direction: Direction, batch: i64) -> UnitOutcome {
        let unit = self.conn.fork();
        let repository = MigrationRepository::with_table(unit.clone(), self.repository.table());
        let migration = entry.migration.clone();
        let name = entry.name.clone();

        let result = unit
            .transactions()
            .transaction(|conn| async move {
                let schema = conn.schema();
                match direction {
                    Direction::Up => {
                        migration.up(&schema).await?;
                        repository.log(&name, batch).await
                    }
                    Direction::Down => {
                        migration.down(&schema).await?;
                        repository.delete(&name).await.map(|_| ())
                    }
                }
            })
            .await;

        let verb = match direction {
            Direction::Up => "Migrated",
            Direction::Down => "Rolled back",
        };
        match result {
            Ok(()) => {
                info!(migration = %entry.name, handler = %entry.handler, batch, "{verb}");
                UnitOutcome::success(&entry.name, verb)
            }
            Err(e) => {
                warn!(migration = %entry.name, error = %e, "Migration failed");
                UnitOutcome::failed(&entry.name, e.to_string())
            }
        }
    }
}

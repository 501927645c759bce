use std::sync::Arc;

use tracing::{info, warn};

use crate::db::Connection;
use crate::error::{DbError, DbResult};
use crate::models::UnitOutcome;

use super::{SeedContext, SeederEntry, SeederRegistry};

/// Runs seeders, each in its own transaction.
#[derive(Debug, Clone)]
pub struct SeedRunner {
    conn: Connection,
    registry: Arc<SeederRegistry>,
}

impl SeedRunner {
    pub fn new(conn: Connection, registry: SeederRegistry) -> Self {
        Self {
            conn,
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &SeederRegistry {
        &self.registry
    }

    pub fn list(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Run one seeder by name.
    pub async fn run(&self, name: &str) -> DbResult<UnitOutcome> {
        let entry = self
            .registry
            .get(name)
            .ok_or_else(|| DbError::invalid_input(format!("Unknown seeder '{name}'")))?;
        Ok(self.run_unit(entry).await)
    }

    /// Run every seeder in registration order. A failure does not stop the
    /// rest.
    pub async fn run_all(&self) -> Vec<UnitOutcome> {
        let mut outcomes = Vec::with_capacity(self.registry.len());
        for entry in self.registry.iter() {
            outcomes.push(self.run_unit(entry).await);
        }
        outcomes
    }

    async fn run_unit(&self, entry: &SeederEntry) -> UnitOutcome {
        let unit = self.conn.fork();
        let seeder = entry.seeder.clone();
        let result = unit
            .transactions()
            .transaction(|conn| async move {
                let ctx = SeedContext::new(conn);
                seeder.run(&ctx).await
            })
            .await;

        match result {
            Ok(()) => {
                info!(seeder = %entry.name, "Seeded");
                UnitOutcome::success(&entry.name, "Seeded")
            }
            Err(e) => {
                warn!(seeder = %entry.name, error = %e, "Seeder failed");
                UnitOutcome::failed(&entry.name, e.to_string())
            }
        }
    }
}

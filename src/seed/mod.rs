//! Data seeding.
//!
//! Seeders are not tracked; they are expected to be re-runnable, usually by
//! truncating before inserting.

pub mod context;
pub mod faker;
pub mod runner;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

pub use context::SeedContext;
pub use faker::Faker;
pub use runner::SeedRunner;

use crate::error::{DbError, DbResult};

#[async_trait]
pub trait Seeder: Send + Sync {
    async fn run(&self, ctx: &SeedContext) -> DbResult<()>;
}

#[derive(Clone)]
pub struct SeederEntry {
    pub name: String,
    pub seeder: Arc<dyn Seeder>,
}

impl fmt::Debug for SeederEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeederEntry").field("name", &self.name).finish()
    }
}

/// Seeders by name, run in registration order by `run_all`.
#[derive(Debug, Clone, Default)]
pub struct SeederRegistry {
    entries: Vec<SeederEntry>,
}

impl SeederRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, seeder: impl Seeder + 'static) -> DbResult<&mut Self> {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(DbError::invalid_input(format!("Invalid seeder name '{name}'")));
        }
        if self.get(name).is_some() {
            return Err(DbError::invalid_input(format!(
                "Seeder '{name}' is already registered"
            )));
        }
        self.entries.push(SeederEntry {
            name: name.to_string(),
            seeder: Arc::new(seeder),
        });
        Ok(self)
    }

    pub fn with(mut self, name: &str, seeder: impl Seeder + 'static) -> DbResult<Self> {
        self.register(name, seeder)?;
        Ok(self)
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&SeederEntry> {
        self.entries.iter().find(|e| e.name.eq_ignore_ascii_case(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &SeederEntry> {
        self.entries.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! Versioned schema migrations.
//!
//! Migrations are registered explicitly with a [`MigrationRegistry`] under a
//! `<timestamp>_<description>` name and applied in timestamp order by a
//! [`MigrationRunner`], which records each applied unit in the `migrations`
//! table.

pub mod registry;
pub mod repository;
pub mod runner;

use async_trait::async_trait;

pub use registry::{MigrationEntry, MigrationRegistry, camel_case, handler_name, parse_name};
pub use repository::{MigrationRecord, MigrationRepository};
pub use runner::{MigrationListing, MigrationRunner, MigrationStatus};

use crate::error::DbResult;
use crate::schema::Schema;

/// A reversible schema change.
///
/// Both directions run inside a transaction; the schema handle is bound to
/// the transaction's connection.
#[async_trait]
pub trait Migration: Send + Sync {
    async fn up(&self, schema: &Schema) -> DbResult<()>;

    async fn down(&self, schema: &Schema) -> DbResult<()>;
}

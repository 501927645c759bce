//! db-forge: a data-access engine for MySQL, PostgreSQL and SQLite.
//!
//! Pooled connections per configuration group, a fluent query builder with a
//! tag-invalidated result cache, nested transactions, a dialect-aware schema
//! compiler, and versioned migrations and seeders on top.

pub mod config;
pub mod error;
pub mod models;
pub mod db;
pub mod cache;
pub mod cli;
pub mod logging;
pub mod migration;
pub mod profiler;
pub mod query;
pub mod schema;
pub mod seed;

pub use cache::TaggedCache;
pub use config::{Config, EngineConfig};
pub use db::{Connection, ConnectionManager, TransactionManager};
pub use error::{DbError, DbResult};
pub use query::QueryBuilder;
pub use schema::{Blueprint, Schema};

//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Connection pool management, one pool per configured group
//! - Connection handles with session pinning
//! - Statement execution and row decoding
//! - Named placeholder rewriting and parameter binding
//! - Nested transactions with savepoints
//! - Database dispatch macros for reducing code duplication

#[macro_use]
pub mod macros;
pub mod connection;
pub mod executor;
pub mod params;
pub mod pool;
pub mod transaction;
pub mod types;

pub use connection::Connection;
pub use executor::ExecOutcome;
pub use pool::{ConnectionManager, ConnectionSummary, DbPool};
pub use transaction::{TransactionFrame, TransactionManager};

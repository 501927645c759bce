//! Statement execution.
//!
//! # Architecture
//!
//! The executor uses database-specific implementations organized in submodules:
//! - `mysql`: MySQL-specific fetch and execute operations
//! - `postgres`: PostgreSQL-specific fetch and execute operations
//! - `sqlite`: SQLite-specific fetch and execute operations
//!
//! Each function is generic over the sqlx executor, so the same code runs
//! against a pool or against a connection pinned by an open transaction.
//! Every call is bounded by the connection's query timeout.

use std::time::Duration;

use tokio::time::timeout;

use crate::db::params::{bind_mysql_param, bind_postgres_param, bind_sqlite_param};
use crate::db::pool::{DbConn, DbPool};
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::models::{Row, SqlValue};

/// Result of a statement that does not return rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOutcome {
    pub rows_affected: u64,
    /// Not reported by PostgreSQL; use `RETURNING` there.
    pub last_insert_id: Option<i64>,
}

fn timeout_error(operation: &str, timeout: Duration) -> DbError {
    DbError::timeout(operation, timeout.as_secs())
}

/// Fetch every row of a statement through the pool.
pub(crate) async fn fetch_all_pool(
    pool: &DbPool,
    sql: &str,
    params: &[SqlValue],
    query_timeout: Duration,
) -> DbResult<Vec<Row>> {
    impl_db_dispatch!(pool, {
        MySql(p) => mysql::fetch_all(p, sql, params, query_timeout).await,
        Postgres(p) => postgres::fetch_all(p, sql, params, query_timeout).await,
        Sqlite(p) => sqlite::fetch_all(p, sql, params, query_timeout).await,
    })
}

/// Fetch every row of a statement on a pinned connection.
pub(crate) async fn fetch_all_conn(
    conn: &mut DbConn,
    sql: &str,
    params: &[SqlValue],
    query_timeout: Duration,
) -> DbResult<Vec<Row>> {
    impl_conn_dispatch!(conn, {
        MySql(c) => mysql::fetch_all(&mut **c, sql, params, query_timeout).await,
        Postgres(c) => postgres::fetch_all(&mut **c, sql, params, query_timeout).await,
        Sqlite(c) => sqlite::fetch_all(&mut **c, sql, params, query_timeout).await,
    })
}

/// Execute a statement through the pool.
pub(crate) async fn execute_pool(
    pool: &DbPool,
    sql: &str,
    params: &[SqlValue],
    query_timeout: Duration,
) -> DbResult<ExecOutcome> {
    impl_db_dispatch!(pool, {
        MySql(p) => mysql::execute(p, sql, params, query_timeout).await,
        Postgres(p) => postgres::execute(p, sql, params, query_timeout).await,
        Sqlite(p) => sqlite::execute(p, sql, params, query_timeout).await,
    })
}

/// Execute a statement on a pinned connection.
pub(crate) async fn execute_conn(
    conn: &mut DbConn,
    sql: &str,
    params: &[SqlValue],
    query_timeout: Duration,
) -> DbResult<ExecOutcome> {
    impl_conn_dispatch!(conn, {
        MySql(c) => mysql::execute(&mut **c, sql, params, query_timeout).await,
        Postgres(c) => postgres::execute(&mut **c, sql, params, query_timeout).await,
        Sqlite(c) => sqlite::execute(&mut **c, sql, params, query_timeout).await,
    })
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// The three modules are generated from one template; they differ only in the
// database type, the bind function and how the inserted id is reported.

macro_rules! dialect_executor {
    ($module:ident, $db:ty, $bind:path, |$res:ident| $last_id:expr) => {
        pub(crate) mod $module {
            use super::*;

            pub async fn fetch_all<'c, E>(
                executor: E,
                sql: &str,
                params: &[SqlValue],
                query_timeout: Duration,
            ) -> DbResult<Vec<Row>>
            where
                E: sqlx::Executor<'c, Database = $db>,
            {
                // Without params, send raw SQL to avoid prepared statement limitations
                let result = if params.is_empty() {
                    timeout(query_timeout, executor.fetch_all(sql)).await
                } else {
                    let mut query = sqlx::query(sql);
                    for param in params {
                        query = $bind(query, param);
                    }
                    timeout(query_timeout, query.fetch_all(executor)).await
                };

                match result {
                    Ok(Ok(rows)) => Ok(rows.iter().map(RowToJson::to_json_map).collect()),
                    Ok(Err(e)) => Err(DbError::from(e)),
                    Err(_) => Err(timeout_error("query execution", query_timeout)),
                }
            }

            pub async fn execute<'c, E>(
                executor: E,
                sql: &str,
                params: &[SqlValue],
                query_timeout: Duration,
            ) -> DbResult<ExecOutcome>
            where
                E: sqlx::Executor<'c, Database = $db>,
            {
                // Some statements (DDL, SAVEPOINT) cannot be prepared on every server
                let result = if params.is_empty() {
                    timeout(query_timeout, executor.execute(sql)).await
                } else {
                    let mut query = sqlx::query(sql);
                    for param in params {
                        query = $bind(query, param);
                    }
                    timeout(query_timeout, query.execute(executor)).await
                };

                match result {
                    Ok(Ok($res)) => Ok(ExecOutcome {
                        rows_affected: $res.rows_affected(),
                        last_insert_id: $last_id,
                    }),
                    Ok(Err(e)) => Err(DbError::from(e)),
                    Err(_) => Err(timeout_error("statement execution", query_timeout)),
                }
            }
        }
    };
}

dialect_executor!(mysql, sqlx::MySql, bind_mysql_param, |r| {
    i64::try_from(r.last_insert_id()).ok().filter(|id| *id > 0)
});
dialect_executor!(postgres, sqlx::Postgres, bind_postgres_param, |r| {
    let _ = &r;
    None
});
dialect_executor!(sqlite, sqlx::Sqlite, bind_sqlite_param, |r| {
    Some(r.last_insert_rowid()).filter(|id| *id > 0)
});

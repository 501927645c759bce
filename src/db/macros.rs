//! Database dispatch macros for reducing code duplication.
//!
//! The macros expand at compile time into plain `match` statements over the
//! per-driver enums.

/// Macro for generating database dispatch match arms.
///
/// This macro generates match arms for `DbPool` variants, reducing the need
/// to manually write repetitive match statements.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(pool, {
///     MySql(p) => do_mysql(p),
///     Postgres(p) => do_postgres(p),
///     Sqlite(p) => do_sqlite(p),
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($pool:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $pool {
            $(
                $crate::db::pool::DbPool::$variant($p) => $body,
            )+
        }
    };
}

/// Same as [`impl_db_dispatch!`] for a connection pinned out of the pool.
#[macro_export]
macro_rules! impl_conn_dispatch {
    ($conn:expr, { $($variant:ident($c:ident) => $body:expr),+ $(,)? }) => {
        match $conn {
            $(
                $crate::db::pool::DbConn::$variant($c) => $body,
            )+
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::db::pool::DbPool;
    use crate::models::Driver;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn test_dispatch_selects_variant() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let pool = DbPool::Sqlite(pool);
        let driver = impl_db_dispatch!(&pool, {
            MySql(_p) => Driver::MySql,
            Postgres(_p) => Driver::Postgres,
            Sqlite(_p) => Driver::Sqlite,
        });
        assert_eq!(driver, Driver::Sqlite);
        assert_eq!(pool.driver(), Driver::Sqlite);
    }
}

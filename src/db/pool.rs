//! Connection pool management.
//!
//! This module provides connection pooling functionality using database-specific
//! pools (MySqlPool, PgPool, SqlitePool) to ensure full type support. One pool is
//! created per configured group on first use and reused afterwards.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{MySql, MySqlPool, PgPool, Postgres, Sqlite, SqlitePool};
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, warn};

use crate::cache::{FileStore, MemoryStore, TaggedCache};
use crate::config::{CacheStoreConfig, DEFAULT_QUERY_TIMEOUT_SECS, EngineConfig};
use crate::db::connection::Connection;
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionDescriptor, Driver, GroupKey};
use crate::profiler::QueryProfiler;
use crate::query::QueryBuilder;
use crate::schema::Schema;

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

impl DbPool {
    /// Close the connection pool.
    pub async fn close(&self) {
        impl_db_dispatch!(self, {
            MySql(pool) => pool.close().await,
            Postgres(pool) => pool.close().await,
            Sqlite(pool) => pool.close().await,
        })
    }

    pub fn driver(&self) -> Driver {
        match self {
            DbPool::MySql(_) => Driver::MySql,
            DbPool::Postgres(_) => Driver::Postgres,
            DbPool::Sqlite(_) => Driver::Sqlite,
        }
    }

    /// Check a single connection out of the pool.
    pub(crate) async fn acquire(&self) -> DbResult<DbConn> {
        Ok(impl_db_dispatch!(self, {
            MySql(pool) => DbConn::MySql(pool.acquire().await?),
            Postgres(pool) => DbConn::Postgres(pool.acquire().await?),
            Sqlite(pool) => DbConn::Sqlite(pool.acquire().await?),
        }))
    }
}

/// A connection checked out of a [`DbPool`], pinned for the life of a transaction.
pub enum DbConn {
    MySql(PoolConnection<MySql>),
    Postgres(PoolConnection<Postgres>),
    Sqlite(PoolConnection<Sqlite>),
}

/// Connection information returned by `list_connections` (no secrets exposed).
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConnectionSummary {
    pub group: String,
    pub driver: Driver,
    /// Credential-free `driver://user@host:port/database` form
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
}

#[derive(Debug)]
struct PoolEntry {
    connection: Connection,
    summary: ConnectionSummary,
}

/// Resolves connection groups to live handles.
///
/// Cloning is cheap; clones share pools, the result cache and the profiler.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    config: Arc<EngineConfig>,
    pools: Arc<RwLock<HashMap<String, PoolEntry>>>,
    last_group: Arc<Mutex<Option<String>>>,
    cache: Arc<OnceCell<Arc<TaggedCache>>>,
    profiler: Arc<OnceCell<Arc<QueryProfiler>>>,
}

impl ConnectionManager {
    /// Create a connection manager. Nothing connects until a group is requested.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config: Arc::new(config),
            pools: Arc::new(RwLock::new(HashMap::new())),
            last_group: Arc::new(Mutex::new(None)),
            cache: Arc::new(OnceCell::new()),
            profiler: Arc::new(OnceCell::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Connect to a group, or return its existing handle.
    pub async fn connect(&self, group: impl Into<GroupKey>) -> DbResult<Connection> {
        let key = group.into();
        let (name, descriptor) = self.config.descriptor(&key)?;

        // Early check for existing connection
        {
            let pools = self.pools.read().await;
            if let Some(entry) = pools.get(&name) {
                *self.last_group.lock() = Some(name);
                return Ok(entry.connection.clone());
            }
        }

        let driver = descriptor.driver();
        info!(
            group = %name,
            driver = %driver,
            target = %descriptor.describe(),
            "Connecting to database"
        );

        let pool = create_pool(&name, &descriptor).await?;
        let server_version = get_server_version(&pool).await;
        let cache = self.shared_cache().await?;
        let profiler = self.shared_profiler();
        let query_timeout = Duration::from_secs(
            descriptor
                .query_timeout_secs
                .unwrap_or(DEFAULT_QUERY_TIMEOUT_SECS),
        );
        let connection = Connection::new(name.clone(), pool, cache, profiler, query_timeout);

        // Re-check after async work to prevent TOCTOU race
        // If another task won, close the pool we created outside the lock
        let (connection, duplicate) = {
            let mut pools = self.pools.write().await;
            match pools.get(&name) {
                Some(entry) => (entry.connection.clone(), Some(connection)),
                None => {
                    let summary = ConnectionSummary {
                        group: name.clone(),
                        driver,
                        target: descriptor.describe(),
                        server_version: server_version.clone(),
                    };
                    pools.insert(
                        name.clone(),
                        PoolEntry {
                            connection: connection.clone(),
                            summary,
                        },
                    );
                    (connection, None)
                }
            }
        }; // Lock released here

        if let Some(duplicate) = duplicate {
            debug!(group = %name, "Concurrent connect detected, discarding duplicate pool");
            duplicate.pool().close().await;
        } else {
            info!(
                group = %name,
                server_version = ?server_version,
                "Connected successfully"
            );
        }

        *self.last_group.lock() = Some(name);
        Ok(connection)
    }

    /// Get a handle for `group`, or for the most recently connected group.
    ///
    /// When nothing is connected yet the configured default group is used.
    pub async fn get_connection(&self, group: Option<GroupKey>) -> DbResult<Connection> {
        if let Some(key) = group {
            return self.connect(key).await;
        }
        let last = self.last_group.lock().clone();
        let name = match last {
            Some(name) => name,
            None => self.config.default_group_name().ok_or_else(|| {
                DbError::configuration("No connection groups are configured", None)
            })?,
        };
        self.connect(name).await
    }

    /// A handle with its own session, for one unit of work.
    ///
    /// Transactions opened on it pin a pooled connection that no other handle
    /// will use.
    pub async fn checkout(&self, group: Option<GroupKey>) -> DbResult<Connection> {
        Ok(self.get_connection(group).await?.fork())
    }

    /// Query builder over `table` on the current group.
    pub async fn table(&self, table: &str) -> DbResult<QueryBuilder> {
        Ok(self.get_connection(None).await?.table(table))
    }

    /// Schema compiler on the given (or current) group.
    pub async fn schema(&self, group: Option<GroupKey>) -> DbResult<Schema> {
        Ok(self.get_connection(group).await?.schema())
    }

    /// The result cache, once any group has connected.
    pub fn cache(&self) -> Option<Arc<TaggedCache>> {
        self.cache.get().cloned()
    }

    /// The statement profiler, once any group has connected.
    pub fn profiler(&self) -> Option<Arc<QueryProfiler>> {
        self.profiler.get().cloned()
    }

    /// List all active group names.
    pub async fn list_connections(&self) -> Vec<ConnectionSummary> {
        let pools = self.pools.read().await;
        let mut list: Vec<_> = pools.values().map(|e| e.summary.clone()).collect();
        list.sort_by(|a, b| a.group.cmp(&b.group));
        list
    }

    /// Check if a group has a live pool.
    pub async fn is_connected(&self, group: &str) -> bool {
        self.pools.read().await.contains_key(group)
    }

    /// Get the number of active connections.
    pub async fn connection_count(&self) -> usize {
        self.pools.read().await.len()
    }

    /// Close all connections and clear the pool.
    pub async fn close_all(&self) {
        let entries: Vec<(String, PoolEntry)> = {
            let mut pools = self.pools.write().await;
            pools.drain().collect()
        };
        join_all(entries.iter().map(|(group, entry)| async move {
            info!(group = %group, "Closing connection");
            entry.connection.pool().close().await;
        }))
        .await;
        *self.last_group.lock() = None;
        info!("All connections closed");
    }

    async fn shared_cache(&self) -> DbResult<Arc<TaggedCache>> {
        let config = &self.config.cache;
        self.cache
            .get_or_try_init(|| async {
                let cache = match &config.store {
                    CacheStoreConfig::Memory => TaggedCache::new(Arc::new(MemoryStore::new()), config),
                    CacheStoreConfig::File { path } => {
                        TaggedCache::new(Arc::new(FileStore::open(path).await?), config)
                    }
                };
                debug!(enabled = config.enabled, "Result cache initialised");
                Ok::<_, DbError>(Arc::new(cache))
            })
            .await
            .cloned()
    }

    fn shared_profiler(&self) -> Arc<QueryProfiler> {
        match self.profiler.get() {
            Some(profiler) => profiler.clone(),
            None => {
                let profiler = Arc::new(QueryProfiler::new(&self.config.profiler));
                // A concurrent initialiser may have won; use whichever is stored
                let _ = self.profiler.set(profiler.clone());
                self.profiler.get().cloned().unwrap_or(profiler)
            }
        }
    }
}

/// Create a connection pool for the given descriptor.
async fn create_pool(group: &str, descriptor: &ConnectionDescriptor) -> DbResult<DbPool> {
    let pool_opts = &descriptor.pool;
    let driver = descriptor.driver();
    let is_sqlite = driver == Driver::Sqlite;
    let acquire_timeout = Duration::from_secs(pool_opts.acquire_timeout_or_default());
    let idle_timeout = Some(Duration::from_secs(pool_opts.idle_timeout_or_default()));
    let connect_error = |e: sqlx::Error| {
        DbError::connection(
            format!(
                "Failed to connect group '{}' ({}): {}",
                group,
                descriptor.describe(),
                e
            ),
            connection_suggestion(driver, &e),
        )
    };

    match driver {
        Driver::MySql => {
            let mut options = MySqlConnectOptions::new()
                .host(descriptor.host.as_deref().unwrap_or("localhost"))
                .database(&descriptor.database)
                .charset(descriptor.charset.as_deref().unwrap_or("utf8mb4"));
            if let Some(port) = descriptor.port_or_default() {
                options = options.port(port);
            }
            if let Some(user) = &descriptor.username {
                options = options.username(user);
            }
            if let Some(password) = &descriptor.password {
                options = options.password(password);
            }

            let pool = MySqlPoolOptions::new()
                .min_connections(pool_opts.min_connections_or_default())
                .max_connections(pool_opts.max_connections_or_default(is_sqlite))
                .acquire_timeout(acquire_timeout)
                .idle_timeout(idle_timeout)
                .test_before_acquire(pool_opts.test_before_acquire_or_default())
                .connect_with(options)
                .await
                .map_err(connect_error)?;
            Ok(DbPool::MySql(pool))
        }
        Driver::Postgres => {
            let mut options = PgConnectOptions::new()
                .host(descriptor.host.as_deref().unwrap_or("localhost"))
                .database(&descriptor.database);
            if let Some(port) = descriptor.port_or_default() {
                options = options.port(port);
            }
            if let Some(user) = &descriptor.username {
                options = options.username(user);
            }
            if let Some(password) = &descriptor.password {
                options = options.password(password);
            }

            let pool = PgPoolOptions::new()
                .min_connections(pool_opts.min_connections_or_default())
                .max_connections(pool_opts.max_connections_or_default(is_sqlite))
                .acquire_timeout(acquire_timeout)
                .idle_timeout(idle_timeout)
                .test_before_acquire(pool_opts.test_before_acquire_or_default())
                .connect_with(options)
                .await
                .map_err(connect_error)?;
            Ok(DbPool::Postgres(pool))
        }
        Driver::Sqlite => {
            let in_memory = descriptor.database == ":memory:";
            let options = if in_memory {
                SqliteConnectOptions::from_str("sqlite::memory:").map_err(connect_error)?
            } else {
                SqliteConnectOptions::new()
                    .filename(&descriptor.database)
                    .create_if_missing(true)
            }
            .foreign_keys(true);

            // An in-memory database lives and dies with its single connection
            let (max, idle) = if in_memory {
                (1, None)
            } else {
                (pool_opts.max_connections_or_default(is_sqlite), idle_timeout)
            };

            let pool = SqlitePoolOptions::new()
                .min_connections(pool_opts.min_connections_or_default().min(max))
                .max_connections(max)
                .acquire_timeout(acquire_timeout)
                .idle_timeout(idle)
                .max_lifetime(if in_memory { None } else { Some(Duration::from_secs(1800)) })
                .test_before_acquire(pool_opts.test_before_acquire_or_default())
                .connect_with(options)
                .await
                .map_err(connect_error)?;
            Ok(DbPool::Sqlite(pool))
        }
    }
}

/// Get the server version from the connected database.
async fn get_server_version(pool: &DbPool) -> Option<String> {
    let result = impl_db_dispatch!(pool, {
        MySql(p) => sqlx::query_scalar::<_, String>("SELECT version()").fetch_one(p).await,
        Postgres(p) => sqlx::query_scalar::<_, String>("SELECT version()").fetch_one(p).await,
        Sqlite(p) => sqlx::query_scalar::<_, String>("SELECT sqlite_version()").fetch_one(p).await,
    });
    match result {
        Ok(version) => {
            debug!(version = %version, "Got server version");
            Some(version)
        }
        Err(e) => {
            warn!(error = %e, "Failed to get server version");
            None
        }
    }
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(driver: Driver, error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return format!("Check that the {} server is running and accessible", driver);
    }

    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify the username and password of the connection group".to_string();
    }

    if error_str.contains("does not exist") || error_str.contains("unknown database") {
        return "Check that the database name exists".to_string();
    }

    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check TLS/SSL configuration or try disabling it".to_string();
    }

    match driver {
        Driver::Postgres => "Verify host, port and database of the group (default port 5432)".to_string(),
        Driver::MySql => "Verify host, port and database of the group (default port 3306)".to_string(),
        Driver::Sqlite => "Verify the database file path is writable".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn sqlite_config() -> (EngineConfig, std::path::PathBuf) {
        let path = NamedTempFile::new().unwrap().into_temp_path().keep().unwrap();
        let config = EngineConfig::new().with_connection(
            "default",
            ConnectionDescriptor::sqlite(path.to_string_lossy().to_string()),
        );
        (config, path)
    }

    #[tokio::test]
    async fn test_connection_manager_creation() {
        let manager = ConnectionManager::new(EngineConfig::new());
        assert_eq!(manager.connection_count().await, 0);
        assert!(manager.cache().is_none());
        assert!(manager.profiler().is_none());
    }

    #[tokio::test]
    async fn test_missing_group_is_configuration_error() {
        let manager = ConnectionManager::new(EngineConfig::new());
        let result = manager.connect("nonexistent").await;
        assert!(matches!(result, Err(DbError::Configuration { .. })));
        let result = manager.get_connection(None).await;
        assert!(matches!(result, Err(DbError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let (config, path) = sqlite_config();
        let manager = ConnectionManager::new(config);

        let first = manager.connect("default").await.unwrap();
        let second = manager.connect("default").await.unwrap();
        assert!(first.same_pool(&second));
        assert_eq!(manager.connection_count().await, 1);

        // first connection lazily builds the shared services
        assert!(manager.cache().is_some());
        assert!(manager.profiler().is_some());

        manager.close_all().await;
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_get_connection_falls_back_to_last_group() {
        let (config, path) = sqlite_config();
        let other = NamedTempFile::new().unwrap().into_temp_path().keep().unwrap();
        let config = config.with_connection(
            "reporting",
            ConnectionDescriptor::sqlite(other.to_string_lossy().to_string()),
        );
        let manager = ConnectionManager::new(config);

        // nothing connected yet: the default group
        let conn = manager.get_connection(None).await.unwrap();
        assert_eq!(conn.group(), "default");

        manager.connect(GroupKey::Index(1)).await.unwrap();
        let conn = manager.get_connection(None).await.unwrap();
        assert_eq!(conn.group(), "reporting");

        let listed: Vec<_> = manager
            .list_connections()
            .await
            .into_iter()
            .map(|s| s.group)
            .collect();
        assert_eq!(listed, vec!["default", "reporting"]);

        manager.close_all().await;
        let _ = std::fs::remove_file(path);
        let _ = std::fs::remove_file(other);
    }

    #[tokio::test]
    async fn test_checkout_starts_a_new_session() {
        let (config, path) = sqlite_config();
        let manager = ConnectionManager::new(config);
        assert!(!manager.is_connected("default").await);

        let conn = manager.get_connection(None).await.unwrap();
        let unit = manager.checkout(None).await.unwrap();
        assert!(manager.is_connected("default").await);
        assert!(unit.same_pool(&conn));

        unit.transactions().begin().await.unwrap();
        assert_eq!(unit.transaction_level(), 1);
        assert_eq!(conn.transaction_level(), 0);
        unit.transactions().rollback().await.unwrap();

        manager.close_all().await;
        assert!(!manager.is_connected("default").await);
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_connect_failure_hides_password() {
        let config = EngineConfig::new().with_connection(
            "default",
            ConnectionDescriptor::new(Driver::Postgres, "app")
                .with_host("127.0.0.1", Some(1))
                .with_credentials("app", "hunter2"),
        );
        let manager = ConnectionManager::new(config);
        let err = manager.connect("default").await.unwrap_err();
        assert!(matches!(err, DbError::Connection { .. }));
        assert!(!err.to_string().contains("hunter2"));
        assert!(err.to_string().contains("default"));
    }
}

//! Connection handles.
//!
//! A [`Connection`] is a cheap, cloneable handle onto one group's pool. Clones
//! share a session: while a transaction is open the session holds a single
//! pooled connection and every statement issued through any clone runs on it.
//! [`Connection::fork`] starts an independent session on the same pool.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::cache::TaggedCache;
use crate::db::executor::{self, ExecOutcome};
use crate::db::params::{interpolate, to_positional};
use crate::db::pool::{DbConn, DbPool};
use crate::db::transaction::{TransactionFrame, TransactionManager};
use crate::error::DbResult;
use crate::models::{Driver, Params, Row};
use crate::profiler::{ProfiledQuery, QueryProfiler};
use crate::query::QueryBuilder;
use crate::schema::Schema;

pub(crate) type AfterCommit = Box<dyn FnOnce() + Send + 'static>;

struct GroupHandle {
    group: String,
    pool: DbPool,
    cache: Arc<TaggedCache>,
    profiler: Arc<QueryProfiler>,
    query_timeout: Duration,
}

/// Mutable per-session state, guarded by the session lock.
#[derive(Default)]
pub(crate) struct SessionState {
    /// Pinned while a transaction is open
    pub(crate) conn: Option<DbConn>,
    pub(crate) frames: Vec<TransactionFrame>,
    /// Callbacks with the depth they were registered at
    pub(crate) callbacks: Vec<(usize, AfterCommit)>,
    pub(crate) savepoint_seq: u64,
}

pub(crate) struct Session {
    pub(crate) state: Mutex<SessionState>,
    pub(crate) depth: AtomicUsize,
    query_timeout: Duration,
}

impl Session {
    fn new(query_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(SessionState::default()),
            depth: AtomicUsize::new(0),
            query_timeout,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.frames.is_empty() {
            return;
        }
        let Some(mut conn) = state.conn.take() else {
            return;
        };
        state.callbacks.clear();
        let levels = state.frames.len();
        let query_timeout = self.query_timeout;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(levels, "Connection dropped with an open transaction, rolling back");
                handle.spawn(async move {
                    if let Err(e) =
                        executor::execute_conn(&mut conn, "ROLLBACK", &[], query_timeout).await
                    {
                        warn!(error = %e, "Rollback of abandoned transaction failed");
                    }
                });
            }
            // Closing the connection without COMMIT discards the transaction
            Err(_) => warn!(levels, "Open transaction dropped outside a runtime"),
        }
    }
}

/// Handle onto one connection group.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<GroupHandle>,
    session: Arc<Session>,
}

impl Connection {
    pub(crate) fn new(
        group: String,
        pool: DbPool,
        cache: Arc<TaggedCache>,
        profiler: Arc<QueryProfiler>,
        query_timeout: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(GroupHandle {
                group,
                pool,
                cache,
                profiler,
                query_timeout,
            }),
            session: Arc::new(Session::new(query_timeout)),
        }
    }

    /// A handle on the same pool with its own session.
    pub fn fork(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            session: Arc::new(Session::new(self.shared.query_timeout)),
        }
    }

    pub fn group(&self) -> &str {
        &self.shared.group
    }

    pub fn driver(&self) -> Driver {
        self.shared.pool.driver()
    }

    pub fn pool(&self) -> &DbPool {
        &self.shared.pool
    }

    pub fn cache(&self) -> &Arc<TaggedCache> {
        &self.shared.cache
    }

    pub fn profiler(&self) -> &Arc<QueryProfiler> {
        &self.shared.profiler
    }

    pub fn query_timeout(&self) -> Duration {
        self.shared.query_timeout
    }

    /// Whether both handles use the same pool.
    pub fn same_pool(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn session(&self) -> &Session {
        &self.session
    }

    /// Query builder bound to `table`.
    pub fn table(&self, table: &str) -> QueryBuilder {
        QueryBuilder::new(self.clone(), table)
    }

    pub fn schema(&self) -> Schema {
        Schema::new(self.clone())
    }

    pub fn transactions(&self) -> TransactionManager {
        TransactionManager::new(self.clone())
    }

    /// Current transaction nesting depth (0 when none is open).
    pub fn transaction_level(&self) -> usize {
        self.session.depth.load(Ordering::Acquire)
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction_level() > 0
    }

    /// Run a row-returning statement with named placeholders.
    pub async fn select(&self, sql: &str, params: &Params) -> DbResult<Vec<Row>> {
        let (positional, values) = to_positional(sql, params, self.driver())?;
        debug!(
            group = %self.shared.group,
            sql = %positional,
            params = values.len(),
            "Executing query"
        );

        let started = Instant::now();
        let result = {
            let mut state = self.session.state.lock().await;
            match state.conn.as_mut() {
                Some(conn) => {
                    executor::fetch_all_conn(conn, &positional, &values, self.shared.query_timeout)
                        .await
                }
                None => {
                    executor::fetch_all_pool(
                        &self.shared.pool,
                        &positional,
                        &values,
                        self.shared.query_timeout,
                    )
                    .await
                }
            }
        };

        let rows = result.as_ref().map(|r| r.len() as u64).unwrap_or(0);
        self.profile(sql, params, started.elapsed(), rows, result.as_ref().err());
        result.map_err(|e| e.with_sql(interpolate(sql, params)))
    }

    /// First row of a statement, if any.
    pub async fn select_one(&self, sql: &str, params: &Params) -> DbResult<Option<Row>> {
        Ok(self.select(sql, params).await?.into_iter().next())
    }

    /// Run a statement that does not return rows.
    pub async fn execute(&self, sql: &str, params: &Params) -> DbResult<ExecOutcome> {
        let (positional, values) = to_positional(sql, params, self.driver())?;
        debug!(
            group = %self.shared.group,
            sql = %positional,
            params = values.len(),
            "Executing statement"
        );

        let started = Instant::now();
        let result = {
            let mut state = self.session.state.lock().await;
            match state.conn.as_mut() {
                Some(conn) => {
                    executor::execute_conn(conn, &positional, &values, self.shared.query_timeout)
                        .await
                }
                None => {
                    executor::execute_pool(
                        &self.shared.pool,
                        &positional,
                        &values,
                        self.shared.query_timeout,
                    )
                    .await
                }
            }
        };

        let rows = result.as_ref().map(|o| o.rows_affected).unwrap_or(0);
        self.profile(sql, params, started.elapsed(), rows, result.as_ref().err());
        result.map_err(|e| e.with_sql(interpolate(sql, params)))
    }

    /// Run raw SQL without parameters.
    pub async fn statement(&self, sql: &str) -> DbResult<ExecOutcome> {
        self.execute(sql, &Params::new()).await
    }

    fn profile(
        &self,
        sql: &str,
        params: &Params,
        duration: Duration,
        rows: u64,
        error: Option<&crate::error::DbError>,
    ) {
        let profiler = &self.shared.profiler;
        if !profiler.is_enabled() {
            return;
        }
        profiler.record(ProfiledQuery {
            group: self.shared.group.clone(),
            sql: sql.to_string(),
            params: params.clone(),
            duration,
            rows,
            at: chrono::Utc::now(),
            error: error.map(ToString::to_string),
        });
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("group", &self.shared.group)
            .field("driver", &self.driver())
            .field("transaction_level", &self.transaction_level())
            .finish()
    }
}

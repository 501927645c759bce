//! Nested transaction management.
//!
//! The outermost `begin` checks a connection out of the pool and pins it to the
//! session; every nested `begin` opens a savepoint on that same connection.
//! The connection goes back to the pool once the outer frame ends.

use std::future::Future;
use std::sync::atomic::Ordering;

use tracing::{debug, info, warn};

use crate::db::connection::{AfterCommit, Connection, SessionState};
use crate::db::executor;
use crate::error::{DbError, DbResult};
use crate::models::Driver;

/// One level of the transaction stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionFrame {
    Main,
    Savepoint(String),
}

/// Transaction control for a connection's session.
#[derive(Debug, Clone)]
pub struct TransactionManager {
    conn: Connection,
}

impl TransactionManager {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Nesting depth; 0 when no transaction is open.
    pub fn level(&self) -> usize {
        self.conn.transaction_level()
    }

    pub fn in_transaction(&self) -> bool {
        self.level() > 0
    }

    /// Open a transaction, or a savepoint inside the current one.
    pub async fn begin(&self) -> DbResult<()> {
        let mut state = self.conn.session().state.lock().await;

        if state.frames.is_empty() {
            let mut pinned = self.conn.pool().acquire().await?;
            let sql = match self.conn.driver() {
                Driver::MySql => "START TRANSACTION",
                Driver::Postgres | Driver::Sqlite => "BEGIN",
            };
            executor::execute_conn(&mut pinned, sql, &[], self.conn.query_timeout())
                .await
                .map_err(|e| e.with_sql(sql))?;
            state.conn = Some(pinned);
            state.frames.push(TransactionFrame::Main);
            info!(group = %self.conn.group(), "Transaction started");
        } else {
            state.savepoint_seq += 1;
            let name = format!("sp_{}_{}", state.frames.len(), state.savepoint_seq);
            self.run_pinned(&mut state, &format!("SAVEPOINT {name}")).await?;
            debug!(group = %self.conn.group(), savepoint = %name, "Savepoint created");
            state.frames.push(TransactionFrame::Savepoint(name));
        }

        self.sync_depth(&state);
        Ok(())
    }

    /// Commit the innermost frame. Returns `false` when nothing is open.
    ///
    /// Committing the outer frame runs the registered after-commit callbacks.
    pub async fn commit(&self) -> DbResult<bool> {
        let callbacks = {
            let mut state = self.conn.session().state.lock().await;
            let Some(frame) = state.frames.last().cloned() else {
                return Ok(false);
            };

            match frame {
                TransactionFrame::Savepoint(name) => {
                    self.run_pinned(&mut state, &format!("RELEASE SAVEPOINT {name}"))
                        .await?;
                    let depth = state.frames.len();
                    state.frames.pop();
                    // Released work now belongs to the enclosing frame.
                    for (registered_at, _) in state.callbacks.iter_mut() {
                        if *registered_at >= depth {
                            *registered_at = depth - 1;
                        }
                    }
                    self.sync_depth(&state);
                    debug!(group = %self.conn.group(), savepoint = %name, "Savepoint released");
                    return Ok(true);
                }
                TransactionFrame::Main => {
                    if let Err(e) = self.run_pinned(&mut state, "COMMIT").await {
                        warn!(group = %self.conn.group(), error = %e, "Commit failed, rolling back");
                        let _ = self.run_pinned(&mut state, "ROLLBACK").await;
                        state.callbacks.clear();
                        self.finish(&mut state);
                        return Err(e);
                    }
                    let callbacks = std::mem::take(&mut state.callbacks);
                    self.finish(&mut state);
                    info!(group = %self.conn.group(), "Transaction committed");
                    callbacks
                }
            }
        }; // Lock released before callbacks run

        for (_, callback) in callbacks {
            callback();
        }
        Ok(true)
    }

    /// Roll back the innermost frame. Returns `false` when nothing is open.
    pub async fn rollback(&self) -> DbResult<bool> {
        let mut state = self.conn.session().state.lock().await;
        let Some(frame) = state.frames.last().cloned() else {
            return Ok(false);
        };

        match frame {
            TransactionFrame::Savepoint(name) => {
                self.run_pinned(&mut state, &format!("ROLLBACK TO SAVEPOINT {name}"))
                    .await?;
                let depth = state.frames.len();
                state.frames.pop();
                state.callbacks.retain(|(registered_at, _)| *registered_at < depth);
                self.sync_depth(&state);
                debug!(group = %self.conn.group(), savepoint = %name, "Rolled back to savepoint");
            }
            TransactionFrame::Main => {
                let result = self.run_pinned(&mut state, "ROLLBACK").await;
                state.callbacks.clear();
                self.finish(&mut state);
                result?;
                info!(group = %self.conn.group(), "Transaction rolled back");
            }
        }
        Ok(true)
    }

    /// Run `f` inside a (possibly nested) transaction.
    ///
    /// The frame is committed when `f` succeeds and rolled back when it
    /// fails; the original error is returned either way.
    pub async fn transaction<F, Fut, T>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(Connection) -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        self.begin().await?;
        match f(self.conn.clone()).await {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = self.rollback().await {
                    warn!(error = %rollback_err, "Rollback after failure also failed");
                }
                Err(e)
            }
        }
    }

    /// Run `callback` once the outer transaction commits.
    ///
    /// Without an open transaction the callback runs immediately.
    pub async fn after_commit<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let pending = {
            let mut state = self.conn.session().state.lock().await;
            if state.frames.is_empty() {
                Some(callback)
            } else {
                let depth = state.frames.len();
                state.callbacks.push((depth, Box::new(callback) as AfterCommit));
                None
            }
        };
        if let Some(callback) = pending {
            callback();
        }
    }

    async fn run_pinned(&self, state: &mut SessionState, sql: &str) -> DbResult<()> {
        let conn = state
            .conn
            .as_mut()
            .ok_or_else(|| DbError::transaction("No connection is pinned to the transaction"))?;
        executor::execute_conn(conn, sql, &[], self.conn.query_timeout())
            .await
            .map_err(|e| e.with_sql(sql))?;
        Ok(())
    }

    /// Clear the stack and return the pinned connection to the pool.
    fn finish(&self, state: &mut SessionState) {
        state.frames.clear();
        state.conn = None;
        self.sync_depth(state);
    }

    fn sync_depth(&self, state: &SessionState) {
        self.conn
            .session()
            .depth
            .store(state.frames.len(), Ordering::Release);
    }
}

//! Fluent query builder.
//!
//! A [`QueryBuilder`] accumulates clauses for one table, compiles them with
//! named placeholders and runs them on its [`Connection`]. Reads go through
//! the result cache; writes invalidate every cached result of the table.
//!
//! Clause methods record the first invalid argument and the next terminal
//! operation returns it, so chains never panic:
//!
//! ```ignore
//! let rows = conn
//!     .table("users")
//!     .select(["id", "name"])
//!     .where_(("active", true))
//!     .where_(("age", ">=", 18))
//!     .order_by("name", OrderDirection::Asc)
//!     .limit(10)
//!     .get()
//!     .await?;
//! ```

pub mod compiler;
pub mod state;

use std::time::Duration;

use tracing::{debug, warn};

pub use state::{Boolean, Condition, JoinKind, LikeSide, OrderDirection, QueryState, TableRef};

use crate::cache::table_tag;
use crate::db::{Connection, ExecOutcome};
use crate::error::{DbError, DbResult};
use crate::models::{Params, Row, SqlValue, Values};

use state::{Join, LIKE_ESCAPE, MATCH_ALL, MATCH_NONE, Order, Predicate};

/// Rows per INSERT statement in `insert_batch`.
const INSERT_CHUNK: usize = 100;

pub struct QueryBuilder {
    conn: Connection,
    state: QueryState,
    error: Option<DbError>,
}

impl QueryBuilder {
    pub fn new(conn: Connection, table: &str) -> Self {
        let mut builder = Self {
            conn,
            state: QueryState::default(),
            error: None,
        };
        builder.from(table);
        builder
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn state(&self) -> &QueryState {
        &self.state
    }

    fn record<T>(&mut self, result: DbResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.error.get_or_insert(e);
                None
            }
        }
    }

    // ---------------------------------------------------------------
    // Selection
    // ---------------------------------------------------------------

    /// Add projection items. Each item may itself be comma-separated.
    pub fn select<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for item in columns {
            for part in item.as_ref().split(',') {
                if let Some(column) = self.record(state::validate_select_item(part)) {
                    self.state.columns.push(column);
                }
            }
        }
        self
    }

    pub fn distinct(&mut self) -> &mut Self {
        self.state.distinct = true;
        self
    }

    pub fn from(&mut self, table: &str) -> &mut Self {
        if let Some(table) = self.record(TableRef::parse(table)) {
            self.state.table = Some(table);
        }
        self
    }

    /// Alias of [`QueryBuilder::from`].
    pub fn table(&mut self, table: &str) -> &mut Self {
        self.from(table)
    }

    // ---------------------------------------------------------------
    // Joins
    // ---------------------------------------------------------------

    pub fn join(&mut self, table: &str, on: &str, kind: JoinKind) -> &mut Self {
        let table = self.record(TableRef::parse(table));
        let on = self.record(state::validate_join_on(on));
        if let (Some(table), Some(on)) = (table, on) {
            self.state.joins.push(Join { kind, table, on });
        }
        self
    }

    pub fn inner_join(&mut self, table: &str, on: &str) -> &mut Self {
        self.join(table, on, JoinKind::Inner)
    }

    pub fn left_join(&mut self, table: &str, on: &str) -> &mut Self {
        self.join(table, on, JoinKind::Left)
    }

    pub fn right_join(&mut self, table: &str, on: &str) -> &mut Self {
        self.join(table, on, JoinKind::Right)
    }

    // ---------------------------------------------------------------
    // WHERE
    // ---------------------------------------------------------------

    fn push_where(&mut self, boolean: Boolean, sql: DbResult<String>) -> &mut Self {
        if let Some(sql) = self.record(sql) {
            self.state.wheres.push(Predicate { boolean, sql });
        }
        self
    }

    pub fn where_(&mut self, condition: impl Into<Condition>) -> &mut Self {
        let sql = self.state.condition("where_", condition.into());
        self.push_where(Boolean::And, sql)
    }

    pub fn or_where(&mut self, condition: impl Into<Condition>) -> &mut Self {
        let sql = self.state.condition("orwhere_", condition.into());
        self.push_where(Boolean::Or, sql)
    }

    /// Raw predicate with its own named parameters.
    pub fn where_raw(&mut self, sql: &str, params: Params) -> &mut Self {
        self.where_(Condition::raw(sql, params))
    }

    fn like_clause(
        &mut self,
        boolean: Boolean,
        column: &str,
        value: &str,
        side: LikeSide,
        negate: bool,
    ) -> &mut Self {
        let sql = state::validate_identifier(column).and_then(|column| {
            let pattern = state::like_pattern(value, side);
            let placeholder = self.state.bind("like_", &column, SqlValue::String(pattern))?;
            let op = if negate { "NOT LIKE" } else { "LIKE" };
            Ok(format!("{column} {op} {placeholder} ESCAPE '{LIKE_ESCAPE}'"))
        });
        self.push_where(boolean, sql)
    }

    pub fn like(&mut self, column: &str, value: &str, side: LikeSide) -> &mut Self {
        self.like_clause(Boolean::And, column, value, side, false)
    }

    pub fn or_like(&mut self, column: &str, value: &str, side: LikeSide) -> &mut Self {
        self.like_clause(Boolean::Or, column, value, side, false)
    }

    pub fn not_like(&mut self, column: &str, value: &str, side: LikeSide) -> &mut Self {
        self.like_clause(Boolean::And, column, value, side, true)
    }

    pub fn or_not_like(&mut self, column: &str, value: &str, side: LikeSide) -> &mut Self {
        self.like_clause(Boolean::Or, column, value, side, true)
    }

    fn in_clause<I, V>(&mut self, boolean: Boolean, column: &str, values: I, negate: bool) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        let values: Vec<SqlValue> = values.into_iter().map(Into::into).collect();
        let sql = state::validate_identifier(column).and_then(|column| {
            if values.is_empty() {
                // IN () matches nothing; NOT IN () matches everything
                return Ok(if negate { MATCH_ALL } else { MATCH_NONE }.to_string());
            }
            let placeholders = values
                .into_iter()
                .map(|v| self.state.bind("in_", &column, v))
                .collect::<DbResult<Vec<_>>>()?;
            let op = if negate { "NOT IN" } else { "IN" };
            Ok(format!("{column} {op} ({})", placeholders.join(", ")))
        });
        self.push_where(boolean, sql)
    }

    pub fn where_in<I, V>(&mut self, column: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        self.in_clause(Boolean::And, column, values, false)
    }

    pub fn or_where_in<I, V>(&mut self, column: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        self.in_clause(Boolean::Or, column, values, false)
    }

    pub fn where_not_in<I, V>(&mut self, column: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        self.in_clause(Boolean::And, column, values, true)
    }

    pub fn or_where_not_in<I, V>(&mut self, column: &str, values: I) -> &mut Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        self.in_clause(Boolean::Or, column, values, true)
    }

    fn null_clause(&mut self, boolean: Boolean, column: &str, negate: bool) -> &mut Self {
        let sql = state::validate_identifier(column).map(|column| {
            if negate {
                format!("{column} IS NOT NULL")
            } else {
                format!("{column} IS NULL")
            }
        });
        self.push_where(boolean, sql)
    }

    pub fn where_null(&mut self, column: &str) -> &mut Self {
        self.null_clause(Boolean::And, column, false)
    }

    pub fn or_where_null(&mut self, column: &str) -> &mut Self {
        self.null_clause(Boolean::Or, column, false)
    }

    pub fn where_not_null(&mut self, column: &str) -> &mut Self {
        self.null_clause(Boolean::And, column, true)
    }

    pub fn or_where_not_null(&mut self, column: &str) -> &mut Self {
        self.null_clause(Boolean::Or, column, true)
    }

    // ---------------------------------------------------------------
    // Grouping, ordering, paging
    // ---------------------------------------------------------------

    pub fn group_by<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for item in columns {
            for part in item.as_ref().split(',') {
                if let Some(column) = self.record(state::validate_identifier(part)) {
                    self.state.groups.push(column);
                }
            }
        }
        self
    }

    fn push_having(&mut self, boolean: Boolean, condition: Condition) -> &mut Self {
        let sql = self.state.condition("having_", condition);
        if let Some(sql) = self.record(sql) {
            self.state.havings.push(Predicate { boolean, sql });
        }
        self
    }

    pub fn having(&mut self, condition: impl Into<Condition>) -> &mut Self {
        self.push_having(Boolean::And, condition.into())
    }

    pub fn or_having(&mut self, condition: impl Into<Condition>) -> &mut Self {
        self.push_having(Boolean::Or, condition.into())
    }

    pub fn having_raw(&mut self, sql: &str, params: Params) -> &mut Self {
        self.push_having(Boolean::And, Condition::raw(sql, params))
    }

    pub fn order_by(&mut self, column: &str, direction: OrderDirection) -> &mut Self {
        if direction == OrderDirection::Random {
            self.state.orders.push(Order::Random);
        } else if let Some(column) = self.record(state::validate_expression(column)) {
            self.state.orders.push(Order::Column(column, direction));
        }
        self
    }

    pub fn limit(&mut self, limit: u64) -> &mut Self {
        self.state.limit = Some(limit);
        self
    }

    pub fn offset(&mut self, offset: u64) -> &mut Self {
        self.state.offset = Some(offset);
        self
    }

    /// Skip the result cache for the next read.
    pub fn no_cache(&mut self) -> &mut Self {
        self.state.no_cache = true;
        self
    }

    /// TTL for the next cached read, instead of the cache default.
    pub fn cache_ttl(&mut self, ttl: Duration) -> &mut Self {
        self.state.cache_ttl = Some(ttl);
        self
    }

    // ---------------------------------------------------------------
    // Inspection
    // ---------------------------------------------------------------

    pub fn compile_select(&self) -> DbResult<String> {
        self.check()?;
        compiler::compile_select(&self.state, self.conn.driver())
    }

    pub fn compile_count(&self) -> DbResult<String> {
        self.check()?;
        compiler::compile_count(&self.state)
    }

    pub fn params(&self) -> &Params {
        &self.state.params
    }

    /// Drop every clause except the table.
    pub fn reset(&mut self) -> &mut Self {
        self.state = QueryState::with_table(self.state.table.take());
        self.error = None;
        self
    }

    fn check(&self) -> DbResult<()> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    /// Take the accumulated state (and any recorded error), leaving a fresh
    /// state on the same table.
    fn take_state(&mut self) -> DbResult<QueryState> {
        let table = self.state.table.clone();
        let state = std::mem::replace(&mut self.state, QueryState::with_table(table));
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(state),
        }
    }

    // ---------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------

    /// Run the SELECT and return every row.
    pub async fn get(&mut self) -> DbResult<Vec<Row>> {
        let state = self.take_state()?;
        let sql = compiler::compile_select(&state, self.conn.driver())?;
        self.cached_select(&state, &sql).await
    }

    /// First row of the SELECT, if any.
    pub async fn first(&mut self) -> DbResult<Option<Row>> {
        self.limit(1);
        Ok(self.get().await?.into_iter().next())
    }

    /// Count the rows the current SELECT would return.
    ///
    /// With `reset == false` the builder keeps its clauses for a following
    /// `get`.
    pub async fn count_all_results(&mut self, reset: bool) -> DbResult<u64> {
        let owned;
        let state = if reset {
            owned = self.take_state()?;
            &owned
        } else {
            self.check()?;
            &self.state
        };
        let sql = compiler::compile_count(state)?;
        let rows = self.cached_select(state, &sql).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get(compiler::COUNT_ALIAS))
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .unwrap_or(0))
    }

    /// Shorthand for `count_all_results(true)`.
    pub async fn count(&mut self) -> DbResult<u64> {
        self.count_all_results(true).await
    }

    async fn cached_select(&self, state: &QueryState, sql: &str) -> DbResult<Vec<Row>> {
        let cache = self.conn.cache();
        // Uncommitted data must never reach the cache
        if !cache.is_enabled() || state.no_cache || self.conn.in_transaction() {
            return self.conn.select(sql, &state.params).await;
        }

        let key = cache.query_key(self.conn.group(), sql, &state.params)?;
        match cache.get(&key).await {
            Ok(Some(value)) => match serde_json::from_value::<Vec<Row>>(value) {
                Ok(rows) => {
                    debug!(key = %key, rows = rows.len(), "Cache hit");
                    return Ok(rows);
                }
                Err(e) => warn!(key = %key, error = %e, "Discarding malformed cache entry"),
            },
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "Cache read failed"),
        }

        let rows = self.conn.select(sql, &state.params).await?;
        let tags = state.tables().iter().map(|t| table_tag(t)).collect();
        let value = serde_json::to_value(&rows)?;
        if let Err(e) = cache.put_tagged(&key, value, state.cache_ttl, tags).await {
            warn!(key = %key, error = %e, "Cache write failed");
        }
        Ok(rows)
    }

    // ---------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------

    /// Insert one row.
    pub async fn insert(&mut self, values: Values) -> DbResult<ExecOutcome> {
        let state = self.take_state()?;
        let table = Self::write_table(&state, "insert")?;
        let (sql, params) = compiler::compile_insert(&table, &[values], 0)?;
        let outcome = self.conn.execute(&sql, &params).await?;
        self.invalidate(&table).await;
        Ok(outcome)
    }

    /// Insert many rows with the same columns, a chunk per statement.
    ///
    /// All chunks run in one (possibly nested) transaction, so a failing
    /// chunk leaves none of the rows behind. Returns the total inserted.
    pub async fn insert_batch(&mut self, rows: Vec<Values>) -> DbResult<u64> {
        let state = self.take_state()?;
        let table = Self::write_table(&state, "insert")?;
        if rows.is_empty() {
            return Err(DbError::invalid_input("Nothing to insert"));
        }

        let statements = rows
            .chunks(INSERT_CHUNK)
            .map(|chunk| compiler::compile_insert(&table, chunk, 0))
            .collect::<DbResult<Vec<_>>>()?;
        let result = self
            .conn
            .transactions()
            .transaction(|conn| async move {
                let mut inserted = 0;
                for (sql, params) in &statements {
                    inserted += conn.execute(sql, params).await?.rows_affected;
                }
                Ok(inserted)
            })
            .await;
        self.invalidate(&table).await;
        result
    }

    /// Update matching rows. Fails without a WHERE clause.
    pub async fn update(&mut self, values: Values) -> DbResult<u64> {
        let mut state = self.take_state()?;
        let sql = compiler::compile_update(&mut state, &values)?;
        let table = Self::write_table(&state, "update")?;
        let outcome = self.conn.execute(&sql, &state.params).await?;
        self.invalidate(&table).await;
        Ok(outcome.rows_affected)
    }

    /// Delete matching rows. Fails without a WHERE clause.
    pub async fn delete(&mut self) -> DbResult<u64> {
        let state = self.take_state()?;
        let sql = compiler::compile_delete(&state)?;
        let table = Self::write_table(&state, "delete")?;
        let outcome = self.conn.execute(&sql, &state.params).await?;
        self.invalidate(&table).await;
        Ok(outcome.rows_affected)
    }

    /// Remove every row of the table.
    pub async fn truncate(&mut self) -> DbResult<()> {
        let state = self.take_state()?;
        let sql = compiler::compile_truncate(&state, self.conn.driver())?;
        let table = Self::write_table(&state, "truncate")?;
        self.conn.statement(&sql).await?;
        self.invalidate(&table).await;
        Ok(())
    }

    fn write_table(state: &QueryState, operation: &str) -> DbResult<String> {
        state.table_name().map(str::to_string).ok_or_else(|| {
            DbError::unsafe_operation(operation, "No table is set on the query builder")
        })
    }

    /// Flush the table's tag now and, inside a transaction, again after the
    /// commit so that reads racing the transaction cannot leave stale rows.
    ///
    /// The write has already been applied, so a failed flush is logged rather
    /// than returned.
    async fn invalidate(&self, table: &str) {
        let cache = self.conn.cache().clone();
        if let Err(e) = cache.flush_table(table).await {
            warn!(table = %table, error = %e, "Cache flush after write failed");
        }

        if self.conn.in_transaction() {
            let table = table.to_string();
            self.conn
                .transactions()
                .after_commit(move || {
                    if let Ok(handle) = tokio::runtime::Handle::try_current() {
                        handle.spawn(async move {
                            if let Err(e) = cache.flush_table(&table).await {
                                warn!(table = %table, error = %e, "Post-commit cache flush failed");
                            }
                        });
                    }
                })
                .await;
        }
    }
}

impl std::fmt::Debug for QueryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("group", &self.conn.group())
            .field("state", &self.state)
            .field("error", &self.error)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryStore, TaggedCache};
    use crate::config::{CacheConfig, ProfilerConfig};
    use crate::db::pool::DbPool;
    use crate::profiler::QueryProfiler;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Arc;

    async fn conn() -> Connection {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        Connection::new(
            "test".to_string(),
            DbPool::Sqlite(pool),
            Arc::new(TaggedCache::new(Arc::new(MemoryStore::new()), &CacheConfig::default())),
            Arc::new(QueryProfiler::new(&ProfilerConfig::default())),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_compile_full_select() {
        let conn = conn().await;
        let mut qb = conn.table("users u");
        qb.select(["u.id", "u.name, COUNT(p.id) AS posts"])
            .left_join("posts p", "p.user_id = u.id")
            .where_(("u.active", true))
            .or_where(("u.role", "!=", "guest"))
            .group_by(["u.id", "u.name"])
            .having(("COUNT(p.id)", ">", 2))
            .order_by("u.name", OrderDirection::Desc)
            .limit(10)
            .offset(20);

        assert_eq!(
            qb.compile_select().unwrap(),
            "SELECT u.id, u.name, COUNT(p.id) AS posts FROM users AS u \
             LEFT JOIN posts AS p ON p.user_id = u.id \
             WHERE u.active = :where_u_active_0 OR u.role != :orwhere_u_role_1 \
             GROUP BY u.id, u.name HAVING COUNT(p.id) > :having_count_p_id_2 \
             ORDER BY u.name DESC LIMIT 10 OFFSET 20"
        );
        assert_eq!(qb.params().len(), 3);
        assert_eq!(qb.state().tables(), vec!["users", "posts"]);
    }

    #[tokio::test]
    async fn test_like_and_in_edge_cases() {
        let conn = conn().await;
        let mut qb = conn.table("items");
        qb.like("name", "10%", LikeSide::After)
            .where_in("id", Vec::<i64>::new())
            .or_where_not_in("id", Vec::<i64>::new())
            .where_in("kind", ["a", "b"])
            .where_null("deleted_at");

        assert_eq!(
            qb.compile_select().unwrap(),
            "SELECT * FROM items WHERE name LIKE :like_name_0 ESCAPE '!' AND 1 = 0 OR 1 = 1 \
             AND kind IN (:in_kind_1, :in_kind_2) AND deleted_at IS NULL"
        );
        assert_eq!(qb.params().get("like_name_0"), Some(&SqlValue::from("10!%%")));
    }

    #[tokio::test]
    async fn test_invalid_identifier_surfaces_at_terminal() {
        let conn = conn().await;
        let mut qb = conn.table("users");
        qb.where_(("id = 1 OR 1", 1)).order_by("name", OrderDirection::Asc);
        let err = qb.get().await.unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));

        // the error is consumed with the state
        assert!(qb.compile_select().is_ok());
    }

    #[tokio::test]
    async fn test_reset_keeps_table() {
        let conn = conn().await;
        let mut qb = conn.table("users");
        qb.where_(("id", 1)).limit(3).reset();
        assert_eq!(qb.compile_select().unwrap(), "SELECT * FROM users");
    }

    #[tokio::test]
    async fn test_crud_round() {
        let conn = conn().await;
        conn.statement("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, age INTEGER)")
            .await
            .unwrap();

        let mut users = conn.table("users");
        users
            .insert(crate::values! { "name" => "Ada", "age" => 36 })
            .await
            .unwrap();
        let inserted = users
            .insert_batch(vec![
                crate::values! { "name" => "Grace", "age" => 45 },
                crate::values! { "name" => "Linus", "age" => 28 },
            ])
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        let updated = users
            .where_(("name", "Ada"))
            .update(crate::values! { "age" => 37 })
            .await
            .unwrap();
        assert_eq!(updated, 1);

        let row = users.where_(("name", "Ada")).first().await.unwrap().unwrap();
        assert_eq!(row["age"], 37);

        assert_eq!(users.where_(("age", ">", 30)).count().await.unwrap(), 2);
        assert_eq!(users.where_(("age", "<", 30)).delete().await.unwrap(), 1);
        users.truncate().await.unwrap();
        assert_eq!(users.count().await.unwrap(), 0);
    }
}

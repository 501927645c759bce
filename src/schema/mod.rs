//! Schema compiler: blueprints compiled by dialect grammars and executed on a
//! connection.

pub mod blueprint;
pub mod column;
pub mod grammar;

use std::fmt;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{info, warn};

pub use blueprint::{
    AlterChange, Blueprint, ForeignKeyDefinition, IndexDefinition, IndexKind, Intent, TableOptions,
};
pub use column::{ColumnDefault, ColumnDefinition, ColumnType, GeneratedKind};
pub use grammar::{Grammar, MySqlGrammar, PostgresGrammar, SqliteGrammar, grammar_for};

use crate::db::Connection;
use crate::error::{DbError, DbResult};
use crate::models::{Params, Row};

fn string_column(rows: Vec<Row>, column: &str) -> Vec<String> {
    rows.into_iter()
        .filter_map(|mut row| match row.remove(column) {
            Some(JsonValue::String(s)) => Some(s),
            _ => None,
        })
        .collect()
}

/// Schema operations on one connection.
#[derive(Clone)]
pub struct Schema {
    conn: Connection,
    grammar: Arc<dyn Grammar>,
}

impl Schema {
    pub fn new(conn: Connection) -> Self {
        let grammar = grammar_for(conn.driver());
        Self { conn, grammar }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn grammar(&self) -> &dyn Grammar {
        self.grammar.as_ref()
    }

    /// Compile a blueprint without running it.
    pub fn to_sql(&self, blueprint: &Blueprint) -> DbResult<Vec<String>> {
        match blueprint.intent() {
            Intent::Create => self.grammar.compile_create(blueprint),
            Intent::Alter => self.grammar.compile_alter(blueprint),
        }
    }

    /// Compile and execute a blueprint.
    pub async fn build(&self, blueprint: &Blueprint) -> DbResult<()> {
        let statements = self.to_sql(blueprint)?;
        self.run(blueprint.table(), &statements).await
    }

    async fn run(&self, table: &str, statements: &[String]) -> DbResult<()> {
        for sql in statements {
            self.conn.statement(sql).await?;
        }
        self.conn.cache().flush_table(table).await?;
        Ok(())
    }

    pub async fn create<F>(&self, table: &str, define: F) -> DbResult<()>
    where
        F: FnOnce(&mut Blueprint),
    {
        let mut blueprint = Blueprint::create(table);
        define(&mut blueprint);
        self.build(&blueprint).await?;
        info!(group = %self.conn.group(), table = %table, "Created table");
        Ok(())
    }

    /// Create the table unless it already exists. Returns whether it was
    /// created.
    pub async fn create_if_not_exists<F>(&self, table: &str, define: F) -> DbResult<bool>
    where
        F: FnOnce(&mut Blueprint),
    {
        if self.has_table(table).await? {
            return Ok(false);
        }
        let mut blueprint = Blueprint::create(table);
        blueprint.if_not_exists = true;
        define(&mut blueprint);
        self.build(&blueprint).await?;
        Ok(true)
    }

    /// Alter an existing table.
    pub async fn table<F>(&self, table: &str, define: F) -> DbResult<()>
    where
        F: FnOnce(&mut Blueprint),
    {
        let mut blueprint = Blueprint::alter(table);
        define(&mut blueprint);
        self.build(&blueprint).await
    }

    pub async fn drop(&self, table: &str) -> DbResult<()> {
        let sql = self.grammar.compile_drop(table, false);
        self.run(table, &[sql]).await
    }

    pub async fn drop_if_exists(&self, table: &str) -> DbResult<()> {
        let sql = self.grammar.compile_drop(table, true);
        self.run(table, &[sql]).await
    }

    pub async fn rename(&self, from: &str, to: &str) -> DbResult<()> {
        let sql = self.grammar.compile_rename(from, to);
        self.run(from, &[sql]).await?;
        self.conn.cache().flush_table(to).await?;
        Ok(())
    }

    pub async fn has_table(&self, table: &str) -> DbResult<bool> {
        let params = Params::new().with("table", table)?;
        let row = self
            .conn
            .select_one(self.grammar.table_exists_sql(), &params)
            .await?
            .ok_or_else(|| DbError::internal("Table existence query returned no row"))?;
        Ok(row.get("total").and_then(JsonValue::as_i64).unwrap_or(0) > 0)
    }

    /// Case-insensitive column lookup.
    pub async fn has_column(&self, table: &str, column: &str) -> DbResult<bool> {
        let columns = self.column_listing(table).await?;
        Ok(columns.iter().any(|c| c.eq_ignore_ascii_case(column)))
    }

    pub async fn table_listing(&self) -> DbResult<Vec<String>> {
        let rows = self
            .conn
            .select(self.grammar.table_listing_sql(), &Params::new())
            .await?;
        Ok(string_column(rows, "name"))
    }

    pub async fn column_listing(&self, table: &str) -> DbResult<Vec<String>> {
        let params = Params::new().with("table", table)?;
        let rows = self
            .conn
            .select(self.grammar.column_listing_sql(), &params)
            .await?;
        Ok(string_column(rows, "name"))
    }

    /// Drop every user table and return how many were dropped.
    ///
    /// Statements rejected because of foreign keys are retried after the
    /// others until a pass makes no progress.
    pub async fn drop_all_tables(&self) -> DbResult<usize> {
        let tables = self.table_listing().await?;
        let mut pending = self.grammar.compile_drop_all(&tables);

        while !pending.is_empty() {
            let mut failed = Vec::new();
            let mut last_error = None;
            for sql in pending.iter() {
                if let Err(e) = self.conn.statement(sql).await {
                    last_error = Some(e);
                    failed.push(sql.clone());
                }
            }
            if failed.len() == pending.len() {
                if let Some(e) = last_error {
                    return Err(e);
                }
            }
            if !failed.is_empty() {
                warn!(remaining = failed.len(), "Retrying table drops blocked by dependencies");
            }
            pending = failed;
        }

        let names: Vec<&str> = tables.iter().map(String::as_str).collect();
        self.conn.cache().flush_tables(&names).await?;
        info!(group = %self.conn.group(), tables = tables.len(), "Dropped all tables");
        Ok(tables.len())
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("connection", &self.conn)
            .field("grammar", &self.grammar)
            .finish()
    }
}

//! Dialect grammars for the schema compiler.
//!
//! Column modifiers are compiled in a fixed order: type, nullability,
//! auto-increment, default, on-update, primary, unique, index, comment,
//! charset, collation, generated. A grammar returns `None` from a hook when
//! its dialect cannot express the modifier inline, and emits a follow-up
//! statement instead where one exists.

mod mysql;
mod postgres;
mod sqlite;

pub use mysql::MySqlGrammar;
pub use postgres::PostgresGrammar;
pub use sqlite::SqliteGrammar;

use std::fmt;
use std::sync::Arc;

use crate::error::{DbError, DbResult};
use crate::models::{Driver, SqlValue};

use super::blueprint::{Blueprint, ForeignKeyDefinition, IndexDefinition};
use super::column::{ColumnDefault, ColumnDefinition};

const REFERENTIAL_ACTIONS: &[&str] = &["CASCADE", "SET NULL", "SET DEFAULT", "RESTRICT", "NO ACTION"];

/// The grammar for a driver.
pub fn grammar_for(driver: Driver) -> Arc<dyn Grammar> {
    match driver {
        Driver::MySql => Arc::new(MySqlGrammar),
        Driver::Postgres => Arc::new(PostgresGrammar),
        Driver::Sqlite => Arc::new(SqliteGrammar),
    }
}

pub trait Grammar: fmt::Debug + Send + Sync {
    fn driver(&self) -> Driver;

    /// Quote an identifier.
    fn wrap(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }

    fn wrap_list(&self, identifiers: &[String]) -> String {
        identifiers
            .iter()
            .map(|i| self.wrap(i))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Native type of a column.
    fn type_sql(&self, column: &ColumnDefinition) -> DbResult<String>;

    fn default_literal(&self, value: &SqlValue) -> DbResult<String> {
        match value {
            SqlValue::Bytes(_) => Err(DbError::schema(
                "Binary column defaults are not supported",
                "default",
            )),
            other => Ok(other.to_sql_literal()),
        }
    }

    // ---------------------------------------------------------------
    // Modifier hooks, in compilation order
    // ---------------------------------------------------------------

    fn modify_nullable(&self, column: &ColumnDefinition) -> Option<String> {
        Some(if column.nullable { "NULL" } else { "NOT NULL" }.to_string())
    }

    fn modify_increment(&self, _column: &ColumnDefinition) -> Option<String> {
        None
    }

    fn modify_default(&self, column: &ColumnDefinition) -> DbResult<Option<String>> {
        match &column.default {
            Some(ColumnDefault::Value(value)) => {
                Ok(Some(format!("DEFAULT {}", self.default_literal(value)?)))
            }
            Some(ColumnDefault::Expression(expr)) => Ok(Some(format!("DEFAULT {expr}"))),
            None if column.nullable && column.kind.is_temporal_point() => {
                Ok(Some("DEFAULT NULL".to_string()))
            }
            None => Ok(None),
        }
    }

    fn modify_on_update(&self, _column: &ColumnDefinition) -> Option<String> {
        None
    }

    fn modify_primary(&self, column: &ColumnDefinition) -> Option<String> {
        (column.primary && !column.change).then(|| "PRIMARY KEY".to_string())
    }

    fn modify_unique(&self, column: &ColumnDefinition) -> Option<String> {
        (column.unique && !column.change).then(|| "UNIQUE".to_string())
    }

    /// Column-level indexes compile to separate index commands.
    fn modify_index(&self, _column: &ColumnDefinition) -> Option<String> {
        None
    }

    fn modify_comment(&self, _column: &ColumnDefinition) -> Option<String> {
        None
    }

    fn modify_charset(&self, _column: &ColumnDefinition) -> Option<String> {
        None
    }

    fn modify_collation(&self, column: &ColumnDefinition) -> Option<String> {
        column.collation.as_ref().map(|c| format!("COLLATE {c}"))
    }

    fn modify_generated(&self, column: &ColumnDefinition) -> DbResult<Option<String>>;

    /// Compile a column definition.
    fn compile_column(&self, column: &ColumnDefinition) -> DbResult<String> {
        if column.auto_increment && column.has_static_default() {
            return Err(DbError::schema(
                format!(
                    "Column '{}' cannot be auto-incrementing and have a default value",
                    column.name
                ),
                column.name.clone(),
            ));
        }
        if column.auto_increment && !column.kind.is_integer() {
            return Err(DbError::schema(
                format!("Column '{}' must be an integer to auto-increment", column.name),
                column.name.clone(),
            ));
        }

        let mut parts = vec![self.wrap(&column.name), self.type_sql(column)?];
        let modifiers = [
            self.modify_nullable(column),
            self.modify_increment(column),
            self.modify_default(column)?,
            self.modify_on_update(column),
            self.modify_primary(column),
            self.modify_unique(column),
            self.modify_index(column),
            self.modify_comment(column),
            self.modify_charset(column),
            self.modify_collation(column),
            self.modify_generated(column)?,
        ];
        parts.extend(modifiers.into_iter().flatten());
        Ok(parts.join(" "))
    }

    /// Statements that must follow the table statement for a column.
    fn column_followups(&self, _table: &str, _column: &ColumnDefinition) -> Vec<String> {
        Vec::new()
    }

    /// An index written inside `CREATE TABLE`, or `None` to create it with
    /// [`Grammar::compile_index`] afterwards.
    fn inline_index(&self, table: &str, index: &IndexDefinition) -> DbResult<Option<String>>;

    /// A standalone statement creating an index.
    fn compile_index(&self, table: &str, index: &IndexDefinition) -> DbResult<String>;

    fn compile_foreign(&self, foreign: &ForeignKeyDefinition) -> DbResult<String> {
        if foreign.on.is_empty() {
            return Err(DbError::schema(
                format!("Foreign key '{}' does not name a referenced table", foreign.name),
                foreign.name.clone(),
            ));
        }
        let mut sql = format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
            self.wrap(&foreign.name),
            self.wrap_list(&foreign.columns),
            self.wrap(&foreign.on),
            self.wrap_list(&foreign.references)
        );
        for (clause, action) in [("ON DELETE", &foreign.on_delete), ("ON UPDATE", &foreign.on_update)] {
            if let Some(action) = action {
                if !REFERENTIAL_ACTIONS.contains(&action.as_str()) {
                    return Err(DbError::schema(
                        format!("Unsupported referential action '{action}'"),
                        foreign.name.clone(),
                    ));
                }
                sql.push_str(&format!(" {clause} {action}"));
            }
        }
        Ok(sql)
    }

    /// Trailing table options such as `ENGINE = InnoDB`.
    fn table_options(&self, _blueprint: &Blueprint) -> String {
        String::new()
    }

    /// Compile a create blueprint: the `CREATE TABLE` then any follow-ups.
    fn compile_create(&self, blueprint: &Blueprint) -> DbResult<Vec<String>> {
        let table = blueprint.table();
        let mut elements = Vec::new();
        let mut followups = Vec::new();

        for column in blueprint.columns() {
            elements.push(self.compile_column(column)?);
            followups.extend(self.column_followups(table, column));
        }
        for index in blueprint.indexes() {
            match self.inline_index(table, &index)? {
                Some(sql) => elements.push(sql),
                None => followups.push(self.compile_index(table, &index)?),
            }
        }
        for foreign in blueprint.foreigns() {
            elements.push(self.compile_foreign(foreign)?);
        }
        if elements.is_empty() {
            return Err(DbError::schema(
                format!("Table '{table}' has no columns"),
                table.to_string(),
            ));
        }

        let mut sql = format!(
            "CREATE TABLE {}{} ({})",
            if blueprint.if_not_exists { "IF NOT EXISTS " } else { "" },
            self.wrap(table),
            elements.join(", ")
        );
        sql.push_str(&self.table_options(blueprint));

        let mut statements = vec![sql];
        statements.extend(followups);
        Ok(statements)
    }

    /// Compile an alter blueprint.
    fn compile_alter(&self, blueprint: &Blueprint) -> DbResult<Vec<String>>;

    fn compile_drop(&self, table: &str, if_exists: bool) -> String {
        format!(
            "DROP TABLE {}{}",
            if if_exists { "IF EXISTS " } else { "" },
            self.wrap(table)
        )
    }

    fn compile_rename(&self, from: &str, to: &str) -> String {
        format!("ALTER TABLE {} RENAME TO {}", self.wrap(from), self.wrap(to))
    }

    /// Drop statements for every listed table.
    fn compile_drop_all(&self, tables: &[String]) -> Vec<String> {
        tables.iter().map(|t| self.compile_drop(t, true)).collect()
    }

    /// Count query for a table; binds `:table`, returns column `total`.
    fn table_exists_sql(&self) -> &'static str;

    /// Column names of `:table` in ordinal order, as column `name`.
    fn column_listing_sql(&self) -> &'static str;

    /// User table names, as column `name`.
    fn table_listing_sql(&self) -> &'static str;
}

/// Name of the trigger (and, on PostgreSQL, its function) that refreshes
/// `column` on update.
pub(crate) fn on_update_trigger(table: &str, column: &str) -> String {
    format!("{table}_{column}_on_update")
}

/// Reject an index kind a dialect cannot create.
pub(crate) fn unsupported(driver: Driver, what: &str, object: &str) -> DbError {
    DbError::schema(format!("{driver} does not support {what}"), object.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::blueprint::Blueprint;

    #[test]
    fn test_auto_increment_with_default_is_rejected() {
        let mut bp = Blueprint::create("t");
        bp.increments("id").default(5);
        for driver in [Driver::MySql, Driver::Postgres, Driver::Sqlite] {
            let err = grammar_for(driver).compile_create(&bp).unwrap_err();
            assert!(matches!(err, DbError::Schema { .. }), "{driver}");
        }
    }

    #[test]
    fn test_nullable_timestamp_defaults_to_null() {
        let mut bp = Blueprint::create("t");
        bp.timestamp("seen_at").nullable();
        let sql = grammar_for(Driver::Sqlite).compile_create(&bp).unwrap();
        assert_eq!(sql, vec![r#"CREATE TABLE "t" ("seen_at" DATETIME NULL DEFAULT NULL)"#]);
    }

    #[test]
    fn test_unknown_referential_action() {
        let mut bp = Blueprint::create("posts");
        bp.foreign_id("user_id");
        bp.foreign(["user_id"]).on("users").on_delete("explode");
        assert!(grammar_for(Driver::MySql).compile_create(&bp).is_err());
    }

    #[test]
    fn test_quote_escaping() {
        let grammar = grammar_for(Driver::Postgres);
        assert_eq!(grammar.wrap(r#"we"ird"#), r#""we""ird""#);
        assert_eq!(grammar_for(Driver::MySql).wrap("we`ird"), "`we``ird`");
    }
}

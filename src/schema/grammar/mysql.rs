use crate::error::DbResult;
use crate::models::Driver;
use crate::schema::blueprint::{AlterChange, Blueprint, IndexDefinition, IndexKind};
use crate::schema::column::{ColumnDefinition, ColumnType, GeneratedKind};

use super::Grammar;

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlGrammar;

impl MySqlGrammar {
    fn index_body(&self, index: &IndexDefinition) -> String {
        let columns = self.wrap_list(&index.columns);
        match index.kind {
            IndexKind::Primary => format!("PRIMARY KEY ({columns})"),
            IndexKind::Unique => format!("UNIQUE KEY {} ({columns})", self.wrap(&index.name)),
            IndexKind::Index => format!("INDEX {} ({columns})", self.wrap(&index.name)),
            IndexKind::Fulltext => format!("FULLTEXT {} ({columns})", self.wrap(&index.name)),
        }
    }
}

impl Grammar for MySqlGrammar {
    fn driver(&self) -> Driver {
        Driver::MySql
    }

    fn wrap(&self, identifier: &str) -> String {
        format!("`{}`", identifier.replace('`', "``"))
    }

    fn type_sql(&self, column: &ColumnDefinition) -> DbResult<String> {
        let base = match &column.kind {
            ColumnType::Char(n) => format!("CHAR({n})"),
            ColumnType::String(n) => format!("VARCHAR({n})"),
            ColumnType::Text => "TEXT".into(),
            ColumnType::MediumText => "MEDIUMTEXT".into(),
            ColumnType::LongText => "LONGTEXT".into(),
            ColumnType::TinyInteger => "TINYINT".into(),
            ColumnType::SmallInteger => "SMALLINT".into(),
            ColumnType::MediumInteger => "MEDIUMINT".into(),
            ColumnType::Integer => "INT".into(),
            ColumnType::BigInteger => "BIGINT".into(),
            ColumnType::Decimal { precision, scale } => format!("DECIMAL({precision}, {scale})"),
            ColumnType::Float => "FLOAT".into(),
            ColumnType::Double => "DOUBLE".into(),
            ColumnType::Boolean => "TINYINT(1)".into(),
            ColumnType::Json => "JSON".into(),
            ColumnType::Enum(allowed) => format!(
                "ENUM({})",
                allowed.iter().map(|v| quote(v)).collect::<Vec<_>>().join(", ")
            ),
            ColumnType::Date => "DATE".into(),
            ColumnType::DateTime => "DATETIME".into(),
            ColumnType::Time => "TIME".into(),
            ColumnType::Timestamp => "TIMESTAMP".into(),
            ColumnType::Year => "YEAR".into(),
            ColumnType::Binary => "BLOB".into(),
            ColumnType::Uuid => "CHAR(36)".into(),
        };
        let numeric = column.kind.is_integer()
            || matches!(
                column.kind,
                ColumnType::Decimal { .. } | ColumnType::Float | ColumnType::Double
            );
        let mut sql = base;
        if column.unsigned && numeric {
            sql.push_str(" UNSIGNED");
        }
        // MySQL wants charset and generation directly after the type.
        if let Some(charset) = &column.charset {
            sql.push_str(&format!(" CHARACTER SET {charset}"));
        }
        if let Some((expr, kind)) = &column.generated {
            let storage = match kind {
                GeneratedKind::Stored => "STORED",
                GeneratedKind::Virtual => "VIRTUAL",
            };
            sql.push_str(&format!(" GENERATED ALWAYS AS ({expr}) {storage}"));
        }
        Ok(sql)
    }

    fn modify_increment(&self, column: &ColumnDefinition) -> Option<String> {
        column.auto_increment.then(|| "AUTO_INCREMENT".to_string())
    }

    fn modify_on_update(&self, column: &ColumnDefinition) -> Option<String> {
        (column.use_current_on_update && column.kind.is_temporal_point())
            .then(|| "ON UPDATE CURRENT_TIMESTAMP".to_string())
    }

    fn modify_comment(&self, column: &ColumnDefinition) -> Option<String> {
        column.comment.as_ref().map(|c| format!("COMMENT {}", quote(c)))
    }

    fn modify_generated(&self, _column: &ColumnDefinition) -> DbResult<Option<String>> {
        Ok(None)
    }

    fn inline_index(&self, _table: &str, index: &IndexDefinition) -> DbResult<Option<String>> {
        Ok(Some(self.index_body(index)))
    }

    fn compile_index(&self, table: &str, index: &IndexDefinition) -> DbResult<String> {
        Ok(format!("ALTER TABLE {} ADD {}", self.wrap(table), self.index_body(index)))
    }

    fn table_options(&self, blueprint: &Blueprint) -> String {
        let options = blueprint.options();
        let mut sql = String::new();
        if let Some(engine) = &options.engine {
            sql.push_str(&format!(" ENGINE = {engine}"));
        }
        if let Some(charset) = &options.charset {
            sql.push_str(&format!(" DEFAULT CHARACTER SET = {charset}"));
        }
        if let Some(collation) = &options.collation {
            sql.push_str(&format!(" COLLATE = {collation}"));
        }
        sql
    }

    fn compile_alter(&self, blueprint: &Blueprint) -> DbResult<Vec<String>> {
        let mut clauses = Vec::new();

        for change in blueprint.changes() {
            clauses.push(match change {
                AlterChange::RenameColumn { from, to } => {
                    format!("RENAME COLUMN {} TO {}", self.wrap(from), self.wrap(to))
                }
                AlterChange::DropColumn(column) => format!("DROP COLUMN {}", self.wrap(column)),
                AlterChange::DropIndex(name) | AlterChange::DropUnique(name) => {
                    format!("DROP INDEX {}", self.wrap(name))
                }
                AlterChange::DropPrimary(_) => "DROP PRIMARY KEY".to_string(),
                AlterChange::DropForeign(name) => format!("DROP FOREIGN KEY {}", self.wrap(name)),
            });
        }
        for column in blueprint.columns() {
            let verb = if column.change { "MODIFY COLUMN" } else { "ADD COLUMN" };
            clauses.push(format!("{verb} {}", self.compile_column(column)?));
        }
        for index in blueprint.indexes() {
            clauses.push(format!("ADD {}", self.index_body(&index)));
        }
        for foreign in blueprint.foreigns() {
            clauses.push(format!("ADD {}", self.compile_foreign(foreign)?));
        }

        if clauses.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![format!(
            "ALTER TABLE {} {}",
            self.wrap(blueprint.table()),
            clauses.join(", ")
        )])
    }

    fn compile_rename(&self, from: &str, to: &str) -> String {
        format!("RENAME TABLE {} TO {}", self.wrap(from), self.wrap(to))
    }

    fn table_exists_sql(&self) -> &'static str {
        "SELECT COUNT(*) AS total FROM information_schema.tables \
         WHERE table_schema = DATABASE() AND table_name = :table AND table_type = 'BASE TABLE'"
    }

    fn column_listing_sql(&self) -> &'static str {
        "SELECT CAST(column_name AS CHAR) AS name FROM information_schema.columns \
         WHERE table_schema = DATABASE() AND table_name = :table ORDER BY ordinal_position"
    }

    fn table_listing_sql(&self) -> &'static str {
        "SELECT CAST(table_name AS CHAR) AS name FROM information_schema.tables \
         WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE' ORDER BY table_name"
    }
}

use crate::error::{DbError, DbResult};
use crate::models::{Driver, SqlValue};
use crate::schema::blueprint::{AlterChange, Blueprint, IndexDefinition, IndexKind};
use crate::schema::column::{ColumnDefault, ColumnDefinition, ColumnType, GeneratedKind};

use super::{Grammar, on_update_trigger, unsupported};

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresGrammar;

impl PostgresGrammar {
    /// The type without inline constraints, as `ALTER COLUMN .. TYPE` needs it.
    fn bare_type(&self, column: &ColumnDefinition) -> String {
        let serial = column.auto_increment && !column.change;
        match &column.kind {
            ColumnType::Char(n) => format!("CHAR({n})"),
            ColumnType::String(n) => format!("VARCHAR({n})"),
            ColumnType::Text | ColumnType::MediumText | ColumnType::LongText => "TEXT".into(),
            ColumnType::TinyInteger | ColumnType::SmallInteger if serial => "SMALLSERIAL".into(),
            ColumnType::TinyInteger | ColumnType::SmallInteger => "SMALLINT".into(),
            ColumnType::MediumInteger | ColumnType::Integer if serial => "SERIAL".into(),
            ColumnType::MediumInteger | ColumnType::Integer => "INTEGER".into(),
            ColumnType::BigInteger if serial => "BIGSERIAL".into(),
            ColumnType::BigInteger => "BIGINT".into(),
            ColumnType::Decimal { precision, scale } => format!("DECIMAL({precision}, {scale})"),
            ColumnType::Float => "REAL".into(),
            ColumnType::Double => "DOUBLE PRECISION".into(),
            ColumnType::Boolean => "BOOLEAN".into(),
            ColumnType::Json => "JSONB".into(),
            ColumnType::Enum(_) => "VARCHAR(255)".into(),
            ColumnType::Date => "DATE".into(),
            ColumnType::DateTime | ColumnType::Timestamp => "TIMESTAMP(0) WITHOUT TIME ZONE".into(),
            ColumnType::Time => "TIME(0) WITHOUT TIME ZONE".into(),
            ColumnType::Year => "INTEGER".into(),
            ColumnType::Binary => "BYTEA".into(),
            ColumnType::Uuid => "UUID".into(),
        }
    }

    fn alter_column_clauses(&self, column: &ColumnDefinition) -> DbResult<Vec<String>> {
        let name = self.wrap(&column.name);
        let mut clauses = vec![format!(
            "ALTER COLUMN {name} TYPE {}",
            self.bare_type(column)
        )];
        clauses.push(format!(
            "ALTER COLUMN {name} {}",
            if column.nullable { "DROP NOT NULL" } else { "SET NOT NULL" }
        ));
        clauses.push(match &column.default {
            Some(ColumnDefault::Value(value)) => {
                format!("ALTER COLUMN {name} SET DEFAULT {}", self.default_literal(value)?)
            }
            Some(ColumnDefault::Expression(expr)) => format!("ALTER COLUMN {name} SET DEFAULT {expr}"),
            None => format!("ALTER COLUMN {name} DROP DEFAULT"),
        });
        Ok(clauses)
    }
}

impl Grammar for PostgresGrammar {
    fn driver(&self) -> Driver {
        Driver::Postgres
    }

    fn type_sql(&self, column: &ColumnDefinition) -> DbResult<String> {
        let mut sql = self.bare_type(column);
        // COLLATE must directly follow the type.
        if let Some(collation) = &column.collation {
            sql.push_str(&format!(" COLLATE {}", self.wrap(collation)));
        }
        if let ColumnType::Enum(allowed) = &column.kind {
            sql.push_str(&format!(
                " CHECK ({} IN ({}))",
                self.wrap(&column.name),
                allowed.iter().map(|v| quote(v)).collect::<Vec<_>>().join(", ")
            ));
        }
        Ok(sql)
    }

    fn default_literal(&self, value: &SqlValue) -> DbResult<String> {
        match value {
            SqlValue::Bool(b) => Ok(if *b { "TRUE" } else { "FALSE" }.to_string()),
            SqlValue::Bytes(_) => Err(DbError::schema(
                "Binary column defaults are not supported",
                "default",
            )),
            other => Ok(other.to_sql_literal()),
        }
    }

    fn modify_collation(&self, _column: &ColumnDefinition) -> Option<String> {
        None
    }

    fn modify_generated(&self, column: &ColumnDefinition) -> DbResult<Option<String>> {
        match &column.generated {
            Some((expr, GeneratedKind::Stored)) => {
                Ok(Some(format!("GENERATED ALWAYS AS ({expr}) STORED")))
            }
            Some((_, GeneratedKind::Virtual)) => Err(unsupported(
                Driver::Postgres,
                "virtual generated columns",
                &column.name,
            )),
            None => Ok(None),
        }
    }

    fn column_followups(&self, table: &str, column: &ColumnDefinition) -> Vec<String> {
        let mut statements: Vec<String> = column
            .comment
            .iter()
            .map(|comment| {
                format!(
                    "COMMENT ON COLUMN {}.{} IS {}",
                    self.wrap(table),
                    self.wrap(&column.name),
                    quote(comment)
                )
            })
            .collect();

        // BEFORE UPDATE trigger; an explicit new value in the UPDATE wins
        if column.use_current_on_update && column.kind.is_temporal_point() {
            let trigger = self.wrap(&on_update_trigger(table, &column.name));
            let name = self.wrap(&column.name);
            statements.push(format!(
                "CREATE OR REPLACE FUNCTION {trigger}() RETURNS trigger AS $$ \
                 BEGIN NEW.{name} = CURRENT_TIMESTAMP; RETURN NEW; END; $$ LANGUAGE plpgsql"
            ));
            statements.push(format!(
                "CREATE TRIGGER {trigger} BEFORE UPDATE ON {} FOR EACH ROW \
                 WHEN (NEW.{name} IS NOT DISTINCT FROM OLD.{name}) EXECUTE FUNCTION {trigger}()",
                self.wrap(table)
            ));
        }
        statements
    }

    fn inline_index(&self, _table: &str, index: &IndexDefinition) -> DbResult<Option<String>> {
        let columns = self.wrap_list(&index.columns);
        Ok(match index.kind {
            IndexKind::Primary => Some(format!("PRIMARY KEY ({columns})")),
            IndexKind::Unique => Some(format!(
                "CONSTRAINT {} UNIQUE ({columns})",
                self.wrap(&index.name)
            )),
            IndexKind::Index | IndexKind::Fulltext => None,
        })
    }

    fn compile_index(&self, table: &str, index: &IndexDefinition) -> DbResult<String> {
        let table = self.wrap(table);
        let name = self.wrap(&index.name);
        let columns = self.wrap_list(&index.columns);
        Ok(match index.kind {
            IndexKind::Primary => format!("ALTER TABLE {table} ADD PRIMARY KEY ({columns})"),
            IndexKind::Unique => {
                format!("ALTER TABLE {table} ADD CONSTRAINT {name} UNIQUE ({columns})")
            }
            IndexKind::Index => format!("CREATE INDEX {name} ON {table} ({columns})"),
            IndexKind::Fulltext => {
                let document = index
                    .columns
                    .iter()
                    .map(|c| format!("to_tsvector('english', {})", self.wrap(c)))
                    .collect::<Vec<_>>()
                    .join(" || ");
                format!("CREATE INDEX {name} ON {table} USING gin (({document}))")
            }
        })
    }

    fn compile_alter(&self, blueprint: &Blueprint) -> DbResult<Vec<String>> {
        let table = blueprint.table();
        let wrapped = self.wrap(table);
        let mut before = Vec::new();
        let mut clauses = Vec::new();
        let mut after = Vec::new();

        for change in blueprint.changes() {
            match change {
                // RENAME cannot share an ALTER TABLE with other actions.
                AlterChange::RenameColumn { from, to } => before.push(format!(
                    "ALTER TABLE {wrapped} RENAME COLUMN {} TO {}",
                    self.wrap(from),
                    self.wrap(to)
                )),
                AlterChange::DropIndex(name) => before.push(format!("DROP INDEX {}", self.wrap(name))),
                AlterChange::DropColumn(column) => {
                    let trigger = self.wrap(&on_update_trigger(table, column));
                    before.push(format!("DROP TRIGGER IF EXISTS {trigger} ON {wrapped}"));
                    clauses.push(format!("DROP COLUMN {}", self.wrap(column)));
                    after.push(format!("DROP FUNCTION IF EXISTS {trigger}()"));
                }
                AlterChange::DropUnique(name) | AlterChange::DropForeign(name) => {
                    clauses.push(format!("DROP CONSTRAINT {}", self.wrap(name)))
                }
                AlterChange::DropPrimary(name) => {
                    let name = name.clone().unwrap_or_else(|| format!("{table}_pkey"));
                    clauses.push(format!("DROP CONSTRAINT {}", self.wrap(&name)))
                }
            }
        }
        for column in blueprint.columns() {
            if column.change {
                clauses.extend(self.alter_column_clauses(column)?);
            } else {
                clauses.push(format!("ADD COLUMN {}", self.compile_column(column)?));
            }
            after.extend(self.column_followups(table, column));
        }
        for index in blueprint.indexes() {
            match self.inline_index(table, &index)? {
                Some(sql) => clauses.push(format!("ADD {sql}")),
                None => after.push(self.compile_index(table, &index)?),
            }
        }
        for foreign in blueprint.foreigns() {
            clauses.push(format!("ADD {}", self.compile_foreign(foreign)?));
        }

        let mut statements = before;
        if !clauses.is_empty() {
            statements.push(format!("ALTER TABLE {wrapped} {}", clauses.join(", ")));
        }
        statements.extend(after);
        Ok(statements)
    }

    fn compile_drop_all(&self, tables: &[String]) -> Vec<String> {
        if tables.is_empty() {
            return Vec::new();
        }
        vec![format!("DROP TABLE IF EXISTS {} CASCADE", self.wrap_list(tables))]
    }

    fn table_exists_sql(&self) -> &'static str {
        "SELECT COUNT(*) AS total FROM information_schema.tables \
         WHERE table_schema = current_schema() AND table_name = :table AND table_type = 'BASE TABLE'"
    }

    fn column_listing_sql(&self) -> &'static str {
        "SELECT column_name::text AS name FROM information_schema.columns \
         WHERE table_schema = current_schema() AND table_name = :table ORDER BY ordinal_position"
    }

    fn table_listing_sql(&self) -> &'static str {
        "SELECT table_name::text AS name FROM information_schema.tables \
         WHERE table_schema = current_schema() AND table_type = 'BASE TABLE' ORDER BY table_name"
    }
}

use crate::error::{DbError, DbResult};
use crate::models::Driver;
use crate::schema::blueprint::{AlterChange, Blueprint, IndexDefinition, IndexKind};
use crate::schema::column::{ColumnDefault, ColumnDefinition, ColumnType, GeneratedKind};

use super::{Grammar, on_update_trigger, unsupported};

fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn is_time_function(expr: &str) -> bool {
    ["CURRENT_TIMESTAMP", "CURRENT_DATE", "CURRENT_TIME"]
        .iter()
        .any(|f| expr.trim().eq_ignore_ascii_case(f))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteGrammar;

impl Grammar for SqliteGrammar {
    fn driver(&self) -> Driver {
        Driver::Sqlite
    }

    fn type_sql(&self, column: &ColumnDefinition) -> DbResult<String> {
        Ok(match &column.kind {
            // AUTOINCREMENT is only valid on an INTEGER PRIMARY KEY.
            ColumnType::TinyInteger
            | ColumnType::SmallInteger
            | ColumnType::MediumInteger
            | ColumnType::Integer
            | ColumnType::BigInteger
            | ColumnType::Year => "INTEGER".into(),
            ColumnType::Char(_) | ColumnType::String(_) => "VARCHAR".into(),
            ColumnType::Text | ColumnType::MediumText | ColumnType::LongText => "TEXT".into(),
            ColumnType::Decimal { .. } => "NUMERIC".into(),
            ColumnType::Float => "FLOAT".into(),
            ColumnType::Double => "DOUBLE".into(),
            ColumnType::Boolean => "TINYINT(1)".into(),
            ColumnType::Json => "TEXT".into(),
            ColumnType::Enum(allowed) => format!(
                "VARCHAR CHECK ({} IN ({}))",
                self.wrap(&column.name),
                allowed.iter().map(|v| quote(v)).collect::<Vec<_>>().join(", ")
            ),
            ColumnType::Date => "DATE".into(),
            ColumnType::DateTime | ColumnType::Timestamp => "DATETIME".into(),
            ColumnType::Time => "TIME".into(),
            ColumnType::Binary => "BLOB".into(),
            ColumnType::Uuid => "VARCHAR(36)".into(),
        })
    }

    fn modify_increment(&self, column: &ColumnDefinition) -> Option<String> {
        column
            .auto_increment
            .then(|| "PRIMARY KEY AUTOINCREMENT".to_string())
    }

    fn modify_primary(&self, column: &ColumnDefinition) -> Option<String> {
        (column.primary && !column.auto_increment && !column.change)
            .then(|| "PRIMARY KEY".to_string())
    }

    fn modify_generated(&self, column: &ColumnDefinition) -> DbResult<Option<String>> {
        Ok(column.generated.as_ref().map(|(expr, kind)| {
            let storage = match kind {
                GeneratedKind::Stored => "STORED",
                GeneratedKind::Virtual => "VIRTUAL",
            };
            format!("GENERATED ALWAYS AS ({expr}) {storage}")
        }))
    }

    /// `AFTER UPDATE` trigger for `use_current_on_update`; an explicit new
    /// value in the UPDATE wins.
    fn column_followups(&self, table: &str, column: &ColumnDefinition) -> Vec<String> {
        if !(column.use_current_on_update && column.kind.is_temporal_point()) {
            return Vec::new();
        }
        let name = self.wrap(&column.name);
        vec![format!(
            "CREATE TRIGGER {} AFTER UPDATE ON {table} FOR EACH ROW WHEN NEW.{name} IS OLD.{name} \
             BEGIN UPDATE {table} SET {name} = CURRENT_TIMESTAMP WHERE rowid = NEW.rowid; END",
            self.wrap(&on_update_trigger(table, &column.name)),
            table = self.wrap(table),
        )]
    }

    fn inline_index(&self, table: &str, index: &IndexDefinition) -> DbResult<Option<String>> {
        match index.kind {
            IndexKind::Primary => Ok(Some(format!(
                "PRIMARY KEY ({})",
                self.wrap_list(&index.columns)
            ))),
            IndexKind::Fulltext => Err(unsupported(Driver::Sqlite, "fulltext indexes", table)),
            IndexKind::Unique | IndexKind::Index => Ok(None),
        }
    }

    fn compile_index(&self, table: &str, index: &IndexDefinition) -> DbResult<String> {
        let unique = match index.kind {
            IndexKind::Unique => "UNIQUE ",
            IndexKind::Index => "",
            IndexKind::Primary => {
                return Err(unsupported(
                    Driver::Sqlite,
                    "adding a primary key to an existing table",
                    table,
                ));
            }
            IndexKind::Fulltext => {
                return Err(unsupported(Driver::Sqlite, "fulltext indexes", table));
            }
        };
        Ok(format!(
            "CREATE {unique}INDEX {} ON {} ({})",
            self.wrap(&index.name),
            self.wrap(table),
            self.wrap_list(&index.columns)
        ))
    }

    /// One statement per clause; SQLite cannot alter several things at once.
    fn compile_alter(&self, blueprint: &Blueprint) -> DbResult<Vec<String>> {
        let table = blueprint.table();
        let wrapped = self.wrap(table);
        let mut statements = Vec::new();
        let mut followups = Vec::new();

        for change in blueprint.changes() {
            let sql = match change {
                AlterChange::RenameColumn { from, to } => format!(
                    "ALTER TABLE {wrapped} RENAME COLUMN {} TO {}",
                    self.wrap(from),
                    self.wrap(to)
                ),
                AlterChange::DropColumn(column) => {
                    // a trigger naming the column blocks DROP COLUMN
                    statements.push(format!(
                        "DROP TRIGGER IF EXISTS {}",
                        self.wrap(&on_update_trigger(table, column))
                    ));
                    format!("ALTER TABLE {wrapped} DROP COLUMN {}", self.wrap(column))
                }
                AlterChange::DropIndex(name) | AlterChange::DropUnique(name) => {
                    format!("DROP INDEX {}", self.wrap(name))
                }
                AlterChange::DropPrimary(_) => {
                    return Err(unsupported(Driver::Sqlite, "dropping a primary key", table));
                }
                AlterChange::DropForeign(_) => {
                    return Err(unsupported(Driver::Sqlite, "dropping a foreign key", table));
                }
            };
            statements.push(sql);
        }

        for column in blueprint.columns() {
            if column.change {
                return Err(unsupported(Driver::Sqlite, "modifying columns", &column.name));
            }
            if column.primary || column.unique || column.auto_increment {
                return Err(DbError::schema(
                    format!(
                        "SQLite cannot add PRIMARY KEY or UNIQUE column '{}'; add an index instead",
                        column.name
                    ),
                    column.name.clone(),
                ));
            }
            if !column.nullable && column.default.is_none() && column.generated.is_none() {
                return Err(DbError::schema(
                    format!(
                        "SQLite cannot add NOT NULL column '{}' without a default",
                        column.name
                    ),
                    column.name.clone(),
                ));
            }
            if let Some(ColumnDefault::Expression(expr)) = &column.default {
                if is_time_function(expr) {
                    return Err(DbError::schema(
                        format!(
                            "SQLite cannot add column '{}' with a non-constant default",
                            column.name
                        ),
                        column.name.clone(),
                    ));
                }
            }
            statements.push(format!(
                "ALTER TABLE {wrapped} ADD COLUMN {}",
                self.compile_column(column)?
            ));
            followups.extend(self.column_followups(table, column));
        }
        statements.extend(followups);

        for index in blueprint.indexes() {
            statements.push(self.compile_index(table, &index)?);
        }
        if !blueprint.foreigns().is_empty() {
            return Err(unsupported(
                Driver::Sqlite,
                "adding foreign keys to an existing table",
                table,
            ));
        }
        Ok(statements)
    }

    fn table_exists_sql(&self) -> &'static str {
        "SELECT COUNT(*) AS total FROM sqlite_master WHERE type = 'table' AND name = :table"
    }

    fn column_listing_sql(&self) -> &'static str {
        "SELECT name FROM pragma_table_info(:table) ORDER BY cid"
    }

    fn table_listing_sql(&self) -> &'static str {
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_with_index_followups() {
        let mut bp = Blueprint::create("users");
        bp.id();
        bp.string("email", 191);
        bp.string("name", 100).index();
        bp.unique(["email"]);

        let sql = SqliteGrammar.compile_create(&bp).unwrap();
        assert_eq!(
            sql,
            vec![
                "CREATE TABLE \"users\" (\
                 \"id\" INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT, \
                 \"email\" VARCHAR NOT NULL, \
                 \"name\" VARCHAR NOT NULL)",
                "CREATE UNIQUE INDEX \"users_email_unique\" ON \"users\" (\"email\")",
                "CREATE INDEX \"users_name_index\" ON \"users\" (\"name\")",
            ]
        );
    }

    #[test]
    fn test_composite_primary_and_foreign() {
        let mut bp = Blueprint::create("role_user");
        bp.foreign_id("role_id");
        bp.foreign_id("user_id");
        bp.primary(["role_id", "user_id"]);
        bp.foreign(["user_id"]).on("users").on_delete("cascade");
        let sql = SqliteGrammar.compile_create(&bp).unwrap();
        assert_eq!(
            sql[0],
            "CREATE TABLE \"role_user\" (\
             \"role_id\" INTEGER NOT NULL, \
             \"user_id\" INTEGER NOT NULL, \
             PRIMARY KEY (\"role_id\", \"user_id\"), \
             CONSTRAINT \"role_user_user_id_foreign\" FOREIGN KEY (\"user_id\") REFERENCES \"users\" (\"id\") ON DELETE CASCADE)"
        );
    }

    #[test]
    fn test_alter_emits_one_statement_per_clause() {
        let mut bp = Blueprint::alter("users");
        bp.rename_column("name", "full_name");
        bp.drop_soft_deletes();
        bp.string("nickname", 50).nullable();
        bp.index(["nickname"]);

        let sql = SqliteGrammar.compile_alter(&bp).unwrap();
        assert_eq!(
            sql,
            vec![
                "ALTER TABLE \"users\" RENAME COLUMN \"name\" TO \"full_name\"",
                "DROP TRIGGER IF EXISTS \"users_deleted_at_on_update\"",
                "ALTER TABLE \"users\" DROP COLUMN \"deleted_at\"",
                "ALTER TABLE \"users\" ADD COLUMN \"nickname\" VARCHAR NULL",
                "CREATE INDEX \"users_nickname_index\" ON \"users\" (\"nickname\")",
            ]
        );
    }

    #[test]
    fn test_timestamps_refresh_through_a_trigger() {
        let mut bp = Blueprint::create("posts");
        bp.timestamps();
        let sql = SqliteGrammar.compile_create(&bp).unwrap();
        assert_eq!(
            sql,
            vec![
                "CREATE TABLE \"posts\" (\
                 \"created_at\" DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP, \
                 \"updated_at\" DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP)",
                "CREATE TRIGGER \"posts_updated_at_on_update\" AFTER UPDATE ON \"posts\" \
                 FOR EACH ROW WHEN NEW.\"updated_at\" IS OLD.\"updated_at\" \
                 BEGIN UPDATE \"posts\" SET \"updated_at\" = CURRENT_TIMESTAMP \
                 WHERE rowid = NEW.rowid; END",
            ]
        );

        // ADD COLUMN only takes constant defaults
        let mut alter = Blueprint::alter("posts");
        alter.timestamps();
        assert!(matches!(
            SqliteGrammar.compile_alter(&alter),
            Err(DbError::Schema { .. })
        ));
    }

    #[test]
    fn test_unsupported_alters() {
        let mut modify = Blueprint::alter("users");
        modify.integer("score").change();
        assert!(SqliteGrammar.compile_alter(&modify).is_err());

        let mut drop_primary = Blueprint::alter("users");
        drop_primary.drop_primary(None);
        assert!(SqliteGrammar.compile_alter(&drop_primary).is_err());

        let mut drop_foreign = Blueprint::alter("users");
        drop_foreign.drop_foreign("users_team_id_foreign");
        assert!(SqliteGrammar.compile_alter(&drop_foreign).is_err());

        let mut fulltext = Blueprint::create("posts");
        fulltext.text("body");
        fulltext.fulltext(["body"]);
        assert!(SqliteGrammar.compile_create(&fulltext).is_err());
    }
}

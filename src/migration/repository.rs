//! The `migrations` bookkeeping table.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::db::Connection;
use crate::error::DbResult;
use crate::models::{Row, SqlValue};
use crate::query::OrderDirection;
use crate::values;

pub const DEFAULT_TABLE: &str = "migrations";

/// One executed migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRecord {
    pub migration: String,
    pub batch: i64,
    pub executed_at: Option<String>,
}

impl MigrationRecord {
    fn from_row(row: &Row) -> Option<Self> {
        let migration = row.get("migration")?.as_str()?.to_string();
        let batch = match row.get("batch")? {
            JsonValue::Number(n) => n.as_i64()?,
            JsonValue::String(s) => s.parse().ok()?,
            _ => return None,
        };
        let executed_at = match row.get("executed_at") {
            Some(JsonValue::String(s)) => Some(s.clone()),
            Some(JsonValue::Null) | None => None,
            Some(other) => Some(other.to_string()),
        };
        Some(Self {
            migration,
            batch,
            executed_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct MigrationRepository {
    conn: Connection,
    table: String,
}

impl MigrationRepository {
    pub fn new(conn: Connection) -> Self {
        Self::with_table(conn, DEFAULT_TABLE)
    }

    pub fn with_table(conn: Connection, table: impl Into<String>) -> Self {
        Self {
            conn,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the bookkeeping table if it is missing.
    pub async fn ensure_table(&self) -> DbResult<()> {
        self.conn
            .schema()
            .create_if_not_exists(&self.table, |table| {
                table.id();
                table.string("migration", 191).unique();
                table.integer("batch");
                table.date_time("executed_at").nullable();
            })
            .await?;
        Ok(())
    }

    pub async fn exists(&self) -> DbResult<bool> {
        self.conn.schema().has_table(&self.table).await
    }

    /// Every executed migration, by batch then name.
    pub async fn executed(&self) -> DbResult<Vec<MigrationRecord>> {
        let rows = self
            .conn
            .table(&self.table)
            .select(["migration", "batch", "executed_at"])
            .order_by("batch", OrderDirection::Asc)
            .order_by("migration", OrderDirection::Asc)
            .no_cache()
            .get()
            .await?;
        Ok(rows.iter().filter_map(MigrationRecord::from_row).collect())
    }

    /// Highest batch number, 0 when nothing has run.
    pub async fn last_batch(&self) -> DbResult<i64> {
        let row = self
            .conn
            .table(&self.table)
            .select(["MAX(batch) AS batch"])
            .no_cache()
            .first()
            .await?;
        Ok(row
            .and_then(|r| r.get("batch").and_then(JsonValue::as_i64))
            .unwrap_or(0))
    }

    /// Records of the latest batch, newest name first.
    pub async fn last_batch_records(&self) -> DbResult<Vec<MigrationRecord>> {
        let batch = self.last_batch().await?;
        if batch == 0 {
            return Ok(Vec::new());
        }
        let rows = self
            .conn
            .table(&self.table)
            .select(["migration", "batch", "executed_at"])
            .where_(("batch", batch))
            .order_by("migration", OrderDirection::Desc)
            .no_cache()
            .get()
            .await?;
        Ok(rows.iter().filter_map(MigrationRecord::from_row).collect())
    }

    pub async fn log(&self, migration: &str, batch: i64) -> DbResult<()> {
        self.conn
            .table(&self.table)
            .insert(values! {
                "migration" => migration,
                "batch" => batch,
                "executed_at" => SqlValue::DateTime(Utc::now().naive_utc()),
            })
            .await?;
        Ok(())
    }

    pub async fn delete(&self, migration: &str) -> DbResult<u64> {
        self.conn
            .table(&self.table)
            .where_(("migration", migration))
            .delete()
            .await
    }
}

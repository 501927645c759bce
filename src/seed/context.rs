use crate::db::{Connection, ExecOutcome};
use crate::error::DbResult;
use crate::models::Values;
use crate::query::{Condition, QueryBuilder};
use crate::schema::Schema;

use super::faker::Faker;

/// What a seeder works with: a transaction-bound connection and a faker.
#[derive(Debug)]
pub struct SeedContext {
    conn: Connection,
    faker: Faker,
}

impl SeedContext {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            faker: Faker::new(),
        }
    }

    pub fn with_faker(conn: Connection, faker: Faker) -> Self {
        Self { conn, faker }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn schema(&self) -> Schema {
        self.conn.schema()
    }

    pub fn table(&self, table: &str) -> QueryBuilder {
        self.conn.table(table)
    }

    pub fn fake(&self) -> &Faker {
        &self.faker
    }

    pub async fn truncate(&self, table: &str) -> DbResult<()> {
        self.conn.table(table).truncate().await
    }

    pub async fn insert(&self, table: &str, values: Values) -> DbResult<ExecOutcome> {
        self.conn.table(table).insert(values).await
    }

    pub async fn insert_bulk(&self, table: &str, rows: Vec<Values>) -> DbResult<u64> {
        self.conn.table(table).insert_batch(rows).await
    }

    /// Delete the rows matching `condition`.
    pub async fn delete(&self, table: &str, condition: impl Into<Condition>) -> DbResult<u64> {
        self.conn.table(table).where_(condition).delete().await
    }
}

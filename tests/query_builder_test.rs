//! Integration tests for the query builder against SQLite.
//!
//! Tests verify that:
//! - Placeholders stay unique when a column is filtered more than once
//! - UPDATE and DELETE without a restricting predicate never reach the database
//! - Counting a grouped query counts groups
//! - Inserts, updates and deletes round-trip through a real database

use std::collections::HashSet;

use db_forge::config::{EngineConfig, ProfilerConfig};
use db_forge::db::{Connection, ConnectionManager};
use db_forge::error::DbError;
use db_forge::models::{ConnectionDescriptor, Params};
use db_forge::query::{LikeSide, OrderDirection};
use db_forge::values;
use tempfile::NamedTempFile;

/// Create a SQLite database with an `orders` table
async fn setup() -> (ConnectionManager, Connection) {
    let path = NamedTempFile::new().unwrap().into_temp_path().keep().unwrap();
    let config = EngineConfig::new().with_connection(
        "default",
        ConnectionDescriptor::sqlite(path.to_string_lossy().to_string()),
    );
    let manager = ConnectionManager::new(config);
    let conn = manager.connect("default").await.unwrap();

    conn.schema()
        .create("orders", |table| {
            table.increments("id");
            table.integer("user_id");
            table.string("status", 20);
            table.decimal("total", 10, 2).default(0);
            table.string("note", 100).nullable();
        })
        .await
        .unwrap();

    (manager, conn)
}

async fn seed_orders(conn: &Connection) {
    conn.table("orders")
        .insert_batch(vec![
            values! { "user_id" => 1, "status" => "paid", "total" => 10.0 },
            values! { "user_id" => 1, "status" => "paid", "total" => 20.0 },
            values! { "user_id" => 1, "status" => "open", "total" => 5.0 },
            values! { "user_id" => 2, "status" => "paid", "total" => 7.5 },
            values! { "user_id" => 3, "status" => "open", "total" => 1.0 },
        ])
        .await
        .unwrap();
}

fn placeholders(sql: &str) -> Vec<String> {
    sql.split(|c: char| c.is_whitespace() || c == '(' || c == ')' || c == ',')
        .filter(|t| t.starts_with(':'))
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_placeholders_are_unique_per_predicate() {
    let (_manager, conn) = setup().await;

    let mut query = conn.table("orders");
    query
        .where_(("total", ">", 1))
        .where_(("total", "<", 100))
        .or_where(("total", 50))
        .where_in("total", [1, 2, 3]);
    let sql = query.compile_select().unwrap();

    let names = placeholders(&sql);
    assert_eq!(names.len(), 6);
    assert_eq!(names.iter().collect::<HashSet<_>>().len(), 6);
    assert_eq!(query.params().len(), 6);

    // and the statement actually runs
    assert!(query.get().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unsafe_writes_are_refused() {
    let (_manager, conn) = setup().await;
    seed_orders(&conn).await;

    let err = conn
        .table("orders")
        .update(values! { "status" => "void" })
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::UnsafeOperation { .. }));

    let err = conn.table("orders").delete().await.unwrap_err();
    assert!(matches!(err, DbError::UnsafeOperation { .. }));

    // nothing was issued
    let profiler = conn.profiler();
    assert!(profiler.queries().iter().all(|q| !q.sql.starts_with("UPDATE")));
    assert!(profiler.queries().iter().all(|q| !q.sql.starts_with("DELETE")));
    assert_eq!(
        conn.table("orders").where_(("status", "void")).count().await.unwrap(),
        0
    );
    assert_eq!(conn.table("orders").count().await.unwrap(), 5);
}

#[tokio::test]
async fn test_empty_not_in_does_not_unlock_writes() {
    let (_manager, conn) = setup().await;
    seed_orders(&conn).await;
    let empty: Vec<i64> = Vec::new();

    let err = conn
        .table("orders")
        .where_not_in("id", empty.clone())
        .delete()
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::UnsafeOperation { .. }));
    let err = conn
        .table("orders")
        .where_(("user_id", 1))
        .or_where_not_in("id", empty.clone())
        .update(values! { "status" => "void" })
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::UnsafeOperation { .. }));
    assert_eq!(conn.table("orders").count().await.unwrap(), 5);

    // alongside a real predicate it is just a no-op filter
    let deleted = conn
        .table("orders")
        .where_(("user_id", 1))
        .where_not_in("id", empty)
        .delete()
        .await
        .unwrap();
    assert_eq!(deleted, 3);
    assert_eq!(conn.table("orders").count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_failed_batch_insert_leaves_nothing_behind() {
    let (_manager, conn) = setup().await;
    conn.table("orders")
        .insert(values! { "id" => 1, "user_id" => 1, "status" => "open" })
        .await
        .unwrap();
    assert_eq!(conn.table("orders").count().await.unwrap(), 1);

    // 150 rows over two chunks; the second chunk repeats id 1
    let rows = (2..=151)
        .map(|i| {
            let id = if i == 121 { 1 } else { i };
            values! { "id" => id, "user_id" => 2, "status" => "open" }
        })
        .collect();
    let result = conn.table("orders").insert_batch(rows).await;
    assert!(result.is_err());
    assert_eq!(conn.transaction_level(), 0);

    assert_eq!(conn.table("orders").no_cache().count().await.unwrap(), 1);
    assert_eq!(conn.table("orders").count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_writes_through_an_aliased_table() {
    let (_manager, conn) = setup().await;
    seed_orders(&conn).await;

    let updated = conn
        .table("orders o")
        .where_(("o.user_id", 2))
        .update(values! { "status" => "void" })
        .await
        .unwrap();
    assert_eq!(updated, 1);
    assert_eq!(
        conn.table("orders").where_(("status", "void")).count().await.unwrap(),
        1
    );

    let deleted = conn
        .table("orders AS o")
        .where_(("o.status", "void"))
        .delete()
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(conn.table("orders").count().await.unwrap(), 4);
}

#[tokio::test]
async fn test_count_with_grouping_counts_groups() {
    let (_manager, conn) = setup().await;
    seed_orders(&conn).await;

    let mut query = conn.table("orders");
    query.group_by(["user_id"]);
    assert_eq!(query.count().await.unwrap(), 3);

    let mut query = conn.table("orders");
    query
        .select(["user_id", "COUNT(*) AS n"])
        .group_by(["user_id"])
        .having(("COUNT(*)", ">", 1));
    assert_eq!(query.count_all_results(false).await.unwrap(), 1);
    // clauses kept for the following get
    let rows = query.get().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["user_id"], 1);
    assert_eq!(rows[0]["n"], 3);

    let mut query = conn.table("orders");
    query.where_(("status", "paid"));
    assert_eq!(query.count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_crud_round_trip() {
    let (_manager, conn) = setup().await;

    let outcome = conn
        .table("orders")
        .insert(values! { "user_id" => 9, "status" => "open", "note" => "100% off_sale" })
        .await
        .unwrap();
    let id = outcome.last_insert_id.unwrap();

    let updated = conn
        .table("orders")
        .where_(("id", id))
        .update(values! { "status" => "paid" })
        .await
        .unwrap();
    assert_eq!(updated, 1);

    // LIKE wildcards in the search text are literal
    let rows = conn
        .table("orders")
        .like("note", "100%", LikeSide::After)
        .get()
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let rows = conn
        .table("orders")
        .like("note", "1_0", LikeSide::Both)
        .get()
        .await
        .unwrap();
    assert!(rows.is_empty());

    let row = conn
        .table("orders")
        .select(["id", "status"])
        .where_(("id", id))
        .first()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row["status"], "paid");

    assert_eq!(conn.table("orders").where_(("id", id)).delete().await.unwrap(), 1);
    assert_eq!(conn.table("orders").count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_ordering_paging_and_in_lists() {
    let (_manager, conn) = setup().await;
    seed_orders(&conn).await;

    let rows = conn
        .table("orders")
        .select(["id"])
        .order_by("id", OrderDirection::Desc)
        .limit(2)
        .offset(1)
        .get()
        .await
        .unwrap();
    let ids: Vec<i64> = rows.iter().map(|r| r["id"].as_i64().unwrap()).collect();
    assert_eq!(ids, vec![4, 3]);

    let empty: Vec<i64> = Vec::new();
    assert!(conn.table("orders").where_in("user_id", empty.clone()).get().await.unwrap().is_empty());
    assert_eq!(
        conn.table("orders").where_not_in("user_id", empty).get().await.unwrap().len(),
        5
    );
    assert_eq!(
        conn.table("orders").where_null("note").count().await.unwrap(),
        5
    );
}

#[tokio::test]
async fn test_invalid_identifier_fails_at_terminal() {
    let (_manager, conn) = setup().await;

    let mut query = conn.table("orders");
    query.where_(("status; DROP TABLE orders", "x"));
    let err = query.get().await.unwrap_err();
    assert!(matches!(err, DbError::InvalidInput { .. }));
    assert!(conn.schema().has_table("orders").await.unwrap());
}

#[tokio::test]
async fn test_predicate_variants() {
    let (_manager, conn) = setup().await;
    seed_orders(&conn).await;

    let count = conn
        .table("orders")
        .like("status", "pa", LikeSide::After)
        .or_like("status", "op", LikeSide::After)
        .count()
        .await
        .unwrap();
    assert_eq!(count, 5);
    let count = conn
        .table("orders")
        .not_like("status", "pa", LikeSide::After)
        .count()
        .await
        .unwrap();
    assert_eq!(count, 2);
    let count = conn
        .table("orders")
        .where_(("user_id", 3))
        .or_not_like("status", "open", LikeSide::None)
        .count()
        .await
        .unwrap();
    assert_eq!(count, 4);

    assert_eq!(conn.table("orders").where_not_null("note").count().await.unwrap(), 0);
    let count = conn
        .table("orders")
        .where_not_null("note")
        .or_where_null("note")
        .count()
        .await
        .unwrap();
    assert_eq!(count, 5);
    let count = conn
        .table("orders")
        .where_(("user_id", 2))
        .or_where_not_null("note")
        .count()
        .await
        .unwrap();
    assert_eq!(count, 1);

    let count = conn
        .table("orders")
        .where_(("user_id", 2))
        .or_where_in("user_id", [3])
        .count()
        .await
        .unwrap();
    assert_eq!(count, 2);

    let params = Params::new().with("min_total", 6).unwrap();
    let count = conn
        .table("orders")
        .where_raw("total > :min_total", params)
        .count()
        .await
        .unwrap();
    assert_eq!(count, 3);
}

#[tokio::test]
async fn test_having_variants() {
    let (_manager, conn) = setup().await;
    seed_orders(&conn).await;

    let params = Params::new().with("min_sum", 15).unwrap();
    let mut query = conn.table("orders");
    query
        .select(["user_id"])
        .group_by(["user_id"])
        .having_raw("SUM(total) > :min_sum", params);
    assert_eq!(query.count().await.unwrap(), 1);

    let params = Params::new().with("min_sum", 15).unwrap();
    let mut query = conn.table("orders");
    query
        .select(["user_id"])
        .group_by(["user_id"])
        .having_raw("SUM(total) > :min_sum", params)
        .or_having(("COUNT(*)", 1));
    assert_eq!(query.count().await.unwrap(), 3);
}

#[tokio::test]
async fn test_joins() {
    let (_manager, conn) = setup().await;
    seed_orders(&conn).await;
    conn.schema()
        .create("customers", |table| {
            table.increments("id");
            table.string("name", 50);
        })
        .await
        .unwrap();
    conn.table("customers")
        .insert_batch(vec![values! { "name" => "Ann" }, values! { "name" => "Bob" }])
        .await
        .unwrap();

    let rows = conn
        .table("orders")
        .select(["orders.id", "customers.name"])
        .inner_join("customers", "customers.id = orders.user_id")
        .where_(("customers.name", "Ann"))
        .get()
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r["name"] == "Ann"));

    // user 3 has no customer row
    let rows = conn
        .table("orders")
        .select(["orders.id"])
        .left_join("customers", "customers.id = orders.user_id")
        .where_null("customers.id")
        .get()
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);

    let mut query = conn.table("customers");
    query.right_join("orders", "customers.id = orders.user_id");
    assert!(query.compile_select().unwrap().contains("RIGHT JOIN orders ON"));

    // a write to either joined table invalidates the cached join
    let cache = conn.cache().clone();
    let join = |conn: &Connection| {
        let mut query = conn.table("orders");
        query
            .select(["orders.id"])
            .inner_join("customers", "customers.id = orders.user_id");
        query
    };
    join(&conn).get().await.unwrap();
    conn.table("customers")
        .insert(values! { "name" => "Cy" })
        .await
        .unwrap();
    let before = cache.stats();
    let rows = join(&conn).get().await.unwrap();
    assert_eq!(cache.stats().hits, before.hits);
    assert_eq!(rows.len(), 5);
}

#[tokio::test]
async fn test_profiler_records_executed_statements() {
    let (_manager, conn) = setup().await;
    let profiler = conn.profiler().clone();
    profiler.clear();

    conn.table("orders").where_(("status", "paid")).get().await.unwrap();
    // served from the cache, nothing executed
    conn.table("orders").where_(("status", "paid")).get().await.unwrap();
    assert_eq!(profiler.count(), 1);
    let last = profiler.last().unwrap();
    assert!(last.sql.starts_with("SELECT * FROM orders WHERE status = :where_status_"));
    assert!(last.interpolated().contains("'paid'"));

    let path = NamedTempFile::new().unwrap().into_temp_path().keep().unwrap();
    let config = EngineConfig::new()
        .with_connection(
            "default",
            ConnectionDescriptor::sqlite(path.to_string_lossy().to_string()),
        )
        .with_profiler(ProfilerConfig {
            enabled: false,
            ..ProfilerConfig::default()
        });
    let manager = ConnectionManager::new(config);
    let conn = manager.connect("default").await.unwrap();
    conn.statement("CREATE TABLE t (id INTEGER)").await.unwrap();
    assert_eq!(conn.profiler().count(), 0);
}

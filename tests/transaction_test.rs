//! Integration tests for nested transactions against SQLite.
//!
//! The SQLite pool holds a single connection, so every check made while a
//! transaction is open goes through the session that owns it.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use db_forge::config::EngineConfig;
use db_forge::db::{Connection, ConnectionManager};
use db_forge::error::DbError;
use db_forge::models::ConnectionDescriptor;
use db_forge::values;
use tempfile::NamedTempFile;

async fn setup() -> (ConnectionManager, Connection) {
    let path = NamedTempFile::new().unwrap().into_temp_path().keep().unwrap();
    let config = EngineConfig::new().with_connection(
        "default",
        ConnectionDescriptor::sqlite(path.to_string_lossy().to_string()),
    );
    let manager = ConnectionManager::new(config);
    let conn = manager.connect("default").await.unwrap();

    conn.schema()
        .create("tx_test", |table| {
            table.increments("id");
            table.string("name", 100);
        })
        .await
        .unwrap();

    (manager, conn)
}

async fn names(conn: &Connection) -> Vec<String> {
    conn.table("tx_test")
        .select(["name"])
        .order_by("id", Default::default())
        .get()
        .await
        .unwrap()
        .into_iter()
        .map(|row| row["name"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_nested_rollback_keeps_outer_work() {
    let (_manager, conn) = setup().await;
    let tx = conn.transactions();

    tx.begin().await.unwrap();
    conn.table("tx_test").insert(values! { "name" => "A" }).await.unwrap();
    tx.begin().await.unwrap();
    assert_eq!(tx.level(), 2);
    conn.table("tx_test").insert(values! { "name" => "B" }).await.unwrap();
    assert_eq!(names(&conn).await, vec!["A", "B"]);

    assert!(tx.rollback().await.unwrap());
    assert_eq!(tx.level(), 1);
    assert_eq!(names(&conn).await, vec!["A"]);

    assert!(tx.rollback().await.unwrap());
    assert_eq!(tx.level(), 0);
    assert!(names(&conn).await.is_empty());

    // nothing left to roll back
    assert!(!tx.rollback().await.unwrap());
    assert!(!tx.commit().await.unwrap());
}

#[tokio::test]
async fn test_nested_commit_persists_everything() {
    let (_manager, conn) = setup().await;
    let tx = conn.transactions();

    tx.begin().await.unwrap();
    conn.table("tx_test").insert(values! { "name" => "A" }).await.unwrap();
    tx.begin().await.unwrap();
    conn.table("tx_test").insert(values! { "name" => "B" }).await.unwrap();
    tx.commit().await.unwrap();
    assert!(conn.in_transaction());
    tx.commit().await.unwrap();
    assert!(!conn.in_transaction());

    // visible from an independent session once committed
    assert_eq!(names(&conn.fork()).await, vec!["A", "B"]);
}

#[tokio::test]
async fn test_closure_rolls_back_on_error() {
    let (_manager, conn) = setup().await;

    let result: Result<(), DbError> = conn
        .transactions()
        .transaction(|tx| async move {
            tx.table("tx_test").insert(values! { "name" => "doomed" }).await?;
            Err(DbError::invalid_input("abort"))
        })
        .await;
    assert!(matches!(result, Err(DbError::InvalidInput { .. })));
    assert_eq!(conn.transaction_level(), 0);
    assert!(names(&conn).await.is_empty());

    let id = conn
        .transactions()
        .transaction(|tx| async move {
            let outcome = tx.table("tx_test").insert(values! { "name" => "kept" }).await?;
            Ok(outcome.last_insert_id)
        })
        .await
        .unwrap();
    assert!(id.is_some());
    assert_eq!(names(&conn).await, vec!["kept"]);
}

#[tokio::test]
async fn test_after_commit_callbacks() {
    let (_manager, conn) = setup().await;
    let tx = conn.transactions();
    let fired = Arc::new(AtomicUsize::new(0));

    // no transaction: runs immediately
    let counter = fired.clone();
    tx.after_commit(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    tx.begin().await.unwrap();
    let counter = fired.clone();
    tx.after_commit(move || {
        counter.fetch_add(10, Ordering::SeqCst);
    })
    .await;

    // registered inside a savepoint that is rolled back: dropped
    tx.begin().await.unwrap();
    let counter = fired.clone();
    tx.after_commit(move || {
        counter.fetch_add(100, Ordering::SeqCst);
    })
    .await;
    tx.rollback().await.unwrap();

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    tx.commit().await.unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 11);

    // discarded on rollback
    tx.begin().await.unwrap();
    let counter = fired.clone();
    tx.after_commit(move || {
        counter.fetch_add(1000, Ordering::SeqCst);
    })
    .await;
    tx.rollback().await.unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 11);
}

#[tokio::test]
async fn test_released_savepoint_keeps_its_callbacks() {
    let (_manager, conn) = setup().await;
    let tx = conn.transactions();
    let fired = Arc::new(AtomicUsize::new(0));

    tx.begin().await.unwrap();
    let counter = fired.clone();
    tx.transaction(|inner| async move {
        inner.table("tx_test").insert(values! { "name" => "kept" }).await?;
        inner
            .transactions()
            .after_commit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        Ok(())
    })
    .await
    .unwrap();

    // a later savepoint at the same depth is rolled back
    let result: Result<(), DbError> = tx
        .transaction(|inner| async move {
            inner.table("tx_test").insert(values! { "name" => "dropped" }).await?;
            Err(DbError::invalid_input("abort"))
        })
        .await;
    assert!(result.is_err());
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    tx.commit().await.unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(names(&conn).await, vec!["kept"]);
}

#[tokio::test]
async fn test_clones_share_the_session() {
    let (_manager, conn) = setup().await;
    let other = conn.clone();

    conn.transactions().begin().await.unwrap();
    assert_eq!(other.transaction_level(), 1);
    other.table("tx_test").insert(values! { "name" => "shared" }).await.unwrap();
    conn.transactions().rollback().await.unwrap();

    assert_eq!(other.transaction_level(), 0);
    assert!(names(&conn).await.is_empty());
    assert_eq!(conn.fork().transaction_level(), 0);
}

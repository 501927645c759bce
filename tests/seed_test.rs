//! Integration tests for seeders against SQLite.

use async_trait::async_trait;
use db_forge::config::EngineConfig;
use db_forge::db::{Connection, ConnectionManager};
use db_forge::error::{DbError, DbResult};
use db_forge::models::{ConnectionDescriptor, UnitStatus};
use db_forge::seed::{Faker, SeedContext, SeedRunner, Seeder, SeederRegistry};
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
        .create("users", |table| {
            table.increments("id");
            table.string("name", 100);
            table.string("email", 191).unique();
            table.integer("age");
        })
        .await
        .unwrap();

    (manager, conn)
}

struct UserSeeder {
    count: usize,
}

#[async_trait]
impl Seeder for UserSeeder {
    async fn run(&self, ctx: &SeedContext) -> DbResult<()> {
        ctx.truncate("users").await?;
        let rows = (0..self.count)
            .map(|i| {
                values! {
                    "name" => ctx.fake().name(),
                    "email" => format!("user{i}@example.com"),
                    "age" => ctx.fake().number(18, 90),
                }
            })
            .collect();
        ctx.insert_bulk("users", rows).await?;
        Ok(())
    }
}

/// Inserts a row, then fails.
struct BrokenSeeder;

#[async_trait]
impl Seeder for BrokenSeeder {
    async fn run(&self, ctx: &SeedContext) -> DbResult<()> {
        ctx.insert(
            "users",
            values! { "name" => "ghost", "email" => "ghost@example.com", "age" => 1 },
        )
        .await?;
        Err(DbError::invalid_input("broken on purpose"))
    }
}

struct AdminSeeder;

#[async_trait]
impl Seeder for AdminSeeder {
    async fn run(&self, ctx: &SeedContext) -> DbResult<()> {
        ctx.delete("users", ("email", "admin@example.com")).await?;
        ctx.insert(
            "users",
            values! { "name" => "Admin", "email" => "admin@example.com", "age" => 40 },
        )
        .await?;
        Ok(())
    }
}

#[tokio::test]
async fn test_run_all_in_order_and_isolated() {
    let (_manager, conn) = setup().await;
    let mut registry = SeederRegistry::new();
    registry
        .register("users", UserSeeder { count: 10 })
        .unwrap()
        .register("broken", BrokenSeeder)
        .unwrap()
        .register("admin", AdminSeeder)
        .unwrap();
    let runner = SeedRunner::new(conn.clone(), registry);
    assert_eq!(runner.list(), vec!["users", "broken", "admin"]);

    let outcomes = runner.run_all().await;
    let statuses: Vec<UnitStatus> = outcomes.iter().map(|o| o.status).collect();
    assert_eq!(
        statuses,
        vec![UnitStatus::Success, UnitStatus::Failed, UnitStatus::Success]
    );
    assert!(outcomes[1].message.contains("broken on purpose"));

    // the broken seeder's insert was rolled back
    assert_eq!(conn.table("users").count().await.unwrap(), 11);
    assert_eq!(
        conn.table("users")
            .where_(("email", "ghost@example.com"))
            .count()
            .await
            .unwrap(),
        0
    );

    let ages = conn.table("users").select(["age"]).get().await.unwrap();
    assert!(ages.iter().all(|r| (18..=90).contains(&r["age"].as_i64().unwrap())));
}

#[tokio::test]
async fn test_run_single_seeder_is_repeatable() {
    let (_manager, conn) = setup().await;
    let registry = SeederRegistry::new()
        .with("users", UserSeeder { count: 3 })
        .unwrap()
        .with("admin", AdminSeeder)
        .unwrap();
    let runner = SeedRunner::new(conn.clone(), registry);

    for _ in 0..2 {
        let outcome = runner.run("ADMIN").await.unwrap();
        assert!(outcome.is_success());
    }
    assert_eq!(conn.table("users").count().await.unwrap(), 1);

    runner.run("users").await.unwrap();
    assert_eq!(conn.table("users").count().await.unwrap(), 3);

    let err = runner.run("missing").await.unwrap_err();
    assert!(matches!(err, DbError::InvalidInput { .. }));
}

#[test]
fn test_duplicate_seeder_names_are_rejected() {
    let mut registry = SeederRegistry::new();
    registry.register("users", AdminSeeder).unwrap();
    assert!(registry.register("users", AdminSeeder).is_err());
    assert!(registry.register("bad name!", AdminSeeder).is_err());
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_context_with_seeded_faker() {
    let (_manager, conn) = setup().await;
    let ctx = SeedContext::with_faker(conn.clone(), Faker::seeded(3));
    let expected = Faker::seeded(3).name();

    let name = ctx.fake().name();
    assert_eq!(name, expected);
    ctx.insert(
        "users",
        values! { "name" => name.clone(), "email" => ctx.fake().email(), "age" => 30 },
    )
    .await
    .unwrap();
    assert!(ctx.schema().has_table("users").await.unwrap());
    assert_eq!(ctx.table("users").where_(("name", name.as_str())).count().await.unwrap(), 1);

    assert_eq!(ctx.delete("users", ("age", 30)).await.unwrap(), 1);
    assert_eq!(ctx.connection().table("users").count().await.unwrap(), 0);
}

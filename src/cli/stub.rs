//! Scaffolding for new migrations and seeders.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::{DbError, DbResult};
use crate::migration::{camel_case, handler_name};

/// `CreateUsersTable`, `create users-table` → `create_users_table`.
pub fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev: Option<char> = None;
    for c in name.trim().chars() {
        if c.is_ascii_uppercase() {
            if prev.is_some_and(|p| p.is_ascii_lowercase() || p.is_ascii_digit()) {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.ends_with('_') && !out.is_empty() {
            out.push('_');
        }
        prev = Some(c);
    }
    out.trim_end_matches('_').to_string()
}

/// File stem and source of a migration stub.
pub fn migration_stub(description: &str, now: DateTime<Utc>) -> DbResult<(String, String)> {
    let description = snake_case(description);
    if description.is_empty() {
        return Err(DbError::invalid_input("Migration name is empty"));
    }
    let stem = format!("{}_{}", now.format("%Y-%m-%d-%H%M%S"), description);
    let handler = handler_name(&stem)?;
    let source = format!(
        r#"use async_trait::async_trait;
use db_forge::error::DbResult;
use db_forge::migration::Migration;
use db_forge::schema::Schema;

/// Register as `registry.register("{stem}", {handler})`.
pub struct {handler};

#[async_trait]
impl Migration for {handler} {{
    async fn up(&self, schema: &Schema) -> DbResult<()> {{
        schema
            .create("table_name", |table| {{
                table.id();
                table.timestamps();
            }})
            .await
    }}

    async fn down(&self, schema: &Schema) -> DbResult<()> {{
        schema.drop_if_exists("table_name").await
    }}
}}
"#
    );
    Ok((stem, source))
}

/// File stem and source of a seeder stub.
pub fn seeder_stub(name: &str) -> DbResult<(String, String)> {
    let snake = snake_case(name);
    let snake = snake.strip_suffix("_seeder").unwrap_or(&snake).to_string();
    if snake.is_empty() {
        return Err(DbError::invalid_input("Seeder name is empty"));
    }
    let handler = format!("{}Seeder", camel_case(&snake));
    let source = format!(
        r#"use async_trait::async_trait;
use db_forge::error::DbResult;
use db_forge::seed::{{SeedContext, Seeder}};
use db_forge::values;

/// Register as `registry.register("{snake}", {handler})`.
pub struct {handler};

#[async_trait]
impl Seeder for {handler} {{
    async fn run(&self, ctx: &SeedContext) -> DbResult<()> {{
        ctx.truncate("table_name").await?;
        ctx.insert("table_name", values! {{ "name" => ctx.fake().name() }}).await?;
        Ok(())
    }}
}}
"#
    );
    Ok((format!("{snake}_seeder"), source))
}

async fn write_new(dir: &Path, stem: &str, source: &str) -> DbResult<PathBuf> {
    let io_err = |e: std::io::Error| DbError::internal(format!("{}: {e}", dir.display()));
    tokio::fs::create_dir_all(dir).await.map_err(io_err)?;
    let path = dir.join(format!("{stem}.rs"));
    if tokio::fs::try_exists(&path).await.map_err(io_err)? {
        return Err(DbError::invalid_input(format!(
            "{} already exists",
            path.display()
        )));
    }
    tokio::fs::write(&path, source).await.map_err(io_err)?;
    info!(path = %path.display(), "Created stub");
    Ok(path)
}

pub async fn write_migration(dir: &Path, description: &str) -> DbResult<PathBuf> {
    let (stem, source) = migration_stub(description, Utc::now())?;
    write_new(dir, &stem, &source).await
}

pub async fn write_seeder(dir: &Path, name: &str) -> DbResult<PathBuf> {
    let (stem, source) = seeder_stub(name)?;
    write_new(dir, &stem, &source).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_snake_case() {
        assert_eq!(snake_case("CreateUsersTable"), "create_users_table");
        assert_eq!(snake_case("add votes-to users"), "add_votes_to_users");
        assert_eq!(snake_case("create_posts_table"), "create_posts_table");
        assert_eq!(snake_case("  "), "");
    }

    #[test]
    fn test_migration_stub() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let (stem, source) = migration_stub("CreateUsersTable", now).unwrap();
        assert_eq!(stem, "2024-05-01-123000_create_users_table");
        assert!(source.contains("pub struct CreateUsersTableMigration;"));
        assert!(source.contains("impl Migration for CreateUsersTableMigration {"));
    }

    #[test]
    fn test_seeder_stub() {
        let (stem, source) = seeder_stub("UserSeeder").unwrap();
        assert_eq!(stem, "user_seeder");
        assert!(source.contains("impl Seeder for UserSeeder {"));
        assert!(seeder_stub("!!").is_err());
    }

    #[tokio::test]
    async fn test_stub_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_seeder(dir.path(), "users").await.unwrap();
        assert!(path.ends_with("users_seeder.rs"));
        assert!(write_seeder(dir.path(), "users").await.is_err());
    }
}

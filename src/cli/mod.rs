//! Command surface for the `db-forge` binary and for host binaries that
//! bring their own migrations and seeders.

pub mod stub;

use clap::Subcommand;
use tracing::info;

use crate::config::{Config, EngineConfig};
use crate::db::{Connection, ConnectionManager};
use crate::error::{DbError, DbResult};
use crate::migration::{MigrationRegistry, MigrationRunner};
use crate::models::{UnitOutcome, UnitStatus};
use crate::seed::{SeedRunner, SeederRegistry};

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Write a new migration stub
    MakeMigration {
        /// Description, e.g. create_users_table
        name: String,
    },
    /// Write a new seeder stub
    MakeSeeder { name: String },
    /// Run pending migrations
    Migrate,
    /// Roll back the latest batch
    Rollback {
        /// Maximum number of migrations to roll back
        #[arg(long, default_value_t = 1)]
        steps: usize,
    },
    /// Roll back every migration
    Reset,
    /// Reset, then migrate
    Refresh,
    /// Drop every table, then migrate
    Fresh {
        /// Confirm dropping every table
        #[arg(long)]
        force: bool,
    },
    /// Show registered and executed migrations
    Status,
    /// List registered migrations and seeders
    List,
    /// Run one seeder, or all of them
    Seed {
        #[arg(default_value = "all")]
        name: String,
    },
    /// Refresh migrations, then run every seeder
    SeedRefresh,
}

impl Command {
    /// Whether the command needs a database connection.
    pub fn needs_connection(&self) -> bool {
        !matches!(self, Self::MakeMigration { .. } | Self::MakeSeeder { .. })
    }
}

fn print_outcomes(outcomes: &[UnitOutcome]) {
    if outcomes.is_empty() {
        println!("Nothing to do.");
    }
    for outcome in outcomes {
        let mark = match outcome.status {
            UnitStatus::Success => "ok",
            UnitStatus::Failed => "FAILED",
        };
        println!("{mark:>6}  {}  {}", outcome.name, outcome.message);
    }
}

/// Turn failed units into an error so the process exits non-zero.
fn check_outcomes(outcomes: &[UnitOutcome]) -> DbResult<()> {
    let failed: Vec<&str> = outcomes
        .iter()
        .filter(|o| !o.is_success())
        .map(|o| o.name.as_str())
        .collect();
    if failed.is_empty() {
        Ok(())
    } else {
        Err(DbError::migration(
            failed.join(", "),
            format!("{} unit(s) failed", failed.len()),
        ))
    }
}

fn report(outcomes: Vec<UnitOutcome>) -> DbResult<()> {
    print_outcomes(&outcomes);
    check_outcomes(&outcomes)
}

/// Execute `config.command`.
pub async fn run(
    config: Config,
    migrations: MigrationRegistry,
    seeders: SeederRegistry,
) -> DbResult<()> {
    match &config.command {
        Command::MakeMigration { name } => {
            let path = stub::write_migration(&config.migrations_dir, name).await?;
            println!("Created {}", path.display());
            return Ok(());
        }
        Command::MakeSeeder { name } => {
            let path = stub::write_seeder(&config.seeds_dir, name).await?;
            println!("Created {}", path.display());
            return Ok(());
        }
        _ => {}
    }

    let engine = EngineConfig::from_file(&config.config)?;
    let manager = ConnectionManager::new(engine);
    let conn = manager.get_connection(config.group_key()).await?;
    info!(group = %conn.group(), driver = %conn.driver(), "Connected");

    let result = dispatch(&config.command, conn, migrations, seeders).await;
    manager.close_all().await;
    result
}

async fn dispatch(
    command: &Command,
    conn: Connection,
    migrations: MigrationRegistry,
    seeders: SeederRegistry,
) -> DbResult<()> {
    let migrator = MigrationRunner::new(conn.clone(), migrations);
    let seeder = SeedRunner::new(conn, seeders);

    match command {
        Command::MakeMigration { .. } | Command::MakeSeeder { .. } => Ok(()),
        Command::Migrate => report(migrator.run().await?),
        Command::Rollback { steps } => report(migrator.rollback(*steps).await?),
        Command::Reset => report(migrator.reset().await?),
        Command::Refresh => report(migrator.refresh().await?),
        Command::Fresh { force } => report(migrator.fresh(*force).await?),
        Command::Status => {
            let statuses = migrator.status().await?;
            if statuses.is_empty() {
                println!("No migrations registered.");
            }
            for status in statuses {
                let state = match (status.batch, status.registered) {
                    (None, _) => "pending".to_string(),
                    (Some(batch), true) => format!("batch {batch}"),
                    (Some(batch), false) => format!("batch {batch} (missing)"),
                };
                println!("{state:>18}  {}", status.name);
            }
            Ok(())
        }
        Command::List => {
            println!("Migrations:");
            for listing in migrator.list() {
                println!("  {}  ({})", listing.name, listing.handler);
            }
            println!("Seeders:");
            for name in seeder.list() {
                println!("  {name}");
            }
            Ok(())
        }
        Command::Seed { name } if name.eq_ignore_ascii_case("all") => {
            report(seeder.run_all().await)
        }
        Command::Seed { name } => report(vec![seeder.run(name).await?]),
        Command::SeedRefresh => {
            let mut outcomes = migrator.refresh().await?;
            outcomes.extend(seeder.run_all().await);
            report(outcomes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_parse_commands() {
        let config = Config::parse_from(["db-forge", "rollback", "--steps", "3"]);
        assert_eq!(config.command, Command::Rollback { steps: 3 });

        let config = Config::parse_from(["db-forge", "seed"]);
        assert_eq!(config.command, Command::Seed { name: "all".into() });

        let config = Config::parse_from(["db-forge", "make-migration", "create_users_table"]);
        assert!(!config.command.needs_connection());

        let config = Config::parse_from(["db-forge", "fresh"]);
        assert_eq!(config.command, Command::Fresh { force: false });
        assert!(config.command.needs_connection());
    }

    #[test]
    fn test_failed_units_fail_the_command() {
        let outcomes = vec![
            UnitOutcome::success("a", "Migrated"),
            UnitOutcome::failed("b", "boom"),
        ];
        let err = check_outcomes(&outcomes).unwrap_err();
        assert!(matches!(err, DbError::Migration { ref name, .. } if name == "b"));
        assert!(check_outcomes(&outcomes[..1]).is_ok());
    }
}

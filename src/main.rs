//! `db-forge` command-line entry point.
//!
//! The bundled binary has no compiled-in migrations or seeders; it scaffolds
//! stubs and reports status. Host binaries call [`db_forge::cli::run`] with
//! their own registries.

use db_forge::cli;
use db_forge::config::Config;
use db_forge::logging::init_tracing;
use db_forge::migration::MigrationRegistry;
use db_forge::seed::SeederRegistry;
use tracing::error;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse_args();

    init_tracing(&config.log_level, config.json_logs);

    if let Err(e) = cli::run(config, MigrationRegistry::new(), SeederRegistry::new()).await {
        error!(error = %e, "Command failed");
        if let Some(suggestion) = e.suggestion() {
            eprintln!("Hint: {suggestion}");
        }
        return Err(e.into());
    }
    Ok(())
}

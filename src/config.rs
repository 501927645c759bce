//! Configuration handling.
//!
//! Two layers: [`EngineConfig`] is the JSON document describing connection
//! groups, the result cache and the profiler; [`Config`] is the command-line
//! surface (CLI arguments and environment variables) of the bundled binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

use crate::cli::Command;
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionDescriptor, GroupKey};

pub const DEFAULT_GROUP: &str = "default";
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MAX_CONNECTIONS_SQLITE: u32 = 1;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

// Cache and profiler defaults
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;
pub const DEFAULT_CACHE_NAMESPACE: &str = "query";
pub const DEFAULT_PROFILER_CAPACITY: usize = 500;
pub const DEFAULT_SLOW_QUERY_MS: u64 = 1000;

/// Connection pool configuration options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolOptions {
    /// Maximum connections in pool (default: 10 for MySQL/PostgreSQL, 1 for SQLite)
    pub max_connections: Option<u32>,
    /// Minimum connections in pool (default: 1)
    pub min_connections: Option<u32>,
    /// Idle timeout in seconds (default: 600)
    pub idle_timeout_secs: Option<u64>,
    /// Connection acquire timeout in seconds (default: 30)
    pub acquire_timeout_secs: Option<u64>,
    /// Whether to test connections before use (default: true)
    pub test_before_acquire: Option<bool>,
}

impl PoolOptions {
    /// Get max_connections with default value based on database type.
    pub fn max_connections_or_default(&self, is_sqlite: bool) -> u32 {
        self.max_connections.unwrap_or(if is_sqlite {
            DEFAULT_MAX_CONNECTIONS_SQLITE
        } else {
            DEFAULT_MAX_CONNECTIONS
        })
    }

    pub fn min_connections_or_default(&self) -> u32 {
        self.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS)
    }

    pub fn idle_timeout_or_default(&self) -> u64 {
        self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS)
    }

    pub fn acquire_timeout_or_default(&self) -> u64 {
        self.acquire_timeout_secs
            .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS)
    }

    pub fn test_before_acquire_or_default(&self) -> bool {
        self.test_before_acquire.unwrap_or(true)
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(max) = self.max_connections {
            if max == 0 {
                return Err("max_connections must be greater than 0".to_string());
            }
        }
        if let Some(min) = self.min_connections {
            if min == 0 {
                return Err("min_connections must be greater than 0".to_string());
            }
            if let Some(max) = self.max_connections {
                if min > max {
                    return Err(format!(
                        "min_connections ({}) cannot exceed max_connections ({})",
                        min, max
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Backing store for the result cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CacheStoreConfig {
    #[default]
    Memory,
    /// One JSON file per entry under `path`
    File { path: PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub default_ttl_secs: u64,
    /// Prefix of every query-result key.
    pub namespace: String,
    pub store: CacheStoreConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            namespace: DEFAULT_CACHE_NAMESPACE.to_string(),
            store: CacheStoreConfig::Memory,
        }
    }
}

impl CacheConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    pub enabled: bool,
    /// Number of most recent statements retained.
    pub capacity: usize,
    /// Statements slower than this are logged at warn level.
    pub slow_query_ms: u64,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: DEFAULT_PROFILER_CAPACITY,
            slow_query_ms: DEFAULT_SLOW_QUERY_MS,
        }
    }
}

/// A connection group entry. Malformed entries are kept so that only the
/// affected group fails when it is connected.
#[derive(Debug, Clone)]
pub enum ConnectionSlot {
    Parsed(ConnectionDescriptor),
    Malformed(String),
}

/// The configuration document consumed by [`crate::db::ConnectionManager`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub default_group: Option<String>,
    /// Groups in declaration order.
    #[serde(default, deserialize_with = "deserialize_connections")]
    pub connections: Vec<(String, ConnectionSlot)>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub profiler: ProfilerConfig,
}

fn deserialize_connections<'de, D>(deserializer: D) -> Result<Vec<(String, ConnectionSlot)>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_json::Map::<String, JsonValue>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(name, value)| {
            let slot = match serde_json::from_value::<ConnectionDescriptor>(value) {
                Ok(descriptor) => ConnectionSlot::Parsed(descriptor),
                Err(e) => ConnectionSlot::Malformed(e.to_string()),
            };
            (name, slot)
        })
        .collect())
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(json: &str) -> DbResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| DbError::configuration(format!("Invalid configuration: {e}"), None))
    }

    pub fn from_file(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            DbError::configuration(
                format!("Cannot read configuration {}: {e}", path.display()),
                None,
            )
        })?;
        Self::from_json_str(&text)
    }

    /// Add (or replace) a connection group.
    pub fn with_connection(mut self, name: impl Into<String>, descriptor: ConnectionDescriptor) -> Self {
        let name = name.into();
        let slot = ConnectionSlot::Parsed(descriptor);
        match self.connections.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = slot,
            None => self.connections.push((name, slot)),
        }
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_profiler(mut self, profiler: ProfilerConfig) -> Self {
        self.profiler = profiler;
        self
    }

    pub fn group_names(&self) -> Vec<&str> {
        self.connections.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Name of the group used when none is requested explicitly.
    pub fn default_group_name(&self) -> Option<String> {
        if let Some(name) = &self.default_group {
            return Some(name.clone());
        }
        if self.connections.iter().any(|(n, _)| n == DEFAULT_GROUP) {
            return Some(DEFAULT_GROUP.to_string());
        }
        self.connections.first().map(|(n, _)| n.clone())
    }

    /// Resolve a group key to its canonical name and a validated descriptor.
    ///
    /// Names are matched against group names first, then against each
    /// descriptor's `database` field.
    pub fn descriptor(&self, key: &GroupKey) -> DbResult<(String, ConnectionDescriptor)> {
        let entry = match key {
            GroupKey::Index(index) => self.connections.get(*index),
            GroupKey::Name(name) => self
                .connections
                .iter()
                .find(|(n, _)| n == name)
                .or_else(|| {
                    self.connections.iter().find(|(_, slot)| {
                        matches!(slot, ConnectionSlot::Parsed(d) if d.database == *name)
                    })
                }),
        };

        let Some((name, slot)) = entry else {
            return Err(DbError::configuration(
                format!("No connection group '{key}' is configured"),
                Some(&key.to_string()),
            ));
        };

        match slot {
            ConnectionSlot::Parsed(descriptor) => Ok((name.clone(), descriptor.clone().resolve(name)?)),
            ConnectionSlot::Malformed(message) => Err(DbError::configuration(
                format!("Malformed connection group: {message}"),
                Some(name),
            )),
        }
    }
}

/// Command-line configuration of the `db-forge` binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "db-forge",
    about = "Run migrations and seeders, and scaffold new ones",
    version,
    author
)]
pub struct Config {
    /// Path to the JSON configuration document
    #[arg(short, long, value_name = "FILE", env = "DB_FORGE_CONFIG", default_value = "database.json")]
    pub config: PathBuf,

    /// Connection group to operate on (defaults to the configured default group)
    #[arg(short, long, env = "DB_FORGE_GROUP")]
    pub group: Option<String>,

    /// Directory new migration stubs are written to
    #[arg(long, env = "DB_FORGE_MIGRATIONS_DIR", default_value = "migrations")]
    pub migrations_dir: PathBuf,

    /// Directory new seeder stubs are written to
    #[arg(long, env = "DB_FORGE_SEEDS_DIR", default_value = "seeds")]
    pub seeds_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "DB_FORGE_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DB_FORGE_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn group_key(&self) -> Option<GroupKey> {
        self.group.as_deref().map(|g| match g.parse::<usize>() {
            Ok(index) => GroupKey::Index(index),
            Err(_) => GroupKey::from(g),
        })
    }
}

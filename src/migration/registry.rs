//! Explicit registration of migrations.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{DbError, DbResult};

use super::Migration;

/// Split `<timestamp>_<description>` into its parts.
///
/// The timestamp is digits and `-`; the description is letters, digits and
/// `_`.
pub fn parse_name(name: &str) -> DbResult<(&str, &str)> {
    let invalid = |reason: &str| {
        DbError::migration(
            name,
            format!("Invalid migration name ({reason}); expected <timestamp>_<description>"),
        )
    };
    let (timestamp, description) = name.split_once('_').ok_or_else(|| invalid("no '_'"))?;
    if timestamp.is_empty()
        || !timestamp.chars().any(|c| c.is_ascii_digit())
        || !timestamp.chars().all(|c| c.is_ascii_digit() || c == '-')
    {
        return Err(invalid("bad timestamp"));
    }
    if description.is_empty()
        || !description
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(invalid("bad description"));
    }
    Ok((timestamp, description))
}

/// `create_users_table` → `CreateUsersTable`.
pub fn camel_case(description: &str) -> String {
    description
        .split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// `2024-01-01-000000_create_users_table` → `CreateUsersTableMigration`.
pub fn handler_name(name: &str) -> DbResult<String> {
    let (_, description) = parse_name(name)?;
    Ok(format!("{}Migration", camel_case(description)))
}

/// Ordering key: timestamp digits, then the full name.
fn sort_key(name: &str, timestamp: &str) -> (String, String) {
    let digits: String = timestamp.chars().filter(char::is_ascii_digit).collect();
    (digits, name.to_string())
}

#[derive(Clone)]
pub struct MigrationEntry {
    pub name: String,
    pub handler: String,
    pub migration: Arc<dyn Migration>,
}

impl fmt::Debug for MigrationEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationEntry")
            .field("name", &self.name)
            .field("handler", &self.handler)
            .finish()
    }
}

/// Migrations known to the runner, in execution order.
#[derive(Debug, Clone, Default)]
pub struct MigrationRegistry {
    entries: BTreeMap<(String, String), MigrationEntry>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `migration` under its file-style name.
    pub fn register(&mut self, name: &str, migration: impl Migration + 'static) -> DbResult<&mut Self> {
        let (timestamp, _) = parse_name(name)?;
        let key = sort_key(name, timestamp);
        if self.entries.contains_key(&key) {
            return Err(DbError::migration(name, "Migration is already registered"));
        }
        let entry = MigrationEntry {
            name: name.to_string(),
            handler: handler_name(name)?,
            migration: Arc::new(migration),
        };
        self.entries.insert(key, entry);
        Ok(self)
    }

    /// Builder form of [`MigrationRegistry::register`].
    pub fn with(mut self, name: &str, migration: impl Migration + 'static) -> DbResult<Self> {
        self.register(name, migration)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&MigrationEntry> {
        self.entries.values().find(|e| e.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MigrationEntry> {
        self.entries.values()
    }

    pub fn names(&self) -> Vec<String> {
        self.iter().map(|e| e.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

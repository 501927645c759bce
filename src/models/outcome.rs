//! Per-unit results reported by the migration and seed runners.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Success,
    Failed,
}

/// The result of running one migration or seeder.
///
/// A failed unit does not stop the units after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitOutcome {
    pub status: UnitStatus,
    pub name: String,
    pub message: String,
}

impl UnitOutcome {
    pub fn success(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: UnitStatus::Success,
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: UnitStatus::Failed,
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == UnitStatus::Success
    }
}

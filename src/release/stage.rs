// ABOUTME: Release pipeline stages and the guarded transition table.
// ABOUTME: Forward edges are strictly ordered; rollback and failure are the only side exits.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Position of a release attempt in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pending,
    Testing,
    Building,
    Pushing,
    Deploying,
    HealthChecking,
    Succeeded,
    RolledBack,
    Failed,
}

impl Stage {
    pub const ALL: [Stage; 9] = [
        Stage::Pending,
        Stage::Testing,
        Stage::Building,
        Stage::Pushing,
        Stage::Deploying,
        Stage::HealthChecking,
        Stage::Succeeded,
        Stage::RolledBack,
        Stage::Failed,
    ];

    /// Terminal stages are never left again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Succeeded | Stage::RolledBack | Stage::Failed)
    }

    /// Stages during which the running system may be mid-update.
    pub fn touches_platform(self) -> bool {
        matches!(self, Stage::Deploying | Stage::HealthChecking)
    }

    /// The forward successor on the happy path.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Pending => Some(Stage::Testing),
            Stage::Testing => Some(Stage::Building),
            Stage::Building => Some(Stage::Pushing),
            Stage::Pushing => Some(Stage::Deploying),
            Stage::Deploying => Some(Stage::HealthChecking),
            Stage::HealthChecking => Some(Stage::Succeeded),
            Stage::Succeeded | Stage::RolledBack | Stage::Failed => None,
        }
    }

    pub fn can_transition_to(self, to: Stage) -> bool {
        if self.is_terminal() {
            return false;
        }
        match to {
            Stage::Failed => true,
            Stage::RolledBack => self.touches_platform(),
            _ => self.next() == Some(to),
        }
    }

    /// Process exit code reported by `release status`.
    pub fn exit_code(self) -> i32 {
        match self {
            Stage::Succeeded => 0,
            Stage::RolledBack | Stage::Failed => 1,
            _ => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Pending => "Pending",
            Stage::Testing => "Testing",
            Stage::Building => "Building",
            Stage::Pushing => "Pushing",
            Stage::Deploying => "Deploying",
            Stage::HealthChecking => "HealthChecking",
            Stage::Succeeded => "Succeeded",
            Stage::RolledBack => "RolledBack",
            Stage::Failed => "Failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

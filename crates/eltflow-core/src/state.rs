//! Task run states

use serde::{Deserialize, Serialize};
use std::fmt;

/// Run state of a single task within one pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for upstream tasks
    Pending,
    /// Currently executing
    Running,
    /// Completed successfully
    Success,
    /// Failed after exhausting retries
    Failed,
    /// Not executed by request, or because an upstream task was skipped
    Skipped,
    /// Not executed because an upstream task failed
    UpstreamFailed,
}

impl TaskState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Skipped | Self::UpstreamFailed
        )
    }

    /// Check if this state blocks dependents with a failure
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::UpstreamFailed)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::UpstreamFailed => write!(f, "upstream_failed"),
        }
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            "upstream_failed" => Ok(Self::UpstreamFailed),
            _ => Err(format!("Invalid task state: {s}")),
        }
    }
}

//! Run report schema (stable v1)
//!
//! This schema is STABLE and VERSIONED.
//! Breaking changes require a new version.

use crate::state::TaskState;
use serde::{Deserialize, Serialize};

/// Report schema version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportVersion {
    /// Major version (breaking changes)
    pub major: u32,

    /// Minor version (backward-compatible additions)
    pub minor: u32,
}

impl ReportVersion {
    /// Current report schema version
    pub const CURRENT: ReportVersion = ReportVersion { major: 1, minor: 0 };
}

impl std::fmt::Display for ReportVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Outcome of one task in a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,

    /// Task kind (existence_check, bulk_load, query, join)
    pub kind: String,

    /// Partition the task belongs to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,

    pub state: TaskState,

    /// Number of attempts made (0 when never started)
    pub attempts: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub duration_ms: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_loaded: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

impl TaskRecord {
    /// Record for a task that never started
    pub fn not_started(task_id: impl Into<String>, kind: impl Into<String>, state: TaskState) -> Self {
        Self {
            task_id: task_id.into(),
            kind: kind.into(),
            partition: None,
            state,
            attempts: 0,
            error: None,
            duration_ms: 0,
            rows_loaded: None,
            job_id: None,
        }
    }
}

/// Summary statistics for a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub upstream_failed: usize,
    pub skipped: usize,
}

/// Pipeline run report (run-report.json v1)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Schema version
    pub version: ReportVersion,

    pub dag_id: String,

    pub run_id: String,

    /// Timestamps (ISO 8601)
    pub started_at: String,
    pub finished_at: Option<String>,

    pub summary: RunSummary,

    /// Task outcomes in completion order
    pub tasks: Vec<TaskRecord>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl RunReport {
    /// Start a new report for a run
    pub fn new(dag_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            version: ReportVersion::CURRENT,
            dag_id: dag_id.into(),
            run_id: run_id.into(),
            started_at: chrono::Utc::now().to_rfc3339(),
            finished_at: None,
            summary: RunSummary::default(),
            tasks: Vec::new(),
            metadata: None,
        }
    }

    /// Add a task outcome
    pub fn add_task(&mut self, record: TaskRecord) {
        match record.state {
            TaskState::Success => self.summary.succeeded += 1,
            TaskState::Failed => self.summary.failed += 1,
            TaskState::UpstreamFailed => self.summary.upstream_failed += 1,
            TaskState::Skipped => self.summary.skipped += 1,
            TaskState::Pending | TaskState::Running => {}
        }

        self.summary.total += 1;
        self.tasks.push(record);
    }

    /// Mark the run finished
    pub fn finish(&mut self) {
        self.finished_at = Some(chrono::Utc::now().to_rfc3339());
    }

    /// Look up a task outcome
    pub fn task(&self, task_id: &str) -> Option<&TaskRecord> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    /// State of a task, if recorded
    pub fn state_of(&self, task_id: &str) -> Option<TaskState> {
        self.task(task_id).map(|t| t.state)
    }

    /// Check if any task failed or was blocked by a failure
    pub fn has_failures(&self) -> bool {
        self.summary.failed > 0 || self.summary.upstream_failed > 0
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Save to file
    pub fn save_to_file(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let json = self.to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, json)
    }

    /// Render as a Markdown document
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();

        md.push_str(&format!("# Pipeline Run Report: {}\n\n", self.dag_id));
        md.push_str(&format!("**Version:** {}\n\n", self.version));
        md.push_str(&format!("**Run:** {}\n\n", self.run_id));
        md.push_str(&format!("**Started:** {}\n\n", self.started_at));
        if let Some(finished) = &self.finished_at {
            md.push_str(&format!("**Finished:** {}\n\n", finished));
        }

        md.push_str("## Summary\n\n");
        md.push_str(&format!("- Tasks: {}\n", self.summary.total));
        md.push_str(&format!("- Succeeded: {}\n", self.summary.succeeded));
        md.push_str(&format!("- Failed: {}\n", self.summary.failed));
        md.push_str(&format!("- Upstream failed: {}\n", self.summary.upstream_failed));
        md.push_str(&format!("- Skipped: {}\n\n", self.summary.skipped));

        md.push_str("## Tasks\n\n");
        md.push_str("| Task | State | Attempts | Duration (ms) | Error |\n");
        md.push_str("|---|---|---|---|---|\n");
        for task in &self.tasks {
            md.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                task.task_id,
                task.state,
                task.attempts,
                task.duration_ms,
                task.error.as_deref().unwrap_or("").replace('|', "\\|"),
            ));
        }

        md
    }
}

//! Pipeline tasks: one unit of orchestration work per project and stage

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Pipeline stage, in dependency order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extraction,
    Deduplication,
    Chunking,
    Embedding,
    Indexing,
}

impl Stage {
    /// The stage whose output this stage consumes
    pub fn upstream(&self) -> Option<Stage> {
        match self {
            Self::Extraction => None,
            Self::Deduplication => Some(Self::Extraction),
            Self::Chunking => Some(Self::Deduplication),
            Self::Embedding => Some(Self::Chunking),
            Self::Indexing => Some(Self::Embedding),
        }
    }

    /// Stable name used in task rows and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Deduplication => "deduplication",
            Self::Chunking => "chunking",
            Self::Embedding => "embedding",
            Self::Indexing => "indexing",
        }
    }

    /// Parse a stage name as stored in task rows
    pub fn parse(s: &str) -> Option<Stage> {
        match s {
            "extraction" => Some(Self::Extraction),
            "deduplication" => Some(Self::Deduplication),
            "chunking" => Some(Self::Chunking),
            "embedding" => Some(Self::Embedding),
            "indexing" => Some(Self::Indexing),
            _ => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task status
///
/// `queued -> running -> {succeeded, succeeded_with_errors, failed, cancelled}`.
/// Terminal states are immutable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    /// Finished with a non-empty error list; output is usable
    SucceededWithErrors,
    /// Precondition violation or total wreck; nothing usable was produced
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// True once the task can no longer transition
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Queued | Self::Running)
    }
}

/// Error collected for one item during a stage run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskErrorEntry {
    /// Item that failed: a filename, a chunk id, or "batch 4/12"
    pub item: String,
    /// Stage the failure occurred in
    pub stage: Stage,
    /// Error message
    pub message: String,
}

/// Per-item progress counters
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TaskProgress {
    pub items_total: usize,
    pub items_processed: usize,
    pub items_skipped: usize,
    pub items_failed: usize,
}

impl TaskProgress {
    /// Percentage complete over all accounted items
    pub fn percent_complete(&self) -> f32 {
        if self.items_total == 0 {
            return 0.0;
        }
        let done = self.items_processed + self.items_skipped + self.items_failed;
        done as f32 / self.items_total as f32 * 100.0
    }
}

/// A unit of orchestration work for one project and one stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineTask {
    pub id: Uuid,
    pub project_id: String,
    pub stage: Stage,
    pub status: TaskStatus,
    pub progress: TaskProgress,
    pub errors: Vec<TaskErrorEntry>,
    /// Fingerprint of the upstream output this run consumed; staleness key
    pub input_fingerprint: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl PipelineTask {
    /// Create a queued task for a project stage
    pub fn new(project_id: impl Into<String>, stage: Stage) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id: project_id.into(),
            stage,
            status: TaskStatus::Queued,
            progress: TaskProgress::default(),
            errors: Vec::new(),
            input_fingerprint: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Terminal status a finished run should land in given its error list
    pub fn finish_status(&self) -> TaskStatus {
        if self.errors.is_empty() {
            TaskStatus::Succeeded
        } else {
            TaskStatus::SucceededWithErrors
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use uuid::Uuid;

/// Kind of background bulk operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    BatchDelete,
    BatchBackfill,
}

impl Display for TaskKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TaskKind::BatchDelete => write!(f, "batch_delete"),
            TaskKind::BatchBackfill => write!(f, "batch_backfill"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Completed,
    Failed,
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Progress record of a background bulk operation. Lives in memory only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchTask {
    pub id: Uuid,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub progress: usize,
    pub total: usize,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl BatchTask {
    pub fn new(kind: TaskKind, total: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            status: TaskStatus::Running,
            progress: 0,
            total,
            message: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status != TaskStatus::Running
    }
}

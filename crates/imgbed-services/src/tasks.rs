//! In-memory progress records for batch jobs.
//!
//! Tasks are never persisted or evicted; the history is lost on restart.

use imgbed_core::models::{BatchTask, TaskKind, TaskStatus};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct TaskTracker {
    tasks: RwLock<HashMap<Uuid, BatchTask>>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running task and return its id.
    pub async fn start(&self, kind: TaskKind, total: usize) -> Uuid {
        let task = BatchTask::new(kind, total);
        let id = task.id;
        self.tasks.write().await.insert(id, task);
        tracing::info!(task_id = %id, kind = %kind, total, "Batch task started");
        id
    }

    pub async fn set_progress(&self, id: Uuid, progress: usize) {
        if let Some(task) = self.tasks.write().await.get_mut(&id) {
            task.progress = progress.min(task.total);
        }
    }

    pub async fn complete(&self, id: Uuid) {
        if let Some(task) = self.tasks.write().await.get_mut(&id) {
            task.status = TaskStatus::Completed;
            tracing::info!(task_id = %id, kind = %task.kind, progress = task.progress, "Batch task completed");
        }
    }

    pub async fn fail(&self, id: Uuid, message: impl Into<String>) {
        if let Some(task) = self.tasks.write().await.get_mut(&id) {
            let message = message.into();
            tracing::warn!(task_id = %id, kind = %task.kind, message = %message, "Batch task failed");
            task.status = TaskStatus::Failed;
            task.message = Some(message);
        }
    }

    pub async fn get(&self, id: Uuid) -> Option<BatchTask> {
        self.tasks.read().await.get(&id).cloned()
    }

    /// All tasks, newest first.
    pub async fn list(&self) -> Vec<BatchTask> {
        let mut tasks: Vec<BatchTask> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn lifecycle() {
        let tracker = TaskTracker::new();
        let id = tracker.start(TaskKind::BatchDelete, 3).await;

        let task = tracker.get(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!((task.progress, task.total), (0, 3));

        tracker.set_progress(id, 2).await;
        tracker.complete(id).await;

        let task = tracker.get(id).await.unwrap();
        assert_eq!(task.progress, 2);
        assert!(task.is_finished());
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn failure_keeps_message() {
        let tracker = TaskTracker::new();
        let id = tracker.start(TaskKind::BatchBackfill, 1).await;
        tracker.fail(id, "Target backend not found").await;

        let task = tracker.get(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.message.as_deref(), Some("Target backend not found"));
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let tracker = TaskTracker::new();
        let first = tracker.start(TaskKind::BatchDelete, 1).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = tracker.start(TaskKind::BatchBackfill, 1).await;

        let ids: Vec<Uuid> = tracker.list().await.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![second, first]);
    }

    #[tokio::test]
    async fn unknown_ids_are_ignored() {
        let tracker = TaskTracker::new();
        tracker.set_progress(Uuid::new_v4(), 1).await;
        tracker.complete(Uuid::new_v4()).await;
        assert!(tracker.list().await.is_empty());
    }
}

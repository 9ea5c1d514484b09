use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info};
use uuid::Uuid;

/// Lifecycle of a background task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Started,
    Working,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Only `started -> working -> {completed | failed}` is allowed
    pub fn can_advance_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Started, TaskStatus::Working)
                | (TaskStatus::Working, TaskStatus::Completed)
                | (TaskStatus::Working, TaskStatus::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TaskStatus::Started => "started",
            TaskStatus::Working => "working",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(text)
    }
}

/// Identifier handed back to RPC callers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Snapshot of a task, as seen by pollers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub status: TaskStatus,
    pub description: String,
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Registry errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("task {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },
}

/// In-memory map of task records.
///
/// Every read and write takes the single lock for the duration of the map
/// operation only; task work always runs outside of it.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<TaskId, TaskRecord>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new task in `started` state under a fresh id
    pub async fn submit(&self, description: impl Into<String>) -> TaskId {
        let id = TaskId::generate();
        self.submit_with_id(id.clone(), description).await;
        id
    }

    /// Register a task under a caller-chosen id, replacing any previous record
    pub async fn submit_with_id(&self, id: TaskId, description: impl Into<String>) {
        let record = TaskRecord {
            id: id.clone(),
            status: TaskStatus::Started,
            description: description.into(),
            error: None,
            updated_at: Utc::now(),
        };

        if self.tasks.lock().await.insert(id.clone(), record).is_some() {
            info!("Task {} resubmitted, previous record replaced", id);
        }
    }

    /// Snapshot of a task
    pub async fn status(&self, id: &TaskId) -> Result<TaskRecord, TaskError> {
        self.tasks.lock().await
            .get(id)
            .cloned()
            .ok_or_else(|| TaskError::NotFound(id.clone()))
    }

    /// Move a task forward, updating status, description and error together
    async fn transition(
        &self,
        id: &TaskId,
        next: TaskStatus,
        description: Option<String>,
        error: Option<String>,
    ) -> Result<(), TaskError> {
        let mut tasks = self.tasks.lock().await;
        let record = tasks.get_mut(id).ok_or_else(|| TaskError::NotFound(id.clone()))?;

        if !record.status.can_advance_to(next) {
            return Err(TaskError::InvalidTransition {
                id: id.clone(),
                from: record.status,
                to: next,
            });
        }

        record.status = next;
        if let Some(description) = description {
            record.description = description;
        }
        record.error = error;
        record.updated_at = Utc::now();

        Ok(())
    }

    /// Execute `work` for a submitted task and record its outcome.
    ///
    /// On success the returned text becomes the task description; an error or a
    /// panic marks the task failed with its message.
    pub async fn run<F>(&self, id: &TaskId, work: F) -> Result<TaskStatus, TaskError>
    where
        F: Future<Output = Result<String>>,
    {
        self.transition(id, TaskStatus::Working, None, None).await?;
        info!("Task {} working", id);

        let outcome = match AssertUnwindSafe(work).catch_unwind().await {
            Ok(Ok(summary)) => Ok(summary),
            Ok(Err(e)) => Err(format!("{:#}", e)),
            Err(panic) => Err(panic_message(panic.as_ref())),
        };

        match outcome {
            Ok(summary) => {
                info!("Task {} completed: {}", id, summary);
                self.transition(id, TaskStatus::Completed, Some(summary), None).await?;
                Ok(TaskStatus::Completed)
            }
            Err(message) => {
                error!("Task {} failed: {}", id, message);
                self.transition(id, TaskStatus::Failed, None, Some(message)).await?;
                Ok(TaskStatus::Failed)
            }
        }
    }

    /// Submit a task and run it on its own tokio task; returns immediately.
    ///
    /// `on_finish` runs after the record reaches its terminal state.
    pub async fn spawn<F, G>(self: &Arc<Self>, description: impl Into<String>, work: F, on_finish: G) -> TaskId
    where
        F: Future<Output = Result<String>> + Send + 'static,
        G: FnOnce(TaskStatus) + Send + 'static,
    {
        let id = self.submit(description).await;

        let registry = Arc::clone(self);
        let task_id = id.clone();
        tokio::spawn(async move {
            match registry.run(&task_id, work).await {
                Ok(status) => on_finish(status),
                Err(e) => {
                    error!("Task {} bookkeeping failed: {}", task_id, e);
                    on_finish(TaskStatus::Failed);
                }
            }
        });

        id
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("worker panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("worker panicked: {}", message)
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use tokio::sync::oneshot;

    #[test]
    fn test_transitions_are_monotonic() {
        use TaskStatus::*;

        assert!(Started.can_advance_to(Working));
        assert!(Working.can_advance_to(Completed));
        assert!(Working.can_advance_to(Failed));

        assert!(!Started.can_advance_to(Completed));
        assert!(!Working.can_advance_to(Started));
        assert!(!Completed.can_advance_to(Working));
        assert!(!Failed.can_advance_to(Completed));
        assert!(!Completed.can_advance_to(Completed));
    }

    #[tokio::test]
    async fn test_submit_is_visible_before_work_starts() {
        let registry = TaskRegistry::new();
        let id = registry.submit("crawl comments for [1]").await;

        let record = registry.status(&id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Started);
        assert_eq!(record.description, "crawl comments for [1]");
        assert_eq!(record.error, None);
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let registry = TaskRegistry::new();
        let id = TaskId::from("does-not-exist");

        assert_eq!(registry.status(&id).await, Err(TaskError::NotFound(id)));
    }

    #[tokio::test]
    async fn test_run_success() {
        let registry = TaskRegistry::new();
        let id = registry.submit("work").await;

        let status = registry.run(&id, async { Ok("3 new comments".to_string()) }).await.unwrap();

        assert_eq!(status, TaskStatus::Completed);
        let record = registry.status(&id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.description, "3 new comments");
        assert_eq!(record.error, None);
    }

    #[tokio::test]
    async fn test_run_failure_keeps_description() {
        let registry = TaskRegistry::new();
        let id = registry.submit("work").await;

        let status = registry.run(&id, async { Err(anyhow!("page load timed out")) }).await.unwrap();

        assert_eq!(status, TaskStatus::Failed);
        let record = registry.status(&id).await.unwrap();
        assert_eq!(record.description, "work");
        assert_eq!(record.error.as_deref(), Some("page load timed out"));
    }

    #[tokio::test]
    async fn test_run_catches_panics() {
        let registry = TaskRegistry::new();
        let id = registry.submit("work").await;

        let status = registry
            .run(&id, async {
                if true {
                    panic!("selector vanished");
                }
                Ok(String::new())
            })
            .await
            .unwrap();

        assert_eq!(status, TaskStatus::Failed);
        let error = registry.status(&id).await.unwrap().error.unwrap();
        assert!(error.contains("selector vanished"));
    }

    #[tokio::test]
    async fn test_finished_task_cannot_run_again() {
        let registry = TaskRegistry::new();
        let id = registry.submit("work").await;
        registry.run(&id, async { Ok(String::new()) }).await.unwrap();

        let again = registry.run(&id, async { Ok(String::new()) }).await;
        assert!(matches!(again, Err(TaskError::InvalidTransition { from: TaskStatus::Completed, .. })));
    }

    #[tokio::test]
    async fn test_spawn_reports_working_then_completed() {
        let registry = Arc::new(TaskRegistry::new());
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let (done_tx, done_rx) = oneshot::channel();

        let id = registry
            .spawn(
                "long work",
                async move {
                    let _ = started_tx.send(());
                    release_rx.await?;
                    Ok("done".to_string())
                },
                move |status| {
                    let _ = done_tx.send(status);
                },
            )
            .await;

        started_rx.await.unwrap();
        assert_eq!(registry.status(&id).await.unwrap().status, TaskStatus::Working);

        release_tx.send(()).unwrap();
        assert_eq!(done_rx.await.unwrap(), TaskStatus::Completed);
        assert_eq!(registry.status(&id).await.unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_spawned_tasks_get_distinct_ids() {
        let registry = Arc::new(TaskRegistry::new());
        let a = registry.spawn("a", async { Ok(String::new()) }, |_| {}).await;
        let b = registry.spawn("b", async { Ok(String::new()) }, |_| {}).await;

        assert_ne!(a, b);
    }
}

//! `TaskStore` trait — the narrow contract the completion worker consumes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::tasks::model::{Task, TaskStatus};

/// Backend-agnostic task store.
///
/// The store provides its own concurrency safety; the worker never assumes
/// exclusive access to a task and always re-validates before writing.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task.
    async fn insert_task(&self, task: &Task) -> Result<(), StoreError>;

    /// Get a task by ID. A missing task is `None`, not an error.
    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, StoreError>;

    /// Set a task's status and refresh its updated timestamp (manual edit path).
    async fn update_status(&self, id: Uuid, status: TaskStatus) -> Result<(), StoreError>;

    /// Delete a task.
    async fn delete_task(&self, id: Uuid) -> Result<(), StoreError>;

    /// Tasks with status in {pending, in_progress} created before `cutoff`.
    async fn list_eligible(&self, cutoff: DateTime<Utc>) -> Result<Vec<Task>, StoreError>;

    /// Conditionally complete: set status to completed and refresh the
    /// updated timestamp, only where status is still pending or in_progress.
    ///
    /// Returns whether a row actually changed. `false` (already completed
    /// or deleted concurrently) is an expected race outcome, not an error.
    async fn complete_if_active(&self, id: Uuid) -> Result<bool, StoreError>;
}

//! In-memory `TaskStore` backend for tests and local development.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::traits::TaskStore;
use crate::tasks::model::{Task, TaskStatus};

/// Simple `HashMap`-backed store.
///
/// Counts applied conditional-complete writes so tests can assert
/// exactly-once effects under races.
#[derive(Default)]
pub struct MemoryStore {
    tasks: RwLock<HashMap<Uuid, Task>>,
    completed_writes: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of conditional-complete writes that actually took effect.
    pub fn completed_writes(&self) -> usize {
        self.completed_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn insert_task(&self, task: &Task) -> Result<(), StoreError> {
        self.tasks.write().await.insert(task.id, task.clone());
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn update_status(&self, id: Uuid, status: TaskStatus) -> Result<(), StoreError> {
        if let Some(task) = self.tasks.write().await.get_mut(&id) {
            task.status = status;
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn delete_task(&self, id: Uuid) -> Result<(), StoreError> {
        self.tasks.write().await.remove(&id);
        Ok(())
    }

    async fn list_eligible(&self, cutoff: DateTime<Utc>) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.status.is_active() && t.created_at < cutoff)
            .cloned()
            .collect())
    }

    async fn complete_if_active(&self, id: Uuid) -> Result<bool, StoreError> {
        if let Some(task) = self.tasks.write().await.get_mut(&id) {
            if task.status.is_active() {
                task.status = TaskStatus::Completed;
                task.updated_at = Utc::now();
                self.completed_writes.fetch_add(1, Ordering::SeqCst);
                return Ok(true);
            }
        }
        Ok(false)
    }
}

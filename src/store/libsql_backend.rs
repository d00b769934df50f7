//! libSQL backend — async `TaskStore` implementation.
//!
//! Supports local file and in-memory databases. Timestamps are stored as
//! RFC 3339 text, so lexicographic comparison in SQL matches chronological
//! order.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::store::migrations;
use crate::store::traits::TaskStore;
use crate::tasks::model::{Task, TaskStatus};

/// libSQL task store.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<Database>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Pool(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        info!(path = %path.display(), "Task database opened");
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Pool(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Pool(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn status_to_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::InProgress => "in_progress",
        TaskStatus::Completed => "completed",
    }
}

fn str_to_status(s: &str) -> TaskStatus {
    match s {
        "in_progress" => TaskStatus::InProgress,
        "completed" => TaskStatus::Completed,
        _ => TaskStatus::Pending,
    }
}

/// Convert `Option<&str>` to a libsql value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Map a libsql row to a Task. Column order matches `TASK_COLUMNS`.
fn row_to_task(row: &libsql::Row) -> Result<Task, libsql::Error> {
    let id_str: String = row.get(0)?;
    let status_str: String = row.get(4)?;
    let created_str: String = row.get(5)?;
    let updated_str: String = row.get(6)?;

    Ok(Task {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        user_id: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3).ok(),
        status: str_to_status(&status_str),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const TASK_COLUMNS: &str = "id, user_id, title, description, status, created_at, updated_at";

#[async_trait]
impl TaskStore for LibSqlStore {
    async fn insert_task(&self, task: &Task) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO tasks (id, user_id, title, description, status, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    task.id.to_string(),
                    task.user_id.clone(),
                    task.title.clone(),
                    opt_text(task.description.as_deref()),
                    status_to_str(task.status),
                    task.created_at.to_rfc3339(),
                    task.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("insert_task: {e}")))?;

        debug!(task_id = %task.id, "Task inserted");
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> Result<Option<Task>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_task: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let task = row_to_task(&row)
                    .map_err(|e| StoreError::Query(format!("get_task row parse: {e}")))?;
                Ok(Some(task))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get_task: {e}"))),
        }
    }

    async fn update_status(&self, id: Uuid, status: TaskStatus) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![
                    status_to_str(status),
                    Utc::now().to_rfc3339(),
                    id.to_string()
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("update_status: {e}")))?;

        debug!(task_id = %id, status = status_to_str(status), "Task status updated");
        Ok(())
    }

    async fn delete_task(&self, id: Uuid) -> Result<(), StoreError> {
        self.conn()
            .execute("DELETE FROM tasks WHERE id = ?1", params![id.to_string()])
            .await
            .map_err(|e| StoreError::Query(format!("delete_task: {e}")))?;
        Ok(())
    }

    async fn list_eligible(&self, cutoff: DateTime<Utc>) -> Result<Vec<Task>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks \
                     WHERE status IN ('pending', 'in_progress') AND created_at < ?1"
                ),
                params![cutoff.to_rfc3339()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("list_eligible: {e}")))?;

        let mut tasks = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_task(&row) {
                Ok(task) => tasks.push(task),
                Err(e) => {
                    tracing::warn!("Skipping task row: {e}");
                }
            }
        }
        Ok(tasks)
    }

    async fn complete_if_active(&self, id: Uuid) -> Result<bool, StoreError> {
        let changed = self
            .conn()
            .execute(
                "UPDATE tasks SET status = 'completed', updated_at = ?1 \
                 WHERE id = ?2 AND status IN ('pending', 'in_progress')",
                params![Utc::now().to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("complete_if_active: {e}")))?;

        Ok(changed > 0)
    }
}

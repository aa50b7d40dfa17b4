//! Task lifecycle operations and queue views.
//!
//! Transition guards live in the SQL (`WHERE status = ...`), so concurrent
//! callers race on rows, not on Rust-side reads. A guarded update touching
//! zero rows is resolved into `not_found` or `invalid_transition` after the
//! fact.

use crate::error::DatabaseError;
use crate::types::{StatusCounts, TaskId, TaskStatus};
use crate::{Error, Result};

use super::{Database, NewTask, Task};

/// Column list shared by every task SELECT/RETURNING
const TASK_COLUMNS: &str = "id, submitter_id, chat_id, file_name, declared_size, kind, \
     remote_handle, local_path, status, retry_count, error_kind, error_message, \
     notified, created_at, updated_at, completed_at";

/// Map an sqlx error to a store error, keeping lock contention distinct
/// so callers can retry it
fn query_error(context: &str, e: sqlx::Error) -> Error {
    let msg = e.to_string();
    if msg.contains("database is locked") || msg.contains("database table is locked") {
        Error::Database(DatabaseError::Contention(format!("{}: {}", context, msg)))
    } else {
        Error::Database(DatabaseError::QueryFailed(format!("{}: {}", context, msg)))
    }
}

impl Database {
    /// Insert a new task in state PENDING
    pub async fn insert_task(&self, task: &NewTask) -> Result<TaskId> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO tasks (
                submitter_id, chat_id, file_name, declared_size, kind,
                remote_handle, status, retry_count, notified,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, ?, ?)
            "#,
        )
        .bind(task.submitter_id)
        .bind(task.chat_id)
        .bind(&task.file_name)
        .bind(task.declared_size.map(|s| s as i64))
        .bind(task.kind.to_i32())
        .bind(&task.remote_handle)
        .bind(TaskStatus::Pending.to_i32())
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(|e| query_error("Failed to insert task", e))?;

        Ok(TaskId(result.last_insert_rowid()))
    }

    /// Get a task by ID
    pub async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, Task>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| query_error("Failed to get task", e))?;

        Ok(row)
    }

    /// Claim up to `limit` PENDING tasks, transitioning them to DOWNLOADING
    /// in the same atomic step
    ///
    /// Ordering is by creation time ascending. The single-statement
    /// `UPDATE ... RETURNING` guarantees a task is never handed to two
    /// callers: whichever statement commits first flips the status, and the
    /// other no longer matches `status = PENDING`.
    pub async fn claim_pending(&self, limit: u32) -> Result<Vec<Task>> {
        let now = chrono::Utc::now().timestamp();

        let mut claimed = sqlx::query_as::<_, Task>(&format!(
            r#"
            UPDATE tasks SET status = ?, updated_at = ?
            WHERE id IN (
                SELECT id FROM tasks WHERE status = ?
                ORDER BY created_at ASC, id ASC LIMIT ?
            )
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(TaskStatus::Downloading.to_i32())
        .bind(now)
        .bind(TaskStatus::Pending.to_i32())
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await
        .map_err(|e| query_error("Failed to claim pending tasks", e))?;

        // RETURNING does not promise row order
        claimed.sort_by_key(|t| (t.created_at, t.id));

        Ok(claimed)
    }

    /// DOWNLOADING -> DOWNLOADED; records the local path inside the stage
    /// directory the bytes were routed to
    pub async fn mark_downloaded(&self, id: TaskId, local_path: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            "UPDATE tasks SET status = ?, local_path = ?, updated_at = ? \
             WHERE id = ? AND status = ?",
        )
        .bind(TaskStatus::Downloaded.to_i32())
        .bind(local_path)
        .bind(now)
        .bind(id)
        .bind(TaskStatus::Downloading.to_i32())
        .execute(self.pool())
        .await
        .map_err(|e| query_error("Failed to mark task downloaded", e))?;

        if result.rows_affected() == 0 {
            return Err(self.transition_rejection(id, TaskStatus::Downloaded).await);
        }

        Ok(())
    }

    /// DOWNLOADED -> COMPLETED; sets the completed timestamp
    pub async fn mark_completed(&self, id: TaskId) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            "UPDATE tasks SET status = ?, completed_at = ?, updated_at = ? \
             WHERE id = ? AND status = ?",
        )
        .bind(TaskStatus::Completed.to_i32())
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(TaskStatus::Downloaded.to_i32())
        .execute(self.pool())
        .await
        .map_err(|e| query_error("Failed to mark task completed", e))?;

        if result.rows_affected() == 0 {
            return Err(self.transition_rejection(id, TaskStatus::Completed).await);
        }

        Ok(())
    }

    /// Any non-terminal status -> FAILED; records the error and the
    /// completed timestamp
    pub async fn mark_failed(&self, id: TaskId, error_kind: &str, message: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            "UPDATE tasks SET status = ?, error_kind = ?, error_message = ?, \
             completed_at = ?, updated_at = ? \
             WHERE id = ? AND status IN (?, ?, ?)",
        )
        .bind(TaskStatus::Failed.to_i32())
        .bind(error_kind)
        .bind(message)
        .bind(now)
        .bind(now)
        .bind(id)
        .bind(TaskStatus::Pending.to_i32())
        .bind(TaskStatus::Downloading.to_i32())
        .bind(TaskStatus::Downloaded.to_i32())
        .execute(self.pool())
        .await
        .map_err(|e| query_error("Failed to mark task failed", e))?;

        if result.rows_affected() == 0 {
            return Err(self.transition_rejection(id, TaskStatus::Failed).await);
        }

        Ok(())
    }

    /// Increment the retry counter and record the triggering error,
    /// returning the new attempt count
    pub async fn record_retry(&self, id: TaskId, error_kind: &str, message: &str) -> Result<u32> {
        let now = chrono::Utc::now().timestamp();

        let count: Option<i32> = sqlx::query_scalar(
            "UPDATE tasks SET retry_count = retry_count + 1, error_kind = ?, \
             error_message = ?, updated_at = ? \
             WHERE id = ? RETURNING retry_count",
        )
        .bind(error_kind)
        .bind(message)
        .bind(now)
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| query_error("Failed to record retry", e))?;

        match count {
            Some(c) => Ok(c.max(0) as u32),
            None => Err(Error::Database(DatabaseError::NotFound(format!(
                "task {} not found",
                id
            )))),
        }
    }

    /// DOWNLOADING -> PENDING; recovery path for downloads interrupted by a
    /// crash. The retry count is preserved.
    pub async fn reset_to_pending(&self, id: TaskId) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            "UPDATE tasks SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(TaskStatus::Pending.to_i32())
        .bind(now)
        .bind(id)
        .bind(TaskStatus::Downloading.to_i32())
        .execute(self.pool())
        .await
        .map_err(|e| query_error("Failed to reset task to pending", e))?;

        if result.rows_affected() == 0 {
            return Err(self.transition_rejection(id, TaskStatus::Pending).await);
        }

        Ok(())
    }

    /// List COMPLETED tasks whose notification has not gone out, ordered by
    /// completion time ascending
    pub async fn list_completed_unnotified(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, Task>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE status = ? AND notified = 0 \
             ORDER BY completed_at ASC, id ASC"
        ))
        .bind(TaskStatus::Completed.to_i32())
        .fetch_all(self.pool())
        .await
        .map_err(|e| query_error("Failed to list unnotified tasks", e))?;

        Ok(rows)
    }

    /// Set the notified flag
    ///
    /// Guarded on COMPLETED so `notified = true` can never hold for a task
    /// in any other status.
    pub async fn mark_notified(&self, id: TaskId) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        let result =
            sqlx::query("UPDATE tasks SET notified = 1, updated_at = ? WHERE id = ? AND status = ?")
                .bind(now)
                .bind(id)
                .bind(TaskStatus::Completed.to_i32())
                .execute(self.pool())
                .await
                .map_err(|e| query_error("Failed to mark task notified", e))?;

        if result.rows_affected() == 0 {
            match self.get_task(id).await? {
                None => {
                    return Err(Error::Database(DatabaseError::NotFound(format!(
                        "task {} not found",
                        id
                    ))));
                }
                Some(task) => {
                    return Err(Error::Database(DatabaseError::InvalidTransition {
                        id: id.0,
                        from: task.task_status().as_str().to_string(),
                        to: "notified".to_string(),
                    }));
                }
            }
        }

        Ok(())
    }

    /// Per-status task counts for operational queries
    pub async fn count_by_status(&self) -> Result<StatusCounts> {
        let rows: Vec<(i32, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM tasks GROUP BY status")
                .fetch_all(self.pool())
                .await
                .map_err(|e| query_error("Failed to count tasks by status", e))?;

        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            let count = count.max(0) as usize;
            match TaskStatus::from_i32(status) {
                TaskStatus::Pending => counts.pending += count,
                TaskStatus::Downloading => counts.downloading += count,
                TaskStatus::Downloaded => counts.downloaded += count,
                TaskStatus::Completed => counts.completed += count,
                TaskStatus::Failed => counts.failed += count,
            }
        }

        Ok(counts)
    }

    /// List tasks in DOWNLOADING or DOWNLOADED, for recovery and the
    /// completion sweep
    pub async fn list_in_flight(&self) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, Task>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE status IN (?, ?) \
             ORDER BY created_at ASC, id ASC"
        ))
        .bind(TaskStatus::Downloading.to_i32())
        .bind(TaskStatus::Downloaded.to_i32())
        .fetch_all(self.pool())
        .await
        .map_err(|e| query_error("Failed to list in-flight tasks", e))?;

        Ok(rows)
    }

    /// Resolve a guarded update that touched zero rows into the precise
    /// store signal: `not_found` when the row is gone, `invalid_transition`
    /// otherwise
    async fn transition_rejection(&self, id: TaskId, to: TaskStatus) -> Error {
        match self.get_task(id).await {
            Ok(None) => Error::Database(DatabaseError::NotFound(format!("task {} not found", id))),
            Ok(Some(task)) => Error::Database(DatabaseError::InvalidTransition {
                id: id.0,
                from: task.task_status().as_str().to_string(),
                to: to.as_str().to_string(),
            }),
            Err(e) => e,
        }
    }
}

//! Task store for chat-ingest
//!
//! Handles SQLite persistence for ingestion tasks, the line-fingerprint set
//! used by the built-in record store, and runtime state.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] — Database lifecycle, schema migrations
//! - [`tasks`] — Task lifecycle operations and queue views
//! - [`fingerprints`] — Deduplication fingerprints for the line store
//! - [`state`] — Runtime state (clean-shutdown tracking)
//!
//! Every task operation is atomic with respect to concurrent callers: claims
//! are single-statement `UPDATE ... RETURNING`, and transitions are guarded
//! `UPDATE ... WHERE status = ...` so two callers can never both win.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};
use std::path::PathBuf;

use crate::types::{FileKind, TaskId, TaskInfo, TaskStatus};

mod fingerprints;
mod migrations;
mod state;
mod tasks;

/// New task to be inserted into the store
#[derive(Debug, Clone)]
pub struct NewTask {
    /// Submitter identity
    pub submitter_id: i64,
    /// Chat the completion notification goes to
    pub chat_id: i64,
    /// Declared file name (already sanitized by admission)
    pub file_name: String,
    /// Declared size in bytes, if known
    pub declared_size: Option<u64>,
    /// Declared file kind
    pub kind: FileKind,
    /// Token the fetcher uses to retrieve the bytes
    pub remote_handle: String,
}

/// Task record from the store
#[derive(Debug, Clone, FromRow)]
pub struct Task {
    /// Unique database ID
    pub id: i64,
    /// Submitter identity
    pub submitter_id: i64,
    /// Chat the completion notification goes to
    pub chat_id: i64,
    /// Declared file name
    pub file_name: String,
    /// Declared size in bytes (NULL when the front-end did not know it)
    pub declared_size: Option<i64>,
    /// File kind code (see [`FileKind`])
    pub kind: i32,
    /// Token the fetcher uses to retrieve the bytes
    pub remote_handle: String,
    /// Local path after download (inside a stage directory)
    pub local_path: Option<String>,
    /// Current status code (see [`TaskStatus`])
    pub status: i32,
    /// Download attempts so far
    pub retry_count: i32,
    /// Machine-readable kind of the last error
    pub error_kind: Option<String>,
    /// Human-readable message of the last error
    pub error_message: Option<String>,
    /// Whether the completion notification went out (0/1)
    pub notified: i32,
    /// Unix timestamp when the submission was accepted
    pub created_at: i64,
    /// Unix timestamp of the last mutation
    pub updated_at: i64,
    /// Unix timestamp when the task reached a terminal status
    pub completed_at: Option<i64>,
}

impl Task {
    /// Typed task id
    pub fn task_id(&self) -> TaskId {
        TaskId(self.id)
    }

    /// Decoded lifecycle status
    pub fn task_status(&self) -> TaskStatus {
        TaskStatus::from_i32(self.status)
    }

    /// Decoded file kind; `None` signals a corrupted row
    pub fn file_kind(&self) -> Option<FileKind> {
        FileKind::from_i32(self.kind)
    }

    /// Whether the completion notification went out
    pub fn is_notified(&self) -> bool {
        self.notified != 0
    }

    /// File name component of the downloaded local path, when present
    pub fn local_file_name(&self) -> Option<String> {
        self.local_path
            .as_deref()
            .and_then(|p| std::path::Path::new(p).file_name())
            .and_then(|n| n.to_str())
            .map(str::to_string)
    }
}

fn datetime_from_unix(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

impl From<Task> for TaskInfo {
    fn from(row: Task) -> Self {
        // A corrupted kind column surfaces as Text here; routing decisions
        // always go through file_kind() which reports the corruption instead.
        let kind = FileKind::from_i32(row.kind).unwrap_or(FileKind::Text);

        TaskInfo {
            id: TaskId(row.id),
            submitter_id: row.submitter_id,
            chat_id: row.chat_id,
            file_name: row.file_name,
            declared_size: row.declared_size.map(|s| s as u64),
            kind,
            status: TaskStatus::from_i32(row.status),
            retry_count: row.retry_count.max(0) as u32,
            error_kind: row.error_kind,
            error_message: row.error_message,
            notified: row.notified != 0,
            local_path: row.local_path.map(PathBuf::from),
            created_at: datetime_from_unix(row.created_at),
            completed_at: row.completed_at.map(datetime_from_unix),
        }
    }
}

/// Database handle for chat-ingest
pub struct Database {
    pool: SqlitePool,
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

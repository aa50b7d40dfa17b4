//! Core types for chat-ingest

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Unique identifier for an ingestion task
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl TaskId {
    /// Create a new TaskId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for TaskId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<TaskId> for i64 {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl PartialEq<i64> for TaskId {
    fn eq(&self, other: &i64) -> bool {
        self.0 == *other
    }
}

impl PartialEq<TaskId> for i64 {
    fn eq(&self, other: &TaskId) -> bool {
        *self == other.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for TaskId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Task lifecycle status
///
/// Transitions are monotonic along the happy path:
/// `Pending -> Downloading -> Downloaded -> Completed`, with any non-terminal
/// status allowed to move to `Failed`. The store rejects everything else.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Accepted and waiting for a download worker to claim it
    Pending,
    /// Claimed by a download worker; bytes in flight
    Downloading,
    /// Bytes on disk in a stage directory; pipeline has not finished it yet
    Downloaded,
    /// Passed through the whole pipeline
    Completed,
    /// Terminally failed (download retries exhausted or fatal error)
    Failed,
}

impl TaskStatus {
    /// Convert integer status code to TaskStatus
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => TaskStatus::Pending,
            1 => TaskStatus::Downloading,
            2 => TaskStatus::Downloaded,
            3 => TaskStatus::Completed,
            4 => TaskStatus::Failed,
            _ => TaskStatus::Failed, // Default to Failed for unknown status
        }
    }

    /// Convert TaskStatus to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Downloading => 1,
            TaskStatus::Downloaded => 2,
            TaskStatus::Completed => 3,
            TaskStatus::Failed => 4,
        }
    }

    /// Lowercase status name, matching the serde representation
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Downloading => "downloading",
            TaskStatus::Downloaded => "downloaded",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    /// True for Completed and Failed; terminal tasks never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a submitted file, declared at submission time and immutable after
///
/// The kind drives stage-0 routing: archives land in `all/` for the extract
/// stage, plain text lands in `txt/` for the store stage. The enumeration is
/// closed; anything else is rejected at admission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// Compressed archive (zip, 7z, rar)
    Archive,
    /// Plain-text file
    Text,
}

impl FileKind {
    /// Convert integer kind code to FileKind; unknown codes map to None
    pub fn from_i32(kind: i32) -> Option<Self> {
        match kind {
            0 => Some(FileKind::Archive),
            1 => Some(FileKind::Text),
            _ => None,
        }
    }

    /// Convert FileKind to integer kind code
    pub fn to_i32(&self) -> i32 {
        match self {
            FileKind::Archive => 0,
            FileKind::Text => 1,
        }
    }

    /// Lowercase kind name
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Archive => "archive",
            FileKind::Text => "text",
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three downstream pipeline stages driven by the orchestrator
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    /// Unpack archives from `all/` into `pass/`
    Extract,
    /// Normalize files from `pass/` into `txt/`
    Convert,
    /// Drain `txt/` into the downstream record store
    Store,
}

impl PipelineStage {
    /// Lowercase stage name
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Extract => "extract",
            PipelineStage::Convert => "convert",
            PipelineStage::Store => "store",
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event emitted during the ingestion lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Submission accepted into the task store
    TaskQueued {
        /// Task ID
        id: TaskId,
        /// Declared file name
        file_name: String,
        /// Declared file kind
        kind: FileKind,
    },

    /// A download worker claimed the task
    DownloadStarted {
        /// Task ID
        id: TaskId,
        /// Worker index that claimed it
        worker: usize,
    },

    /// Bytes landed in a stage directory
    TaskDownloaded {
        /// Task ID
        id: TaskId,
        /// Final path inside the stage directory
        path: PathBuf,
    },

    /// A download attempt failed and will be retried
    DownloadRetrying {
        /// Task ID
        id: TaskId,
        /// Attempt number that just failed (1-based)
        attempt: u32,
        /// Error message
        error: String,
    },

    /// Download retries exhausted; task failed
    DownloadFailed {
        /// Task ID
        id: TaskId,
        /// Error message
        error: String,
    },

    /// A pipeline stage started processing its input directory
    StageStarted {
        /// Which stage
        stage: PipelineStage,
        /// Number of entries in the input directory at start
        pending: usize,
    },

    /// A pipeline stage finished
    StageComplete {
        /// Which stage
        stage: PipelineStage,
        /// Items processed successfully
        processed: usize,
        /// Items routed to the errors directory
        failed: usize,
    },

    /// A pipeline stage failed or timed out; the tick continues
    StageFailed {
        /// Which stage
        stage: PipelineStage,
        /// Error message
        error: String,
    },

    /// Task passed through the whole pipeline
    TaskCompleted {
        /// Task ID
        id: TaskId,
    },

    /// Task terminally failed
    TaskFailed {
        /// Task ID
        id: TaskId,
        /// Machine-readable error kind
        error_kind: String,
        /// Error message
        error: String,
    },

    /// One batched notification was delivered to a recipient
    NotificationSent {
        /// Recipient chat
        chat_id: i64,
        /// Number of tasks covered by the message
        task_count: usize,
    },

    /// Notification delivery failed
    NotificationFailed {
        /// Recipient chat
        chat_id: i64,
        /// Error message
        error: String,
        /// Whether the failure consumed the tasks (permanent) or left them
        /// for retry (transient)
        permanent: bool,
    },

    /// Graceful shutdown initiated
    Shutdown,
}

/// Snapshot of a task for embedders
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskInfo {
    /// Unique task identifier
    pub id: TaskId,

    /// Submitter identity
    pub submitter_id: i64,

    /// Chat the completion notification goes to
    pub chat_id: i64,

    /// Declared file name (sanitized)
    pub file_name: String,

    /// Declared size in bytes, if the front-end knew it
    pub declared_size: Option<u64>,

    /// Declared file kind
    pub kind: FileKind,

    /// Current lifecycle status
    pub status: TaskStatus,

    /// Download attempts so far
    pub retry_count: u32,

    /// Machine-readable kind of the last error, if any
    pub error_kind: Option<String>,

    /// Human-readable message of the last error, if any
    pub error_message: Option<String>,

    /// Whether the completion notification went out
    pub notified: bool,

    /// Local path after download (inside a stage directory)
    pub local_path: Option<PathBuf>,

    /// When the submission was accepted
    pub created_at: DateTime<Utc>,

    /// When the task reached a terminal status (None while in flight)
    pub completed_at: Option<DateTime<Utc>>,
}

/// Per-status task counts for operational queries
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// Tasks waiting to be claimed
    pub pending: usize,
    /// Tasks with bytes in flight
    pub downloading: usize,
    /// Tasks waiting on the pipeline
    pub downloaded: usize,
    /// Tasks fully processed
    pub completed: usize,
    /// Terminally failed tasks
    pub failed: usize,
}

impl StatusCounts {
    /// Total number of tasks across all statuses
    pub fn total(&self) -> usize {
        self.pending + self.downloading + self.downloaded + self.completed + self.failed
    }
}

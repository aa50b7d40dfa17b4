//! Error types for chat-ingest
//!
//! This module provides the error taxonomy for the library:
//! - Domain-specific error types (Fetch, Stage, Delivery, Admission, Database)
//! - A machine-readable `kind()` code for every error, persisted alongside
//!   failed tasks and usable by embedders for programmatic handling
//! - Distinct store signals for `not_found` and `invalid_transition`, which
//!   callers must treat as programmer error

use crate::types::PipelineStage;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for chat-ingest operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for chat-ingest
///
/// This is the primary error type used throughout the library. Each variant
/// includes contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "paths.root")
        key: Option<String>,
    },

    /// Task store operation failed
    #[error("store error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("store error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Fetching bytes from the remote source failed
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// A pipeline stage processor failed or timed out
    #[error("stage error: {0}")]
    Stage(#[from] StageError),

    /// Notification delivery failed
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// Submission rejected at admission; the task never entered the store
    #[error("admission rejected: {0}")]
    Admission(#[from] AdmissionError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Task not found
    #[error("task not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - not accepting new submissions
    #[error("shutdown in progress: not accepting new submissions")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Task-store errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to the task store
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Expected concurrent-update contention; callers retry
    #[error("store contention: {0}")]
    Contention(String),

    /// Task record not found
    #[error("record not found: {0}")]
    NotFound(String),

    /// A status transition outside the task state machine was attempted
    #[error("invalid transition for task {id}: {from} -> {to}")]
    InvalidTransition {
        /// The task whose transition was rejected
        id: i64,
        /// Status the task was actually in
        from: String,
        /// Status the caller tried to move it to
        to: String,
    },
}

/// Errors from fetching submission bytes
#[derive(Debug, Error)]
pub enum FetchError {
    /// The fetcher reported success but no file exists at the returned path
    #[error("fetched file missing at {path}")]
    MissingFile {
        /// Path where the fetched bytes were expected
        path: PathBuf,
    },

    /// Fetched byte count does not match the declared submission size
    #[error("size mismatch for {path}: declared {declared} bytes, got {actual}")]
    SizeMismatch {
        /// Path of the fetched file
        path: PathBuf,
        /// Size the submitter declared
        declared: u64,
        /// Size actually observed on disk
        actual: u64,
    },

    /// Fetched file exists but its bytes cannot be read back
    #[error("fetched file unreadable at {path}: {reason}")]
    Unreadable {
        /// Path of the fetched file
        path: PathBuf,
        /// Why the read failed
        reason: String,
    },

    /// The remote side rejected the handle outright
    #[error("remote rejected handle {handle}: {reason}")]
    HandleRejected {
        /// The remote handle that was refused
        handle: String,
        /// Rejection reason reported by the remote
        reason: String,
    },
}

/// Errors from the orchestrated pipeline stages
#[derive(Debug, Error)]
pub enum StageError {
    /// A stage processor exceeded its deadline and was abandoned
    #[error("{stage} stage timed out after {elapsed_secs}s")]
    Timeout {
        /// Which stage timed out
        stage: PipelineStage,
        /// Seconds the stage ran before the deadline fired
        elapsed_secs: u64,
    },

    /// A stage processor returned an unrecoverable error
    #[error("{stage} stage failed: {reason}")]
    ProcessorFailed {
        /// Which stage failed
        stage: PipelineStage,
        /// Failure description from the processor
        reason: String,
    },
}

/// Notification delivery outcomes that are not success
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Transient send failure; the tasks stay unnotified and are retried
    #[error("transient delivery failure for chat {chat_id}: {reason}")]
    Transient {
        /// Recipient whose delivery failed
        chat_id: i64,
        /// Failure description
        reason: String,
    },

    /// Permanent send failure; the tasks are consumed to avoid infinite retry
    #[error("permanent delivery failure for chat {chat_id}: {reason}")]
    Permanent {
        /// Recipient whose delivery failed
        chat_id: i64,
        /// Failure description
        reason: String,
    },
}

/// Admission rejections; these never create a task record
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// Declared size exceeds the configured ceiling
    #[error("file too large: declared {declared} bytes, limit {limit}")]
    TooLarge {
        /// Size the submitter declared
        declared: u64,
        /// Configured maximum
        limit: u64,
    },

    /// Submitter is not on the configured allowlist
    #[error("submitter {submitter_id} is not authorized")]
    NotAuthorized {
        /// The rejected submitter
        submitter_id: i64,
    },

    /// Declared filename is empty or degenerates to nothing after sanitization
    #[error("declared filename is empty or invalid")]
    InvalidName,
}

impl Error {
    /// Machine-readable error kind
    ///
    /// These codes are stable: they are persisted on failed task records and
    /// drive retry classification, so renaming one is a breaking change.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(e) => match e {
                DatabaseError::NotFound(_) => "not_found",
                DatabaseError::InvalidTransition { .. } => "invalid_transition",
                DatabaseError::Contention(_) => "store_contention",
                DatabaseError::ConnectionFailed(_)
                | DatabaseError::MigrationFailed(_)
                | DatabaseError::QueryFailed(_) => "store_fatal",
            },
            Error::Sqlx(_) => "store_fatal",
            Error::Fetch(_) => "permanent_io",
            Error::Stage(e) => match e {
                StageError::Timeout { .. } => "stage_timeout",
                StageError::ProcessorFailed { .. } => "stage_failed",
            },
            Error::Delivery(DeliveryError::Transient { .. }) => "delivery_transient",
            Error::Delivery(DeliveryError::Permanent { .. }) => "delivery_permanent",
            Error::Admission(_) => "bad_input",
            Error::Io(e) => {
                if is_transient_io_kind(e.kind()) {
                    "transient_io"
                } else {
                    "permanent_io"
                }
            }
            Error::Network(_) => "transient_io",
            Error::Serialization(_) => "serialization_error",
            Error::NotFound(_) => "not_found",
            Error::ShuttingDown => "shutting_down",
            Error::Other(_) => "internal_error",
        }
    }
}

/// I/O error kinds treated as transient (retried with backoff)
pub(crate) fn is_transient_io_kind(kind: std::io::ErrorKind) -> bool {
    matches!(
        kind,
        std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::WouldBlock
    )
}

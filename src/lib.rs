//! # chat-ingest
//!
//! Durable task-queue and staged-pipeline backend for chat-submitted file
//! ingestion.
//!
//! ## Design Philosophy
//!
//! chat-ingest is designed to be:
//! - **Crash-safe** - The task store and the stage directories are the only
//!   coordination channels, so any component can die and restart
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//!   behind a chat front-end
//! - **Bounded** - Parallelism exactly where it pays (the download pool)
//!   and strict serialization where it matters (the processing stages)
//!
//! ## Quick Start
//!
//! ```no_run
//! use chat_ingest::{Config, IngestPipeline, NewSubmission, types::FileKind};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = IngestPipeline::new(Config::default()).await?;
//!     pipeline.start().await?;
//!
//!     // Subscribe to events
//!     let mut events = pipeline.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     // The chat front-end hands uploads over as submissions
//!     let id = pipeline
//!         .submit(NewSubmission {
//!             submitter_id: 42,
//!             chat_id: 4242,
//!             file_name: "dump.zip".into(),
//!             declared_size: Some(1_048_576),
//!             kind: FileKind::Archive,
//!             remote_handle: "https://files.example.com/dump.zip".into(),
//!         })
//!         .await?;
//!     println!("accepted task {id}");
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Task store persistence layer
pub mod db;
/// Stage directory convention
pub mod dirs;
/// Error types
pub mod error;
/// Archive extraction
pub mod extraction;
/// Completion notifications
pub mod notifier;
/// Sequential pipeline orchestrator
pub(crate) mod orchestrator;
/// Pipeline handle (submission, download pool, lifecycle)
pub mod pipeline;
/// Startup recovery
pub mod recovery;
/// Retry logic with exponential backoff
pub mod retry;
/// Remote byte source
pub mod source;
/// Pipeline stage processors
pub mod stages;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use error::{
    AdmissionError, DatabaseError, DeliveryError, Error, FetchError, Result, StageError,
};
pub use notifier::{NoopSink, NotificationSink, WebhookSink};
pub use pipeline::{IngestPipeline, NewSubmission};
pub use source::{HttpRemoteSource, RemoteSource};
pub use stages::{
    ArchiveExtractor, ConvertProcessor, ExtractProcessor, FingerprintLineStore, StageOutcome,
    StoreProcessor, TextConverter,
};
pub use types::{Event, FileKind, PipelineStage, StatusCounts, TaskId, TaskInfo, TaskStatus};

/// Helper function to run the pipeline with graceful signal handling.
///
/// Waits for a termination signal and then calls the pipeline's
/// `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use chat_ingest::{Config, IngestPipeline, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let pipeline = IngestPipeline::new(Config::default()).await?;
///     pipeline.start().await?;
///
///     // Run with automatic signal handling
///     run_with_shutdown(pipeline).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(pipeline: IngestPipeline) -> Result<()> {
    wait_for_signal().await;
    pipeline.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration can fail in restricted environments (containers,
    // tests); fall back to ctrl_c rather than refusing to run
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!(signal = "SIGTERM", "termination signal received"),
                _ = sigint.recv() => tracing::info!(signal = "SIGINT", "termination signal received"),
            }
        }
        (sigterm, sigint) => {
            if let Err(e) = sigterm.and(sigint) {
                tracing::warn!(error = %e, "unix signal registration failed, falling back to ctrl_c");
            }
            wait_for_ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!(signal = "ctrl_c", "termination signal received"),
        Err(e) => {
            // Nothing left to wait on; let the caller shut down immediately
            tracing::error!(error = %e, "cannot listen for ctrl_c, proceeding to shutdown");
        }
    }
}

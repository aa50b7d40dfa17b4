//! Ingestion pipeline handle split into focused submodules.
//!
//! The `IngestPipeline` struct and its methods are organized by domain:
//! - [`admission`] - Submission intake and validation
//! - [`download`] - Claim-driven download worker pool
//! - [`lifecycle`] - Startup, recovery, and shutdown coordination
//!
//! The download pool and the orchestrator are independent subsystems that
//! communicate only through the task store and the stage directories; the
//! pipeline handle wires them up and owns the shared cancellation token.

mod admission;
mod download;
mod lifecycle;

pub use admission::NewSubmission;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::db::Database;
use crate::dirs::StageDirs;
use crate::error::Result;
use crate::notifier::{NoopSink, NotificationSink, WebhookSink};
use crate::source::{HttpRemoteSource, RemoteSource};
use crate::stages::{
    ArchiveExtractor, ConvertProcessor, ExtractProcessor, FingerprintLineStore, StoreProcessor,
    TextConverter,
};
use crate::types::{Event, StatusCounts, TaskId, TaskInfo};

/// Main pipeline handle (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct IngestPipeline {
    /// Task store (public so embedders and integration tests can query)
    pub db: Arc<Database>,
    /// Configuration
    pub(crate) config: Arc<Config>,
    /// Stage directory layout
    pub(crate) dirs: Arc<StageDirs>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Remote byte source used by the download pool
    pub(crate) source: Arc<dyn RemoteSource>,
    /// Extract stage processor
    pub(crate) extractor: Arc<dyn ExtractProcessor>,
    /// Convert stage processor
    pub(crate) converter: Arc<dyn ConvertProcessor>,
    /// Store stage processor
    pub(crate) store: Arc<dyn StoreProcessor>,
    /// Notification sink
    pub(crate) sink: Arc<dyn NotificationSink>,
    /// Top-level cancellation signal shared by all loops
    pub(crate) cancel: CancellationToken,
    /// Whether new submissions are accepted (false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Orchestrator-to-notifier completion signal
    pub(crate) notify: Arc<Notify>,
    /// Handles of the spawned loops, populated by start()
    pub(crate) handles: Arc<tokio::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

impl IngestPipeline {
    /// Create a pipeline with the built-in components
    ///
    /// Uses the HTTP remote source, the multi-format archive extractor, the
    /// text converter, the fingerprint line store, and the webhook sink
    /// when one is configured (a logging no-op sink otherwise).
    pub async fn new(config: Config) -> Result<Self> {
        let sink: Arc<dyn NotificationSink> = match &config.notifier.webhook {
            Some(webhook) => Arc::new(WebhookSink::new(webhook.clone())),
            None => {
                tracing::warn!("no notification webhook configured, completions will only be logged");
                Arc::new(NoopSink)
            }
        };

        Self::with_source_and_sink(config, Arc::new(HttpRemoteSource::new()), sink).await
    }

    /// Create a pipeline with the built-in stage processors but a custom
    /// byte source and notification sink
    ///
    /// This is the constructor for front-ends whose uploads and deliveries
    /// do not speak plain HTTP (or for tests exercising the whole pipeline
    /// against in-process doubles).
    pub async fn with_source_and_sink(
        config: Config,
        source: Arc<dyn RemoteSource>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        let dirs = StageDirs::new(&config.paths.root);
        dirs.ensure().await?;

        let db = Arc::new(Database::new(&config.persistence.database_path).await?);

        let extractor = Arc::new(ArchiveExtractor::new(dirs.spool().to_path_buf()));
        let store = Arc::new(FingerprintLineStore::new(
            db.clone(),
            dirs.store().to_path_buf(),
        ));

        Self::assemble(
            config,
            dirs,
            db,
            source,
            extractor,
            Arc::new(TextConverter),
            store,
            sink,
        )
        .await
    }

    /// Create a pipeline with custom collaborators
    ///
    /// Embedders use this to supply their own byte source, stage
    /// processors, or delivery sink; everything else (store, directories,
    /// events, lifecycle) stays the same.
    #[allow(clippy::too_many_arguments)]
    pub async fn with_components(
        config: Config,
        source: Arc<dyn RemoteSource>,
        extractor: Arc<dyn ExtractProcessor>,
        converter: Arc<dyn ConvertProcessor>,
        store: Arc<dyn StoreProcessor>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        let dirs = StageDirs::new(&config.paths.root);
        dirs.ensure().await?;

        let db = Arc::new(Database::new(&config.persistence.database_path).await?);

        Self::assemble(config, dirs, db, source, extractor, converter, store, sink).await
    }

    #[allow(clippy::too_many_arguments)]
    async fn assemble(
        config: Config,
        dirs: StageDirs,
        db: Arc<Database>,
        source: Arc<dyn RemoteSource>,
        extractor: Arc<dyn ExtractProcessor>,
        converter: Arc<dyn ConvertProcessor>,
        store: Arc<dyn StoreProcessor>,
        sink: Arc<dyn NotificationSink>,
    ) -> Result<Self> {
        // Mark the session live for unclean-shutdown detection
        db.set_clean_start().await?;

        // Buffered so a slow subscriber does not stall the pipeline
        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);

        Ok(Self {
            db,
            config: Arc::new(config),
            dirs: Arc::new(dirs),
            event_tx,
            source,
            extractor,
            converter,
            store,
            sink,
            cancel: CancellationToken::new(),
            accepting_new: Arc::new(AtomicBool::new(true)),
            notify: Arc::new(Notify::new()),
            handles: Arc::new(tokio::sync::Mutex::new(Vec::new())),
        })
    }

    /// Subscribe to pipeline events
    ///
    /// Multiple subscribers are supported; each receives all events
    /// independently. A subscriber that falls more than 1000 events behind
    /// receives a `RecvError::Lagged`.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// The pipeline configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Per-status task counts
    pub async fn stats(&self) -> Result<StatusCounts> {
        self.db.count_by_status().await
    }

    /// Snapshot of one task
    pub async fn task(&self, id: TaskId) -> Result<Option<TaskInfo>> {
        Ok(self.db.get_task(id).await?.map(TaskInfo::from))
    }

    /// Emit an event to all subscribers
    ///
    /// If there are no active subscribers the event is silently dropped;
    /// the pipeline never depends on being observed.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}

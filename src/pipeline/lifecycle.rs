//! Startup, recovery, and shutdown coordination.

use std::sync::atomic::Ordering;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::notifier::Notifier;
use crate::orchestrator::Orchestrator;
use crate::recovery::run_recovery;
use crate::types::Event;

use super::IngestPipeline;
use super::download::DownloadPool;

impl IngestPipeline {
    /// Start the pipeline loops
    ///
    /// Runs startup recovery first, then spawns the download workers, the
    /// orchestrator, and the notifier. Returns once everything is running;
    /// the loops live until [`shutdown`](Self::shutdown).
    pub async fn start(&self) -> Result<()> {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            return Err(Error::Other("pipeline already started".into()));
        }

        // Recovery reconciles in-flight state before any loop can race it
        let report = run_recovery(&self.db, &self.dirs).await?;
        if report.reset_to_pending > 0 {
            info!(
                reset = report.reset_to_pending,
                "recovered interrupted downloads"
            );
        }

        let pool = DownloadPool {
            db: self.db.clone(),
            config: self.config.clone(),
            dirs: self.dirs.clone(),
            source: self.source.clone(),
            event_tx: self.event_tx.clone(),
            cancel: self.cancel.clone(),
        };
        handles.extend(pool.spawn_workers());

        let orchestrator = Orchestrator::new(
            self.db.clone(),
            self.dirs.clone(),
            self.config.clone(),
            self.extractor.clone(),
            self.converter.clone(),
            self.store.clone(),
            self.event_tx.clone(),
            self.notify.clone(),
            self.cancel.clone(),
        );
        handles.push(tokio::spawn(orchestrator.run()));

        let notifier = Notifier::new(
            self.db.clone(),
            self.sink.clone(),
            self.config.clone(),
            self.event_tx.clone(),
            self.notify.clone(),
            self.cancel.clone(),
        );
        handles.push(tokio::spawn(notifier.run()));

        info!(
            workers = self.config.download.workers,
            root = %self.dirs.root().display(),
            "pipeline started"
        );

        Ok(())
    }

    /// Gracefully shut down the pipeline
    ///
    /// 1. Stops accepting new submissions
    /// 2. Signals cancellation; workers finish their current step
    /// 3. Waits for the loops with a timeout
    /// 4. Marks the shutdown clean in the store
    ///
    /// A task abandoned mid-download stays in DOWNLOADING and is
    /// reconciled by recovery on the next start.
    pub async fn shutdown(&self) -> Result<()> {
        info!("initiating graceful shutdown");

        // 1. Stop accepting new submissions
        self.accepting_new.store(false, Ordering::SeqCst);

        // 2. One top-level signal terminates all three loops cooperatively
        self.cancel.cancel();

        // 3. Wait for the loops to wind down
        let shutdown_timeout = std::time::Duration::from_secs(30);
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            match tokio::time::timeout(shutdown_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "pipeline loop panicked during shutdown"),
                Err(_) => warn!("timeout waiting for a pipeline loop, proceeding with shutdown"),
            }
        }

        // 4. Mark clean shutdown in the store
        if let Err(e) = self.db.set_clean_shutdown().await {
            error!(error = %e, "failed to mark clean shutdown");
            // Continue; the next start will just run a full reconciliation
        }

        self.emit_event(Event::Shutdown);
        info!("graceful shutdown complete");
        Ok(())
    }
}

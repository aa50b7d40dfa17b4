//! Claim-driven download worker pool.
//!
//! A fixed number of identical workers coordinate solely through the task
//! store's atomic claim: each worker claims one PENDING task, fetches its
//! bytes into the spool, verifies them, routes the file into the stage
//! directory its kind dictates, and records the result. At most `workers`
//! tasks are DOWNLOADING at any instant because claims are the only way in.
//!
//! Retries are persisted: the attempt counter lives on the task row, so a
//! crash between attempts keeps the budget honest across restarts.

use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::db::{Database, Task};
use crate::dirs::StageDirs;
use crate::error::{DatabaseError, Error, FetchError, Result};
use crate::retry::{IsRetryable, add_jitter, delay_for_attempt};
use crate::source::RemoteSource;
use crate::types::Event;
use crate::utils::unique_path;

/// The download worker pool; cloned into each spawned worker
#[derive(Clone)]
pub(crate) struct DownloadPool {
    pub(crate) db: Arc<Database>,
    pub(crate) config: Arc<Config>,
    pub(crate) dirs: Arc<StageDirs>,
    pub(crate) source: Arc<dyn RemoteSource>,
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    pub(crate) cancel: CancellationToken,
}

impl DownloadPool {
    /// Spawn the configured number of workers
    pub(crate) fn spawn_workers(&self) -> Vec<tokio::task::JoinHandle<()>> {
        (0..self.config.download.workers)
            .map(|worker| {
                let pool = self.clone();
                tokio::spawn(async move { pool.worker_loop(worker).await })
            })
            .collect()
    }

    /// One worker: claim, download, route, repeat
    async fn worker_loop(self, worker: usize) {
        info!(worker, "download worker started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.db.claim_pending(1).await {
                Ok(claimed) if !claimed.is_empty() => {
                    for task in claimed {
                        self.process_task(task, worker).await;
                    }
                }
                Ok(_) => {
                    // Nothing pending; idle until the next poll
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.download.poll_interval) => {}
                    }
                }
                Err(Error::Database(DatabaseError::Contention(msg))) => {
                    debug!(worker, msg, "claim contention, backing off");
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(std::time::Duration::from_millis(200)) => {}
                    }
                }
                Err(e) => {
                    // Anything else from the store is fatal persistence
                    // trouble; take the whole pipeline down
                    error!(worker, error = %e, "task store failure, aborting pipeline");
                    self.cancel.cancel();
                    break;
                }
            }
        }

        info!(worker, "download worker stopped");
    }

    /// Drive one claimed task to DOWNLOADED or FAILED
    ///
    /// On shutdown mid-attempt the task is left in DOWNLOADING; startup
    /// recovery resets it to PENDING.
    async fn process_task(&self, task: Task, worker: usize) {
        let id = task.task_id();
        self.emit(Event::DownloadStarted { id, worker });

        let max_attempts = self.config.download.retry.max_attempts;

        loop {
            match self.attempt(&task).await {
                Ok(final_path) => {
                    let recorded = self
                        .db
                        .mark_downloaded(id, &final_path.to_string_lossy())
                        .await;
                    match recorded {
                        Ok(()) => {
                            info!(task_id = id.0, worker, path = %final_path.display(), "download complete");
                            self.emit(Event::TaskDownloaded {
                                id,
                                path: final_path,
                            });
                        }
                        Err(e) => {
                            error!(task_id = id.0, error = %e, "failed to record download")
                        }
                    }
                    return;
                }
                Err(e) => {
                    // Drop whatever the failed attempt left in the spool
                    let spool = self.dirs.spool_path(id, &task.file_name);
                    let _ = tokio::fs::remove_file(&spool).await;

                    if self.cancel.is_cancelled() {
                        warn!(task_id = id.0, "shutdown during download, leaving for recovery");
                        return;
                    }

                    let kind = e.kind();
                    let message = e.to_string();
                    let attempts = match self.db.record_retry(id, kind, &message).await {
                        Ok(count) => count,
                        Err(store_err) => {
                            error!(task_id = id.0, error = %store_err, "failed to record retry");
                            return;
                        }
                    };

                    if !e.is_retryable() || attempts >= max_attempts {
                        warn!(task_id = id.0, attempts, error = %e, "download failed terminally");
                        if let Err(store_err) = self.db.mark_failed(id, kind, &message).await {
                            error!(task_id = id.0, error = %store_err, "failed to mark task failed");
                        }
                        self.emit(Event::DownloadFailed {
                            id,
                            error: message,
                        });
                        return;
                    }

                    warn!(
                        task_id = id.0,
                        attempt = attempts,
                        max_attempts,
                        error = %e,
                        "download attempt failed, backing off"
                    );
                    self.emit(Event::DownloadRetrying {
                        id,
                        attempt: attempts,
                        error: message,
                    });

                    let mut delay = delay_for_attempt(&self.config.download.retry, attempts);
                    if self.config.download.retry.jitter {
                        delay = add_jitter(delay);
                    }

                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            warn!(task_id = id.0, "shutdown during backoff, leaving for recovery");
                            return;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// One fetch attempt: spool, verify, route
    async fn attempt(&self, task: &Task) -> Result<PathBuf> {
        let id = task.task_id();
        let spool = self.dirs.spool_path(id, &task.file_name);

        self.source.fetch(&task.remote_handle, &spool).await?;

        // Success criteria: the file exists, its size matches the declared
        // size when one was given, and the bytes read back
        let metadata = tokio::fs::metadata(&spool).await.map_err(|_| {
            Error::Fetch(FetchError::MissingFile {
                path: spool.clone(),
            })
        })?;

        if let Some(declared) = task.declared_size {
            let declared = declared.max(0) as u64;
            if metadata.len() != declared {
                return Err(Error::Fetch(FetchError::SizeMismatch {
                    path: spool.clone(),
                    declared,
                    actual: metadata.len(),
                }));
            }
        }

        verify_readable(&spool).await?;

        let kind = task.file_kind().ok_or_else(|| {
            Error::Other(format!("task {} has a corrupted kind column", task.id))
        })?;

        // Route by kind; the destination name is computed deterministically
        // and the rename is atomic within the root filesystem, so a retry
        // after a crash either finds the spool file or the routed file
        let dest = unique_path(self.dirs.route(kind), &task.file_name)?;
        tokio::fs::rename(&spool, &dest).await?;

        Ok(dest)
    }

    fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}

/// Confirm the fetched bytes can actually be read back
async fn verify_readable(path: &std::path::Path) -> Result<()> {
    use tokio::io::AsyncReadExt;

    let mut file = tokio::fs::File::open(path).await.map_err(|e| {
        Error::Fetch(FetchError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    })?;

    let mut probe = [0u8; 4096];
    file.read(&mut probe).await.map_err(|e| {
        Error::Fetch(FetchError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    })?;

    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewTask;
    use crate::types::{FileKind, TaskStatus};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::{NamedTempFile, TempDir};

    /// Source double backed by a byte map, with an optional failure budget
    struct ScriptedSource {
        payloads: std::collections::HashMap<String, Vec<u8>>,
        /// Number of initial fetches that fail with a transient error
        failures_before_success: AtomicU32,
    }

    impl ScriptedSource {
        fn with(payloads: &[(&str, &[u8])]) -> Self {
            Self {
                payloads: payloads
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_vec()))
                    .collect(),
                failures_before_success: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl RemoteSource for ScriptedSource {
        async fn fetch(&self, handle: &str, dest: &Path) -> Result<()> {
            if self
                .failures_before_success
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "simulated transient failure",
                )));
            }

            match self.payloads.get(handle) {
                Some(bytes) => {
                    tokio::fs::write(dest, bytes).await?;
                    Ok(())
                }
                None => Err(Error::Fetch(FetchError::HandleRejected {
                    handle: handle.to_string(),
                    reason: "unknown handle".into(),
                })),
            }
        }
    }

    struct Setup {
        pool: DownloadPool,
        db: Arc<Database>,
        dirs: Arc<StageDirs>,
        _db_file: NamedTempFile,
        _root: TempDir,
    }

    async fn setup(source: ScriptedSource) -> Setup {
        let db_file = NamedTempFile::new().unwrap();
        let db = Arc::new(Database::new(db_file.path()).await.unwrap());
        let root = TempDir::new().unwrap();
        let dirs = Arc::new(StageDirs::new(root.path()));
        dirs.ensure().await.unwrap();

        let mut config = Config::default();
        config.download.retry.initial_delay = std::time::Duration::from_millis(5);
        config.download.retry.jitter = false;

        let (event_tx, _rx) = tokio::sync::broadcast::channel(64);
        let pool = DownloadPool {
            db: db.clone(),
            config: Arc::new(config),
            dirs: dirs.clone(),
            source: Arc::new(source),
            event_tx,
            cancel: CancellationToken::new(),
        };

        Setup {
            pool,
            db,
            dirs,
            _db_file: db_file,
            _root: root,
        }
    }

    async fn claimed_task(db: &Database, name: &str, kind: FileKind, size: Option<u64>) -> Task {
        db.insert_task(&NewTask {
            submitter_id: 1,
            chat_id: 2,
            file_name: name.to_string(),
            declared_size: size,
            kind,
            remote_handle: format!("handle-{name}"),
        })
        .await
        .unwrap();
        db.claim_pending(1).await.unwrap().remove(0)
    }

    #[tokio::test]
    async fn archive_download_lands_in_all() {
        let s = setup(ScriptedSource::with(&[("handle-dump.zip", b"archive bytes")])).await;
        let task = claimed_task(&s.db, "dump.zip", FileKind::Archive, Some(13)).await;
        let id = task.task_id();

        s.pool.process_task(task, 0).await;

        let stored = s.db.get_task(id).await.unwrap().unwrap();
        assert_eq!(stored.task_status(), TaskStatus::Downloaded);
        let routed = s.dirs.all().join("dump.zip");
        assert_eq!(stored.local_path.as_deref(), routed.to_str());
        assert_eq!(std::fs::read(&routed).unwrap(), b"archive bytes");
        assert!(
            crate::dirs::dir_is_empty(s.dirs.spool()).unwrap(),
            "spool must be empty after routing"
        );
    }

    #[tokio::test]
    async fn text_download_lands_in_txt() {
        let s = setup(ScriptedSource::with(&[("handle-note.txt", b"plain text")])).await;
        let task = claimed_task(&s.db, "note.txt", FileKind::Text, None).await;
        let id = task.task_id();

        s.pool.process_task(task, 0).await;

        let stored = s.db.get_task(id).await.unwrap().unwrap();
        assert_eq!(stored.task_status(), TaskStatus::Downloaded);
        assert!(s.dirs.txt().join("note.txt").exists());
    }

    #[tokio::test]
    async fn size_mismatch_fails_without_retry() {
        // Declared 5 bytes, served 12: wrong bytes stay wrong, so one attempt
        let s = setup(ScriptedSource::with(&[("handle-short.txt", b"twelve bytes")])).await;
        let task = claimed_task(&s.db, "short.txt", FileKind::Text, Some(5)).await;
        let id = task.task_id();

        s.pool.process_task(task, 0).await;

        let stored = s.db.get_task(id).await.unwrap().unwrap();
        assert_eq!(stored.task_status(), TaskStatus::Failed);
        assert_eq!(stored.error_kind.as_deref(), Some("permanent_io"));
        assert_eq!(stored.retry_count, 1, "permanent errors burn exactly one attempt");
    }

    #[tokio::test]
    async fn zero_byte_file_accepted_iff_declared_zero() {
        let s = setup(ScriptedSource::with(&[
            ("handle-empty-ok.txt", b""),
            ("handle-empty-bad.txt", b""),
        ]))
        .await;

        let ok = claimed_task(&s.db, "empty-ok.txt", FileKind::Text, Some(0)).await;
        let ok_id = ok.task_id();
        s.pool.process_task(ok, 0).await;
        assert_eq!(
            s.db.get_task(ok_id).await.unwrap().unwrap().task_status(),
            TaskStatus::Downloaded,
            "zero bytes with declared size zero is a valid download"
        );

        let bad = claimed_task(&s.db, "empty-bad.txt", FileKind::Text, Some(100)).await;
        let bad_id = bad.task_id();
        s.pool.process_task(bad, 0).await;
        let stored = s.db.get_task(bad_id).await.unwrap().unwrap();
        assert_eq!(stored.task_status(), TaskStatus::Failed);
        assert_eq!(stored.error_kind.as_deref(), Some("permanent_io"));
    }

    #[tokio::test]
    async fn transient_failures_retry_then_succeed() {
        let source = ScriptedSource {
            payloads: [("handle-flaky.txt".to_string(), b"eventually".to_vec())]
                .into_iter()
                .collect(),
            failures_before_success: AtomicU32::new(2),
        };
        let s = setup(source).await;
        let task = claimed_task(&s.db, "flaky.txt", FileKind::Text, None).await;
        let id = task.task_id();

        s.pool.process_task(task, 0).await;

        let stored = s.db.get_task(id).await.unwrap().unwrap();
        assert_eq!(stored.task_status(), TaskStatus::Downloaded);
        assert_eq!(stored.retry_count, 2, "both failed attempts are recorded");
    }

    #[tokio::test]
    async fn retry_budget_exhaustion_fails_the_task() {
        let source = ScriptedSource {
            payloads: [("handle-dead.txt".to_string(), b"never".to_vec())]
                .into_iter()
                .collect(),
            failures_before_success: AtomicU32::new(99),
        };
        let s = setup(source).await;
        let task = claimed_task(&s.db, "dead.txt", FileKind::Text, None).await;
        let id = task.task_id();

        s.pool.process_task(task, 0).await;

        let stored = s.db.get_task(id).await.unwrap().unwrap();
        assert_eq!(stored.task_status(), TaskStatus::Failed);
        assert_eq!(
            stored.retry_count, 3,
            "default budget is three attempts total"
        );
        assert_eq!(stored.error_kind.as_deref(), Some("transient_io"));
    }

    #[tokio::test]
    async fn colliding_filenames_get_suffixed_destinations() {
        let s = setup(ScriptedSource::with(&[
            ("handle-dup.txt", b"second copy"),
        ]))
        .await;

        // A file with the same name already sits in txt/
        std::fs::write(s.dirs.txt().join("dup.txt"), b"first copy").unwrap();

        let task = claimed_task(&s.db, "dup.txt", FileKind::Text, None).await;
        let id = task.task_id();
        s.pool.process_task(task, 0).await;

        let stored = s.db.get_task(id).await.unwrap().unwrap();
        let suffixed = s.dirs.txt().join("dup (1).txt");
        assert_eq!(stored.local_path.as_deref(), suffixed.to_str());
        assert_eq!(std::fs::read(&suffixed).unwrap(), b"second copy");
        assert_eq!(
            std::fs::read(s.dirs.txt().join("dup.txt")).unwrap(),
            b"first copy",
            "both files preserved"
        );
    }

    #[tokio::test]
    async fn rejected_handle_fails_terminally() {
        let s = setup(ScriptedSource::with(&[])).await;
        let task = claimed_task(&s.db, "gone.txt", FileKind::Text, None).await;
        let id = task.task_id();

        s.pool.process_task(task, 0).await;

        let stored = s.db.get_task(id).await.unwrap().unwrap();
        assert_eq!(stored.task_status(), TaskStatus::Failed);
        assert_eq!(stored.error_kind.as_deref(), Some("permanent_io"));
    }
}

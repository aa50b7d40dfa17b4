//! Sequential pipeline orchestrator
//!
//! A single cooperative loop with no internal parallelism. Every tick runs
//! extract, convert, and store strictly in that order, each bounded by a
//! per-stage deadline, then sweeps for completed tasks and pokes the
//! notifier. The three downstream processors share resource budgets (memory
//! for sorting, CPU for decompression), so at most one of them runs at any
//! instant — the loop structure enforces that without locks, and directory
//! listings make pipeline state observable at any point.
//!
//! A stage whose input directory is empty is skipped, not failed. A stage
//! failure or timeout is logged and counted; the tick continues so items
//! already further down the pipeline keep moving.

use std::sync::Arc;
use tokio::sync::{Notify, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::db::Database;
use crate::dirs::{StageDirs, dir_is_empty, list_files};
use crate::error::{Result, StageError};
use crate::stages::{ConvertProcessor, ExtractProcessor, StageOutcome, StoreProcessor};
use crate::types::{Event, FileKind, PipelineStage, TaskStatus};

/// The tick-driven coordinator of the downstream pipeline
pub(crate) struct Orchestrator {
    db: Arc<Database>,
    dirs: Arc<StageDirs>,
    config: Arc<Config>,
    extractor: Arc<dyn ExtractProcessor>,
    converter: Arc<dyn ConvertProcessor>,
    store: Arc<dyn StoreProcessor>,
    event_tx: broadcast::Sender<Event>,
    notify: Arc<Notify>,
    cancel: CancellationToken,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        db: Arc<Database>,
        dirs: Arc<StageDirs>,
        config: Arc<Config>,
        extractor: Arc<dyn ExtractProcessor>,
        converter: Arc<dyn ConvertProcessor>,
        store: Arc<dyn StoreProcessor>,
        event_tx: broadcast::Sender<Event>,
        notify: Arc<Notify>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            db,
            dirs,
            config,
            extractor,
            converter,
            store,
            event_tx,
            notify,
            cancel,
        }
    }

    /// Run the tick loop until cancelled
    ///
    /// Ticks never overlap: the next sleep only starts after the previous
    /// tick has fully finished, so a long stage simply delays the next tick
    /// instead of re-entering it.
    pub(crate) async fn run(self) {
        info!(
            tick_interval = ?self.config.orchestrator.tick_interval,
            "orchestrator started"
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.orchestrator.tick_interval) => {}
            }

            self.run_tick().await;
        }

        info!("orchestrator stopped");
    }

    /// One full tick: extract, convert, store, completion sweep, notify
    pub(crate) async fn run_tick(&self) {
        self.run_stage(PipelineStage::Extract, self.dirs.all(), {
            self.extractor.extract(
                self.dirs.all(),
                self.dirs.pass(),
                self.dirs.done(),
                self.dirs.errors(),
            )
        })
        .await;

        self.run_stage(PipelineStage::Convert, self.dirs.pass(), {
            self.converter
                .convert(self.dirs.pass(), self.dirs.txt(), self.dirs.errors())
        })
        .await;

        self.run_stage(PipelineStage::Store, self.dirs.txt(), {
            self.store.store(self.dirs.txt(), self.dirs.errors())
        })
        .await;

        match self.completion_sweep().await {
            Ok(0) => {}
            Ok(completed) => info!(completed, "completion sweep marked tasks done"),
            Err(e) if e.kind() == "store_fatal" => {
                error!(error = %e, "task store failure in completion sweep, aborting pipeline");
                self.cancel.cancel();
            }
            Err(e) => error!(error = %e, "completion sweep failed"),
        }

        // New completions may exist; the notifier decides whether to act
        self.notify.notify_one();
    }

    /// Run one stage against its input directory, bounded by its deadline
    async fn run_stage<F>(&self, stage: PipelineStage, input_dir: &std::path::Path, work: F)
    where
        F: std::future::Future<Output = Result<StageOutcome>>,
    {
        let pending = match list_files(input_dir) {
            Ok(files) => files.len(),
            Err(e) => {
                error!(%stage, error = %e, "failed to inspect stage input directory");
                return;
            }
        };

        if pending == 0 {
            debug!(%stage, "input directory empty, stage skipped");
            return;
        }

        self.emit(Event::StageStarted { stage, pending });
        let deadline = self.config.orchestrator.timeout_for(stage);

        match tokio::time::timeout(deadline, work).await {
            Ok(Ok(outcome)) => {
                info!(
                    %stage,
                    processed = outcome.processed,
                    failed = outcome.failed,
                    "stage complete"
                );
                self.emit(Event::StageComplete {
                    stage,
                    processed: outcome.processed,
                    failed: outcome.failed,
                });
            }
            Ok(Err(e)) => {
                warn!(%stage, error = %e, "stage failed");
                self.emit(Event::StageFailed {
                    stage,
                    error: e.to_string(),
                });
            }
            Err(_) => {
                let e = StageError::Timeout {
                    stage,
                    elapsed_secs: deadline.as_secs(),
                };
                warn!(%stage, deadline = ?deadline, "stage exceeded its deadline");
                self.emit(Event::StageFailed {
                    stage,
                    error: e.to_string(),
                });
            }
        }
    }

    /// Mark DOWNLOADED tasks whose files have passed through the pipeline
    ///
    /// A task completes when its downloaded file is absent from every stage
    /// directory including `errors/` (presence there means failure, not
    /// success). Extracted text cannot be attributed back to its archive by
    /// filename, so archive tasks use the documented coarse policy: the
    /// archive has left `all/` and `txt/` is drained. Interleaved uploads
    /// can therefore mis-attribute a completion; the store stages are
    /// idempotent, which keeps that harmless.
    async fn completion_sweep(&self) -> Result<usize> {
        let in_flight = self.db.list_in_flight().await?;
        if in_flight.is_empty() {
            return Ok(0);
        }

        let txt_empty = dir_is_empty(self.dirs.txt())?;
        let mut completed = 0usize;

        for task in in_flight {
            if task.task_status() != TaskStatus::Downloaded {
                continue;
            }

            let Some(name) = task.local_file_name() else {
                warn!(task_id = task.id, "downloaded task has no local path, skipping");
                continue;
            };

            if self.dirs.errors().join(&name).exists() {
                debug!(task_id = task.id, file = %name, "file in errors/, not completing");
                continue;
            }

            let finished = match task.file_kind() {
                Some(FileKind::Text) => self.dirs.locate(&name).is_none(),
                Some(FileKind::Archive) => {
                    !self.dirs.all().join(&name).exists() && txt_empty
                }
                None => {
                    warn!(task_id = task.id, kind = task.kind, "corrupted kind column, skipping");
                    continue;
                }
            };

            if finished {
                self.db.mark_completed(task.task_id()).await?;
                self.emit(Event::TaskCompleted { id: task.task_id() });
                completed += 1;
            }
        }

        Ok(completed)
    }

    fn emit(&self, event: Event) {
        // send() fails only when nobody subscribes, which is fine
        self.event_tx.send(event).ok();
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewTask;
    use crate::types::TaskId;
    use async_trait::async_trait;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::{NamedTempFile, TempDir};
    use tokio::sync::Mutex;

    /// Processor double that records its invocation and optionally dawdles
    struct RecordingProcessor {
        name: &'static str,
        calls: Arc<Mutex<Vec<&'static str>>>,
        delay: Duration,
        /// Files to delete from the input dir on each call (simulates
        /// consuming the input)
        consume_input: bool,
    }

    impl RecordingProcessor {
        async fn record(&self, input_dir: &Path) -> Result<StageOutcome> {
            self.calls.lock().await.push(self.name);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let mut processed = 0;
            if self.consume_input {
                for file in list_files(input_dir)? {
                    fs::remove_file(file)?;
                    processed += 1;
                }
            }
            Ok(StageOutcome {
                processed,
                failed: 0,
            })
        }
    }

    #[async_trait]
    impl ExtractProcessor for RecordingProcessor {
        async fn extract(
            &self,
            all_dir: &Path,
            _pass_dir: &Path,
            _done_dir: &Path,
            _errors_dir: &Path,
        ) -> Result<StageOutcome> {
            self.record(all_dir).await
        }
    }

    #[async_trait]
    impl ConvertProcessor for RecordingProcessor {
        async fn convert(
            &self,
            pass_dir: &Path,
            _txt_dir: &Path,
            _errors_dir: &Path,
        ) -> Result<StageOutcome> {
            self.record(pass_dir).await
        }
    }

    #[async_trait]
    impl StoreProcessor for RecordingProcessor {
        async fn store(&self, txt_dir: &Path, _errors_dir: &Path) -> Result<StageOutcome> {
            self.record(txt_dir).await
        }
    }

    struct Harness {
        orchestrator: Orchestrator,
        dirs: Arc<StageDirs>,
        db: Arc<Database>,
        calls: Arc<Mutex<Vec<&'static str>>>,
        events: broadcast::Receiver<Event>,
        _root: TempDir,
        _db_file: NamedTempFile,
    }

    async fn harness(config: Config, delays: [Duration; 3]) -> Harness {
        let root = TempDir::new().unwrap();
        let dirs = Arc::new(StageDirs::new(root.path()));
        dirs.ensure().await.unwrap();

        let db_file = NamedTempFile::new().unwrap();
        let db = Arc::new(Database::new(db_file.path()).await.unwrap());

        let calls = Arc::new(Mutex::new(Vec::new()));
        let (event_tx, events) = broadcast::channel(64);

        let make = |name, delay| RecordingProcessor {
            name,
            calls: calls.clone(),
            delay,
            consume_input: true,
        };

        let orchestrator = Orchestrator::new(
            db.clone(),
            dirs.clone(),
            Arc::new(config),
            Arc::new(make("extract", delays[0])),
            Arc::new(make("convert", delays[1])),
            Arc::new(make("store", delays[2])),
            event_tx,
            Arc::new(Notify::new()),
            CancellationToken::new(),
        );

        Harness {
            orchestrator,
            dirs,
            db,
            calls,
            events,
            _root: root,
            _db_file: db_file,
        }
    }

    fn drain_events(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn tick_runs_stages_strictly_in_order() {
        let mut h = harness(Config::default(), [Duration::ZERO; 3]).await;

        fs::write(h.dirs.all().join("a.zip"), "x").unwrap();
        fs::write(h.dirs.pass().join("b.txt"), "x").unwrap();
        fs::write(h.dirs.txt().join("c.txt"), "x").unwrap();

        h.orchestrator.run_tick().await;

        assert_eq!(
            *h.calls.lock().await,
            vec!["extract", "convert", "store"],
            "stage order is fixed"
        );

        let events = drain_events(&mut h.events);
        let started: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                Event::StageStarted { stage, .. } => Some(*stage),
                _ => None,
            })
            .collect();
        assert_eq!(
            started,
            vec![
                PipelineStage::Extract,
                PipelineStage::Convert,
                PipelineStage::Store
            ]
        );
    }

    #[tokio::test]
    async fn empty_input_directories_skip_their_stages() {
        let h = harness(Config::default(), [Duration::ZERO; 3]).await;

        // only txt/ has content
        fs::write(h.dirs.txt().join("c.txt"), "x").unwrap();

        h.orchestrator.run_tick().await;

        assert_eq!(
            *h.calls.lock().await,
            vec!["store"],
            "stages with empty inputs must be skipped, not failed"
        );
    }

    #[tokio::test]
    async fn fully_empty_tick_invokes_nothing() {
        let h = harness(Config::default(), [Duration::ZERO; 3]).await;

        h.orchestrator.run_tick().await;

        assert!(h.calls.lock().await.is_empty());
    }

    #[tokio::test]
    async fn stage_timeout_is_reported_and_later_stages_still_run() {
        let mut config = Config::default();
        config.orchestrator.extract_timeout = Some(Duration::from_millis(20));

        let mut h = harness(config, [Duration::from_secs(5), Duration::ZERO, Duration::ZERO]).await;

        fs::write(h.dirs.all().join("pathological.zip"), "x").unwrap();
        fs::write(h.dirs.txt().join("c.txt"), "x").unwrap();

        h.orchestrator.run_tick().await;

        let calls = h.calls.lock().await.clone();
        assert!(calls.contains(&"extract"));
        assert!(
            calls.contains(&"store"),
            "a timed-out extract must not block the store stage"
        );

        let events = drain_events(&mut h.events);
        assert!(
            events.iter().any(|e| matches!(
                e,
                Event::StageFailed {
                    stage: PipelineStage::Extract,
                    ..
                }
            )),
            "timeout must surface as a stage failure event"
        );
    }

    // --- completion sweep ---

    async fn downloaded_task(h: &Harness, name: &str, kind: FileKind) -> TaskId {
        let id = h
            .db
            .insert_task(&NewTask {
                submitter_id: 1,
                chat_id: 2,
                file_name: name.to_string(),
                declared_size: None,
                kind,
                remote_handle: format!("handle-{name}"),
            })
            .await
            .unwrap();
        h.db.claim_pending(1).await.unwrap();
        let dir = match kind {
            FileKind::Archive => h.dirs.all(),
            FileKind::Text => h.dirs.txt(),
        };
        h.db
            .mark_downloaded(id, dir.join(name).to_str().unwrap())
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn text_task_completes_once_its_file_is_consumed() {
        let h = harness(Config::default(), [Duration::ZERO; 3]).await;
        let id = downloaded_task(&h, "note.txt", FileKind::Text).await;

        // File still present: not complete
        fs::write(h.dirs.txt().join("note.txt"), "x").unwrap();
        h.orchestrator.completion_sweep().await.unwrap();
        assert_eq!(
            h.db.get_task(id).await.unwrap().unwrap().task_status(),
            TaskStatus::Downloaded
        );

        // Consumed by the store stage: complete
        fs::remove_file(h.dirs.txt().join("note.txt")).unwrap();
        let completed = h.orchestrator.completion_sweep().await.unwrap();
        assert_eq!(completed, 1);
        assert_eq!(
            h.db.get_task(id).await.unwrap().unwrap().task_status(),
            TaskStatus::Completed
        );
    }

    #[tokio::test]
    async fn file_in_errors_blocks_completion() {
        let h = harness(Config::default(), [Duration::ZERO; 3]).await;
        let id = downloaded_task(&h, "bad.txt", FileKind::Text).await;

        // Consumed from txt/ but present in errors/: failure, not success
        fs::write(h.dirs.errors().join("bad.txt"), "x").unwrap();
        h.orchestrator.completion_sweep().await.unwrap();

        assert_eq!(
            h.db.get_task(id).await.unwrap().unwrap().task_status(),
            TaskStatus::Downloaded,
            "a file in errors/ must never count as completed"
        );
    }

    #[tokio::test]
    async fn archive_task_completes_when_extracted_and_pipeline_drained() {
        let h = harness(Config::default(), [Duration::ZERO; 3]).await;
        let id = downloaded_task(&h, "dump.zip", FileKind::Archive).await;

        // Archive extracted (moved to done/), but txt/ still has content
        fs::write(h.dirs.done().join("dump.zip"), "x").unwrap();
        fs::write(h.dirs.txt().join("dump_contents.txt"), "x").unwrap();
        h.orchestrator.completion_sweep().await.unwrap();
        assert_eq!(
            h.db.get_task(id).await.unwrap().unwrap().task_status(),
            TaskStatus::Downloaded,
            "archive completion waits for txt/ to drain"
        );

        fs::remove_file(h.dirs.txt().join("dump_contents.txt")).unwrap();
        let completed = h.orchestrator.completion_sweep().await.unwrap();
        assert_eq!(completed, 1);
        assert_eq!(
            h.db.get_task(id).await.unwrap().unwrap().task_status(),
            TaskStatus::Completed
        );
    }

    #[tokio::test]
    async fn archive_still_in_all_is_not_completed() {
        let h = harness(Config::default(), [Duration::ZERO; 3]).await;
        let id = downloaded_task(&h, "dump.zip", FileKind::Archive).await;

        fs::write(h.dirs.all().join("dump.zip"), "x").unwrap();
        h.orchestrator.completion_sweep().await.unwrap();

        assert_eq!(
            h.db.get_task(id).await.unwrap().unwrap().task_status(),
            TaskStatus::Downloaded
        );
    }

    #[tokio::test]
    async fn sweep_twice_is_idempotent() {
        let h = harness(Config::default(), [Duration::ZERO; 3]).await;
        let _id = downloaded_task(&h, "note.txt", FileKind::Text).await;

        let first = h.orchestrator.completion_sweep().await.unwrap();
        assert_eq!(first, 1);
        let second = h.orchestrator.completion_sweep().await.unwrap();
        assert_eq!(second, 0, "already-completed tasks are not swept again");
    }
}

//! Startup recovery
//!
//! Runs once before the download pool and orchestrator start, reconciling
//! in-flight task states with on-disk reality:
//!
//! - DOWNLOADING tasks were interrupted mid-fetch. Any partial spool file
//!   is discarded (bumping the retry count), and the task goes back to
//!   PENDING for a fresh claim.
//! - DOWNLOADED tasks need no action; their bytes already sit in a stage
//!   directory and the orchestrator picks them up on the next tick.
//!
//! Stage-directory files that match no known task are logged as orphans
//! and never deleted: the downstream store treats stage directories as
//! authoritative inputs and may hold state the task store does not.
//!
//! Re-running recovery on an already-recovered store is a no-op.

use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::db::Database;
use crate::dirs::{StageDirs, list_files};
use crate::error::Result;
use crate::types::TaskStatus;

/// What a recovery pass did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Interrupted downloads moved back to PENDING
    pub reset_to_pending: usize,
    /// Partial spool files discarded (each also bumped a retry counter)
    pub discarded_partials: usize,
    /// Stage-directory files matching no known task (logged, kept)
    pub orphans: Vec<PathBuf>,
}

/// Reconcile in-flight tasks with on-disk state
pub async fn run_recovery(db: &Database, dirs: &StageDirs) -> Result<RecoveryReport> {
    let unclean = db.was_unclean_shutdown().await?;
    if unclean {
        info!("previous session did not shut down cleanly, reconciling state");
    }

    let mut report = RecoveryReport::default();

    let in_flight = db.list_in_flight().await?;
    for task in &in_flight {
        match task.task_status() {
            TaskStatus::Downloading => {
                // Discard whatever the interrupted fetch left behind; the
                // id prefix makes the match exact even after sanitization
                let mut had_partial = false;
                for spool_file in list_files(dirs.spool())? {
                    let name = spool_file
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or("");
                    if name.starts_with(&format!("{}-", task.id)) {
                        tokio::fs::remove_file(&spool_file).await?;
                        had_partial = true;
                    }
                }

                if had_partial {
                    db.record_retry(
                        task.task_id(),
                        "transient_io",
                        "incomplete download discarded during recovery",
                    )
                    .await?;
                    report.discarded_partials += 1;
                }

                db.reset_to_pending(task.task_id()).await?;
                report.reset_to_pending += 1;

                info!(
                    task_id = task.id,
                    had_partial, "interrupted download reset to pending"
                );
            }
            TaskStatus::Downloaded => {
                // Bytes are in a stage directory; the orchestrator owns it
                // from here
            }
            other => {
                // list_in_flight filters by status, so this is unreachable
                // unless the store is corrupted
                warn!(task_id = task.id, status = %other, "unexpected status in in-flight list");
            }
        }
    }

    // Orphan scan over the directories whose filenames are task-owned
    // (pass/ and errors/ legitimately hold derived files)
    let known_names = db.list_known_file_names().await?;
    for dir in [dirs.all(), dirs.txt(), dirs.done()] {
        for file in list_files(dir)? {
            let name = file.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if !known_names.contains(name) {
                warn!(file = %file.display(), "stage directory file matches no known task, keeping");
                report.orphans.push(file);
            }
        }
    }

    info!(
        reset_to_pending = report.reset_to_pending,
        discarded_partials = report.discarded_partials,
        orphans = report.orphans.len(),
        "recovery complete"
    );

    Ok(report)
}

impl Database {
    /// File names every task's local path points at, for the orphan scan
    pub(crate) async fn list_known_file_names(&self) -> Result<HashSet<String>> {
        let paths: Vec<String> =
            sqlx::query_scalar("SELECT local_path FROM tasks WHERE local_path IS NOT NULL")
                .fetch_all(self.pool())
                .await
                .map_err(|e| {
                    crate::error::Error::Database(crate::error::DatabaseError::QueryFailed(
                        format!("Failed to list local paths: {}", e),
                    ))
                })?;

        Ok(paths
            .iter()
            .filter_map(|p| std::path::Path::new(p).file_name())
            .filter_map(|n| n.to_str())
            .map(str::to_string)
            .collect())
    }
}

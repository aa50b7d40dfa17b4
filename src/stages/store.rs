//! Built-in store stage: deduplicating line store.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::db::Database;
use crate::dirs::list_files;
use crate::error::Result;
use crate::utils::unique_path;

use super::{StageOutcome, StoreProcessor};

/// Name of the append-only output file inside the store directory
const STORE_FILE: &str = "lines.txt";

/// Drains `txt/` into an append-only line store, deduplicating by SHA-256
///
/// One fingerprint per absorbed line is persisted in the task database, so
/// a line is stored at most once even across restarts and re-runs — the
/// property that makes at-least-once delivery into the store harmless.
/// Empty lines are dropped.
pub struct FingerprintLineStore {
    db: Arc<Database>,
    output_dir: PathBuf,
}

impl FingerprintLineStore {
    /// Store absorbed lines under `output_dir` (created on first use)
    pub fn new(db: Arc<Database>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            db,
            output_dir: output_dir.into(),
        }
    }

    /// Path of the append-only output file
    pub fn output_file(&self) -> PathBuf {
        self.output_dir.join(STORE_FILE)
    }

    fn fingerprint(line: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(line.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    async fn absorb_file(&self, file: &Path) -> Result<(usize, usize)> {
        let content = tokio::fs::read_to_string(file).await?;

        let lines: Vec<&str> = content
            .lines()
            .map(str::trim_end)
            .filter(|l| !l.is_empty())
            .collect();

        let fingerprints: Vec<String> = lines.iter().map(|l| Self::fingerprint(l)).collect();
        let flags = self.db.insert_fingerprints_flags(&fingerprints).await?;

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let mut output = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.output_file())
            .await?;

        let mut absorbed = 0usize;
        for (line, is_new) in lines.iter().zip(flags) {
            if is_new {
                output.write_all(line.as_bytes()).await?;
                output.write_all(b"\n").await?;
                absorbed += 1;
            }
        }
        output.flush().await?;

        // The input is consumed only after its new lines are durably in the
        // output; a crash in between re-reads the file and the fingerprints
        // drop the duplicates
        tokio::fs::remove_file(file).await?;

        Ok((absorbed, lines.len()))
    }
}

#[async_trait]
impl StoreProcessor for FingerprintLineStore {
    async fn store(&self, txt_dir: &Path, errors_dir: &Path) -> Result<StageOutcome> {
        let mut outcome = StageOutcome::default();

        for file in list_files(txt_dir)? {
            match self.absorb_file(&file).await {
                Ok((absorbed, total)) => {
                    outcome.processed += 1;
                    info!(
                        file = %file.display(),
                        absorbed,
                        total,
                        "file drained into line store"
                    );
                }
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "store failed");
                    outcome.failed += 1;

                    let name = file
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or("unstored");
                    let error_dest = unique_path(errors_dir, name)?;
                    tokio::fs::rename(&file, &error_dest).await?;
                }
            }
        }

        Ok(outcome)
    }
}

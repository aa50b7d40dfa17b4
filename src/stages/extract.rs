//! Built-in extract stage: multi-format archive extraction.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::dirs::list_files;
use crate::error::Result;
use crate::extraction::{extract_archive, is_archive};
use crate::utils::unique_path;

use super::{ExtractProcessor, StageOutcome};

/// Extracts every archive in `all/` into `pass/`
///
/// Each archive is unpacked into a scratch directory first, then the
/// extracted files are moved flat into `pass/` under collision-suffixed
/// names. An extracted file that is itself an archive goes back into `all/`
/// instead, so nested archives are handled one tick later by the same
/// stage instead of by in-process recursion.
pub struct ArchiveExtractor {
    scratch_root: PathBuf,
}

impl ArchiveExtractor {
    /// `scratch_root` must be on the same filesystem as the stage
    /// directories (renames must stay atomic) and outside of them
    pub fn new(scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            scratch_root: scratch_root.into(),
        }
    }

    /// Unpack one archive and distribute its contents
    async fn process_one(
        &self,
        archive: &Path,
        all_dir: &Path,
        pass_dir: &Path,
        done_dir: &Path,
    ) -> Result<()> {
        let stem = archive
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("archive");
        let scratch = self.scratch_root.join(format!("extract-{stem}"));

        // A leftover scratch dir from a crashed run holds partial output;
        // start clean
        if scratch.exists() {
            tokio::fs::remove_dir_all(&scratch).await?;
        }
        tokio::fs::create_dir_all(&scratch).await?;

        let archive_owned = archive.to_path_buf();
        let scratch_owned = scratch.clone();
        let extracted = tokio::task::spawn_blocking(move || {
            extract_archive(&archive_owned, &scratch_owned)
        })
        .await
        .map_err(|e| crate::error::Error::Other(format!("extraction task panicked: {e}")))?;

        let extracted = match extracted {
            Ok(files) => files,
            Err(e) => {
                let _ = tokio::fs::remove_dir_all(&scratch).await;
                return Err(e);
            }
        };

        for file in &extracted {
            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("extracted");

            // Nested archives re-enter the extract queue; plain files go on
            // to the convert stage
            let target_dir = if is_archive(file) { all_dir } else { pass_dir };
            let dest = unique_path(target_dir, name)?;
            tokio::fs::rename(file, &dest).await?;
        }

        let _ = tokio::fs::remove_dir_all(&scratch).await;

        // Ownership of the archive transfers out of all/ by rename
        let archive_name = archive
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("archive");
        let done_dest = unique_path(done_dir, archive_name)?;
        tokio::fs::rename(archive, &done_dest).await?;

        info!(
            archive = %archive.display(),
            extracted_count = extracted.len(),
            "archive extracted"
        );

        Ok(())
    }
}

#[async_trait]
impl ExtractProcessor for ArchiveExtractor {
    async fn extract(
        &self,
        all_dir: &Path,
        pass_dir: &Path,
        done_dir: &Path,
        errors_dir: &Path,
    ) -> Result<StageOutcome> {
        let mut outcome = StageOutcome::default();

        for archive in list_files(all_dir)? {
            match self.process_one(&archive, all_dir, pass_dir, done_dir).await {
                Ok(()) => outcome.processed += 1,
                Err(e) => {
                    warn!(archive = %archive.display(), error = %e, "extraction failed");
                    outcome.failed += 1;

                    let name = archive
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or("archive");
                    let error_dest = unique_path(errors_dir, name)?;
                    tokio::fs::rename(&archive, &error_dest).await?;
                }
            }
        }

        Ok(outcome)
    }
}

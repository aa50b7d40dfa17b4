//! Built-in convert stage: text normalization.

use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, warn};

use crate::dirs::list_files;
use crate::error::Result;
use crate::utils::unique_path;

use super::{ConvertProcessor, StageOutcome};

/// Normalizes every file in `pass/` into a `.txt` file in `txt/`
///
/// Bytes are decoded as UTF-8 with lossy replacement, line endings are
/// normalized to `\n`, and the output always ends with a newline. The input
/// file is deleted once its replacement is in place.
pub struct TextConverter;

impl TextConverter {
    /// Decode and normalize one file's contents
    fn normalize(bytes: &[u8]) -> String {
        let text = String::from_utf8_lossy(bytes);
        let mut normalized = text.replace("\r\n", "\n").replace('\r', "\n");
        if !normalized.is_empty() && !normalized.ends_with('\n') {
            normalized.push('\n');
        }
        normalized
    }

    async fn process_one(&self, file: &Path, txt_dir: &Path) -> Result<()> {
        let bytes = tokio::fs::read(file).await?;
        let normalized = Self::normalize(&bytes);

        let stem = file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("converted");
        let dest = unique_path(txt_dir, &format!("{stem}.txt"))?;

        tokio::fs::write(&dest, normalized.as_bytes()).await?;
        tokio::fs::remove_file(file).await?;

        debug!(
            input = %file.display(),
            output = %dest.display(),
            "file converted"
        );

        Ok(())
    }
}

#[async_trait]
impl ConvertProcessor for TextConverter {
    async fn convert(
        &self,
        pass_dir: &Path,
        txt_dir: &Path,
        errors_dir: &Path,
    ) -> Result<StageOutcome> {
        let mut outcome = StageOutcome::default();

        for file in list_files(pass_dir)? {
            match self.process_one(&file, txt_dir).await {
                Ok(()) => outcome.processed += 1,
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "conversion failed");
                    outcome.failed += 1;

                    let name = file
                        .file_name()
                        .and_then(|n| n.to_str())
                        .unwrap_or("unconverted");
                    let error_dest = unique_path(errors_dir, name)?;
                    tokio::fs::rename(&file, &error_dest).await?;
                }
            }
        }

        Ok(outcome)
    }
}

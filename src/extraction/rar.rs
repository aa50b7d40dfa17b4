use crate::error::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::extraction_failed;

/// Archive extractor for RAR files
pub struct RarExtractor;

impl RarExtractor {
    /// Extract a RAR archive into `dest_path`
    pub fn extract(archive_path: &Path, dest_path: &Path) -> Result<Vec<PathBuf>> {
        debug!(?archive_path, ?dest_path, "attempting RAR extraction");

        std::fs::create_dir_all(dest_path)?;

        let processor = unrar::Archive::new(archive_path)
            .open_for_processing()
            .map_err(|e| extraction_failed(archive_path, e))?;

        let mut extracted_files = Vec::new();

        // Process each entry using the state machine interface
        let mut at_header = processor;
        loop {
            // Read the next header - transitions to BeforeFile state
            let at_file = match at_header.read_header() {
                Ok(Some(entry_processor)) => entry_processor,
                Ok(None) => break, // No more entries
                Err(e) => return Err(extraction_failed(archive_path, e)),
            };

            let header = at_file.entry();

            // Keep only normal components so "../../../etc/passwd" entries
            // cannot escape the destination
            let sanitized = Path::new(&header.filename)
                .components()
                .filter(|c| matches!(c, std::path::Component::Normal(_)))
                .collect::<PathBuf>();

            if sanitized.as_os_str().is_empty() {
                at_header = at_file
                    .skip()
                    .map_err(|e| extraction_failed(archive_path, e))?;
                continue;
            }

            let file_path = dest_path.join(&sanitized);

            if !header.is_directory() {
                // Extract the file - transitions back to BeforeHeader state
                at_header = at_file
                    .extract_to(&file_path)
                    .map_err(|e| extraction_failed(archive_path, e))?;
                extracted_files.push(file_path);
            } else {
                at_header = at_file
                    .skip()
                    .map_err(|e| extraction_failed(archive_path, e))?;
            }
        }

        info!(
            ?archive_path,
            extracted_count = extracted_files.len(),
            "RAR extraction successful"
        );

        Ok(extracted_files)
    }
}

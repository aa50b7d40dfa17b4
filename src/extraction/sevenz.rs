use crate::error::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{collect_files, extraction_failed};

/// Archive extractor for 7-Zip files
pub struct SevenZipExtractor;

impl SevenZipExtractor {
    /// Extract a 7z archive into `dest_path`
    ///
    /// sevenz-rust reports no per-entry file list and already confines entry
    /// paths to the destination, so the extracted set is collected by
    /// walking the destination afterwards. The destination must therefore be
    /// a scratch directory owned by this one archive.
    pub fn extract(archive_path: &Path, dest_path: &Path) -> Result<Vec<PathBuf>> {
        debug!(?archive_path, ?dest_path, "attempting 7z extraction");

        std::fs::create_dir_all(dest_path)?;

        sevenz_rust::decompress_file(archive_path, dest_path)
            .map_err(|e| extraction_failed(archive_path, e))?;

        let extracted_files = collect_files(dest_path)?;

        info!(
            ?archive_path,
            extracted_count = extracted_files.len(),
            "7z extraction successful"
        );

        Ok(extracted_files)
    }
}

//! Archive extraction
//!
//! This module handles extracting the archive formats accepted at
//! submission: RAR, 7z, and ZIP. Extraction is synchronous; the extract
//! stage runs it on the blocking pool. Entry paths are sanitized by every
//! extractor so a crafted archive cannot write outside its destination.

mod rar;
mod sevenz;
mod zip;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

// Re-exports
pub use rar::RarExtractor;
pub use sevenz::SevenZipExtractor;
pub use zip::ZipExtractor;

use crate::error::{Error, Result, StageError};
use crate::types::PipelineStage;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Archive type detected by file extension
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveType {
    /// RAR archive (.rar, .r00)
    Rar,
    /// 7-Zip archive (.7z)
    SevenZip,
    /// ZIP archive (.zip)
    Zip,
}

/// Detect archive type by file extension
///
/// Supports RAR (.rar, .r00), 7z (.7z), and ZIP (.zip) formats.
pub fn detect_archive_type(path: &Path) -> Option<ArchiveType> {
    let ext = path.extension()?.to_str()?.to_lowercase();

    match ext.as_str() {
        "rar" | "r00" => Some(ArchiveType::Rar),
        "7z" => Some(ArchiveType::SevenZip),
        "zip" => Some(ArchiveType::Zip),
        _ => None,
    }
}

/// Whether a file looks like an archive this pipeline can open
pub fn is_archive(path: &Path) -> bool {
    detect_archive_type(path).is_some()
}

/// Unified archive extraction dispatcher
///
/// Detects the archive type and routes to the appropriate extractor.
/// Returns the list of extracted files (recursively, for formats that
/// produce directory trees).
pub fn extract_archive(archive_path: &Path, dest_path: &Path) -> Result<Vec<PathBuf>> {
    let archive_type = detect_archive_type(archive_path).ok_or_else(|| {
        Error::Stage(StageError::ProcessorFailed {
            stage: PipelineStage::Extract,
            reason: format!("unknown archive type for file: {}", archive_path.display()),
        })
    })?;

    info!(
        ?archive_path,
        ?archive_type,
        "dispatching extraction to appropriate extractor"
    );

    match archive_type {
        ArchiveType::Rar => RarExtractor::extract(archive_path, dest_path),
        ArchiveType::SevenZip => SevenZipExtractor::extract(archive_path, dest_path),
        ArchiveType::Zip => ZipExtractor::extract(archive_path, dest_path),
    }
}

/// Map an arbitrary extractor failure into a stage processor error
pub(crate) fn extraction_failed(archive: &Path, reason: impl std::fmt::Display) -> Error {
    Error::Stage(StageError::ProcessorFailed {
        stage: PipelineStage::Extract,
        reason: format!("{}: {}", archive.display(), reason),
    })
}

/// Collect every plain file under `dir`, recursively
///
/// Used by extractors whose underlying library reports no file list.
pub(crate) fn collect_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    collect_files_into(dir, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_files_into(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files_into(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}

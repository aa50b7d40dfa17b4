//! Pipeline stage processors
//!
//! The orchestrator drives three opaque batch operations, each with the same
//! contract: process every eligible file under the input directory, move or
//! delete processed inputs, deposit outputs in the documented output
//! directory, and return when done or on unrecoverable error. No inter-call
//! state is assumed, so a processor can be re-run over the same directory
//! after a crash.
//!
//! The built-in implementations ([`ArchiveExtractor`], [`TextConverter`],
//! [`FingerprintLineStore`]) cover the common case; embedders swap in their
//! own via `IngestPipeline::with_components`.

mod convert;
mod extract;
mod store;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use convert::TextConverter;
pub use extract::ArchiveExtractor;
pub use store::FingerprintLineStore;

use async_trait::async_trait;
use std::path::Path;

use crate::error::Result;

/// What a stage run did, counted in input files
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StageOutcome {
    /// Inputs processed and moved along
    pub processed: usize,
    /// Inputs routed to the errors directory
    pub failed: usize,
}

/// Batch processor for the extract stage
#[async_trait]
pub trait ExtractProcessor: Send + Sync {
    /// Process every archive under `all_dir`: deposit contents into
    /// `pass_dir`, move processed archives to `done_dir`, failed ones to
    /// `errors_dir`
    async fn extract(
        &self,
        all_dir: &Path,
        pass_dir: &Path,
        done_dir: &Path,
        errors_dir: &Path,
    ) -> Result<StageOutcome>;
}

/// Batch processor for the convert stage
#[async_trait]
pub trait ConvertProcessor: Send + Sync {
    /// Process every file under `pass_dir` into text files in `txt_dir`,
    /// consuming the inputs; failed inputs go to `errors_dir`
    async fn convert(
        &self,
        pass_dir: &Path,
        txt_dir: &Path,
        errors_dir: &Path,
    ) -> Result<StageOutcome>;
}

/// Batch processor for the store stage
#[async_trait]
pub trait StoreProcessor: Send + Sync {
    /// Drain `txt_dir` into the downstream record store, consuming the
    /// inputs; failed inputs go to `errors_dir`
    async fn store(&self, txt_dir: &Path, errors_dir: &Path) -> Result<StageOutcome>;
}

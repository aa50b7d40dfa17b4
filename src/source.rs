//! Remote byte source
//!
//! The download pool retrieves submission bytes through the [`RemoteSource`]
//! trait: `fetch` pulls the bytes behind an opaque handle onto local disk,
//! `cancel` is best-effort. The built-in [`HttpRemoteSource`] treats handles
//! as URLs, which fits front-ends that expose uploads through a file server.

use async_trait::async_trait;
use futures::StreamExt;
use std::path::Path;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, FetchError, Result};

/// Source of submission bytes, keyed by the remote handle stored on the task
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetch the bytes behind `handle` into the file at `dest`
    ///
    /// On success the file at `dest` holds the complete payload. The caller
    /// verifies size and readability afterwards; implementations only need
    /// to deliver the bytes or fail.
    async fn fetch(&self, handle: &str, dest: &Path) -> Result<()>;

    /// Best-effort cancellation of an in-flight or queued handle
    ///
    /// The default implementation does nothing; sources without a wire-level
    /// cancel simply let the transfer finish and be discarded.
    async fn cancel(&self, _handle: &str) {}
}

/// HTTP implementation of [`RemoteSource`]; handles are URLs
pub struct HttpRemoteSource {
    client: reqwest::Client,
}

impl HttpRemoteSource {
    /// Create a source with a fresh HTTP client
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRemoteSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteSource for HttpRemoteSource {
    async fn fetch(&self, handle: &str, dest: &Path) -> Result<()> {
        tracing::debug!(handle, dest = %dest.display(), "fetching remote bytes");

        let response = self.client.get(handle).send().await?;

        // 4xx means the handle itself is bad (expired, revoked); that is a
        // permanent fetch failure, not a network hiccup
        if response.status().is_client_error() {
            return Err(Error::Fetch(FetchError::HandleRejected {
                handle: handle.to_string(),
                reason: format!("HTTP {}", response.status()),
            }));
        }
        let response = response.error_for_status()?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        tracing::debug!(handle, dest = %dest.display(), "fetch complete");
        Ok(())
    }
}

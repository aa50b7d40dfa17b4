//! Shared fixtures for end-to-end pipeline tests.

// Each test binary compiles this module independently and uses a subset
#![allow(dead_code)]

use async_trait::async_trait;
use chat_ingest::{Config, DeliveryError, NotificationSink, RemoteSource};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Test config with short intervals so end-to-end runs stay fast
pub fn fast_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.paths.root = root.join("data");
    config.persistence.database_path = root.join("state.db");
    config.download.poll_interval = Duration::from_millis(25);
    config.download.retry.initial_delay = Duration::from_millis(10);
    config.download.retry.jitter = false;
    config.orchestrator.tick_interval = Duration::from_millis(50);
    config.notifier.min_gap = Duration::from_millis(10);
    config
}

/// In-memory remote source: handles map to fixed payloads
pub struct MapSource {
    payloads: HashMap<String, Vec<u8>>,
}

impl MapSource {
    pub fn new(payloads: &[(&str, Vec<u8>)]) -> Self {
        Self {
            payloads: payloads
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl RemoteSource for MapSource {
    async fn fetch(&self, handle: &str, dest: &Path) -> chat_ingest::Result<()> {
        match self.payloads.get(handle) {
            Some(bytes) => {
                tokio::fs::write(dest, bytes).await?;
                Ok(())
            }
            None => Err(chat_ingest::Error::Fetch(
                chat_ingest::FetchError::HandleRejected {
                    handle: handle.to_string(),
                    reason: "unknown handle".into(),
                },
            )),
        }
    }
}

/// Remote source that parks every fetch behind a shared gate
///
/// Lets a test hold N downloads in flight simultaneously and observe the
/// store state before releasing them.
pub struct GatedSource {
    inner: MapSource,
    pub active: Arc<std::sync::atomic::AtomicUsize>,
    gate: Arc<tokio::sync::Semaphore>,
}

impl GatedSource {
    pub fn new(payloads: &[(&str, Vec<u8>)]) -> (Self, Arc<tokio::sync::Semaphore>) {
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        (
            Self {
                inner: MapSource::new(payloads),
                active: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
                gate: gate.clone(),
            },
            gate,
        )
    }
}

#[async_trait]
impl RemoteSource for GatedSource {
    async fn fetch(&self, handle: &str, dest: &Path) -> chat_ingest::Result<()> {
        self.active.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        // Park until the test opens the gate
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| chat_ingest::Error::ShuttingDown)?;
        self.inner.fetch(handle, dest).await
    }
}

/// Sink that records every delivery with a timestamp
#[derive(Default)]
pub struct RecordingSink {
    pub sent: Mutex<Vec<(i64, String, Instant)>>,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, chat_id: i64, text: &str) -> Result<(), DeliveryError> {
        self.sent
            .lock()
            .await
            .push((chat_id, text.to_string(), Instant::now()));
        Ok(())
    }
}

/// Poll until `check` returns true or the timeout elapses
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Build a small ZIP archive in memory
pub fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    use std::io::Write;

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::FileOptions::default();
        for (name, contents) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(contents.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }
    cursor.into_inner()
}

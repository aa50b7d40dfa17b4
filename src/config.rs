//! Configuration types for chat-ingest

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::types::PipelineStage;

/// Main configuration for the ingestion pipeline
///
/// Fields are organized into logical sub-configs:
/// - [`download`](DownloadConfig) — worker pool sizing, polling, retries
/// - [`orchestrator`](OrchestratorConfig) — tick cadence and stage deadlines
/// - [`notifier`](NotifierConfig) — delivery pacing and the webhook sink
/// - [`admission`](AdmissionConfig) — submission limits and allowlist
/// - [`persistence`](PersistenceConfig) — task store location
/// - [`paths`](PathsConfig) — stage directory root
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download pool settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Orchestrator settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Notifier settings
    #[serde(default)]
    pub notifier: NotifierConfig,

    /// Admission settings
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Data storage and state management
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Stage directory layout
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Download pool configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Number of parallel download workers (default: 3, matching the
    /// upstream fetcher's per-account concurrency ceiling)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Idle sleep between claim attempts when no task is pending (default: 5 s)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// Retry configuration for failed download attempts
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval: default_poll_interval(),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per task (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Sequential orchestrator configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Interval between ticks (default: 10 s)
    #[serde(default = "default_tick_interval", with = "duration_serde")]
    pub tick_interval: Duration,

    /// Default per-stage deadline (default: 30 minutes)
    ///
    /// A stage exceeding its deadline is reported failed and the tick
    /// continues with the next stage.
    #[serde(default = "default_stage_timeout", with = "duration_serde")]
    pub stage_timeout: Duration,

    /// Per-stage override for the extract deadline
    #[serde(default, with = "optional_duration_serde")]
    pub extract_timeout: Option<Duration>,

    /// Per-stage override for the convert deadline
    #[serde(default, with = "optional_duration_serde")]
    pub convert_timeout: Option<Duration>,

    /// Per-stage override for the store deadline
    #[serde(default, with = "optional_duration_serde")]
    pub store_timeout: Option<Duration>,
}

impl OrchestratorConfig {
    /// Effective deadline for a stage: the per-stage override if set,
    /// otherwise the shared default
    pub fn timeout_for(&self, stage: PipelineStage) -> Duration {
        let override_value = match stage {
            PipelineStage::Extract => self.extract_timeout,
            PipelineStage::Convert => self.convert_timeout,
            PipelineStage::Store => self.store_timeout,
        };
        override_value.unwrap_or(self.stage_timeout)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
            stage_timeout: default_stage_timeout(),
            extract_timeout: None,
            convert_timeout: None,
            store_timeout: None,
        }
    }
}

/// Notifier configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Minimum gap between consecutive deliveries (default: 3 s)
    ///
    /// Deliveries are serialized globally; this respects downstream chat
    /// rate limits.
    #[serde(default = "default_min_gap", with = "duration_serde")]
    pub min_gap: Duration,

    /// Webhook sink configuration; when absent, notifications are logged
    /// and dropped
    #[serde(default)]
    pub webhook: Option<WebhookConfig>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            min_gap: default_min_gap(),
            webhook: None,
        }
    }
}

/// Webhook sink configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// URL to POST delivery payloads to
    pub url: String,

    /// Optional authentication header value
    #[serde(default)]
    pub auth_header: Option<String>,

    /// Timeout for webhook requests (default: 30 seconds)
    #[serde(default = "default_webhook_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

/// Admission configuration applied before a submission becomes a task
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Reject submissions whose declared size exceeds this (default: 2 GiB)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Submitters allowed to enqueue; empty means everyone
    #[serde(default)]
    pub admin_ids: Vec<i64>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            admin_ids: vec![],
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Task store path (default: "./chat-ingest.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Stage directory layout
///
/// The directory names under the root (`all`, `pass`, `txt`, `done`,
/// `errors`) are part of the on-disk contract and are not configurable;
/// only the root moves.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root under which the stage directories live (default: "./data")
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
        }
    }
}

// Default value functions
fn default_workers() -> usize {
    3
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_stage_timeout() -> Duration {
    Duration::from_secs(30 * 60) // 30 minutes
}

fn default_min_gap() -> Duration {
    Duration::from_secs(3)
}

fn default_webhook_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_file_size() -> u64 {
    2 * 1024 * 1024 * 1024 // 2 GiB
}

fn default_database_path() -> PathBuf {
    PathBuf::from("chat-ingest.db")
}

fn default_root() -> PathBuf {
    PathBuf::from("data")
}

fn default_true() -> bool {
    true
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}

//! Completion notifications
//!
//! The notifier closes the loop to the submitter: it reads completed tasks
//! whose notification has not gone out, batches them per recipient chat,
//! and delivers one message per recipient at a bounded global rate. The
//! `notified` flag is set only after a successful (or permanently failed)
//! delivery, so re-running the notifier never duplicates a message per task.
//!
//! Delivery goes through the [`NotificationSink`] trait; the built-in
//! [`WebhookSink`] POSTs a JSON payload per message, and [`NoopSink`] logs
//! and drops when no webhook is configured.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Notify, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, WebhookConfig};
use crate::db::{Database, Task};
use crate::error::{DeliveryError, Result};
use crate::types::Event;

/// Synchronous delivery seam to the chat front-end
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver `text` to `chat_id`
    ///
    /// Implementations distinguish transient failures (retried on the next
    /// cycle) from permanent ones (the tasks are consumed).
    async fn send(&self, chat_id: i64, text: &str) -> std::result::Result<(), DeliveryError>;
}

/// Sink used when no delivery target is configured; logs and succeeds
pub struct NoopSink;

#[async_trait]
impl NotificationSink for NoopSink {
    async fn send(&self, chat_id: i64, text: &str) -> std::result::Result<(), DeliveryError> {
        info!(chat_id, text, "no notification sink configured, dropping message");
        Ok(())
    }
}

/// Payload POSTed by [`WebhookSink`] for each delivered message
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NotificationPayload {
    /// Recipient chat
    pub chat_id: i64,
    /// Composed message text
    pub text: String,
    /// Unix timestamp of the delivery attempt
    pub timestamp: i64,
}

/// Webhook implementation of [`NotificationSink`]
pub struct WebhookSink {
    client: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookSink {
    /// Build a sink for the configured webhook
    pub fn new(config: WebhookConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn send(&self, chat_id: i64, text: &str) -> std::result::Result<(), DeliveryError> {
        let payload = NotificationPayload {
            chat_id,
            text: text.to_string(),
            timestamp: chrono::Utc::now().timestamp(),
        };

        let mut request = self
            .client
            .post(&self.config.url)
            .json(&payload)
            .timeout(self.config.timeout);

        if let Some(auth) = &self.config.auth_header {
            request = request.header("Authorization", auth);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                debug!(chat_id, url = %self.config.url, "notification delivered");
                Ok(())
            }
            // 4xx minus 429: the recipient or payload is bad for good
            Ok(response)
                if response.status().is_client_error()
                    && response.status() != reqwest::StatusCode::TOO_MANY_REQUESTS =>
            {
                Err(DeliveryError::Permanent {
                    chat_id,
                    reason: format!("HTTP {}", response.status()),
                })
            }
            Ok(response) => Err(DeliveryError::Transient {
                chat_id,
                reason: format!("HTTP {}", response.status()),
            }),
            Err(e) => Err(DeliveryError::Transient {
                chat_id,
                reason: e.to_string(),
            }),
        }
    }
}

/// Single-threaded delivery loop, driven by orchestrator signals with a
/// periodic fallback
pub(crate) struct Notifier {
    db: Arc<Database>,
    sink: Arc<dyn NotificationSink>,
    config: Arc<Config>,
    event_tx: broadcast::Sender<Event>,
    notify: Arc<Notify>,
    cancel: CancellationToken,
    /// When the previous delivery went out, for global rate pacing across
    /// cycles
    last_delivery: Mutex<Option<Instant>>,
}

impl Notifier {
    pub(crate) fn new(
        db: Arc<Database>,
        sink: Arc<dyn NotificationSink>,
        config: Arc<Config>,
        event_tx: broadcast::Sender<Event>,
        notify: Arc<Notify>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            db,
            sink,
            config,
            event_tx,
            notify,
            cancel,
            last_delivery: Mutex::new(None),
        }
    }

    /// Run until cancelled
    ///
    /// Wakes on the orchestrator's post-tick signal, with a periodic
    /// fallback so a missed signal only delays notifications instead of
    /// losing them.
    pub(crate) async fn run(self) {
        info!(min_gap = ?self.config.notifier.min_gap, "notifier started");

        // Fallback keeps pace with the orchestrator even if a signal is lost
        let fallback = self.config.orchestrator.tick_interval * 2;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(fallback) => {}
            }

            if let Err(e) = self.run_cycle().await {
                if e.kind() == "store_fatal" {
                    error!(error = %e, "task store failure in notifier, aborting pipeline");
                    self.cancel.cancel();
                    break;
                }
                error!(error = %e, "notification cycle failed");
            }
        }

        info!("notifier stopped");
    }

    /// One delivery cycle: list, group per recipient, deliver, mark
    pub(crate) async fn run_cycle(&self) -> Result<usize> {
        let unnotified = self.db.list_completed_unnotified().await?;
        if unnotified.is_empty() {
            return Ok(0);
        }

        // Group per recipient; the store returns tasks in completion order,
        // and pushing preserves it inside each group
        let mut groups: std::collections::BTreeMap<i64, Vec<Task>> =
            std::collections::BTreeMap::new();
        for task in unnotified {
            groups.entry(task.chat_id).or_default().push(task);
        }

        let mut delivered = 0usize;

        for (chat_id, group) in groups {
            if self.cancel.is_cancelled() {
                break;
            }

            self.pace().await;

            let text = compose_message(&group);
            match self.sink.send(chat_id, &text).await {
                Ok(()) => {
                    *self.last_delivery.lock().await = Some(Instant::now());
                    for task in &group {
                        self.db.mark_notified(task.task_id()).await?;
                    }
                    self.emit(Event::NotificationSent {
                        chat_id,
                        task_count: group.len(),
                    });
                    delivered += 1;
                }
                Err(DeliveryError::Transient { reason, .. }) => {
                    // Tasks stay unnotified and are retried next cycle; one
                    // failing recipient never blocks the others
                    *self.last_delivery.lock().await = Some(Instant::now());
                    warn!(chat_id, reason, "transient delivery failure, will retry");
                    self.emit(Event::NotificationFailed {
                        chat_id,
                        error: reason,
                        permanent: false,
                    });
                }
                Err(DeliveryError::Permanent { reason, .. }) => {
                    // Consume the tasks so a dead recipient cannot wedge the
                    // notifier forever
                    *self.last_delivery.lock().await = Some(Instant::now());
                    warn!(chat_id, reason, "permanent delivery failure, consuming tasks");
                    for task in &group {
                        self.db.mark_notified(task.task_id()).await?;
                    }
                    self.emit(Event::NotificationFailed {
                        chat_id,
                        error: reason,
                        permanent: true,
                    });
                }
            }
        }

        Ok(delivered)
    }

    /// Enforce the global minimum gap between deliveries
    async fn pace(&self) {
        let wait = {
            let last = self.last_delivery.lock().await;
            last.map(|at| {
                self.config
                    .notifier
                    .min_gap
                    .saturating_sub(at.elapsed())
            })
        };

        if let Some(wait) = wait
            && !wait.is_zero()
        {
            tokio::time::sleep(wait).await;
        }
    }

    fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}

/// Compose one batched message for a recipient's completed tasks
fn compose_message(group: &[Task]) -> String {
    match group {
        [single] => format!("file {} is ready", single.file_name),
        many => {
            let names: Vec<&str> = many.iter().map(|t| t.file_name.as_str()).collect();
            format!("{} files are ready: {}", many.len(), names.join(", "))
        }
    }
}

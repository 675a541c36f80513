//! Operator notifications.
//!
//! Lifecycle code publishes fire-and-forget text messages into a bounded
//! channel; a dedicated task drains the channel and forwards to the
//! configured sink. Delivery is best-effort and never on the critical path —
//! a full channel or a failed send is logged and dropped, and can never block
//! or fail a lifecycle transition.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const DEFAULT_CAPACITY: usize = 64;

/// Destination for operator messages.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, message: &str) -> anyhow::Result<()>;
}

/// Cheap cloneable publishing handle.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::Sender<String>,
}

impl Notifier {
    /// Build a notifier and hand back the raw receiver. Used by tests that
    /// want to assert on published messages without a background task.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Build a notifier whose messages are drained by a background task into
    /// `sink`.
    pub fn spawn(sink: Arc<dyn NotificationSink>) -> Self {
        let (notifier, mut rx) = Self::channel(DEFAULT_CAPACITY);
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = sink.deliver(&message).await {
                    warn!(error = %e, "Notification delivery failed");
                }
            }
            debug!("Notifier task stopped");
        });
        notifier
    }

    /// Enqueue a message without waiting. Dropped with a warning when the
    /// channel is full or the drain task is gone.
    pub fn publish(&self, message: impl Into<String>) {
        let message = message.into();
        if let Err(e) = self.tx.try_send(message) {
            warn!(error = %e, "Dropping notification");
        }
    }
}

/// Telegram bot sink.
pub struct TelegramSink {
    http: reqwest::Client,
    token: String,
    chat_id: String,
}

impl TelegramSink {
    pub fn new(token: String, chat_id: String) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            token,
            chat_id,
        })
    }
}

#[async_trait]
impl NotificationSink for TelegramSink {
    async fn deliver(&self, message: &str) -> anyhow::Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": message,
                "parse_mode": "Markdown",
            }))
            .send()
            .await?;
        anyhow::ensure!(
            response.status().is_success(),
            "telegram returned {}",
            response.status()
        );
        Ok(())
    }
}

/// Fallback sink when no Telegram credentials are configured: messages land
/// in the log only.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, message: &str) -> anyhow::Result<()> {
        info!(target: "notify", "{message}");
        Ok(())
    }
}

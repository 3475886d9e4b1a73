use std::sync::Arc;
use std::time::Duration;
use teloxide::{
    Bot,
    payloads::SendMessageSetters,
    prelude::Requester,
    types::{ChatId, ParseMode},
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("telegram request failed: {0}")]
    Telegram(#[from] teloxide::RequestError),
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn send_message(&self, text: &str) -> Result<(), AlertError>;
}

#[derive(Clone)]
pub struct TelegramAlerter {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramAlerter {
    pub fn new(bot: Bot, chat_id: i64) -> Self {
        Self {
            bot,
            chat_id: ChatId(chat_id),
        }
    }
}

#[async_trait::async_trait]
impl Notifier for TelegramAlerter {
    async fn send_message(&self, text: &str) -> Result<(), AlertError> {
        self.bot
            .send_message(self.chat_id, text)
            .parse_mode(ParseMode::Markdown)
            .await?;
        Ok(())
    }
}

/// Writes alerts to the log. Used when no Telegram credentials are configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn send_message(&self, text: &str) -> Result<(), AlertError> {
        warn!(alert = text, "validator alert");
        Ok(())
    }
}

/// Producer handle of the outbound alert queue.
#[derive(Debug, Clone)]
pub struct AlertQueue {
    tx: mpsc::Sender<String>,
}

impl AlertQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueues a message without waiting. Returns whether it was accepted.
    pub fn push(&self, text: String) -> bool {
        match self.tx.try_send(text) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(alert = %dropped, "alert queue full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(dropped)) => {
                warn!(alert = %dropped, "alert sender stopped, dropping message");
                false
            }
        }
    }
}

/// Delivers queued messages one at a time with `pace` between deliveries.
///
/// Returns the number of messages delivered once every [`AlertQueue`] handle
/// has been dropped and the queue is drained.
pub async fn run_sender(
    notifier: Arc<dyn Notifier>,
    mut rx: mpsc::Receiver<String>,
    pace: Duration,
) -> usize {
    let mut delivered = 0;
    let mut first = true;

    while let Some(text) = rx.recv().await {
        if !first {
            tokio::time::sleep(pace).await;
        }
        first = false;

        match notifier.send_message(&text).await {
            Ok(()) => {
                delivered += 1;
                debug!(delivered, "alert delivered");
            }
            Err(error) => warn!(%error, "failed to deliver alert"),
        }
    }

    info!(delivered, "alert sender stopped");
    delivered
}

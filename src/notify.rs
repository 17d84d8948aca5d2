use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::info;

use crate::ports::{Notifier, PortResult};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub subject: String,
    pub body: String,
}

/// Broadcast hub for in-process subscribers. Sending with nobody listening is
/// not an error.
pub struct NotifyHub {
    sender: broadcast::Sender<Notice>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl Notifier for NotifyHub {
    async fn send(&self, subject: &str, body: &str) -> PortResult<()> {
        let _ = self.sender.send(Notice {
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

/// Writes every notice to the log.
#[derive(Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, subject: &str, body: &str) -> PortResult<()> {
        info!(subject, body, "notification");
        Ok(())
    }
}

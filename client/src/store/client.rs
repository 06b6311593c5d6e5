use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::store::status::{ShadeStatus, StatusPath};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatusStoreError {
    #[error("Status data not found")]
    NotFound,
    #[error("Error parsing data: {0}")]
    Malformed(String),
    #[error("Failed to update {path}: {message}")]
    Write { path: StatusPath, message: String },
    #[error("Failed to read {path}: {message}")]
    Read { path: StatusPath, message: String },
    #[error("Database error: {0}")]
    Connection(String),
    #[error("Unknown status path: {0}")]
    InvalidPath(String),
}

/// One push from a standing subscription: a full snapshot or the reason there
/// is none.
pub type StatusEvent = Result<ShadeStatus, StatusStoreError>;

/// Path-addressed access to the remote status document.
#[async_trait]
pub trait StatusStoreTrait: Send + Sync {
    async fn read(&self, path: StatusPath) -> Result<Value, StatusStoreError>;

    /// Writes `value` at `path`. Writing `null` removes the subtree.
    async fn write(&self, path: StatusPath, value: Value) -> Result<(), StatusStoreError>;

    async fn delete(&self, path: StatusPath) -> Result<(), StatusStoreError>;

    /// Opens a standing subscription. The current record is delivered first,
    /// then one event per change made by any client.
    async fn subscribe(&self) -> Result<StatusSubscription, StatusStoreError>;
}

pub struct StatusSubscription {
    receiver: UnboundedReceiver<StatusEvent>,
}

impl StatusSubscription {
    pub async fn next(&mut self) -> Option<StatusEvent> {
        self.receiver.recv().await
    }
}

/// Fan-out of status events to every open subscription.
#[derive(Clone, Default)]
pub(crate) struct Subscribers {
    senders: Arc<Mutex<Vec<UnboundedSender<StatusEvent>>>>,
}

impl Subscribers {
    pub(crate) async fn add(&self, initial: Option<StatusEvent>) -> StatusSubscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        if let Some(event) = initial {
            let _ = sender.send(event);
        }
        self.senders.lock().await.push(sender);
        StatusSubscription { receiver }
    }

    pub(crate) async fn notify(&self, event: StatusEvent) {
        let mut senders = self.senders.lock().await;
        senders.retain(|sender| sender.send(event.clone()).is_ok());
        debug!("Status event delivered to {} subscribers", senders.len());
    }
}

//! Delivery of persisted messages to the recipient's live session.

use async_trait::async_trait;
use tokio::sync::mpsc;

use lp_proto::Message;

use crate::error::TransportError;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Called only after the record is persisted. Retries are the
    /// transport's own business.
    async fn deliver(&self, message: &Message) -> Result<(), TransportError>;
}

/// In-process push channel; the receiver half plays the recipient session.
#[derive(Clone)]
pub struct ChannelTransport {
    tx: mpsc::Sender<Message>,
}

impl ChannelTransport {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn deliver(&self, message: &Message) -> Result<(), TransportError> {
        self.tx
            .send(message.clone())
            .await
            .map_err(|_| TransportError::Closed)
    }
}

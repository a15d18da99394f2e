//! Best-effort outbound queue
//!
//! Sensor forwarding, mode announcements and clip requests do not need an
//! answer. They are queued here and delivered in order by a single worker;
//! failures are logged and dropped.

use super::client::PeerLink;
use super::protocol::PeerMessage;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Handle used to enqueue deliveries
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<PeerMessage>,
}

impl Outbox {
    /// Start the delivery worker and return the queue handle
    pub fn spawn(link: Arc<dyn PeerLink>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<PeerMessage>(capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match link.send(&message).await {
                    Ok(_) => tracing::debug!("Delivered {}", message),
                    Err(e) => tracing::warn!("Dropped {}: {}", message, e),
                }
            }
            tracing::debug!("Outbox worker stopped");
        });

        (Self { tx }, handle)
    }

    /// Queue a message without waiting; returns false if it was dropped
    pub fn enqueue(&self, message: PeerMessage) -> bool {
        match self.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(message)) => {
                tracing::warn!("Outbox full, dropping {}", message);
                false
            }
            Err(mpsc::error::TrySendError::Closed(message)) => {
                tracing::warn!("Outbox closed, dropping {}", message);
                false
            }
        }
    }
}

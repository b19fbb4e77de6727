//! In-process signaling bus.
//!
//! Backs each topic with a `tokio::sync::broadcast` channel: every
//! subscriber gets every payload published after it subscribed, in publish
//! order. Used by tests and single-process deployments; distributed
//! deployments adapt their own backend behind [`SignalBus`].

use super::bus::{BusError, BusSubscription, SignalBus};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::warn;

const DEFAULT_CAPACITY: usize = 64;

/// Broadcast-backed [`SignalBus`].
pub struct LocalBus {
    topics: RwLock<HashMap<String, broadcast::Sender<String>>>,
    capacity: usize,
}

impl LocalBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Caps the per-subscriber backlog. A subscriber that falls more than
    /// `capacity` payloads behind skips the overwritten ones and keeps going.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    async fn sender_for(&self, topic: &str) -> broadcast::Sender<String> {
        if let Some(tx) = self.topics.read().await.get(topic) {
            return tx.clone();
        }
        let mut topics = self.topics.write().await;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalBus for LocalBus {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BusError> {
        // A publish with no subscribers is fire-and-forget, like any pub/sub.
        if let Some(tx) = self.topics.read().await.get(topic) {
            let _ = tx.send(payload);
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<BusSubscription, BusError> {
        let mut source = self.sender_for(topic).await.subscribe();
        let (tx, rx) = mpsc::channel(self.capacity);
        let cancel = CancellationToken::new();
        let pump_cancel = cancel.clone();
        let topic = topic.to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = pump_cancel.cancelled() => break,
                    next = source.recv() => match next {
                        Ok(payload) => {
                            if tx.send(payload).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(topic = %topic, skipped, "signaling subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        Ok(BusSubscription::new(rx, cancel))
    }
}

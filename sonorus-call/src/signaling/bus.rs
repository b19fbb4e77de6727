//! Abstract pub/sub transport for signaling.
//!
//! The crate does not care what carries its messages; anything with
//! topic-scoped publish/subscribe, at-least-once delivery, and per-publisher
//! ordering works. [`crate::signaling::LocalBus`] is the in-process
//! implementation; embedders adapt their realtime backend behind the same
//! trait.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Signaling transport failures. All of these are session-fatal when they
/// hit mid-call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BusError {
    #[error("publish failed: {0}")]
    Publish(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("bus connection lost: {0}")]
    Connection(String),
}

/// Topic-scoped pub/sub used to carry [`crate::signaling::SignalMessage`]
/// payloads as JSON strings.
#[async_trait]
pub trait SignalBus: Send + Sync {
    /// Publishes a payload to every current subscriber of `topic`.
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BusError>;

    /// Opens a subscription to `topic`. Only payloads published after this
    /// call returns are delivered.
    async fn subscribe(&self, topic: &str) -> Result<BusSubscription, BusError>;
}

/// A live subscription handle.
///
/// Bus implementations pump raw payloads into the channel half given to
/// [`BusSubscription::new`] and stop when the token is cancelled. Keeping
/// the handle concrete makes the unsubscribe contract uniform: after
/// [`unsubscribe`](Self::unsubscribe) returns, `recv` never yields again.
pub struct BusSubscription {
    rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
}

impl BusSubscription {
    #[must_use]
    pub fn new(rx: mpsc::Receiver<String>, cancel: CancellationToken) -> Self {
        Self { rx, cancel }
    }

    /// Receives the next raw payload, or `None` once the subscription is
    /// closed (either side).
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Stops delivery immediately. Synchronous: already-buffered payloads
    /// are discarded, so no message is observed after this returns.
    pub fn unsubscribe(&mut self) {
        self.cancel.cancel();
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }
}

impl Drop for BusSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for BusSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusSubscription")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

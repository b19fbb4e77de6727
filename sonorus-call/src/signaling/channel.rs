//! Typed, filtered signaling channel for one remote peer.

use super::bus::{BusError, BusSubscription, SignalBus};
use super::message::{IceCandidateInit, SessionDescription, SignalMessage};
use crate::participant::ParticipantId;
use std::sync::Arc;
use tracing::debug;

/// Receiving half of a session's signaling.
///
/// Wraps one bus subscription and yields only messages addressed to the
/// local participant by the expected remote. Everything else on the topic
/// (our own broadcasts, third-party traffic, undecodable payloads) is
/// dropped with a debug log.
pub struct SignalChannel {
    sub: BusSubscription,
    topic: String,
    local: ParticipantId,
    remote: ParticipantId,
    closed: bool,
}

impl SignalChannel {
    /// Subscribes to `topic` and returns the filtered receiver along with a
    /// sender publishing to the same topic.
    pub async fn open(
        bus: Arc<dyn SignalBus>,
        topic: String,
        local: ParticipantId,
        remote: ParticipantId,
    ) -> Result<(Self, SignalSender), BusError> {
        let sub = bus.subscribe(&topic).await?;
        let channel = Self {
            sub,
            topic: topic.clone(),
            local,
            remote,
            closed: false,
        };
        let sender = SignalSender::new(bus, topic, local, remote);
        Ok((channel, sender))
    }

    /// Receives the next message from the remote peer, or `None` once the
    /// subscription has closed.
    pub async fn recv(&mut self) -> Option<SignalMessage> {
        loop {
            let payload = self.sub.recv().await?;
            let msg = match serde_json::from_str::<SignalMessage>(&payload) {
                Ok(msg) => msg,
                Err(err) => {
                    debug!(topic = %self.topic, error = %err, "dropping undecodable signaling payload");
                    continue;
                }
            };
            if msg.sender() == self.local {
                // Own broadcast echoed back by the bus.
                continue;
            }
            if msg.recipient() != self.local {
                debug!(topic = %self.topic, kind = msg.kind(), "dropping message addressed elsewhere");
                continue;
            }
            if msg.sender() != self.remote {
                debug!(topic = %self.topic, kind = msg.kind(), "dropping message from unexpected sender");
                continue;
            }
            return Some(msg);
        }
    }

    /// Unsubscribes. Synchronous and idempotent; nothing is delivered after
    /// this returns.
    pub fn close(&mut self) {
        if !self.closed {
            self.sub.unsubscribe();
            self.closed = true;
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for SignalChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Sending half of a session's signaling. Cheap to clone; every message is
/// stamped with the (local, remote) pair it was opened for.
#[derive(Clone)]
pub struct SignalSender {
    bus: Arc<dyn SignalBus>,
    topic: String,
    local: ParticipantId,
    remote: ParticipantId,
}

impl SignalSender {
    #[must_use]
    pub fn new(
        bus: Arc<dyn SignalBus>,
        topic: String,
        local: ParticipantId,
        remote: ParticipantId,
    ) -> Self {
        Self {
            bus,
            topic,
            local,
            remote,
        }
    }

    pub async fn send_offer(&self, sdp: SessionDescription) -> Result<(), BusError> {
        self.publish(SignalMessage::Offer {
            from: self.local,
            to: self.remote,
            sdp,
        })
        .await
    }

    pub async fn send_answer(&self, sdp: SessionDescription) -> Result<(), BusError> {
        self.publish(SignalMessage::Answer {
            from: self.local,
            to: self.remote,
            sdp,
        })
        .await
    }

    pub async fn send_candidate(&self, candidate: IceCandidateInit) -> Result<(), BusError> {
        self.publish(SignalMessage::IceCandidate {
            from: self.local,
            to: self.remote,
            candidate,
        })
        .await
    }

    pub async fn send_hangup(&self) -> Result<(), BusError> {
        self.publish(SignalMessage::Hangup {
            from: self.local,
            to: self.remote,
        })
        .await
    }

    async fn publish(&self, msg: SignalMessage) -> Result<(), BusError> {
        let payload =
            serde_json::to_string(&msg).map_err(|err| BusError::Publish(err.to_string()))?;
        self.bus.publish(&self.topic, payload).await
    }
}

impl std::fmt::Debug for SignalSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalSender")
            .field("topic", &self.topic)
            .field("local", &self.local)
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

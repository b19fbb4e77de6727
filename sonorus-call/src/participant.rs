//! Call participants and the directory lookup used to resolve them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable identifier for one party to a call.
///
/// Ids are supplied by the embedding application (its user ids). The byte
/// ordering of the underlying UUID is what tie-breaks simultaneous dials,
/// so both peers must agree on the id for a given user.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ParticipantId(Uuid);

impl ParticipantId {
    /// Generates a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for ParticipantId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// A call party with the profile fields the call UI needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl Participant {
    #[must_use]
    pub fn new(id: ParticipantId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            avatar_url: None,
        }
    }

    /// Placeholder used when the directory cannot resolve a caller.
    /// The call still rings; the UI just shows the raw id.
    #[must_use]
    pub fn unresolved(id: ParticipantId) -> Self {
        Self {
            id,
            display_name: id.to_string(),
            avatar_url: None,
        }
    }
}

/// Read-only lookup from participant id to profile, backed by the
/// embedding application's user store.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Resolves a participant, or `None` when the id is unknown.
    async fn lookup(&self, id: ParticipantId) -> Option<Participant>;
}

/// Topic naming for the signaling bus.
pub mod topics {
    use super::ParticipantId;

    /// Shared signaling topic for a participant pair. Both sides derive the
    /// same name without coordination by sorting the two ids.
    #[must_use]
    pub fn call_topic(a: ParticipantId, b: ParticipantId) -> String {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        format!("call:{low}:{high}")
    }

    /// Per-user topic where first-contact offers are delivered. Every online
    /// user keeps one always-on subscription here.
    #[must_use]
    pub fn dial_topic(user: ParticipantId) -> String {
        format!("dial:{user}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(n: u128) -> ParticipantId {
        ParticipantId::from_uuid(Uuid::from_u128(n))
    }

    #[test]
    fn test_call_topic_is_symmetric() {
        let a = pid(1);
        let b = pid(2);
        assert_eq!(topics::call_topic(a, b), topics::call_topic(b, a));
    }

    #[test]
    fn test_call_topic_sorts_ids() {
        let low = pid(1);
        let high = pid(2);
        let topic = topics::call_topic(high, low);
        assert_eq!(topic, format!("call:{low}:{high}"));
    }

    #[test]
    fn test_dial_topic_format() {
        let a = pid(7);
        assert_eq!(topics::dial_topic(a), format!("dial:{a}"));
    }

    #[test]
    fn test_participant_id_round_trips_through_json() {
        let id = ParticipantId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: ParticipantId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}

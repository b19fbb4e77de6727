//! Wire format for call signaling.
//!
//! Messages are JSON with a `kind` tag. The shapes are a compatibility
//! contract: the browser client exchanges the exact same payloads, so field
//! names follow the RTC dictionary casing (`sdpMid`, `sdpMLineIndex`,
//! `usernameFragment`).

use crate::participant::ParticipantId;
use serde::{Deserialize, Serialize};

/// One signaling message between two participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SignalMessage {
    Offer {
        from: ParticipantId,
        to: ParticipantId,
        sdp: SessionDescription,
    },
    Answer {
        from: ParticipantId,
        to: ParticipantId,
        sdp: SessionDescription,
    },
    IceCandidate {
        from: ParticipantId,
        to: ParticipantId,
        candidate: IceCandidateInit,
    },
    Hangup {
        from: ParticipantId,
        to: ParticipantId,
    },
}

impl SignalMessage {
    /// The participant who published this message.
    #[must_use]
    pub const fn sender(&self) -> ParticipantId {
        match self {
            Self::Offer { from, .. }
            | Self::Answer { from, .. }
            | Self::IceCandidate { from, .. }
            | Self::Hangup { from, .. } => *from,
        }
    }

    /// The participant this message is addressed to. Subscribers share
    /// topics, so receivers must filter on this before acting.
    #[must_use]
    pub const fn recipient(&self) -> ParticipantId {
        match self {
            Self::Offer { to, .. }
            | Self::Answer { to, .. }
            | Self::IceCandidate { to, .. }
            | Self::Hangup { to, .. } => *to,
        }
    }

    /// Wire name of the message kind, for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::Hangup { .. } => "hangup",
        }
    }
}

/// An SDP blob plus its role, mirroring the RTC session description
/// dictionary (`{ "type": "offer", "sdp": "..." }`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    #[must_use]
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    #[must_use]
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// One trickled ICE candidate, in RTC dictionary form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateInit {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

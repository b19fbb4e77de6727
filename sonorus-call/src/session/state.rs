//! Call state machine.
//!
//! [`CallStatus::apply`] is the only place state transitions happen. It is a
//! pure function over (status, role, event), so every path the session
//! driver can take is testable without tasks, timers, or I/O.

use serde::{Deserialize, Serialize};

/// Which side of the call this session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallRole {
    /// Dialed out; sends the offer.
    Caller,
    /// Was dialed; sends the answer.
    Callee,
}

/// Why a session closed normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// We hung up.
    HungUp,
    /// The remote peer hung up or declined.
    RemoteHangup,
    /// We declined the incoming call.
    Declined,
    /// Nobody answered before the ring timeout.
    NoAnswer,
    /// The media link shut down.
    ConnectionLost,
}

/// Which layer a failed session blames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Microphone could not be acquired.
    Media,
    /// Offer/answer exchange broke down.
    Negotiation,
    /// The signaling transport died mid-call.
    Signaling,
    /// The established media link failed.
    Transport,
}

/// Everything that can drive a session forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEvent {
    /// Local user started an outgoing call.
    Dial,
    /// A remote offer arrived for us.
    OfferReceived,
    /// Local user accepted the ringing call.
    Accept,
    /// Local user declined the ringing call.
    Decline,
    /// Microphone acquired.
    MediaReady,
    /// Microphone acquisition failed.
    MediaFailed,
    /// The remote answer arrived for our outstanding offer.
    AnswerReceived,
    /// Offer/answer machinery failed locally.
    NegotiationFailed,
    /// The peer link reached connected.
    LinkConnected,
    /// The peer link shut down cleanly.
    LinkClosed,
    /// The peer link failed.
    LinkFailed,
    /// The remote peer hung up.
    RemoteHangup,
    /// Local user hung up.
    HangUp,
    /// Nobody answered in time.
    RingTimeout,
    /// The signaling subscription died while the session needed it.
    SignalingLost,
}

/// Lifecycle of one call session.
///
/// `Closed` and `Failed` are terminal; applying any further event to them is
/// an error rather than a silent no-op, so double-teardown bugs surface in
/// tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CallStatus {
    /// Created but not yet dialing or ringing.
    Idle,
    /// Callee side: offer held, waiting for the user to accept or decline.
    Ringing,
    /// Microphone acquisition in flight.
    AcquiringMedia,
    /// Caller side: offer published, waiting for the answer.
    Calling,
    /// Descriptions exchanged, ICE in progress.
    Connecting,
    /// Media flowing.
    Connected,
    /// Ended normally.
    Closed { reason: EndReason },
    /// Ended with an error.
    Failed { failure: FailureKind },
}

impl CallStatus {
    /// Applies `event`, consuming the current status and returning the next
    /// one. Events that have no meaning in the current state come back as
    /// [`TransitionError::OutOfScope`]; the driver logs and drops those.
    pub fn apply(self, role: CallRole, event: CallEvent) -> Result<Self, TransitionError> {
        use CallEvent as E;
        use CallStatus as S;

        match (self, event) {
            (status @ (S::Closed { .. } | S::Failed { .. }), event) => {
                Err(TransitionError::Terminal {
                    status: format!("{status:?}"),
                    event: format!("{event:?}"),
                })
            }

            (S::Idle, E::Dial) => Ok(S::AcquiringMedia),
            (S::Idle, E::OfferReceived) => Ok(S::Ringing),

            (S::Ringing, E::Accept) => Ok(S::AcquiringMedia),
            (S::Ringing, E::Decline | E::HangUp) => Ok(S::Closed {
                reason: EndReason::Declined,
            }),
            (S::Ringing, E::RingTimeout) => Ok(S::Closed {
                reason: EndReason::NoAnswer,
            }),

            (S::AcquiringMedia, E::MediaReady) => Ok(match role {
                CallRole::Caller => S::Calling,
                CallRole::Callee => S::Connecting,
            }),

            (S::Calling, E::AnswerReceived) => Ok(S::Connecting),
            (S::Calling, E::RingTimeout) => Ok(S::Closed {
                reason: EndReason::NoAnswer,
            }),

            (S::Connecting | S::Connected, E::LinkConnected) => Ok(S::Connected),
            (S::Connecting | S::Connected, E::LinkFailed) => Ok(S::Failed {
                failure: FailureKind::Transport,
            }),

            // Rows below apply from any remaining non-terminal state.
            (_, E::HangUp) => Ok(S::Closed {
                reason: EndReason::HungUp,
            }),
            (_, E::RemoteHangup) => Ok(S::Closed {
                reason: EndReason::RemoteHangup,
            }),
            (_, E::LinkClosed) => Ok(S::Closed {
                reason: EndReason::ConnectionLost,
            }),
            (_, E::MediaFailed) => Ok(S::Failed {
                failure: FailureKind::Media,
            }),
            (_, E::NegotiationFailed) => Ok(S::Failed {
                failure: FailureKind::Negotiation,
            }),
            (_, E::SignalingLost) => Ok(S::Failed {
                failure: FailureKind::Signaling,
            }),

            (status, event) => Err(TransitionError::OutOfScope {
                status: format!("{status:?}"),
                event: format!("{event:?}"),
            }),
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed { .. } | Self::Failed { .. })
    }

    #[must_use]
    pub const fn end_reason(&self) -> Option<EndReason> {
        match self {
            Self::Closed { reason } => Some(*reason),
            _ => None,
        }
    }

    #[must_use]
    pub const fn failure(&self) -> Option<FailureKind> {
        match self {
            Self::Failed { failure } => Some(*failure),
            _ => None,
        }
    }
}

/// Rejected transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("session already ended: cannot apply {event} in {status}")]
    Terminal { status: String, event: String },

    #[error("event {event} out of scope in {status}")]
    OutOfScope { status: String, event: String },
}

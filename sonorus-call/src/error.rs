//! Crate-level error types.

use crate::media::MediaError;
use crate::participant::ParticipantId;
use crate::peer::PeerError;
use crate::signaling::BusError;

/// Convenience alias used throughout the crate.
pub type Result<T, E = CallError> = std::result::Result<T, E>;

/// Errors surfaced by the call manager API.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("already in a call")]
    AlreadyInCall,

    #[error("no active call")]
    NoActiveCall,

    #[error("no pending call from {0}")]
    NoPendingCall(ParticipantId),

    #[error("cannot call yourself")]
    CalledSelf,

    #[error("call session is shutting down")]
    SessionClosed,

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Peer(#[from] PeerError),
}

//! Sonorus Voice Calls
//!
//! Peer-to-peer voice calling for the Sonorus chat platform: typed
//! signaling over a pub/sub bus, a per-call session state machine driving
//! media negotiation and teardown, and a per-user manager enforcing the
//! single-live-call rule.

pub mod config;
pub mod error;
pub mod manager;
pub mod media;
pub mod metrics;
pub mod participant;
pub mod peer;
pub mod session;
pub mod signaling;
pub mod webrtc;

mod activity;

pub use config::{CallConfig, IceServerConfig};
pub use error::{CallError, Result};
pub use manager::{CallManager, CallUpdate, Collaborators};
pub use participant::{Participant, ParticipantId, UserDirectory};
pub use session::{CallRole, CallSnapshot, CallStatus, EndReason, FailureKind};

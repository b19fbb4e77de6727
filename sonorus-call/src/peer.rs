//! Peer transport abstraction.
//!
//! [`PeerApi`] is the seam between session logic and a WebRTC engine. The
//! production implementation lives in [`crate::webrtc`]; tests drive the
//! session with in-process fakes.

use crate::config::CallConfig;
use crate::media::{AudioProbe, AudioTrack};
use crate::signaling::{IceCandidateInit, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Transport-level failures.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    #[error("peer connection error: {0}")]
    Connection(String),

    #[error("sdp error: {0}")]
    Sdp(String),

    #[error("ice error: {0}")]
    Ice(String),

    #[error("track error: {0}")]
    Track(String),
}

/// Coarse link state, mirroring the RTC peer connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Asynchronous notifications emitted by a peer connection.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A local ICE candidate was discovered and should be signaled to the
    /// remote peer right away.
    IceCandidate(IceCandidateInit),
    /// The link state changed.
    ConnectionState(LinkState),
    /// The first remote media arrived; a remote probe may now be available.
    RemoteTrack,
}

/// One transport stats reading. Byte counters are cumulative; rates are
/// derived by the sampler from consecutive readings.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportSample {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Current round-trip time, when the transport reports one.
    pub rtt: Option<Duration>,
}

/// Factory for peer connections.
#[async_trait]
pub trait PeerApi: Send + Sync {
    /// Creates a peer connection configured from `config.ice_servers`.
    /// Events are delivered on `events` for the life of the connection.
    async fn connect(
        &self,
        config: &CallConfig,
        events: mpsc::Sender<PeerEvent>,
    ) -> Result<Arc<dyn PeerConnection>, PeerError>;
}

/// A single peer-to-peer media link.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Attaches the local audio track before negotiation.
    async fn add_track(&self, track: Arc<dyn AudioTrack>) -> Result<(), PeerError>;

    async fn create_offer(&self) -> Result<SessionDescription, PeerError>;

    async fn create_answer(&self) -> Result<SessionDescription, PeerError>;

    async fn set_local_description(&self, sdp: SessionDescription) -> Result<(), PeerError>;

    async fn set_remote_description(&self, sdp: SessionDescription) -> Result<(), PeerError>;

    /// Applies one remote candidate. Callers must only invoke this after the
    /// remote description is set; failures on individual candidates are
    /// non-fatal and should be skipped.
    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), PeerError>;

    /// Reads cumulative transport counters and the current round-trip time.
    async fn transport_sample(&self) -> Result<TransportSample, PeerError>;

    /// Analyser over the remote audio, once remote media has arrived.
    fn remote_probe(&self) -> Option<Arc<dyn AudioProbe>>;

    /// Tears the connection down. Must be idempotent.
    async fn close(&self);
}

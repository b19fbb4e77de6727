//! WebRTC peer backend.
//!
//! Implements [`PeerApi`]/[`PeerConnection`] over the `webrtc` crate: Opus
//! audio over an RTP local track, default interceptors, and connection
//! events forwarded into the session's event channel. Audio capture and
//! playback stay with the embedding application; it writes encoded RTP
//! into [`WebRtcConnection::local_rtp_track`] and reads the remote track
//! once [`PeerEvent::RemoteTrack`] fires.

use crate::config::{CallConfig, IceServerConfig};
use crate::media::{AudioProbe, AudioTrack};
use crate::peer::{LinkState, PeerApi, PeerConnection, PeerError, PeerEvent, TransportSample};
use crate::signaling::{IceCandidateInit, SdpKind, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::stats::StatsReportType;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

impl From<webrtc::Error> for PeerError {
    fn from(err: webrtc::Error) -> Self {
        Self::Connection(err.to_string())
    }
}

fn opus_capability() -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: "audio/opus".to_string(),
        clock_rate: 48000,
        channels: 2,
        sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
        rtcp_feedback: vec![],
    }
}

fn rtc_config(servers: &[IceServerConfig]) -> RTCConfiguration {
    let ice_servers: Vec<RTCIceServer> = servers
        .iter()
        .map(|s| RTCIceServer {
            urls: s.urls.clone(),
            username: s.username.clone().unwrap_or_default(),
            credential: s.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect();

    RTCConfiguration {
        ice_servers,
        ..Default::default()
    }
}

fn rtc_description(sdp: SessionDescription) -> Result<RTCSessionDescription, webrtc::Error> {
    match sdp.kind {
        SdpKind::Offer => RTCSessionDescription::offer(sdp.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(sdp.sdp),
    }
}

const fn link_state(state: RTCPeerConnectionState) -> Option<LinkState> {
    match state {
        RTCPeerConnectionState::New => Some(LinkState::New),
        RTCPeerConnectionState::Connecting => Some(LinkState::Connecting),
        RTCPeerConnectionState::Connected => Some(LinkState::Connected),
        RTCPeerConnectionState::Disconnected => Some(LinkState::Disconnected),
        RTCPeerConnectionState::Failed => Some(LinkState::Failed),
        RTCPeerConnectionState::Closed => Some(LinkState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

/// Peer connection factory backed by the `webrtc` crate.
///
/// One instance per process; the media engine and interceptor registry are
/// built once and shared by every connection.
pub struct WebRtcApi {
    api: API,
}

impl WebRtcApi {
    pub fn new() -> Result<Self, PeerError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_codec(
            RTCRtpCodecParameters {
                capability: opus_capability(),
                payload_type: 111,
                ..Default::default()
            },
            RTPCodecType::Audio,
        )?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        info!("webrtc api initialized");
        Ok(Self { api })
    }
}

#[async_trait]
impl PeerApi for WebRtcApi {
    async fn connect(
        &self,
        config: &CallConfig,
        events: mpsc::Sender<PeerEvent>,
    ) -> Result<Arc<dyn PeerConnection>, PeerError> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(rtc_config(&config.ice_servers))
                .await?,
        );

        let remote = Arc::new(RwLock::new(None));
        install_handlers(&pc, events, remote.clone());

        let local_rtp = Arc::new(TrackLocalStaticRTP::new(
            opus_capability(),
            "audio".to_string(),
            "sonorus-voice".to_string(),
        ));

        debug!("peer connection created");
        Ok(Arc::new(WebRtcConnection {
            pc,
            local_rtp,
            audio: RwLock::new(None),
            remote,
        }))
    }
}

fn install_handlers(
    pc: &Arc<RTCPeerConnection>,
    events: mpsc::Sender<PeerEvent>,
    remote: Arc<RwLock<Option<Arc<TrackRemote>>>>,
) {
    let ice_events = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let events = ice_events.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else {
                // End of gathering.
                return;
            };
            match candidate.to_json() {
                Ok(init) => {
                    let _ = events
                        .send(PeerEvent::IceCandidate(IceCandidateInit {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        }))
                        .await;
                }
                Err(err) => debug!(error = %err, "failed to serialize local ICE candidate"),
            }
        })
    }));

    let state_events = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let events = state_events.clone();
        Box::pin(async move {
            debug!(?state, "peer connection state changed");
            if let Some(mapped) = link_state(state) {
                let _ = events.send(PeerEvent::ConnectionState(mapped)).await;
            }
        })
    }));

    pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
        let events = events.clone();
        let remote = remote.clone();
        Box::pin(async move {
            info!(
                kind = %track.kind(),
                mime = %track.codec().capability.mime_type,
                "remote track received"
            );
            *remote.write().await = Some(track);
            let _ = events.send(PeerEvent::RemoteTrack).await;
        })
    }));
}

/// One live peer connection with its Opus RTP sink.
pub struct WebRtcConnection {
    pc: Arc<RTCPeerConnection>,
    local_rtp: Arc<TrackLocalStaticRTP>,
    audio: RwLock<Option<Arc<dyn AudioTrack>>>,
    remote: Arc<RwLock<Option<Arc<TrackRemote>>>>,
}

impl WebRtcConnection {
    /// RTP sink for locally captured, Opus-encoded audio.
    #[must_use]
    pub fn local_rtp_track(&self) -> Arc<TrackLocalStaticRTP> {
        self.local_rtp.clone()
    }

    /// The remote audio track, once the peer's media has arrived.
    pub async fn remote_rtp_track(&self) -> Option<Arc<TrackRemote>> {
        self.remote.read().await.clone()
    }

    /// The microphone handle attached for this call.
    pub async fn audio_track(&self) -> Option<Arc<dyn AudioTrack>> {
        self.audio.read().await.clone()
    }
}

#[async_trait]
impl PeerConnection for WebRtcConnection {
    async fn add_track(&self, track: Arc<dyn AudioTrack>) -> Result<(), PeerError> {
        self.pc
            .add_track(self.local_rtp.clone() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| PeerError::Track(e.to_string()))?;
        *self.audio.write().await = Some(track);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| PeerError::Sdp(e.to_string()))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| PeerError::Sdp(e.to_string()))?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, sdp: SessionDescription) -> Result<(), PeerError> {
        let description = rtc_description(sdp).map_err(|e| PeerError::Sdp(e.to_string()))?;
        self.pc
            .set_local_description(description)
            .await
            .map_err(|e| PeerError::Sdp(e.to_string()))
    }

    async fn set_remote_description(&self, sdp: SessionDescription) -> Result<(), PeerError> {
        let description = rtc_description(sdp).map_err(|e| PeerError::Sdp(e.to_string()))?;
        self.pc
            .set_remote_description(description)
            .await
            .map_err(|e| PeerError::Sdp(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), PeerError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await
            .map_err(|e| PeerError::Ice(e.to_string()))
    }

    async fn transport_sample(&self) -> Result<TransportSample, PeerError> {
        let report = self.pc.get_stats().await;
        for stat in report.reports.into_values() {
            let StatsReportType::CandidatePair(pair) = stat else {
                continue;
            };
            if !pair.nominated {
                continue;
            }
            let rtt = (pair.current_round_trip_time > 0.0)
                .then(|| Duration::from_secs_f64(pair.current_round_trip_time));
            return Ok(TransportSample {
                bytes_sent: pair.bytes_sent,
                bytes_received: pair.bytes_received,
                rtt,
            });
        }
        // No nominated pair yet; counters start at zero.
        Ok(TransportSample::default())
    }

    /// Spectrum analysis needs a decoded audio pipeline, which lives with
    /// the embedding application. Remote speaking detection is therefore
    /// driven by the embedder's probes, not this adapter.
    fn remote_probe(&self) -> Option<Arc<dyn AudioProbe>> {
        None
    }

    async fn close(&self) {
        if let Err(err) = self.pc.close().await {
            debug!(error = %err, "peer connection close reported an error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_initializes() {
        assert!(WebRtcApi::new().is_ok());
    }

    #[test]
    fn test_rtc_config_maps_credentials() {
        let servers = vec![
            IceServerConfig::default(),
            IceServerConfig::turn(
                vec!["turn:turn.example.com:3478".to_string()],
                "user",
                "secret",
            ),
        ];
        let config = rtc_config(&servers);
        assert_eq!(config.ice_servers.len(), 2);
        assert_eq!(config.ice_servers[0].username, "");
        assert_eq!(config.ice_servers[1].username, "user");
        assert_eq!(config.ice_servers[1].credential, "secret");
    }

    #[test]
    fn test_unspecified_link_state_is_skipped() {
        assert!(link_state(RTCPeerConnectionState::Unspecified).is_none());
        assert_eq!(
            link_state(RTCPeerConnectionState::Connected),
            Some(LinkState::Connected)
        );
    }
}

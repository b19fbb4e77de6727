//! Call session driver.
//!
//! A session is one task owning everything a single call needs: the
//! signaling channel for its peer, the microphone track, the peer
//! connection, and the timers. All inputs (manager commands, signaling,
//! peer events, sampler readings) funnel into one select loop that feeds
//! the [`state::CallStatus`] reducer and performs the side effects each
//! transition calls for. Teardown is a single idempotent path shared by
//! every way a call can end.

pub mod state;

pub use state::{CallEvent, CallRole, CallStatus, EndReason, FailureKind, TransitionError};

use crate::activity::{self, SpeakingSample};
use crate::config::CallConfig;
use crate::error::CallError;
use crate::media::{AudioProbe, AudioTrack, MediaError, MediaSource};
use crate::metrics::{self, ConnectionMetrics};
use crate::participant::{topics, Participant, ParticipantId};
use crate::peer::{LinkState, PeerApi, PeerConnection, PeerError, PeerEvent};
use crate::signaling::{
    IceCandidateInit, SessionDescription, SignalBus, SignalChannel, SignalMessage, SignalSender,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Point-in-time view of a session, published on every observable change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSnapshot {
    pub session_id: Uuid,
    pub role: CallRole,
    pub remote: Participant,
    pub status: CallStatus,
    pub muted: bool,
    pub local_speaking: bool,
    pub remote_speaking: bool,
    pub metrics: ConnectionMetrics,
    pub started_at: DateTime<Utc>,
    pub connected_at: Option<DateTime<Utc>>,
}

impl CallSnapshot {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    #[must_use]
    pub const fn end_reason(&self) -> Option<EndReason> {
        self.status.end_reason()
    }

    #[must_use]
    pub const fn failure(&self) -> Option<FailureKind> {
        self.status.failure()
    }
}

/// Ordered hold queue for ICE candidates that cannot be handed on yet:
/// inbound ones wait for the remote description, outbound ones wait for
/// the remote's pair-topic subscription.
#[derive(Debug, Default)]
pub struct PendingCandidates {
    queue: Vec<IceCandidateInit>,
}

impl PendingCandidates {
    pub fn push(&mut self, candidate: IceCandidateInit) {
        self.queue.push(candidate);
    }

    /// Takes every queued candidate, oldest first.
    pub fn drain(&mut self) -> Vec<IceCandidateInit> {
        std::mem::take(&mut self.queue)
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Instructions a session accepts from the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionCommand {
    /// Answer the ringing call.
    Accept,
    /// Reject the ringing call, telling the caller.
    Decline,
    /// End the call, telling the remote peer if it could be listening.
    HangUp,
    /// Tear down silently. Used when a crossing offer supersedes this
    /// outbound attempt; the surviving call must not observe a hangup.
    Abandon,
    SetMuted(bool),
    ToggleMute,
}

/// What a session reports back to the manager.
#[derive(Debug, Clone)]
pub(crate) enum SessionNotice {
    Snapshot(CallSnapshot),
    Exited {
        session_id: Uuid,
        remote: ParticipantId,
        status: CallStatus,
    },
}

/// Dependencies a new session needs, bundled by the manager.
pub(crate) struct SessionContext {
    pub local: Participant,
    pub remote: Participant,
    pub config: CallConfig,
    pub bus: Arc<dyn SignalBus>,
    pub media: Arc<dyn MediaSource>,
    pub peers: Arc<dyn PeerApi>,
    pub notices: mpsc::Sender<SessionNotice>,
}

/// Manager-side handle to a spawned session.
#[derive(Debug, Clone)]
pub(crate) struct SessionHandle {
    pub id: Uuid,
    pub remote: ParticipantId,
    pub role: CallRole,
    pub commands: mpsc::Sender<SessionCommand>,
}

/// The session task state. Constructed through [`CallSession::spawn_caller`]
/// or [`CallSession::spawn_callee`]; lives on its own task until terminal.
pub(crate) struct CallSession {
    id: Uuid,
    role: CallRole,
    local: Participant,
    remote: Participant,
    config: CallConfig,

    status: CallStatus,
    muted: bool,
    local_speaking: bool,
    remote_speaking: bool,
    metrics: ConnectionMetrics,
    started_at: DateTime<Utc>,
    connected_at: Option<DateTime<Utc>>,

    bus: Arc<dyn SignalBus>,
    media: Arc<dyn MediaSource>,
    peers: Arc<dyn PeerApi>,
    channel: SignalChannel,
    sender: SignalSender,

    pc: Option<Arc<dyn PeerConnection>>,
    track: Option<Arc<dyn AudioTrack>>,
    local_probe: Option<Arc<dyn AudioProbe>>,
    remote_probe: Option<Arc<dyn AudioProbe>>,
    pending_offer: Option<SessionDescription>,
    pending_candidates: PendingCandidates,
    outbound_candidates: PendingCandidates,
    remote_description_set: bool,
    remote_subscribed: bool,
    offer_sent: bool,

    commands: mpsc::Receiver<SessionCommand>,
    commands_closed: bool,
    media_rx: mpsc::Receiver<Result<Arc<dyn AudioTrack>, MediaError>>,
    media_tx: mpsc::Sender<Result<Arc<dyn AudioTrack>, MediaError>>,
    peer_rx: mpsc::Receiver<PeerEvent>,
    peer_tx: mpsc::Sender<PeerEvent>,
    activity_rx: mpsc::Receiver<SpeakingSample>,
    activity_tx: mpsc::Sender<SpeakingSample>,
    metrics_rx: mpsc::Receiver<ConnectionMetrics>,
    metrics_tx: mpsc::Sender<ConnectionMetrics>,
    notices: mpsc::Sender<SessionNotice>,

    cancel: CancellationToken,
    activity_cancel: Option<CancellationToken>,
    ring_deadline: Option<Instant>,
    linger_deadline: Option<Instant>,
    cleaned_up: bool,
}

impl CallSession {
    /// Spawns an outgoing session: acquires media, publishes the offer, and
    /// waits for the answer.
    pub(crate) async fn spawn_caller(ctx: SessionContext) -> Result<SessionHandle, CallError> {
        Self::spawn(ctx, CallRole::Caller, None).await
    }

    /// Spawns an incoming session holding `offer`. It rings until accepted,
    /// declined, or timed out; candidates trickling in behind the offer are
    /// queued meanwhile.
    pub(crate) async fn spawn_callee(
        ctx: SessionContext,
        offer: SessionDescription,
    ) -> Result<SessionHandle, CallError> {
        Self::spawn(ctx, CallRole::Callee, Some(offer)).await
    }

    async fn spawn(
        ctx: SessionContext,
        role: CallRole,
        offer: Option<SessionDescription>,
    ) -> Result<SessionHandle, CallError> {
        let id = Uuid::new_v4();
        // Subscribe before anything is published so no reply can be missed.
        let topic = topics::call_topic(ctx.local.id, ctx.remote.id);
        let (channel, sender) =
            SignalChannel::open(ctx.bus.clone(), topic, ctx.local.id, ctx.remote.id).await?;

        let buffer = ctx.config.signal_buffer;
        let (commands_tx, commands_rx) = mpsc::channel(buffer);
        let (media_tx, media_rx) = mpsc::channel(buffer);
        let (peer_tx, peer_rx) = mpsc::channel(buffer);
        let (activity_tx, activity_rx) = mpsc::channel(buffer);
        let (metrics_tx, metrics_rx) = mpsc::channel(buffer);

        let remote_id = ctx.remote.id;
        let session = Self {
            id,
            role,
            local: ctx.local,
            remote: ctx.remote,
            config: ctx.config,
            status: CallStatus::Idle,
            muted: false,
            local_speaking: false,
            remote_speaking: false,
            metrics: ConnectionMetrics::unknown(),
            started_at: Utc::now(),
            connected_at: None,
            bus: ctx.bus,
            media: ctx.media,
            peers: ctx.peers,
            channel,
            sender,
            pc: None,
            track: None,
            local_probe: None,
            remote_probe: None,
            pending_offer: offer,
            pending_candidates: PendingCandidates::default(),
            outbound_candidates: PendingCandidates::default(),
            remote_description_set: false,
            // A callee's remote subscribed the pair topic before it sent
            // the offer; a caller's remote has not even been rung yet.
            remote_subscribed: matches!(role, CallRole::Callee),
            offer_sent: false,
            commands: commands_rx,
            commands_closed: false,
            media_rx,
            media_tx,
            peer_rx,
            peer_tx,
            activity_rx,
            activity_tx,
            metrics_rx,
            metrics_tx,
            notices: ctx.notices,
            cancel: CancellationToken::new(),
            activity_cancel: None,
            ring_deadline: None,
            linger_deadline: None,
            cleaned_up: false,
        };

        let startup = match role {
            CallRole::Caller => CallEvent::Dial,
            CallRole::Callee => CallEvent::OfferReceived,
        };
        tokio::spawn(session.run(startup));

        Ok(SessionHandle {
            id,
            remote: remote_id,
            role,
            commands: commands_tx,
        })
    }

    async fn run(mut self, startup: CallEvent) {
        info!(session_id = %self.id, role = ?self.role, remote = %self.remote.id, "call session started");
        self.handle_event(startup).await;

        while !(self.status.is_terminal() && self.linger_deadline.is_none()) {
            tokio::select! {
                cmd = self.commands.recv(), if !self.commands_closed => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        // Manager is gone; end the call locally.
                        self.commands_closed = true;
                        self.handle_command(SessionCommand::HangUp).await;
                    }
                },
                msg = self.channel.recv(), if !self.channel.is_closed() => match msg {
                    Some(msg) => self.handle_signal(msg).await,
                    None => {
                        warn!(session_id = %self.id, "signaling subscription closed mid-call");
                        self.channel.close();
                        self.handle_event(CallEvent::SignalingLost).await;
                    }
                },
                Some(outcome) = self.media_rx.recv() => self.handle_media(outcome).await,
                Some(event) = self.peer_rx.recv() => self.handle_peer_event(event).await,
                Some(sample) = self.activity_rx.recv() => self.handle_speaking(sample).await,
                Some(metrics) = self.metrics_rx.recv() => self.handle_metrics(metrics).await,
                () = sleep_until_opt(self.ring_deadline), if self.ring_deadline.is_some() => {
                    info!(session_id = %self.id, "nobody answered before the ring timeout");
                    self.handle_event(CallEvent::RingTimeout).await;
                }
                () = sleep_until_opt(self.linger_deadline), if self.linger_deadline.is_some() => break,
            }
        }

        self.cleanup().await;
        let _ = self
            .notices
            .send(SessionNotice::Exited {
                session_id: self.id,
                remote: self.remote.id,
                status: self.status.clone(),
            })
            .await;
        debug!(session_id = %self.id, "call session task exited");
    }

    /// Feeds one event through the reducer and performs the entry actions
    /// of the resulting state. Out-of-scope events are dropped.
    async fn handle_event(&mut self, event: CallEvent) {
        match self.status.clone().apply(self.role, event) {
            Ok(next) => {
                if next == self.status {
                    return;
                }
                info!(
                    session_id = %self.id,
                    from = ?self.status,
                    to = ?next,
                    ?event,
                    "session transition"
                );
                self.enter(next).await;
            }
            Err(TransitionError::OutOfScope { .. }) => {
                debug!(session_id = %self.id, ?event, status = ?self.status, "event out of scope; dropped");
            }
            Err(TransitionError::Terminal { .. }) => {
                debug!(session_id = %self.id, ?event, "event after terminal state; dropped");
            }
        }
    }

    async fn enter(&mut self, next: CallStatus) {
        self.status = next;
        match &self.status {
            CallStatus::Ringing | CallStatus::Calling => {
                self.ring_deadline = Some(Instant::now() + self.config.ring_timeout);
            }
            CallStatus::AcquiringMedia => {
                self.ring_deadline = None;
                self.spawn_media_acquisition();
            }
            CallStatus::Connecting => {
                self.ring_deadline = None;
            }
            CallStatus::Connected => {
                self.ring_deadline = None;
                if self.connected_at.is_none() {
                    self.connected_at = Some(Utc::now());
                    self.start_samplers();
                }
            }
            CallStatus::Closed { .. } => {
                self.cleanup().await;
            }
            CallStatus::Failed { .. } => {
                // Resources are released right away; the session record
                // stays observable for a short grace window so the UI can
                // show what went wrong.
                self.cleanup().await;
                self.linger_deadline = Some(Instant::now() + self.config.failure_linger);
            }
            CallStatus::Idle => {}
        }
        self.publish_snapshot().await;
    }

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Accept => self.handle_event(CallEvent::Accept).await,
            SessionCommand::Decline => {
                if matches!(self.status, CallStatus::Ringing) {
                    self.send_hangup_best_effort().await;
                }
                self.handle_event(CallEvent::Decline).await;
            }
            SessionCommand::HangUp => {
                if !self.status.is_terminal() && self.remote_could_be_listening() {
                    self.send_hangup_best_effort().await;
                }
                self.handle_event(CallEvent::HangUp).await;
            }
            SessionCommand::Abandon => self.handle_event(CallEvent::HangUp).await,
            SessionCommand::SetMuted(muted) => self.set_muted(muted).await,
            SessionCommand::ToggleMute => {
                let next = !self.muted;
                self.set_muted(next).await;
            }
        }
    }

    /// The callee's peer is subscribed from the moment it dialed; our own
    /// offer is what tells a remote callee to listen.
    const fn remote_could_be_listening(&self) -> bool {
        match self.role {
            CallRole::Caller => self.offer_sent,
            CallRole::Callee => true,
        }
    }

    async fn send_hangup_best_effort(&self) {
        if let Err(err) = self.sender.send_hangup().await {
            warn!(session_id = %self.id, error = %err, "failed to publish hangup");
        }
    }

    async fn set_muted(&mut self, muted: bool) {
        if self.status.is_terminal() || self.muted == muted {
            return;
        }
        self.muted = muted;
        if let Some(track) = &self.track {
            track.set_enabled(!muted);
        }
        debug!(session_id = %self.id, muted, "microphone mute changed");
        self.publish_snapshot().await;
    }

    fn spawn_media_acquisition(&self) {
        let media = self.media.clone();
        let results = self.media_tx.clone();
        tokio::spawn(async move {
            let outcome = media.acquire_audio().await;
            if let Err(unsent) = results.send(outcome).await {
                // The session is already gone; release the device here.
                if let Ok(track) = unsent.0 {
                    track.stop();
                }
            }
        });
    }

    async fn handle_media(&mut self, outcome: Result<Arc<dyn AudioTrack>, MediaError>) {
        match outcome {
            Ok(track) => {
                if !matches!(self.status, CallStatus::AcquiringMedia) {
                    // Ended while the microphone was still opening.
                    track.stop();
                    debug!(session_id = %self.id, "released microphone acquired after teardown");
                    return;
                }
                track.set_enabled(!self.muted);
                self.local_probe = Some(track.probe());
                self.track = Some(track.clone());

                let negotiated = match self.role {
                    CallRole::Caller => self.start_outbound(track).await,
                    CallRole::Callee => self.answer_inbound(track).await,
                };
                match negotiated {
                    Ok(()) => self.handle_event(CallEvent::MediaReady).await,
                    Err(CallError::Bus(err)) => {
                        error!(session_id = %self.id, error = %err, "failed to publish negotiation message");
                        self.handle_event(CallEvent::SignalingLost).await;
                    }
                    Err(err) => {
                        error!(session_id = %self.id, error = %err, "negotiation failed");
                        self.handle_event(CallEvent::NegotiationFailed).await;
                    }
                }
            }
            Err(err) => {
                warn!(session_id = %self.id, error = %err, "microphone acquisition failed");
                self.handle_event(CallEvent::MediaFailed).await;
            }
        }
    }

    /// Caller path: build the connection, publish the offer on the remote
    /// user's dial topic. Local candidates start flowing once the local
    /// description is set; they are held until the remote's first reply
    /// shows it is listening on the pair topic, then go out in order.
    async fn start_outbound(&mut self, track: Arc<dyn AudioTrack>) -> Result<(), CallError> {
        let pc = self.peers.connect(&self.config, self.peer_tx.clone()).await?;
        pc.add_track(track).await?;
        let offer = pc.create_offer().await?;
        pc.set_local_description(offer.clone()).await?;
        self.pc = Some(pc);

        let dial = SignalSender::new(
            self.bus.clone(),
            topics::dial_topic(self.remote.id),
            self.local.id,
            self.remote.id,
        );
        dial.send_offer(offer).await?;
        self.offer_sent = true;
        info!(session_id = %self.id, remote = %self.remote.id, "offer published");
        Ok(())
    }

    /// Callee path: apply the held offer, flush queued candidates, publish
    /// the answer on the pair topic.
    async fn answer_inbound(&mut self, track: Arc<dyn AudioTrack>) -> Result<(), CallError> {
        let offer = self
            .pending_offer
            .take()
            .ok_or_else(|| PeerError::Sdp("no held offer to answer".into()))?;

        let pc = self.peers.connect(&self.config, self.peer_tx.clone()).await?;
        pc.add_track(track).await?;
        pc.set_remote_description(offer).await?;
        self.pc = Some(pc.clone());
        self.remote_description_set = true;
        self.flush_pending_candidates().await;

        let answer = pc.create_answer().await?;
        pc.set_local_description(answer.clone()).await?;
        self.sender.send_answer(answer).await?;
        info!(session_id = %self.id, remote = %self.remote.id, "answer published");
        Ok(())
    }

    async fn handle_signal(&mut self, msg: SignalMessage) {
        if self.status.is_terminal() {
            debug!(session_id = %self.id, kind = msg.kind(), "signal after teardown; dropped");
            return;
        }
        if !matches!(msg, SignalMessage::Hangup { .. }) {
            // Traffic from the remote proves its pair-topic subscription
            // is up; anything held back for it can go out now.
            self.confirm_remote_subscribed().await;
            if self.status.is_terminal() {
                return;
            }
        }
        match msg {
            SignalMessage::Offer { .. } => {
                debug!(session_id = %self.id, "duplicate offer for live session; dropped");
            }
            SignalMessage::Answer { sdp, .. } => {
                if matches!(self.status, CallStatus::Calling) {
                    match self.apply_answer(sdp).await {
                        Ok(()) => self.handle_event(CallEvent::AnswerReceived).await,
                        Err(err) => {
                            error!(session_id = %self.id, error = %err, "failed to apply remote answer");
                            self.handle_event(CallEvent::NegotiationFailed).await;
                        }
                    }
                } else {
                    debug!(session_id = %self.id, status = ?self.status, "answer with no outstanding offer; dropped");
                }
            }
            SignalMessage::IceCandidate { candidate, .. } => {
                self.handle_remote_candidate(candidate).await;
            }
            SignalMessage::Hangup { .. } => {
                info!(session_id = %self.id, remote = %self.remote.id, "remote peer hung up");
                self.handle_event(CallEvent::RemoteHangup).await;
            }
        }
    }

    async fn apply_answer(&mut self, sdp: SessionDescription) -> Result<(), CallError> {
        let Some(pc) = self.pc.clone() else {
            return Err(PeerError::Connection("no peer connection for answer".into()).into());
        };
        pc.set_remote_description(sdp).await?;
        self.remote_description_set = true;
        self.flush_pending_candidates().await;
        Ok(())
    }

    async fn handle_remote_candidate(&mut self, candidate: IceCandidateInit) {
        if !self.remote_description_set {
            self.pending_candidates.push(candidate);
            return;
        }
        if let Some(pc) = self.pc.clone() {
            if let Err(err) = pc.add_ice_candidate(candidate).await {
                // Stale candidates (from an abandoned attempt, or delivered
                // twice) must not kill the call.
                warn!(session_id = %self.id, error = %err, "skipping ICE candidate");
            }
        }
    }

    async fn flush_pending_candidates(&mut self) {
        let Some(pc) = self.pc.clone() else { return };
        let queued = self.pending_candidates.drain();
        if queued.is_empty() {
            return;
        }
        debug!(session_id = %self.id, count = queued.len(), "applying queued ICE candidates");
        for candidate in queued {
            if let Err(err) = pc.add_ice_candidate(candidate).await {
                warn!(session_id = %self.id, error = %err, "skipping ICE candidate");
            }
        }
    }

    /// Marks the remote as reachable on the pair topic and publishes the
    /// local candidates held back until then, oldest first.
    async fn confirm_remote_subscribed(&mut self) {
        if self.remote_subscribed {
            return;
        }
        self.remote_subscribed = true;
        let held = self.outbound_candidates.drain();
        if held.is_empty() {
            return;
        }
        debug!(session_id = %self.id, count = held.len(), "publishing held local ICE candidates");
        for candidate in held {
            if let Err(err) = self.sender.send_candidate(candidate).await {
                warn!(session_id = %self.id, error = %err, "failed to publish ICE candidate");
                self.handle_event(CallEvent::SignalingLost).await;
                return;
            }
        }
    }

    async fn handle_peer_event(&mut self, event: PeerEvent) {
        match event {
            PeerEvent::IceCandidate(candidate) => {
                if self.status.is_terminal() {
                    return;
                }
                if !self.remote_subscribed {
                    // Nobody is on the pair topic yet; the bus would drop
                    // the publish on the floor.
                    self.outbound_candidates.push(candidate);
                    return;
                }
                if let Err(err) = self.sender.send_candidate(candidate).await {
                    warn!(session_id = %self.id, error = %err, "failed to publish ICE candidate");
                    self.handle_event(CallEvent::SignalingLost).await;
                }
            }
            PeerEvent::ConnectionState(state) => {
                debug!(session_id = %self.id, ?state, "peer link state changed");
                match state {
                    LinkState::Connected => self.handle_event(CallEvent::LinkConnected).await,
                    LinkState::Failed => self.handle_event(CallEvent::LinkFailed).await,
                    LinkState::Disconnected | LinkState::Closed => {
                        self.handle_event(CallEvent::LinkClosed).await;
                    }
                    LinkState::New | LinkState::Connecting => {}
                }
            }
            PeerEvent::RemoteTrack => {
                if let Some(pc) = &self.pc {
                    self.remote_probe = pc.remote_probe();
                }
                if matches!(self.status, CallStatus::Connected) {
                    // Remote media arrived after connect; restart activity
                    // sampling so the new probe is picked up.
                    self.spawn_activity_monitor();
                }
            }
        }
    }

    async fn handle_speaking(&mut self, sample: SpeakingSample) {
        if self.status.is_terminal() {
            return;
        }
        self.local_speaking = sample.local;
        self.remote_speaking = sample.remote;
        self.publish_snapshot().await;
    }

    async fn handle_metrics(&mut self, metrics: ConnectionMetrics) {
        if self.status.is_terminal() {
            return;
        }
        self.metrics = metrics;
        self.publish_snapshot().await;
    }

    fn start_samplers(&mut self) {
        if let Some(pc) = self.pc.clone() {
            metrics::spawn_metrics_sampler(
                pc,
                self.config.stats_interval,
                self.metrics_tx.clone(),
                self.cancel.child_token(),
            );
        }
        self.spawn_activity_monitor();
    }

    fn spawn_activity_monitor(&mut self) {
        if let Some(cancel) = self.activity_cancel.take() {
            cancel.cancel();
        }
        let cancel = self.cancel.child_token();
        self.activity_cancel = Some(cancel.clone());
        activity::spawn_speaking_monitor(
            self.local_probe.clone(),
            self.remote_probe.clone(),
            self.config.speaking_interval,
            self.config.speaking_threshold,
            self.activity_tx.clone(),
            cancel,
        );
    }

    /// The one teardown path. Safe to run any number of times; later calls
    /// are no-ops.
    async fn cleanup(&mut self) {
        if self.cleaned_up {
            return;
        }
        self.cleaned_up = true;
        debug!(session_id = %self.id, "tearing down call session");

        self.cancel.cancel();
        self.ring_deadline = None;
        self.pending_candidates.clear();
        self.outbound_candidates.clear();
        if let Some(track) = self.track.take() {
            track.stop();
        }
        if let Some(pc) = self.pc.take() {
            pc.close().await;
        }
        self.channel.close();
    }

    async fn publish_snapshot(&self) {
        let snapshot = CallSnapshot {
            session_id: self.id,
            role: self.role,
            remote: self.remote.clone(),
            status: self.status.clone(),
            muted: self.muted,
            local_speaking: self.local_speaking,
            remote_speaking: self.remote_speaking,
            metrics: self.metrics,
            started_at: self.started_at,
            connected_at: self.connected_at,
        };
        let _ = self.notices.send(SessionNotice::Snapshot(snapshot)).await;
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

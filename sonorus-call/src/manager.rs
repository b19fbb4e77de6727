//! Call manager: the embedding application's entry point.
//!
//! One manager runs per signed-in user. It listens on the user's dial topic
//! for incoming offers, owns at most one live session at a time, enforces
//! the busy rule, resolves crossing offers, and fans session state out to
//! the application as [`CallUpdate`]s and a watchable [`CallSnapshot`].

use crate::config::CallConfig;
use crate::error::{CallError, Result};
use crate::media::MediaSource;
use crate::participant::{topics, Participant, ParticipantId, UserDirectory};
use crate::peer::PeerApi;
use crate::session::{
    CallRole, CallSession, CallSnapshot, EndReason, FailureKind, SessionCommand, SessionContext,
    SessionHandle, SessionNotice,
};
use crate::signaling::{BusSubscription, SessionDescription, SignalBus, SignalMessage, SignalSender};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Events the manager pushes to the application.
#[derive(Debug, Clone)]
pub enum CallUpdate {
    /// Someone is calling. Answer with [`CallManager::accept_incoming`] or
    /// [`CallManager::decline_incoming`] before the caller's ring timeout.
    IncomingCall {
        from: Participant,
        /// The callee already has this conversation on screen; skip the
        /// ringtone and rely on the in-view indicator.
        suppress_ring: bool,
    },
    /// The live session changed in some observable way.
    Snapshot(CallSnapshot),
    /// A session reached its end and was torn down.
    Ended {
        session_id: Uuid,
        reason: Option<EndReason>,
        failure: Option<FailureKind>,
    },
}

/// The pluggable backends a manager drives.
#[derive(Clone)]
pub struct Collaborators {
    pub bus: Arc<dyn SignalBus>,
    pub media: Arc<dyn MediaSource>,
    pub peers: Arc<dyn PeerApi>,
    pub directory: Arc<dyn UserDirectory>,
}

struct Inner {
    local: Participant,
    config: CallConfig,
    bus: Arc<dyn SignalBus>,
    media: Arc<dyn MediaSource>,
    peers: Arc<dyn PeerApi>,
    directory: Arc<dyn UserDirectory>,
    // Lock order: `active` before `incoming`, always.
    active: RwLock<Option<SessionHandle>>,
    incoming: RwLock<HashMap<ParticipantId, SessionHandle>>,
    active_conversation: RwLock<Option<ParticipantId>>,
    updates: mpsc::Sender<CallUpdate>,
    snapshot_tx: watch::Sender<Option<CallSnapshot>>,
    notices_tx: mpsc::Sender<SessionNotice>,
    cancel: CancellationToken,
}

impl Inner {
    fn session_ctx(&self, remote: Participant) -> SessionContext {
        SessionContext {
            local: self.local.clone(),
            remote,
            config: self.config.clone(),
            bus: self.bus.clone(),
            media: self.media.clone(),
            peers: self.peers.clone(),
            notices: self.notices_tx.clone(),
        }
    }
}

/// Per-user call coordinator. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct CallManager {
    inner: Arc<Inner>,
}

impl CallManager {
    /// Subscribes to the user's dial topic and starts the listener task.
    /// `updates` receives every [`CallUpdate`] in order.
    pub async fn start(
        local: Participant,
        collaborators: Collaborators,
        config: CallConfig,
        updates: mpsc::Sender<CallUpdate>,
    ) -> Result<Self> {
        let dial = collaborators
            .bus
            .subscribe(&topics::dial_topic(local.id))
            .await?;
        let (notices_tx, notices_rx) = mpsc::channel(config.signal_buffer);
        let (snapshot_tx, _) = watch::channel(None);

        let inner = Arc::new(Inner {
            local,
            config,
            bus: collaborators.bus,
            media: collaborators.media,
            peers: collaborators.peers,
            directory: collaborators.directory,
            active: RwLock::new(None),
            incoming: RwLock::new(HashMap::new()),
            active_conversation: RwLock::new(None),
            updates,
            snapshot_tx,
            notices_tx,
            cancel: CancellationToken::new(),
        });

        tokio::spawn(run_listener(inner.clone(), dial, notices_rx));
        info!(user = %inner.local.id, "call manager started");
        Ok(Self { inner })
    }

    /// Dials `remote`. Fails while any call is live or ringing.
    pub async fn start_call(&self, remote: Participant) -> Result<()> {
        if remote.id == self.inner.local.id {
            return Err(CallError::CalledSelf);
        }
        let mut active = self.inner.active.write().await;
        if active.is_some() || !self.inner.incoming.read().await.is_empty() {
            return Err(CallError::AlreadyInCall);
        }

        info!(remote = %remote.id, "starting call");
        let ctx = self.inner.session_ctx(remote);
        let handle = CallSession::spawn_caller(ctx).await?;
        *active = Some(handle);
        Ok(())
    }

    /// Answers the ringing call from `from`.
    pub async fn accept_incoming(&self, from: ParticipantId) -> Result<()> {
        let mut active = self.inner.active.write().await;
        let mut incoming = self.inner.incoming.write().await;
        let handle = incoming
            .remove(&from)
            .ok_or(CallError::NoPendingCall(from))?;
        drop(incoming);

        handle
            .commands
            .send(SessionCommand::Accept)
            .await
            .map_err(|_| CallError::SessionClosed)?;
        info!(caller = %from, "accepted incoming call");
        *active = Some(handle);
        Ok(())
    }

    /// Rejects the ringing call from `from`; the caller is told.
    pub async fn decline_incoming(&self, from: ParticipantId) -> Result<()> {
        let mut incoming = self.inner.incoming.write().await;
        let handle = incoming
            .remove(&from)
            .ok_or(CallError::NoPendingCall(from))?;
        drop(incoming);

        info!(caller = %from, "declined incoming call");
        let _ = handle.commands.send(SessionCommand::Decline).await;
        Ok(())
    }

    /// Hangs up the active call. A no-op when no call is live.
    pub async fn end_call(&self) -> Result<()> {
        let active = self.inner.active.read().await;
        if let Some(handle) = active.as_ref() {
            let _ = handle.commands.send(SessionCommand::HangUp).await;
        }
        Ok(())
    }

    /// Mutes or unmutes the local microphone for the active call.
    pub async fn set_muted(&self, muted: bool) -> Result<()> {
        let active = self.inner.active.read().await;
        let handle = active.as_ref().ok_or(CallError::NoActiveCall)?;
        handle
            .commands
            .send(SessionCommand::SetMuted(muted))
            .await
            .map_err(|_| CallError::SessionClosed)
    }

    /// Flips the mute flag for the active call.
    pub async fn toggle_mute(&self) -> Result<()> {
        let active = self.inner.active.read().await;
        let handle = active.as_ref().ok_or(CallError::NoActiveCall)?;
        handle
            .commands
            .send(SessionCommand::ToggleMute)
            .await
            .map_err(|_| CallError::SessionClosed)
    }

    /// Tells the manager which conversation the user is looking at, so an
    /// offer from that peer rings silently.
    pub async fn set_active_conversation(&self, peer: Option<ParticipantId>) {
        *self.inner.active_conversation.write().await = peer;
    }

    /// Watches the live session. Holds `None` between sessions.
    #[must_use]
    pub fn watch_snapshot(&self) -> watch::Receiver<Option<CallSnapshot>> {
        self.inner.snapshot_tx.subscribe()
    }

    /// The most recent snapshot of the live session, if any.
    #[must_use]
    pub fn snapshot(&self) -> Option<CallSnapshot> {
        self.inner.snapshot_tx.borrow().clone()
    }

    #[must_use]
    pub fn local(&self) -> &Participant {
        &self.inner.local
    }

    /// Ends every live and ringing session and stops the listener.
    pub async fn shutdown(&self) {
        info!(user = %self.inner.local.id, "shutting down call manager");
        if let Some(handle) = self.inner.active.write().await.take() {
            let _ = handle.commands.send(SessionCommand::HangUp).await;
        }
        let pending: Vec<_> = self.inner.incoming.write().await.drain().collect();
        for (_, handle) in pending {
            let _ = handle.commands.send(SessionCommand::Decline).await;
        }
        self.inner.cancel.cancel();
    }
}

impl std::fmt::Debug for CallManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallManager")
            .field("local", &self.inner.local.id)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct ListenerState {
    /// Outbound session abandoned in favor of a crossing offer. Its exit
    /// notice is swallowed so the surviving call is uninterrupted.
    superseded: Option<Uuid>,
}

async fn run_listener(
    inner: Arc<Inner>,
    mut dial: BusSubscription,
    mut notices: mpsc::Receiver<SessionNotice>,
) {
    let mut listener = ListenerState::default();
    let mut dial_closed = false;
    loop {
        tokio::select! {
            () = inner.cancel.cancelled() => break,
            payload = dial.recv(), if !dial_closed => match payload {
                Some(payload) => handle_dial_payload(&inner, &mut listener, &payload).await,
                None => {
                    // Live sessions keep their own subscriptions; only new
                    // incoming calls are lost.
                    error!(user = %inner.local.id, "dial topic subscription closed; incoming calls disabled");
                    dial_closed = true;
                }
            },
            Some(notice) = notices.recv() => handle_notice(&inner, &mut listener, notice).await,
        }
    }
    dial.unsubscribe();
    debug!(user = %inner.local.id, "call manager listener exited");
}

async fn handle_dial_payload(inner: &Arc<Inner>, listener: &mut ListenerState, payload: &str) {
    let msg = match serde_json::from_str::<SignalMessage>(payload) {
        Ok(msg) => msg,
        Err(err) => {
            debug!(error = %err, "dropping undecodable dial payload");
            return;
        }
    };
    if msg.recipient() != inner.local.id || msg.sender() == inner.local.id {
        debug!(kind = msg.kind(), "dropping dial message not addressed to us");
        return;
    }
    match msg {
        SignalMessage::Offer { from, sdp, .. } => handle_offer(inner, listener, from, sdp).await,
        other => {
            debug!(kind = other.kind(), "dropping non-offer dial message");
        }
    }
}

async fn handle_offer(
    inner: &Arc<Inner>,
    listener: &mut ListenerState,
    from: ParticipantId,
    sdp: SessionDescription,
) {
    // Directory latency must not gate the manager API, so the lookup
    // happens before any lock is taken. The busy/glare decisions below
    // run on whatever the state is once the locks are held.
    let caller = resolve_participant(inner, from).await;

    let mut active = inner.active.write().await;
    let mut incoming = inner.incoming.write().await;

    // Same caller retrying while we already ring for them.
    if incoming.contains_key(&from) {
        debug!(caller = %from, "duplicate offer while ringing; dropped");
        return;
    }

    if let Some(current) = active.as_ref() {
        if current.remote == from && current.role == CallRole::Callee {
            debug!(caller = %from, "duplicate offer for established session; dropped");
            return;
        }
        if current.remote == from && current.role == CallRole::Caller {
            // Crossing offers: both sides dialed each other at once. The
            // lower participant id keeps its outbound attempt; the higher
            // one abandons its own and answers instead. Both reach the
            // same single call.
            if inner.local.id < from {
                debug!(remote = %from, "crossing offers; keeping our outbound attempt");
                return;
            }
            info!(remote = %from, "crossing offers; yielding to the remote attempt");
            match CallSession::spawn_callee(inner.session_ctx(caller), sdp).await {
                Ok(handle) => {
                    if let Some(old) = active.take() {
                        listener.superseded = Some(old.id);
                        let _ = old.commands.send(SessionCommand::Abandon).await;
                    }
                    let _ = handle.commands.send(SessionCommand::Accept).await;
                    *active = Some(handle);
                }
                Err(err) => {
                    // Our own attempt stays up; worst case both ring out.
                    error!(remote = %from, error = %err, "failed to yield to crossing offer");
                }
            }
            return;
        }
        // Busy with someone else.
        drop(incoming);
        drop(active);
        decline_busy(inner, from).await;
        return;
    }

    if !incoming.is_empty() {
        // Someone else is already ringing this user.
        drop(incoming);
        drop(active);
        decline_busy(inner, from).await;
        return;
    }

    match CallSession::spawn_callee(inner.session_ctx(caller.clone()), sdp).await {
        Ok(handle) => {
            incoming.insert(from, handle);
            drop(incoming);
            drop(active);

            let suppress_ring = *inner.active_conversation.read().await == Some(from);
            info!(caller = %from, suppress_ring, "incoming call");
            let _ = inner
                .updates
                .send(CallUpdate::IncomingCall {
                    from: caller,
                    suppress_ring,
                })
                .await;
        }
        Err(err) => {
            error!(caller = %from, error = %err, "failed to ring incoming call");
        }
    }
}

/// Tells a caller we cannot take their call right now. Published on the
/// pair topic the caller is already listening on.
async fn decline_busy(inner: &Inner, from: ParticipantId) {
    info!(caller = %from, "busy; auto-declining incoming call");
    let sender = SignalSender::new(
        inner.bus.clone(),
        topics::call_topic(inner.local.id, from),
        inner.local.id,
        from,
    );
    if let Err(err) = sender.send_hangup().await {
        warn!(caller = %from, error = %err, "failed to publish busy decline");
    }
}

async fn resolve_participant(inner: &Inner, id: ParticipantId) -> Participant {
    match inner.directory.lookup(id).await {
        Some(participant) => participant,
        None => {
            warn!(participant = %id, "caller not found in directory");
            Participant::unresolved(id)
        }
    }
}

async fn handle_notice(inner: &Arc<Inner>, listener: &mut ListenerState, notice: SessionNotice) {
    match notice {
        SessionNotice::Snapshot(snapshot) => {
            if !session_is_current(inner, snapshot.session_id).await {
                debug!(session_id = %snapshot.session_id, "dropping snapshot from retired session");
                return;
            }
            inner.snapshot_tx.send_replace(Some(snapshot.clone()));
            let _ = inner.updates.send(CallUpdate::Snapshot(snapshot)).await;
        }
        SessionNotice::Exited {
            session_id,
            remote,
            status,
        } => {
            clear_session(inner, session_id, remote).await;
            if listener.superseded == Some(session_id) {
                listener.superseded = None;
                debug!(session_id = %session_id, "superseded outbound attempt retired");
                return;
            }
            // A newer session may already own the watch; leave it alone then.
            let owns_watch = inner
                .snapshot_tx
                .borrow()
                .as_ref()
                .is_none_or(|snap| snap.session_id == session_id);
            if owns_watch {
                inner.snapshot_tx.send_replace(None);
            }
            let reason = status.end_reason();
            let failure = status.failure();
            info!(session_id = %session_id, ?reason, ?failure, "call ended");
            let _ = inner
                .updates
                .send(CallUpdate::Ended {
                    session_id,
                    reason,
                    failure,
                })
                .await;
        }
    }
}

async fn session_is_current(inner: &Inner, session_id: Uuid) -> bool {
    if inner
        .active
        .read()
        .await
        .as_ref()
        .is_some_and(|h| h.id == session_id)
    {
        return true;
    }
    inner
        .incoming
        .read()
        .await
        .values()
        .any(|h| h.id == session_id)
}

async fn clear_session(inner: &Inner, session_id: Uuid, remote: ParticipantId) {
    let mut active = inner.active.write().await;
    if active.as_ref().is_some_and(|h| h.id == session_id) {
        *active = None;
    }
    drop(active);

    let mut incoming = inner.incoming.write().await;
    if incoming
        .get(&remote)
        .is_some_and(|h| h.id == session_id)
    {
        incoming.remove(&remote);
    }
}

impl Drop for CallManager {
    fn drop(&mut self) {
        // Last handle going away must not leave the listener task behind.
        if Arc::strong_count(&self.inner) <= 2 {
            self.inner.cancel.cancel();
        }
    }
}

//! Reusable fakes and harness for call integration tests.
//!
//! Provides in-memory implementations of every collaborator trait
//! (`FakeMedia`, `FakePeerApi`, `FakeDirectory`) plus a [`TestPeer`]
//! bundle that stands up one `CallManager` over a shared `LocalBus`.
//!
//! The fakes are puppets: nothing connects or speaks on its own. Tests
//! drive peer events through [`FakePeerConnection::emit`] and release
//! gated media with the returned semaphore, which keeps every ordering
//! deterministic under `start_paused` time.
#![allow(dead_code)]

use async_trait::async_trait;
use sonorus_call::config::CallConfig;
use sonorus_call::manager::{CallManager, CallUpdate, Collaborators};
use sonorus_call::media::{AudioProbe, AudioTrack, MediaError, MediaSource};
use sonorus_call::peer::{PeerApi, PeerConnection, PeerError, PeerEvent, TransportSample};
use sonorus_call::session::{CallSnapshot, CallStatus, EndReason, FailureKind};
use sonorus_call::signaling::{
    IceCandidateInit, LocalBus, SessionDescription, SignalBus,
};
use sonorus_call::{Participant, ParticipantId, UserDirectory};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::time::timeout;
use uuid::Uuid;

/// Generous bound for every await in tests. Under paused time this only
/// fires when the system has gone fully idle without producing the
/// expected effect.
pub const WAIT: Duration = Duration::from_secs(5);

pub fn pid(n: u128) -> ParticipantId {
    ParticipantId::from_uuid(Uuid::from_u128(n))
}

pub fn participant(n: u128, name: &str) -> Participant {
    Participant::new(pid(n), name)
}

// ============================================================================
// Audio fakes
// ============================================================================

/// Probe whose whole spectrum sits at one settable level.
pub struct FakeProbe {
    level: Mutex<f32>,
}

impl FakeProbe {
    pub fn new(level: f32) -> Arc<Self> {
        Arc::new(Self {
            level: Mutex::new(level),
        })
    }

    pub fn set_level(&self, level: f32) {
        *self.level.lock().unwrap() = level;
    }
}

impl AudioProbe for FakeProbe {
    fn spectrum(&self, bins: &mut [f32]) -> usize {
        let level = *self.level.lock().unwrap();
        for bin in bins.iter_mut() {
            *bin = level;
        }
        bins.len()
    }
}

pub struct FakeTrack {
    enabled: AtomicBool,
    stopped: AtomicBool,
    stop_count: AtomicUsize,
    pub probe: Arc<FakeProbe>,
}

impl FakeTrack {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            stop_count: AtomicUsize::new(0),
            probe: FakeProbe::new(0.0),
        })
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn stop_count(&self) -> usize {
        self.stop_count.load(Ordering::SeqCst)
    }
}

impl AudioTrack for FakeTrack {
    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop_count.fetch_add(1, Ordering::SeqCst);
    }

    fn probe(&self) -> Arc<dyn AudioProbe> {
        self.probe.clone()
    }
}

/// Microphone source handing out [`FakeTrack`]s.
///
/// `gated()` makes every acquisition wait for one semaphore permit, letting
/// tests hold a session in the acquiring state.
pub struct FakeMedia {
    gate: Option<Arc<Semaphore>>,
    fail: Option<MediaError>,
    acquire_count: AtomicUsize,
    tracks: Mutex<Vec<Arc<FakeTrack>>>,
}

impl FakeMedia {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: None,
            fail: None,
            acquire_count: AtomicUsize::new(0),
            tracks: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(err: MediaError) -> Arc<Self> {
        Arc::new(Self {
            gate: None,
            fail: Some(err),
            acquire_count: AtomicUsize::new(0),
            tracks: Mutex::new(Vec::new()),
        })
    }

    pub fn gated() -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let media = Arc::new(Self {
            gate: Some(gate.clone()),
            fail: None,
            acquire_count: AtomicUsize::new(0),
            tracks: Mutex::new(Vec::new()),
        });
        (media, gate)
    }

    pub fn acquire_count(&self) -> usize {
        self.acquire_count.load(Ordering::SeqCst)
    }

    pub fn tracks(&self) -> Vec<Arc<FakeTrack>> {
        self.tracks.lock().unwrap().clone()
    }

    pub fn last_track(&self) -> Arc<FakeTrack> {
        self.tracks
            .lock()
            .unwrap()
            .last()
            .expect("no track was acquired")
            .clone()
    }
}

#[async_trait]
impl MediaSource for FakeMedia {
    async fn acquire_audio(&self) -> Result<Arc<dyn AudioTrack>, MediaError> {
        self.acquire_count.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| MediaError::Backend("gate closed".into()))?;
            permit.forget();
        }
        if let Some(err) = &self.fail {
            return Err(err.clone());
        }
        let track = FakeTrack::new();
        self.tracks.lock().unwrap().push(track.clone());
        Ok(track)
    }
}

// ============================================================================
// Peer transport fakes
// ============================================================================

/// Peer connection puppet. Records every operation in arrival order and
/// emits events only when the test says so.
pub struct FakePeerConnection {
    events: mpsc::Sender<PeerEvent>,
    ops: Mutex<Vec<String>>,
    close_count: AtomicUsize,
    sample: Mutex<TransportSample>,
    remote_probe: Mutex<Option<Arc<dyn AudioProbe>>>,
}

impl FakePeerConnection {
    fn new(events: mpsc::Sender<PeerEvent>) -> Arc<Self> {
        Arc::new(Self {
            events,
            ops: Mutex::new(Vec::new()),
            close_count: AtomicUsize::new(0),
            sample: Mutex::new(TransportSample::default()),
            remote_probe: Mutex::new(None),
        })
    }

    fn log(&self, op: impl Into<String>) {
        self.ops.lock().unwrap().push(op.into());
    }

    /// Feeds one event into the owning session, as the transport would.
    pub async fn emit(&self, event: PeerEvent) {
        self.events
            .send(event)
            .await
            .expect("session dropped its peer event channel");
    }

    /// Like [`emit`], but tolerates the session being gone already.
    pub async fn emit_quietly(&self, event: PeerEvent) {
        let _ = self.events.send(event).await;
    }

    pub fn set_sample(&self, sample: TransportSample) {
        *self.sample.lock().unwrap() = sample;
    }

    pub fn set_remote_probe(&self, probe: Arc<dyn AudioProbe>) {
        *self.remote_probe.lock().unwrap() = Some(probe);
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    /// Applied remote candidates, in order.
    pub fn applied_candidates(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| op.strip_prefix("add_candidate:").map(str::to_string))
            .collect()
    }

    /// Index of `op` in the operation log.
    pub fn op_index(&self, op: &str) -> Option<usize> {
        self.ops().iter().position(|o| o == op)
    }
}

#[async_trait]
impl PeerConnection for FakePeerConnection {
    async fn add_track(&self, _track: Arc<dyn AudioTrack>) -> Result<(), PeerError> {
        self.log("add_track");
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        self.log("create_offer");
        Ok(SessionDescription::offer("v=0 fake-offer"))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        self.log("create_answer");
        Ok(SessionDescription::answer("v=0 fake-answer"))
    }

    async fn set_local_description(&self, sdp: SessionDescription) -> Result<(), PeerError> {
        self.log(format!("set_local:{:?}", sdp.kind));
        Ok(())
    }

    async fn set_remote_description(&self, sdp: SessionDescription) -> Result<(), PeerError> {
        self.log(format!("set_remote:{:?}", sdp.kind));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> Result<(), PeerError> {
        self.log(format!("add_candidate:{}", candidate.candidate));
        Ok(())
    }

    async fn transport_sample(&self) -> Result<TransportSample, PeerError> {
        Ok(*self.sample.lock().unwrap())
    }

    fn remote_probe(&self) -> Option<Arc<dyn AudioProbe>> {
        self.remote_probe.lock().unwrap().clone()
    }

    async fn close(&self) {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        self.log("close");
    }
}

pub struct FakePeerApi {
    connections: Mutex<Vec<Arc<FakePeerConnection>>>,
}

impl FakePeerApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connections: Mutex::new(Vec::new()),
        })
    }

    pub fn connections(&self) -> Vec<Arc<FakePeerConnection>> {
        self.connections.lock().unwrap().clone()
    }

    pub fn connection(&self, n: usize) -> Arc<FakePeerConnection> {
        self.connections.lock().unwrap()[n].clone()
    }

    /// Waits until the `n + 1`-th connection exists. Connections are created
    /// inside session tasks, so tests cannot assume one exists right after
    /// an API call returns.
    pub async fn wait_connection(&self, n: usize) -> Arc<FakePeerConnection> {
        timeout(WAIT, async {
            loop {
                if let Some(conn) = self.connections.lock().unwrap().get(n).cloned() {
                    return conn;
                }
                // A sleep rather than a yield so paused-time auto-advance
                // can still reach the timeout when the connection never
                // materializes.
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for a peer connection")
    }
}

#[async_trait]
impl PeerApi for FakePeerApi {
    async fn connect(
        &self,
        _config: &CallConfig,
        events: mpsc::Sender<PeerEvent>,
    ) -> Result<Arc<dyn PeerConnection>, PeerError> {
        let conn = FakePeerConnection::new(events);
        self.connections.lock().unwrap().push(conn.clone());
        Ok(conn)
    }
}

// ============================================================================
// Directory fake
// ============================================================================

pub struct FakeDirectory {
    users: HashMap<ParticipantId, Participant>,
    latency: Mutex<Duration>,
}

impl FakeDirectory {
    pub fn with(users: &[Participant]) -> Arc<Self> {
        Arc::new(Self {
            users: users.iter().map(|p| (p.id, p.clone())).collect(),
            latency: Mutex::new(Duration::ZERO),
        })
    }

    /// Makes every lookup from here on take `latency` to answer, like a
    /// store that has to leave the process.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }
}

#[async_trait]
impl UserDirectory for FakeDirectory {
    async fn lookup(&self, id: ParticipantId) -> Option<Participant> {
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.users.get(&id).cloned()
    }
}

// ============================================================================
// Manager harness
// ============================================================================

/// One user's manager plus handles to everything a test inspects.
pub struct TestPeer {
    pub participant: Participant,
    pub manager: CallManager,
    pub updates: mpsc::Receiver<CallUpdate>,
    pub snapshots: watch::Receiver<Option<CallSnapshot>>,
    pub media: Arc<FakeMedia>,
    pub peers: Arc<FakePeerApi>,
}

impl TestPeer {
    pub async fn start(
        bus: &Arc<LocalBus>,
        who: Participant,
        directory: &Arc<FakeDirectory>,
    ) -> Self {
        Self::start_with_media(bus, who, directory, FakeMedia::new()).await
    }

    pub async fn start_with_media(
        bus: &Arc<LocalBus>,
        who: Participant,
        directory: &Arc<FakeDirectory>,
        media: Arc<FakeMedia>,
    ) -> Self {
        let peers = FakePeerApi::new();
        let (updates_tx, updates) = mpsc::channel(64);
        let collaborators = Collaborators {
            bus: bus.clone() as Arc<dyn SignalBus>,
            media: media.clone(),
            peers: peers.clone(),
            directory: directory.clone(),
        };
        let manager = CallManager::start(
            who.clone(),
            collaborators,
            CallConfig::default(),
            updates_tx,
        )
        .await
        .expect("manager failed to start");
        let snapshots = manager.watch_snapshot();

        Self {
            participant: who,
            manager,
            updates,
            snapshots,
            media,
            peers,
        }
    }

    /// Next application update, bounded by [`WAIT`].
    pub async fn next_update(&mut self) -> CallUpdate {
        timeout(WAIT, self.updates.recv())
            .await
            .expect("timed out waiting for a call update")
            .expect("update channel closed")
    }

    /// Waits until the live snapshot satisfies `pred` and returns it.
    pub async fn wait_snapshot<F>(&mut self, mut pred: F) -> CallSnapshot
    where
        F: FnMut(&CallSnapshot) -> bool,
    {
        timeout(WAIT, async {
            loop {
                if let Some(snapshot) = self.snapshots.borrow_and_update().clone() {
                    if pred(&snapshot) {
                        return snapshot;
                    }
                }
                self.snapshots
                    .changed()
                    .await
                    .expect("snapshot channel closed");
            }
        })
        .await
        .expect("timed out waiting for a snapshot")
    }

    /// Waits for a specific status on the live snapshot.
    pub async fn wait_status(&mut self, status: &CallStatus) -> CallSnapshot {
        self.wait_snapshot(|snap| snap.status == *status).await
    }

    /// Waits until the watch reports no live session.
    pub async fn wait_idle(&mut self) {
        timeout(WAIT, async {
            loop {
                if self.snapshots.borrow_and_update().is_none() {
                    return;
                }
                self.snapshots
                    .changed()
                    .await
                    .expect("snapshot channel closed");
            }
        })
        .await
        .expect("timed out waiting for the session to clear");
    }

    /// Drains updates until `Ended` arrives and returns its fields.
    pub async fn wait_ended(&mut self) -> (Uuid, Option<EndReason>, Option<FailureKind>) {
        loop {
            if let CallUpdate::Ended {
                session_id,
                reason,
                failure,
            } = self.next_update().await
            {
                return (session_id, reason, failure);
            }
        }
    }
}

/// Polls `cond` until it holds, bounded by [`WAIT`].
pub async fn wait_until<F>(mut cond: F)
where
    F: FnMut() -> bool,
{
    timeout(WAIT, async {
        while !cond() {
            // Real sleeps keep paused-time auto-advance moving.
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for condition");
}

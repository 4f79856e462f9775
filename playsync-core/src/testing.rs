//! In-memory collaborators for unit tests

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::media::{MediaCapture, MediaError, MediaStream, OfferOptions};
use crate::network::{ControlChannel, MediaSession, Transport, TransportError};
use crate::player::Player;
use crate::session::{ConnectionState, DriftReport, SessionObserver};
use crate::sync::Role;

pub struct FakeChannel {
    peer_id: String,
    open: AtomicBool,
    sent: Mutex<Vec<String>>,
}

impl FakeChannel {
    pub fn open(peer_id: &str) -> Arc<Self> {
        Arc::new(Self {
            peer_id: peer_id.to_string(),
            open: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
        })
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub fn take_sent(&self) -> Vec<String> {
        std::mem::take(&mut *self.sent.lock())
    }
}

impl ControlChannel for FakeChannel {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send(&self, payload: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ChannelClosed);
        }
        self.sent.lock().push(payload);
        Ok(())
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

pub struct FakeMediaSession {
    peer_id: String,
    closed: AtomicBool,
}

impl FakeMediaSession {
    pub fn new(peer_id: &str) -> Arc<Self> {
        Arc::new(Self {
            peer_id: peer_id.to_string(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl MediaSession for FakeMediaSession {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// A call placed through [`FakeTransport`]
pub struct PlacedCall {
    pub remote_id: String,
    pub stream: MediaStream,
    pub offer: OfferOptions,
    pub session: Arc<FakeMediaSession>,
}

#[derive(Default)]
pub struct FakeTransport {
    local_id: String,
    channels: Mutex<Vec<Arc<FakeChannel>>>,
    calls: Mutex<Vec<PlacedCall>>,
    fail_calls: AtomicBool,
    opens: AtomicUsize,
}

impl FakeTransport {
    pub fn new(local_id: &str) -> Arc<Self> {
        Arc::new(Self {
            local_id: local_id.to_string(),
            ..Default::default()
        })
    }

    pub fn last_channel(&self) -> Option<Arc<FakeChannel>> {
        self.channels.lock().last().cloned()
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn last_call_session(&self) -> Option<Arc<FakeMediaSession>> {
        self.calls.lock().last().map(|c| Arc::clone(&c.session))
    }

    pub fn with_last_call<R>(&self, f: impl FnOnce(&PlacedCall) -> R) -> Option<R> {
        self.calls.lock().last().map(f)
    }

    pub fn set_fail_calls(&self, fail: bool) {
        self.fail_calls.store(fail, Ordering::SeqCst);
    }
}

impl Transport for FakeTransport {
    fn open(&self) -> Result<String, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(self.local_id.clone())
    }

    fn connect(&self, remote_id: &str) -> Result<Arc<dyn ControlChannel>, TransportError> {
        if remote_id.is_empty() {
            return Err(TransportError::InvalidPeer(remote_id.to_string()));
        }
        let channel = FakeChannel::open(remote_id);
        self.channels.lock().push(Arc::clone(&channel));
        Ok(channel)
    }

    fn call(
        &self,
        remote_id: &str,
        stream: MediaStream,
        offer: &OfferOptions,
    ) -> Result<Arc<dyn MediaSession>, TransportError> {
        if self.fail_calls.load(Ordering::SeqCst) {
            return Err(TransportError::Other("call rejected".to_string()));
        }
        let session = FakeMediaSession::new(remote_id);
        self.calls.lock().push(PlacedCall {
            remote_id: remote_id.to_string(),
            stream,
            offer: *offer,
            session: Arc::clone(&session),
        });
        Ok(session)
    }
}

/// Operations performed on a [`FakePlayer`]
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerOp {
    SetPosition(f64),
    Play,
    Pause,
    Attach(MediaStream),
}

#[derive(Default)]
pub struct FakePlayer {
    position: Mutex<f64>,
    ops: Mutex<Vec<PlayerOp>>,
}

impl FakePlayer {
    pub fn at(position: f64) -> Arc<Self> {
        Arc::new(Self {
            position: Mutex::new(position),
            ops: Mutex::new(Vec::new()),
        })
    }

    /// Move the playhead without recording an operation (playback progress)
    pub fn advance_to(&self, position: f64) {
        *self.position.lock() = position;
    }

    pub fn ops(&self) -> Vec<PlayerOp> {
        self.ops.lock().clone()
    }
}

impl Player for FakePlayer {
    fn position(&self) -> f64 {
        *self.position.lock()
    }

    fn set_position(&self, seconds: f64) {
        *self.position.lock() = seconds;
        self.ops.lock().push(PlayerOp::SetPosition(seconds));
    }

    fn play(&self) {
        self.ops.lock().push(PlayerOp::Play);
    }

    fn pause(&self) {
        self.ops.lock().push(PlayerOp::Pause);
    }

    fn attach_stream(&self, stream: MediaStream) {
        self.ops.lock().push(PlayerOp::Attach(stream));
    }
}

#[derive(Default)]
pub struct FakeCapture {
    captures: AtomicUsize,
    fail: AtomicBool,
}

impl FakeCapture {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

impl MediaCapture for FakeCapture {
    fn capture_stream(&self) -> Result<MediaStream, MediaError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MediaError::CaptureFailed("capture unavailable".to_string()));
        }
        let n = self.captures.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MediaStream::new(format!("capture-{}", n)))
    }
}

#[derive(Default)]
pub struct RecordingObserver {
    pub statuses: Mutex<Vec<String>>,
    pub states: Mutex<Vec<ConnectionState>>,
    pub roles: Mutex<Vec<Role>>,
    pub drift: Mutex<Vec<DriftReport>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn last_state(&self) -> Option<ConnectionState> {
        self.states.lock().last().copied()
    }

    pub fn has_status_containing(&self, needle: &str) -> bool {
        self.statuses.lock().iter().any(|s| s.contains(needle))
    }
}

impl SessionObserver for RecordingObserver {
    fn on_status(&self, message: &str) {
        self.statuses.lock().push(message.to_string());
    }

    fn on_state_changed(&self, state: ConnectionState) {
        self.states.lock().push(state);
    }

    fn on_role_changed(&self, role: Role) {
        self.roles.lock().push(role);
    }

    fn on_drift(&self, report: DriftReport) {
        self.drift.lock().push(report);
    }
}

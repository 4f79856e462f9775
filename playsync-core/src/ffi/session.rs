//! Session implementation for FFI

use std::sync::{Arc, Once};

use parking_lot::RwLock;
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::SyncConfig;
use crate::media::{MediaCapture, MediaError, MediaStream};
use crate::network::{Libp2pTransport, NetworkConfig, NetworkHandle, NetworkManager};
use crate::player::{Player, PlayerEvent};
use crate::session::{
    ConnectionState, DriftReport, SessionError, SessionInput, SessionObserver, SyncContext,
};
use crate::sync::Role;

use super::types::*;

static TRACING_INIT: Once = Once::new();

const DEFAULT_LOG_FILTER: &str =
    "playsync_core=debug,libp2p_mdns=info,libp2p_gossipsub=info,hyper_util=off,reqwest=off,hyper=off";

/// [`Player`] backed by the native video element
struct DelegatePlayer(Box<dyn PlayerDelegate>);

impl Player for DelegatePlayer {
    fn position(&self) -> f64 {
        self.0.position()
    }

    fn set_position(&self, seconds: f64) {
        self.0.set_position(seconds)
    }

    fn play(&self) {
        self.0.play()
    }

    fn pause(&self) {
        self.0.pause()
    }

    fn attach_stream(&self, stream: MediaStream) {
        self.0.attach_stream(stream.id().to_string())
    }
}

/// [`MediaCapture`] backed by the native capture API
struct DelegateCapture(Box<dyn CaptureDelegate>);

impl MediaCapture for DelegateCapture {
    fn capture_stream(&self) -> Result<MediaStream, MediaError> {
        self.0
            .capture_stream()
            .map(MediaStream::new)
            .ok_or(MediaError::NoSource)
    }
}

/// Forwards session events to the native callback and keeps the status
/// snapshot current
struct CallbackObserver {
    callback: Box<dyn SessionCallback>,
    status: Arc<RwLock<SessionStatus>>,
}

impl SessionObserver for CallbackObserver {
    fn on_status(&self, message: &str) {
        self.status.write().last_message = Some(message.to_string());
        self.callback.on_status(message.to_string());
    }

    fn on_state_changed(&self, state: ConnectionState) {
        let status = ConnectionStatus::from(state);
        self.status.write().connection = status;
        self.callback.on_connection_changed(status);
    }

    fn on_role_changed(&self, role: Role) {
        let role = SessionRole::from(role);
        {
            let mut status = self.status.write();
            status.role = role;
            if role != SessionRole::Host {
                status.session_code = None;
            }
        }
        self.callback.on_role_changed(role);
    }

    fn on_drift(&self, report: DriftReport) {
        let drift = DriftInfo::from(report);
        self.status.write().last_drift = Some(drift);
        self.callback.on_drift(drift);
    }
}

/// Main session interface
#[derive(uniffi::Object)]
pub struct Session {
    runtime: Runtime,
    input_tx: mpsc::UnboundedSender<SessionInput>,
    network: NetworkHandle,
    status: Arc<RwLock<SessionStatus>>,
}

#[uniffi::export]
impl Session {
    /// Create a session and start the network in the background
    #[uniffi::constructor]
    pub fn new(
        player: Box<dyn PlayerDelegate>,
        capture: Box<dyn CaptureDelegate>,
        callback: Box<dyn SessionCallback>,
    ) -> Result<Self, CoreError> {
        TRACING_INIT.call_once(|| {
            let filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
            let _ = tracing_subscriber::fmt()
                .with_ansi(false) // Disable colors for IDE consoles
                .with_target(false)
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();
        });

        info!("Initializing playsync-core session");

        let runtime = Runtime::new().map_err(|e| CoreError::NetworkError(e.to_string()))?;

        let (network, transport_rx) = runtime
            .block_on(async { NetworkManager::with_config(NetworkConfig::default())?.start() })
            .map_err(|e| CoreError::NetworkError(e.to_string()))?;

        let status = Arc::new(RwLock::new(SessionStatus::default()));
        let observer = Arc::new(CallbackObserver {
            callback,
            status: Arc::clone(&status),
        });

        let context = SyncContext::new(
            SyncConfig::default(),
            Arc::new(Libp2pTransport::new(network.clone())),
            Arc::new(DelegatePlayer(player)),
            Arc::new(DelegateCapture(capture)),
            observer,
        );

        let (input_tx, input_rx) = mpsc::unbounded_channel();
        runtime.spawn(context.run(transport_rx, input_rx));

        Ok(Self {
            runtime,
            input_tx,
            network,
            status,
        })
    }

    /// A video file was chosen; become host and return the code to share
    pub fn select_video(&self, mime_type: String) -> Result<String, CoreError> {
        let code = self.request(|reply| SessionInput::SelectVideo { mime_type, reply })?;
        self.status.write().session_code = Some(code.clone());
        Ok(code)
    }

    /// Connect to a host by session code; become client
    pub fn connect(&self, code: String) -> Result<(), CoreError> {
        self.request(|reply| SessionInput::Connect {
            remote_id: code,
            reply,
        })
    }

    /// The local player started playing
    pub fn notify_play(&self, position: f64, origin: PlaybackOrigin) {
        self.send(SessionInput::Player(PlayerEvent::Play {
            position,
            origin: origin.into(),
        }));
    }

    /// The local player paused
    pub fn notify_pause(&self, position: f64, origin: PlaybackOrigin) {
        self.send(SessionInput::Player(PlayerEvent::Pause {
            position,
            origin: origin.into(),
        }));
    }

    /// The local player seeked
    pub fn notify_seek(&self, position: f64, origin: PlaybackOrigin) {
        self.send(SessionInput::Player(PlayerEvent::Seeked {
            position,
            origin: origin.into(),
        }));
    }

    /// Host only: re-capture and re-send the video without reconnecting
    pub fn repair_media(&self) -> Result<(), CoreError> {
        self.request(|reply| SessionInput::RepairMedia { reply })
    }

    /// Close the connection and keep the current role
    pub fn leave(&self) {
        self.send(SessionInput::Disconnect);
    }

    /// Close the connection and go back to choosing a role
    pub fn return_to_selection(&self) {
        self.send(SessionInput::ReturnToSelection);
    }

    pub fn status(&self) -> SessionStatus {
        self.status.read().clone()
    }
}

impl Session {
    fn send(&self, input: SessionInput) {
        if self.input_tx.send(input).is_err() {
            warn!("Session loop is gone, dropping input");
        }
    }

    /// Send an input that carries a reply channel and wait for the answer
    fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, SessionError>>) -> SessionInput,
    ) -> Result<T, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.input_tx
            .send(make(reply))
            .map_err(|_| CoreError::SessionClosed)?;

        self.runtime
            .block_on(rx)
            .map_err(|_| CoreError::SessionClosed)?
            .map_err(CoreError::from)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.input_tx.send(SessionInput::Shutdown);
        self.network.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        messages: Mutex<Vec<String>>,
        states: Mutex<Vec<ConnectionStatus>>,
        roles: Mutex<Vec<SessionRole>>,
    }

    struct SharedCallback(Arc<Recorder>);

    impl SessionCallback for SharedCallback {
        fn on_status(&self, message: String) {
            self.0.messages.lock().push(message);
        }
        fn on_connection_changed(&self, status: ConnectionStatus) {
            self.0.states.lock().push(status);
        }
        fn on_role_changed(&self, role: SessionRole) {
            self.0.roles.lock().push(role);
        }
        fn on_drift(&self, _drift: DriftInfo) {}
    }

    struct NoCapture;

    impl CaptureDelegate for NoCapture {
        fn capture_stream(&self) -> Option<String> {
            None
        }
    }

    #[test]
    fn test_observer_updates_snapshot() {
        let recorder = Arc::new(Recorder::default());
        let status = Arc::new(RwLock::new(SessionStatus::default()));
        let observer = CallbackObserver {
            callback: Box::new(SharedCallback(Arc::clone(&recorder))),
            status: Arc::clone(&status),
        };

        status.write().session_code = Some("ABCD-EFGH".to_string());
        observer.on_role_changed(Role::Host);
        observer.on_state_changed(ConnectionState::Degraded);
        observer.on_status("Video stream lost");
        observer.on_drift(DriftReport {
            local: 8.0,
            remote: 10.0,
            drift: 2.0,
            corrected: true,
        });

        let snapshot = status.read().clone();
        assert_eq!(snapshot.role, SessionRole::Host);
        assert_eq!(snapshot.connection, ConnectionStatus::Degraded);
        assert_eq!(snapshot.session_code.as_deref(), Some("ABCD-EFGH"));
        assert_eq!(snapshot.last_message.as_deref(), Some("Video stream lost"));
        assert_eq!(snapshot.last_drift.map(|d| d.drift_secs), Some(2.0));
        assert_eq!(*recorder.states.lock(), vec![ConnectionStatus::Degraded]);

        observer.on_role_changed(Role::Unassigned);
        assert_eq!(status.read().session_code, None);
        assert_eq!(
            *recorder.roles.lock(),
            vec![SessionRole::Host, SessionRole::Unassigned]
        );
    }

    #[test]
    fn test_missing_capture_is_no_source() {
        let capture = DelegateCapture(Box::new(NoCapture));
        assert_eq!(capture.capture_stream(), Err(MediaError::NoSource));
    }
}

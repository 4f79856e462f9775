//! Session context: the one object every handler runs against

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::state::{ConnectionSession, ConnectionState};
use super::{SessionError, SessionObserver};
use crate::config::SyncConfig;
use crate::media::{MediaCapture, MediaStream};
use crate::network::{ControlChannel, MediaSession, Transport, TransportEvent};
use crate::player::{validate_video_selection, EventOrigin, Player, PlayerEvent};
use crate::sync::{
    encode, CommandType, DriftCorrector, HeartbeatScheduler, LoopGuard, Role, RoleState,
    SendBlocked,
};

/// Local inputs fed into the session loop
#[derive(Debug)]
pub enum SessionInput {
    /// A video file was chosen (host path)
    SelectVideo {
        mime_type: String,
        reply: oneshot::Sender<Result<String, SessionError>>,
    },
    /// Connect to a host identifier (client path)
    Connect {
        remote_id: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    /// Something happened on the local player
    Player(PlayerEvent),
    /// Re-capture and re-offer the host's media
    RepairMedia {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    /// Close the connection, keep the role
    Disconnect,
    /// Close the connection and go back to role selection
    ReturnToSelection,
    /// Stop the loop
    Shutdown,
}

/// Role, connection, guard and heartbeat for one participant
pub struct SyncContext {
    pub(super) config: SyncConfig,
    pub(super) role: RoleState,
    pub(super) session: Option<ConnectionSession>,
    pub(super) guard: LoopGuard,
    pub(super) heartbeat: HeartbeatScheduler,
    pub(super) drift: DriftCorrector,
    pub(super) transport: Arc<dyn Transport>,
    pub(super) player: Arc<dyn Player>,
    pub(super) capture: Arc<dyn MediaCapture>,
    pub(super) observer: Arc<dyn SessionObserver>,
}

impl SyncContext {
    pub fn new(
        config: SyncConfig,
        transport: Arc<dyn Transport>,
        player: Arc<dyn Player>,
        capture: Arc<dyn MediaCapture>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        Self {
            guard: LoopGuard::new(config.loop_guard_window),
            drift: DriftCorrector::from_config(&config),
            config,
            role: RoleState::new(),
            session: None,
            heartbeat: HeartbeatScheduler::new(),
            transport,
            player,
            capture,
            observer,
        }
    }

    pub fn role(&self) -> Role {
        self.role.current()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session
            .as_ref()
            .map(|s| s.state())
            .unwrap_or_default()
    }

    pub fn peer_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.peer_id())
    }

    pub fn is_heartbeat_running(&self) -> bool {
        self.heartbeat.is_running()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// A local video file was chosen. Becomes host on first selection and
    /// returns the identifier the client should connect to.
    pub fn select_video(&mut self, mime_type: &str) -> Result<String, SessionError> {
        if let Err(e) = validate_video_selection(mime_type) {
            warn!("Rejected file selection: {}", e);
            self.observer.on_status(&e.to_string());
            return Err(e.into());
        }

        self.assign_role(Role::Host)?;

        let local_id = self.transport.open().map_err(|e| {
            warn!("Failed to open transport: {}", e);
            self.observer.on_status(&format!("Could not start sharing: {}", e));
            e
        })?;

        info!("Hosting as {}", local_id);
        self.observer
            .on_status(&format!("Ready to share, your code is {}", local_id));
        Ok(local_id)
    }

    /// Start connecting to a host (client path)
    pub fn connect(&mut self, remote_id: &str) -> Result<(), SessionError> {
        if let Some(session) = self.live_session() {
            return Err(SessionError::SessionActive(session.peer_id().to_string()));
        }

        self.assign_role(Role::Client)?;

        let channel = self.transport.connect(remote_id).map_err(|e| {
            warn!("Failed to connect to {}: {}", remote_id, e);
            self.observer.on_status(&format!("Could not connect: {}", e));
            e
        })?;

        info!("Connecting to {}", remote_id);
        self.session = Some(ConnectionSession::connecting(channel));
        self.observer
            .on_status(&format!("Connecting to {}...", remote_id));
        self.notify_state();
        Ok(())
    }

    /// Route one transport event
    pub fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::IncomingConnection(channel) => self.accept_connection(channel),

            TransportEvent::ChannelOpen { peer_id } => {
                if self.is_current(&peer_id) {
                    self.on_channel_open();
                } else {
                    debug!("Ignoring channel open from unknown peer {}", peer_id);
                }
            }

            TransportEvent::Message { peer_id, payload } => {
                if self.is_current(&peer_id) {
                    self.handle_message(&payload);
                } else {
                    debug!("Ignoring message from unknown peer {}", peer_id);
                }
            }

            TransportEvent::ChannelClosed { peer_id } => {
                if self.is_current(&peer_id) {
                    info!("Control channel to {} closed", peer_id);
                    self.teardown(&format!("Connection to {} closed", peer_id));
                }
            }

            TransportEvent::ChannelError { peer_id, error } => {
                if self.is_current(&peer_id) {
                    warn!("Control channel to {} failed: {}", peer_id, error);
                    self.teardown(&format!("Connection error: {}", error));
                }
            }

            TransportEvent::IncomingCall { session, stream } => self.answer_call(session, stream),

            TransportEvent::MediaClosed { peer_id } => {
                let lost = match self.session.as_mut() {
                    Some(session) if session.is_for(&peer_id) && session.has_media() => {
                        session.detach_media();
                        true
                    }
                    _ => false,
                };
                if lost {
                    warn!("Media session with {} ended", peer_id);
                    self.observer.on_status("Video stream lost");
                    self.notify_state();
                }
            }
        }
    }

    /// Forward a local player event to the peer unless it is an echo
    pub fn handle_player_event(&mut self, event: PlayerEvent) -> Result<(), SendBlocked> {
        let kind = match event {
            PlayerEvent::Play { .. } => CommandType::Play,
            PlayerEvent::Pause { .. } => CommandType::Pause,
            PlayerEvent::Seeked { .. } => CommandType::Seek,
        };

        let result = if event.origin() == EventOrigin::Applied {
            Err(SendBlocked::Suppressed)
        } else {
            match self.session.as_ref() {
                None => Err(SendBlocked::NoConnection),
                Some(session) if !session.control_open() => Err(SendBlocked::ConnectionClosed),
                Some(session) => {
                    self.guard
                        .try_send(Some(&**session.channel()), kind, event.position())
                }
            }
        };

        match &result {
            Ok(()) => debug!("Sent {} at {:.2}s", kind, event.position()),
            Err(reason) => debug!("Not sending {}: {}", kind, reason),
        }
        result
    }

    /// Host-only: re-capture the local source and offer it again without
    /// touching the control channel, heartbeat or loop guard.
    pub fn repair_media(&mut self) -> Result<(), SessionError> {
        if !self.role.is_host() {
            return Err(SessionError::NotHost);
        }

        match self.session.as_ref() {
            Some(session) if session.control_open() => {
                info!("Repairing media path to {}", session.peer_id());
            }
            _ => return Err(SessionError::NotConnected),
        }

        self.offer_media()
    }

    /// Close the current connection; the role is kept
    pub fn disconnect(&mut self) {
        if self.live_session().is_some() {
            self.teardown("Disconnected");
        }
    }

    /// Tear down any session and go back to choosing a role
    pub fn return_to_selection(&mut self) {
        self.disconnect();
        self.session = None;
        self.guard.reset();

        if self.role.current() != Role::Unassigned {
            self.role.reset();
            self.observer.on_role_changed(Role::Unassigned);
        }
        self.notify_state();
    }

    /// Apply one local input
    pub fn handle_input(&mut self, input: SessionInput) {
        match input {
            SessionInput::SelectVideo { mime_type, reply } => {
                let _ = reply.send(self.select_video(&mime_type));
            }
            SessionInput::Connect { remote_id, reply } => {
                let _ = reply.send(self.connect(&remote_id));
            }
            SessionInput::Player(event) => {
                let _ = self.handle_player_event(event);
            }
            SessionInput::RepairMedia { reply } => {
                let _ = reply.send(self.repair_media());
            }
            SessionInput::Disconnect | SessionInput::Shutdown => self.disconnect(),
            SessionInput::ReturnToSelection => self.return_to_selection(),
        }
    }

    /// Run the session loop until shutdown or until the input side hangs up
    pub async fn run(
        mut self,
        mut transport_rx: mpsc::UnboundedReceiver<TransportEvent>,
        mut input_rx: mpsc::UnboundedReceiver<SessionInput>,
    ) {
        info!("Session loop started");

        loop {
            tokio::select! {
                Some(event) = transport_rx.recv() => {
                    debug!("Transport event: {:?}", event);
                    self.handle_transport_event(event);
                }
                input = input_rx.recv() => match input {
                    Some(SessionInput::Shutdown) | None => break,
                    Some(input) => self.handle_input(input),
                },
            }
        }

        self.disconnect();
        info!("Session loop ended");
    }

    fn assign_role(&mut self, role: Role) -> Result<(), SessionError> {
        let changed = self.role.assign(role).map_err(|e| {
            warn!("Cannot become {}: {}", role, e);
            self.observer.on_status(&e.to_string());
            e
        })?;

        if changed {
            info!("Role set to {}", role);
            self.observer.on_role_changed(role);
        }
        Ok(())
    }

    fn live_session(&self) -> Option<&ConnectionSession> {
        self.session.as_ref().filter(|s| s.state().is_live())
    }

    fn is_current(&self, peer_id: &str) -> bool {
        self.session
            .as_ref()
            .map(|s| s.is_for(peer_id))
            .unwrap_or(false)
    }

    fn accept_connection(&mut self, channel: Arc<dyn ControlChannel>) {
        let peer_id = channel.peer_id().to_string();

        if !self.role.is_host() {
            warn!("Rejecting connection from {}: not hosting", peer_id);
            channel.close();
            return;
        }

        if let Some(current) = self.live_session() {
            warn!(
                "Rejecting connection from {}: already connected to {}",
                peer_id,
                current.peer_id()
            );
            self.observer.on_status(&format!(
                "Rejected {}: already connected to {}",
                peer_id,
                current.peer_id()
            ));
            channel.close();
            return;
        }

        info!("Incoming connection from {}", peer_id);
        self.session = Some(ConnectionSession::connecting(channel));
        self.notify_state();
    }

    fn on_channel_open(&mut self) {
        let peer_id = match self.session.as_mut() {
            Some(session) => {
                if !session.mark_open() {
                    return;
                }
                session.peer_id().to_string()
            }
            None => return,
        };

        self.guard.reset();
        info!("Control channel to {} open", peer_id);
        self.observer.on_status(&format!("Connected to {}", peer_id));
        self.notify_state();

        if self.role.is_host() {
            self.start_heartbeat();
            if let Err(e) = self.offer_media() {
                debug!("Initial media offer to {} failed: {}", peer_id, e);
            }
        }
    }

    fn start_heartbeat(&mut self) {
        if !self.role.is_host() {
            debug!("Not starting heartbeat as {}", self.role.current());
            return;
        }

        let channel = match self.session.as_ref() {
            Some(session) if session.control_open() => Arc::clone(session.channel()),
            _ => return,
        };
        let player = Arc::clone(&self.player);

        self.heartbeat.start(self.config.heartbeat_interval, move || {
            if !channel.is_open() {
                debug!("Skipping heartbeat, channel to {} is closed", channel.peer_id());
                return;
            }
            let position = player.position();
            if let Err(e) = channel.send(encode(CommandType::Heartbeat, position)) {
                debug!("Heartbeat to {} dropped: {}", channel.peer_id(), e);
            }
        });
    }

    /// Capture the local source and call the peer with it
    fn offer_media(&mut self) -> Result<(), SessionError> {
        let peer_id = match self.session.as_ref() {
            Some(session) if session.control_open() => session.peer_id().to_string(),
            _ => return Err(SessionError::NotConnected),
        };

        let offered = self
            .capture
            .capture_stream()
            .map_err(SessionError::from)
            .and_then(|stream| {
                debug!(
                    "Offering {} to {} (max {} bps)",
                    stream, peer_id, self.config.offer.max_bitrate_bps
                );
                self.transport
                    .call(&peer_id, stream, &self.config.offer)
                    .map_err(SessionError::from)
            });

        match offered {
            Ok(media) => {
                if let Some(session) = self.session.as_mut() {
                    session.attach_media(media);
                }
                info!("Streaming to {}", peer_id);
                self.observer.on_status(&format!("Streaming to {}", peer_id));
                self.notify_state();
                Ok(())
            }
            Err(e) => {
                warn!("Could not send video to {}: {}", peer_id, e);
                if let Some(session) = self.session.as_mut() {
                    session.detach_media();
                }
                self.observer
                    .on_status(&format!("Could not send video: {}", e));
                self.notify_state();
                Err(e)
            }
        }
    }

    /// Client side of a media offer: attach the stream to our sink
    fn answer_call(&mut self, media: Arc<dyn MediaSession>, stream: MediaStream) {
        let peer_id = media.peer_id().to_string();
        let expected = self.role.is_client()
            && self
                .session
                .as_ref()
                .map(|s| s.is_for(&peer_id) && s.control_open())
                .unwrap_or(false);

        if !expected {
            warn!("Declining media offer from {}", peer_id);
            media.close();
            return;
        }

        info!("Receiving {} from {}", stream, peer_id);
        self.player.attach_stream(stream);
        if let Some(session) = self.session.as_mut() {
            session.attach_media(media);
        }
        self.observer.on_status(&format!("Watching {}", peer_id));
        self.notify_state();
    }

    fn teardown(&mut self, reason: &str) {
        self.heartbeat.stop();
        if let Some(session) = self.session.as_mut() {
            info!("Closing session with {}: {}", session.peer_id(), reason);
            session.close();
        }
        self.observer.on_status(reason);
        self.notify_state();
    }

    fn notify_state(&self) {
        self.observer.on_state_changed(self.connection_state());
    }
}

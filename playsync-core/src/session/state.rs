//! Connection session state

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::network::{ControlChannel, MediaSession};

/// Lifecycle of the pairing with the remote peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No connection attempted
    #[default]
    Idle,
    /// Control channel requested, handshake pending
    Connecting,
    /// Control channel open, no media yet
    Open,
    /// Control channel open with a media session attached
    Active,
    /// Control channel open, media lost or unavailable
    Degraded,
    /// Control channel gone; the session is no longer usable
    Closed,
}

impl ConnectionState {
    /// Whether this state still holds a usable (or pending) control channel
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::Open
                | ConnectionState::Active
                | ConnectionState::Degraded
        )
    }

    /// Whether the control channel handshake has completed
    pub fn is_established(&self) -> bool {
        matches!(
            self,
            ConnectionState::Open | ConnectionState::Active | ConnectionState::Degraded
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Active => "active",
            ConnectionState::Degraded => "degraded",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// One control channel plus an optional media session with a single peer
pub struct ConnectionSession {
    channel: Arc<dyn ControlChannel>,
    media: Option<Arc<dyn MediaSession>>,
    state: ConnectionState,
}

impl ConnectionSession {
    /// Start tracking a channel whose handshake is still pending
    pub fn connecting(channel: Arc<dyn ControlChannel>) -> Self {
        Self {
            channel,
            media: None,
            state: ConnectionState::Connecting,
        }
    }

    pub fn peer_id(&self) -> &str {
        self.channel.peer_id()
    }

    pub fn channel(&self) -> &Arc<dyn ControlChannel> {
        &self.channel
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn has_media(&self) -> bool {
        self.media.is_some()
    }

    /// Whether an event from `peer_id` belongs to this session
    pub fn is_for(&self, peer_id: &str) -> bool {
        self.state.is_live() && self.channel.peer_id() == peer_id
    }

    /// Whether outbound control messages can currently be delivered
    pub fn control_open(&self) -> bool {
        self.state.is_established() && self.channel.is_open()
    }

    /// Handshake completed. Returns false if the session was not connecting.
    pub fn mark_open(&mut self) -> bool {
        if self.state != ConnectionState::Connecting {
            debug!("Ignoring channel open for {} in state {}", self.peer_id(), self.state);
            return false;
        }
        self.state = ConnectionState::Open;
        true
    }

    /// Attach a media session, closing any previous one
    pub fn attach_media(&mut self, media: Arc<dyn MediaSession>) -> bool {
        if !self.state.is_established() {
            media.close();
            return false;
        }
        if let Some(previous) = self.media.replace(media) {
            previous.close();
        }
        self.state = ConnectionState::Active;
        true
    }

    /// Drop the media session (if any) and keep the control channel
    pub fn detach_media(&mut self) {
        if let Some(media) = self.media.take() {
            media.close();
        }
        if self.state.is_established() {
            self.state = ConnectionState::Degraded;
        }
    }

    /// Close media and control channel; the session becomes unusable
    pub fn close(&mut self) {
        if let Some(media) = self.media.take() {
            media.close();
        }
        self.channel.close();
        self.state = ConnectionState::Closed;
    }
}

impl fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("peer_id", &self.peer_id())
            .field("state", &self.state)
            .field("has_media", &self.has_media())
            .finish()
    }
}

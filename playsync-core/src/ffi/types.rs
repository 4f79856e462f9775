//! FFI types exposed via uniffi

use crate::player::EventOrigin;
use crate::session::{ConnectionState, DriftReport, SessionError};
use crate::sync::Role;

/// Error types exposed via FFI
#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum CoreError {
    #[error("Unsupported file: {0}")]
    UnsupportedFile(String),

    #[error("{0}")]
    RoleConflict(String),

    #[error("Not the host")]
    NotHost,

    #[error("Not connected")]
    NotConnected,

    #[error("Already connected to {0}")]
    AlreadyConnected(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Media error: {0}")]
    MediaError(String),

    #[error("Session is shut down")]
    SessionClosed,
}

impl From<SessionError> for CoreError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Select(e) => CoreError::UnsupportedFile(e.to_string()),
            SessionError::Role(e) => CoreError::RoleConflict(e.to_string()),
            SessionError::Transport(e) => CoreError::NetworkError(e.to_string()),
            SessionError::Media(e) => CoreError::MediaError(e.to_string()),
            SessionError::NotHost => CoreError::NotHost,
            SessionError::NotConnected => CoreError::NotConnected,
            SessionError::SessionActive(peer) => CoreError::AlreadyConnected(peer),
        }
    }
}

/// Role exposed via FFI
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum SessionRole {
    Unassigned,
    Host,
    Client,
}

impl From<Role> for SessionRole {
    fn from(role: Role) -> Self {
        match role {
            Role::Unassigned => SessionRole::Unassigned,
            Role::Host => SessionRole::Host,
            Role::Client => SessionRole::Client,
        }
    }
}

/// Why the native player changed state
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum PlaybackOrigin {
    /// The viewer used the player controls
    User,
    /// The player is reacting to a call made by this session
    Applied,
}

impl From<PlaybackOrigin> for EventOrigin {
    fn from(origin: PlaybackOrigin) -> Self {
        match origin {
            PlaybackOrigin::User => EventOrigin::User,
            PlaybackOrigin::Applied => EventOrigin::Applied,
        }
    }
}

/// Connection state exposed via FFI
#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Open,
    Active,
    Degraded,
    Closed,
}

impl From<ConnectionState> for ConnectionStatus {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Idle => ConnectionStatus::Idle,
            ConnectionState::Connecting => ConnectionStatus::Connecting,
            ConnectionState::Open => ConnectionStatus::Open,
            ConnectionState::Active => ConnectionStatus::Active,
            ConnectionState::Degraded => ConnectionStatus::Degraded,
            ConnectionState::Closed => ConnectionStatus::Closed,
        }
    }
}

/// Drift measured on a client heartbeat
#[derive(Debug, Clone, Copy, PartialEq, uniffi::Record)]
pub struct DriftInfo {
    pub local_secs: f64,
    pub host_secs: f64,
    pub drift_secs: f64,
    /// Whether the local player was moved to the host position
    pub corrected: bool,
}

impl From<DriftReport> for DriftInfo {
    fn from(r: DriftReport) -> Self {
        Self {
            local_secs: r.local,
            host_secs: r.remote,
            drift_secs: r.drift,
            corrected: r.corrected,
        }
    }
}

/// Snapshot of the session for the UI
#[derive(Debug, Clone, PartialEq, uniffi::Record)]
pub struct SessionStatus {
    pub role: SessionRole,
    pub connection: ConnectionStatus,
    /// Code to share with the client (host only)
    pub session_code: Option<String>,
    pub last_message: Option<String>,
    pub last_drift: Option<DriftInfo>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self {
            role: SessionRole::Unassigned,
            connection: ConnectionStatus::Idle,
            session_code: None,
            last_message: None,
            last_drift: None,
        }
    }
}

/// The native video element
#[uniffi::export(callback_interface)]
pub trait PlayerDelegate: Send + Sync {
    /// Current playhead in seconds
    fn position(&self) -> f64;
    fn set_position(&self, seconds: f64);
    fn play(&self);
    fn pause(&self);
    /// Attach a received stream to the video element
    fn attach_stream(&self, stream_id: String);
}

/// Captures the host's video element as a transmissible stream
#[uniffi::export(callback_interface)]
pub trait CaptureDelegate: Send + Sync {
    /// Stream identifier, or None if capture is not possible right now
    fn capture_stream(&self) -> Option<String>;
}

/// Callback interface for session events
#[uniffi::export(callback_interface)]
pub trait SessionCallback: Send + Sync {
    fn on_status(&self, message: String);
    fn on_connection_changed(&self, status: ConnectionStatus);
    fn on_role_changed(&self, role: SessionRole);
    fn on_drift(&self, drift: DriftInfo);
}

//! Connection session and the context that drives it
//!
//! [`SyncContext`] is the single owner of role, connection, loop guard and
//! heartbeat state. Every transport event, player event and user action is
//! routed through it on one event loop.

mod context;
mod handlers;
mod state;

pub use context::*;
pub use state::*;

use thiserror::Error;

use crate::media::MediaError;
use crate::network::TransportError;
use crate::player::SelectError;
use crate::sync::{Role, RoleError};

/// Errors returned by session operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Role(#[from] RoleError),

    #[error(transparent)]
    Select(#[from] SelectError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("Only the host can do this")]
    NotHost,

    #[error("Not connected to a peer")]
    NotConnected,

    #[error("Already connected to {0}")]
    SessionActive(String),
}

/// Drift observed on a client heartbeat
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftReport {
    /// Our position when the heartbeat arrived (seconds)
    pub local: f64,
    /// Host position carried by the heartbeat (seconds)
    pub remote: f64,
    /// Absolute difference (seconds)
    pub drift: f64,
    /// Whether the local position was moved to the host's
    pub corrected: bool,
}

/// Receives user-visible status from the session
pub trait SessionObserver: Send + Sync {
    fn on_status(&self, _message: &str) {}
    fn on_state_changed(&self, _state: ConnectionState) {}
    fn on_role_changed(&self, _role: Role) {}
    fn on_drift(&self, _report: DriftReport) {}
}

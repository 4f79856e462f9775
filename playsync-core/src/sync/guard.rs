//! Loop guard
//!
//! When the network applies a command to the local player, the player fires
//! its own play/pause/seek events. Those must not be sent back to the peer.
//! The guard suppresses outbound sends for a fixed window after an apply.

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use super::protocol::{encode, CommandType};
use crate::network::ControlChannel;

/// Why an outbound command was not sent
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum SendBlocked {
    #[error("no connection")]
    NoConnection,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("suppressed while applying a remote command")]
    Suppressed,
}

/// Suppresses echo of remotely-applied commands
#[derive(Debug, Clone)]
pub struct LoopGuard {
    window: Duration,
    /// Deadline until which sends are suppressed
    suppressed_until: Option<Instant>,
}

impl LoopGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            suppressed_until: None,
        }
    }

    /// Mark that a remote command is about to be applied to the local player.
    /// The guard deactivates on its own once the window elapses.
    pub fn begin_suppressed_apply(&mut self) {
        self.suppressed_until = Some(Instant::now() + self.window);
    }

    /// Whether sends are currently suppressed
    pub fn is_active(&self) -> bool {
        self.suppressed_until
            .map(|deadline| Instant::now() < deadline)
            .unwrap_or(false)
    }

    pub fn reset(&mut self) {
        self.suppressed_until = None;
    }

    /// Send a command unless there is no open connection or the guard is active
    pub fn try_send(
        &self,
        channel: Option<&dyn ControlChannel>,
        kind: CommandType,
        timestamp: f64,
    ) -> Result<(), SendBlocked> {
        let channel = channel.ok_or(SendBlocked::NoConnection)?;

        if !channel.is_open() {
            return Err(SendBlocked::ConnectionClosed);
        }

        if self.is_active() {
            return Err(SendBlocked::Suppressed);
        }

        channel.send(encode(kind, timestamp)).map_err(|e| {
            debug!("Send of {} to {} failed: {}", kind, channel.peer_id(), e);
            SendBlocked::ConnectionClosed
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::decode;
    use crate::testing::FakeChannel;

    #[tokio::test(start_paused = true)]
    async fn test_send_when_idle() {
        let guard = LoopGuard::new(Duration::from_millis(300));
        let channel = FakeChannel::open("peer");

        guard
            .try_send(Some(&*channel), CommandType::Play, 4.0)
            .unwrap();

        let sent = channel.sent();
        assert_eq!(sent.len(), 1);
        let cmd = decode(&sent[0]).unwrap();
        assert_eq!(cmd.kind, CommandType::Play);
        assert_eq!(cmd.timestamp, 4.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suppressed_within_window() {
        let mut guard = LoopGuard::new(Duration::from_millis(300));
        let channel = FakeChannel::open("peer");

        guard.begin_suppressed_apply();
        assert_eq!(
            guard.try_send(Some(&*channel), CommandType::Pause, 1.0),
            Err(SendBlocked::Suppressed)
        );

        tokio::time::advance(Duration::from_millis(299)).await;
        assert_eq!(
            guard.try_send(Some(&*channel), CommandType::Pause, 1.0),
            Err(SendBlocked::Suppressed)
        );

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!guard.is_active());
        assert!(guard
            .try_send(Some(&*channel), CommandType::Pause, 1.0)
            .is_ok());
        assert_eq!(channel.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_extends_window() {
        let mut guard = LoopGuard::new(Duration::from_millis(300));
        guard.begin_suppressed_apply();
        tokio::time::advance(Duration::from_millis(200)).await;
        guard.begin_suppressed_apply();
        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(guard.is_active());
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(!guard.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_reasons() {
        let guard = LoopGuard::new(Duration::from_millis(300));
        assert_eq!(
            guard.try_send(None, CommandType::Seek, 2.0),
            Err(SendBlocked::NoConnection)
        );

        let channel = FakeChannel::open("peer");
        channel.close();
        assert_eq!(
            guard.try_send(Some(&*channel), CommandType::Seek, 2.0),
            Err(SendBlocked::ConnectionClosed)
        );
        assert!(channel.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_suppression() {
        let mut guard = LoopGuard::new(Duration::from_millis(300));
        guard.begin_suppressed_apply();
        guard.reset();
        assert!(!guard.is_active());
    }
}

//! Inbound sync command handlers

use tracing::{debug, info, warn};

use super::context::SyncContext;
use super::DriftReport;
use crate::sync::{decode, CommandType, DriftAction, Role, SyncCommand};

impl SyncContext {
    /// Decode a control message and route it by role
    pub(super) fn handle_message(&mut self, payload: &str) {
        let command = match decode(payload) {
            Ok(command) => command,
            Err(e) => {
                warn!("Dropping malformed command ({}): {}", e, payload);
                return;
            }
        };

        match self.role.current() {
            Role::Host => self.apply_as_host(command),
            Role::Client => self.apply_as_client(command),
            Role::Unassigned => debug!("Ignoring {} with no role", command.kind),
        }
    }

    /// The host applies the client's intent to the source player.
    /// The guard keeps the player's resulting events from echoing back.
    fn apply_as_host(&mut self, command: SyncCommand) {
        match command.kind {
            CommandType::Play => {
                debug!("Remote play at {:.2}s", command.timestamp);
                self.guard.begin_suppressed_apply();
                self.player.play();
            }
            CommandType::Pause => {
                debug!("Remote pause at {:.2}s", command.timestamp);
                self.guard.begin_suppressed_apply();
                self.player.pause();
            }
            CommandType::Seek => {
                debug!("Remote seek to {:.2}s", command.timestamp);
                self.guard.begin_suppressed_apply();
                self.player.set_position(command.timestamp);
            }
            CommandType::Heartbeat => {
                debug!("Host ignoring heartbeat");
            }
        }
    }

    /// The client only follows heartbeats; the stream itself carries
    /// play/pause, so those commands are advisory.
    fn apply_as_client(&mut self, command: SyncCommand) {
        if command.kind != CommandType::Heartbeat {
            debug!(
                "Host sent {} at {:.2}s (advisory)",
                command.kind, command.timestamp
            );
            return;
        }

        let local = self.player.position();
        let remote = command.timestamp;

        match self.drift.evaluate(local, remote) {
            DriftAction::InSync => {}

            DriftAction::Observed { drift } => {
                info!(
                    "Sync: drift {:.3}s (local {:.2}s, host {:.2}s), within tolerance",
                    drift, local, remote
                );
                self.observer.on_drift(DriftReport {
                    local,
                    remote,
                    drift,
                    corrected: false,
                });
            }

            DriftAction::Correct { drift, target } => {
                info!(
                    "Heartbeat: drift {:.3}s exceeds threshold, seeking {:.2}s -> {:.2}s",
                    drift, local, target
                );
                self.guard.begin_suppressed_apply();
                self.player.set_position(target);
                self.observer.on_drift(DriftReport {
                    local,
                    remote,
                    drift,
                    corrected: true,
                });
            }
        }
    }
}

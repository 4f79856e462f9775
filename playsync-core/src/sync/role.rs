//! Role state machine
//!
//! A process starts `Unassigned` and becomes `Host` or `Client` exactly once.
//! Going back to `Unassigned` is only done by the session context after the
//! active connection has been torn down.

use std::fmt;

use thiserror::Error;

/// Which side of the sync relationship we are
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Role {
    #[default]
    Unassigned,
    /// Owns the source video and the authoritative clock
    Host,
    /// Follows the host's stream and corrects drift
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Unassigned => f.write_str("unassigned"),
            Role::Host => f.write_str("host"),
            Role::Client => f.write_str("client"),
        }
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum RoleError {
    #[error("Role is already {current}")]
    AlreadyAssigned { current: Role },

    #[error("Cannot assign the unassigned role")]
    InvalidTarget,
}

/// Write-once holder for the current role
#[derive(Debug, Clone, Default)]
pub struct RoleState {
    current: Role,
}

impl RoleState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Role {
        self.current
    }

    pub fn is_host(&self) -> bool {
        self.current == Role::Host
    }

    pub fn is_client(&self) -> bool {
        self.current == Role::Client
    }

    /// Assign a role. Returns `Ok(true)` when the role changed, `Ok(false)`
    /// when it was already set to the same value.
    pub fn assign(&mut self, role: Role) -> Result<bool, RoleError> {
        match (self.current, role) {
            (_, Role::Unassigned) => Err(RoleError::InvalidTarget),
            (Role::Unassigned, role) => {
                self.current = role;
                Ok(true)
            }
            (current, role) if current == role => Ok(false),
            (current, _) => Err(RoleError::AlreadyAssigned { current }),
        }
    }

    pub(crate) fn reset(&mut self) {
        self.current = Role::Unassigned;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_once() {
        let mut role = RoleState::new();
        assert_eq!(role.current(), Role::Unassigned);
        assert_eq!(role.assign(Role::Host), Ok(true));
        assert!(role.is_host());
    }

    #[test]
    fn test_same_role_is_noop() {
        let mut role = RoleState::new();
        role.assign(Role::Client).unwrap();
        assert_eq!(role.assign(Role::Client), Ok(false));
        assert!(role.is_client());
    }

    #[test]
    fn test_reassign_rejected() {
        let mut role = RoleState::new();
        role.assign(Role::Host).unwrap();
        assert_eq!(
            role.assign(Role::Client),
            Err(RoleError::AlreadyAssigned {
                current: Role::Host
            })
        );
        assert_eq!(role.assign(Role::Unassigned), Err(RoleError::InvalidTarget));
        assert!(role.is_host());
    }

    #[test]
    fn test_reset_allows_new_choice() {
        let mut role = RoleState::new();
        role.assign(Role::Host).unwrap();
        role.reset();
        assert_eq!(role.assign(Role::Client), Ok(true));
    }
}

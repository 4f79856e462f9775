//! Playsync - Core Library
//!
//! Keeps two video players in step over a peer-to-peer link. One side hosts
//! a local file and streams it; the other watches and follows the host's
//! playhead through a small JSON command channel.

pub mod config;
pub mod ffi;
pub mod media;
pub mod network;
pub mod player;
pub mod session;
pub mod sync;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use config::SyncConfig;
pub use network::{Libp2pTransport, SessionCode, Transport, TransportEvent};
pub use session::{ConnectionState, SessionError, SessionInput, SessionObserver, SyncContext};
pub use sync::{CommandType, Role, SyncCommand};

// Setup uniffi scaffolding
uniffi::setup_scaffolding!();

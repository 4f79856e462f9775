//! P2P Networking
//!
//! [`Transport`] is the seam the session core talks to. [`Libp2pTransport`]
//! implements it over libp2p gossipsub, with ntfy signaling for discovery.

mod behaviour;
mod p2p;
mod session_code;
mod signaling;
mod transport;

pub use behaviour::{NetworkConfig, NetworkError, NetworkHandle, NetworkManager};
pub use p2p::{Libp2pTransport, PeerChannel, PeerMedia};
pub use session_code::SessionCode;
pub use signaling::{SessionAnnouncement, SignalingClient};
pub use transport::*;

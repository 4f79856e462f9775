//! Sync Engine
//!
//! Protocol pieces shared by host and client: the wire codec, the loop guard,
//! drift correction, the role machine and the host heartbeat.

mod drift;
mod guard;
mod heartbeat;
mod protocol;
mod role;

pub use drift::*;
pub use guard::*;
pub use heartbeat::*;
pub use protocol::*;
pub use role::*;

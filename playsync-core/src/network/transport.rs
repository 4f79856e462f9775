//! Transport seam between the sync core and whatever carries its messages
//!
//! The core only needs a control channel per peer, a way to offer a media
//! stream, and a feed of events. Discovery and NAT traversal live behind it.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::media::{MediaStream, OfferOptions};

/// Transport-level errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Invalid peer identifier: {0}")]
    InvalidPeer(String),

    #[error("Control channel is closed")]
    ChannelClosed,

    #[error("Transport is shut down")]
    Shutdown,

    #[error("Transport error: {0}")]
    Other(String),
}

/// Ordered, best-effort message stream to one peer
pub trait ControlChannel: Send + Sync {
    fn peer_id(&self) -> &str;
    fn is_open(&self) -> bool;
    fn send(&self, payload: String) -> Result<(), TransportError>;
    fn close(&self);
}

/// Media transport carrying the host's stream to the client
pub trait MediaSession: Send + Sync {
    fn peer_id(&self) -> &str;
    fn close(&self);
}

/// Capability provider for control channels and media sessions
pub trait Transport: Send + Sync {
    /// Start accepting connections and return the identifier remote peers
    /// use to reach us. Calling it again returns the same identifier.
    fn open(&self) -> Result<String, TransportError>;

    /// Open a control channel to a remote identifier
    fn connect(&self, remote_id: &str) -> Result<Arc<dyn ControlChannel>, TransportError>;

    /// Offer a media stream to a connected peer
    fn call(
        &self,
        remote_id: &str,
        stream: MediaStream,
        offer: &OfferOptions,
    ) -> Result<Arc<dyn MediaSession>, TransportError>;
}

/// Events delivered by the transport to the session event loop
#[derive(Clone)]
pub enum TransportEvent {
    /// A remote peer asked to open a control channel to us
    IncomingConnection(Arc<dyn ControlChannel>),
    /// Control channel handshake with the peer completed
    ChannelOpen { peer_id: String },
    /// Raw control message from the peer
    Message { peer_id: String, payload: String },
    /// Control channel closed by either side
    ChannelClosed { peer_id: String },
    /// Control channel failed
    ChannelError { peer_id: String, error: String },
    /// The peer is offering us a media stream
    IncomingCall {
        session: Arc<dyn MediaSession>,
        stream: MediaStream,
    },
    /// The media session with the peer ended
    MediaClosed { peer_id: String },
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::IncomingConnection(channel) => f
                .debug_tuple("IncomingConnection")
                .field(&channel.peer_id())
                .finish(),
            TransportEvent::ChannelOpen { peer_id } => {
                f.debug_struct("ChannelOpen").field("peer_id", peer_id).finish()
            }
            TransportEvent::Message { peer_id, payload } => f
                .debug_struct("Message")
                .field("peer_id", peer_id)
                .field("payload", payload)
                .finish(),
            TransportEvent::ChannelClosed { peer_id } => f
                .debug_struct("ChannelClosed")
                .field("peer_id", peer_id)
                .finish(),
            TransportEvent::ChannelError { peer_id, error } => f
                .debug_struct("ChannelError")
                .field("peer_id", peer_id)
                .field("error", error)
                .finish(),
            TransportEvent::IncomingCall { session, stream } => f
                .debug_struct("IncomingCall")
                .field("peer_id", &session.peer_id())
                .field("stream", stream)
                .finish(),
            TransportEvent::MediaClosed { peer_id } => f
                .debug_struct("MediaClosed")
                .field("peer_id", peer_id)
                .finish(),
        }
    }
}

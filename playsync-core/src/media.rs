//! Media source capture and offer options
//!
//! The core never touches media bytes. A captured stream is an opaque handle
//! that the transport offers to the peer and the client attaches to its sink.

use std::fmt;

use thiserror::Error;

/// Target sustained bitrate requested from the transport (10 Mbit/s)
const DEFAULT_MAX_BITRATE_BPS: u64 = 10_000_000;

/// Opaque handle to a transmissible media stream
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaStream {
    id: String,
}

impl MediaStream {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Offer transform applied when the host calls the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfferOptions {
    /// Requested maximum sustained bitrate in bits per second
    pub max_bitrate_bps: u64,
}

impl Default for OfferOptions {
    fn default() -> Self {
        Self {
            max_bitrate_bps: DEFAULT_MAX_BITRATE_BPS,
        }
    }
}

/// Errors from capturing the local media source
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MediaError {
    #[error("No media source loaded")]
    NoSource,

    #[error("Media capture failed: {0}")]
    CaptureFailed(String),
}

/// Captures the active local video element as a stream
pub trait MediaCapture: Send + Sync {
    fn capture_stream(&self) -> Result<MediaStream, MediaError>;
}

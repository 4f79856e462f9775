//! Sync Protocol Messages
//!
//! The control channel carries one small JSON object per logical event:
//! `{"type": "PLAY" | "PAUSE" | "SEEK" | "HEARTBEAT", "timestamp": <seconds>}`.
//! There is no envelope, sequence number or acknowledgement.

use std::fmt;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Kind of synchronization command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    /// Start or resume playback
    Play,
    /// Pause playback
    Pause,
    /// Jump to a position
    Seek,
    /// Periodic authoritative position report (sent by host)
    Heartbeat,
}

impl CommandType {
    /// Wire name of this command
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandType::Play => "PLAY",
            CommandType::Pause => "PAUSE",
            CommandType::Seek => "SEEK",
            CommandType::Heartbeat => "HEARTBEAT",
        }
    }

    fn from_wire(name: &str) -> Option<Self> {
        match name {
            "PLAY" => Some(CommandType::Play),
            "PAUSE" => Some(CommandType::Pause),
            "SEEK" => Some(CommandType::Seek),
            "HEARTBEAT" => Some(CommandType::Heartbeat),
            _ => None,
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded synchronization command
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncCommand {
    pub kind: CommandType,
    /// Sender's media position in seconds at emission time (always >= 0)
    pub timestamp: f64,
}

impl SyncCommand {
    /// Build a command from a local position.
    ///
    /// Negative or non-finite positions are clamped to zero so that every
    /// command put on the wire satisfies `timestamp >= 0`.
    pub fn new(kind: CommandType, timestamp: f64) -> Self {
        Self {
            kind,
            timestamp: sanitize_position(timestamp),
        }
    }

    /// Serialize for the control channel
    pub fn encode(&self) -> String {
        encode(self.kind, self.timestamp)
    }
}

/// Reasons an inbound control message was dropped
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    #[error("payload is not a JSON object: {0}")]
    Malformed(String),

    #[error("missing command type")]
    MissingType,

    #[error("unknown command type: {0}")]
    UnknownType(String),

    #[error("missing timestamp")]
    MissingTimestamp,

    #[error("timestamp is not a finite number: {0}")]
    InvalidTimestamp(String),
}

/// Raw wire shape; every field is optional so validation can name what is wrong
#[derive(Debug, Deserialize)]
struct WireCommand {
    #[serde(rename = "type", default)]
    kind: Option<Value>,
    #[serde(default)]
    timestamp: Option<Value>,
}

/// Encode a command for the control channel
pub fn encode(kind: CommandType, timestamp: f64) -> String {
    serde_json::json!({
        "type": kind.as_str(),
        "timestamp": sanitize_position(timestamp),
    })
    .to_string()
}

/// Decode and validate an inbound control message
pub fn decode(payload: &str) -> Result<SyncCommand, DecodeError> {
    let wire: WireCommand =
        serde_json::from_str(payload).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    let kind = match wire.kind {
        None | Some(Value::Null) => return Err(DecodeError::MissingType),
        Some(Value::String(name)) => {
            CommandType::from_wire(&name).ok_or(DecodeError::UnknownType(name))?
        }
        Some(other) => return Err(DecodeError::UnknownType(other.to_string())),
    };

    let timestamp = match wire.timestamp {
        None | Some(Value::Null) => return Err(DecodeError::MissingTimestamp),
        Some(Value::Number(n)) => n
            .as_f64()
            .filter(|t| t.is_finite())
            .ok_or_else(|| DecodeError::InvalidTimestamp(n.to_string()))?,
        Some(other) => return Err(DecodeError::InvalidTimestamp(other.to_string())),
    };

    if timestamp < 0.0 {
        tracing::debug!("Clamping negative {} timestamp {} to 0", kind, timestamp);
    }

    Ok(SyncCommand::new(kind, timestamp))
}

fn sanitize_position(position: f64) -> f64 {
    if position.is_finite() && position > 0.0 {
        position
    } else {
        0.0
    }
}

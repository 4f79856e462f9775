//! Local media player seam
//!
//! The native playback engine is the ground truth for position; the sync
//! core only reads it and issues play/pause/seek.

use thiserror::Error;

use crate::media::MediaStream;

/// Control surface of the local video element
pub trait Player: Send + Sync {
    /// Current media position in seconds
    fn position(&self) -> f64;
    fn set_position(&self, seconds: f64);
    fn play(&self);
    fn pause(&self);
    /// Attach a received stream to this player (client sink)
    fn attach_stream(&self, stream: MediaStream);
}

/// Who caused a player event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOrigin {
    /// The viewer acted on their own player
    User,
    /// The event is the player reacting to a command the network applied
    Applied,
}

/// Event observed on the local player
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerEvent {
    Play { position: f64, origin: EventOrigin },
    Pause { position: f64, origin: EventOrigin },
    Seeked { position: f64, origin: EventOrigin },
}

impl PlayerEvent {
    pub fn user_play(position: f64) -> Self {
        PlayerEvent::Play {
            position,
            origin: EventOrigin::User,
        }
    }

    pub fn user_pause(position: f64) -> Self {
        PlayerEvent::Pause {
            position,
            origin: EventOrigin::User,
        }
    }

    pub fn user_seek(position: f64) -> Self {
        PlayerEvent::Seeked {
            position,
            origin: EventOrigin::User,
        }
    }

    pub fn origin(&self) -> EventOrigin {
        match self {
            PlayerEvent::Play { origin, .. }
            | PlayerEvent::Pause { origin, .. }
            | PlayerEvent::Seeked { origin, .. } => *origin,
        }
    }

    pub fn position(&self) -> f64 {
        match self {
            PlayerEvent::Play { position, .. }
            | PlayerEvent::Pause { position, .. }
            | PlayerEvent::Seeked { position, .. } => *position,
        }
    }
}

/// Errors from selecting a local video file
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SelectError {
    #[error("Unsupported file type '{0}', please choose a video file")]
    UnsupportedFormat(String),
}

/// Check that a selected file is a video before it becomes the host source
pub fn validate_video_selection(mime_type: &str) -> Result<(), SelectError> {
    let normalized = mime_type.trim().to_ascii_lowercase();
    match normalized.split_once('/') {
        Some(("video", subtype)) if !subtype.is_empty() => Ok(()),
        _ => Err(SelectError::UnsupportedFormat(mime_type.to_string())),
    }
}

//! Address exchange via ntfy for sessions across the internet
//!
//! The host posts its relay addresses to a topic named after its session
//! code; a joining peer polls that topic and dials what it finds.

use libp2p::PeerId;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::behaviour::NetworkError;
use super::session_code::SessionCode;

/// Message published to the signaling topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionAnnouncement {
    pub peer_id: String,
    pub addresses: Vec<String>,
    pub session_code: String,
}

impl SessionAnnouncement {
    /// Whether this announcement was posted by the peer that owns `code`
    pub fn is_from_host_of(&self, code: &SessionCode) -> bool {
        self.peer_id
            .parse::<PeerId>()
            .map(|peer| SessionCode::from_peer_id(&peer) == *code)
            .unwrap_or(false)
    }
}

/// Signaling client for host discovery
#[derive(Debug, Clone)]
pub struct SignalingClient {
    client: Client,
    base_url: String,
}

impl SignalingClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn topic_url(&self, code: &SessionCode) -> String {
        format!("{}/{}", self.base_url, code.topic())
    }

    /// Publish our addresses for the session
    pub async fn publish_session(
        &self,
        code: &SessionCode,
        peer_id: &str,
        addresses: Vec<String>,
    ) -> Result<(), NetworkError> {
        let msg = SessionAnnouncement {
            peer_id: peer_id.to_string(),
            addresses,
            session_code: code.as_str().to_string(),
        };
        let body =
            serde_json::to_string(&msg).map_err(|e| NetworkError::Signaling(e.to_string()))?;

        info!("Signaling: publishing session {} to {}", code, self.base_url);

        self.client
            .post(self.topic_url(code))
            .header("Title", format!("Session {}", code))
            .header("Tags", "film_projector")
            .body(body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| NetworkError::Signaling(format!("publish failed: {}", e)))?;

        Ok(())
    }

    /// Fetch announcements posted for the session in the last few minutes
    pub async fn poll_session(
        &self,
        code: &SessionCode,
    ) -> Result<Vec<SessionAnnouncement>, NetworkError> {
        let url = format!("{}/json?poll=1&since=5m", self.topic_url(code));
        debug!("Signaling: polling session {}", code);

        let text = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| NetworkError::Signaling(format!("poll failed: {}", e)))?
            .text()
            .await
            .map_err(|e| NetworkError::Signaling(format!("read failed: {}", e)))?;

        let announcements = parse_poll_response(&text);
        if !announcements.is_empty() {
            info!(
                "Signaling: {} announcements for session {}",
                announcements.len(),
                code
            );
        }
        Ok(announcements)
    }
}

/// ntfy returns newline-delimited JSON; the announcement is in `message`
fn parse_poll_response(text: &str) -> Vec<SessionAnnouncement> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .filter_map(|wrapper| {
            wrapper
                .get("message")
                .and_then(|m| m.as_str())
                .and_then(|m| serde_json::from_str::<SessionAnnouncement>(m).ok())
        })
        .collect()
}

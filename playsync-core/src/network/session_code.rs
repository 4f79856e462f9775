//! Session code generation and parsing
//!
//! A host's session code is derived from its peer ID, so a joining peer can
//! tell the host apart from anyone else on the session topic.

use libp2p::PeerId;
use std::fmt;

/// Characters used in session codes (unambiguous, uppercase)
/// Excludes: 0/O, 1/I/L, 5/S, 2/Z to avoid confusion
const ALPHABET: &[u8] = b"346789ABCDEFGHJKMNPQRTUVWXY";

/// Session code length (8 chars = ~282 billion combinations with 27-char alphabet)
const CODE_LENGTH: usize = 8;

/// Prefix of the gossipsub topic a session runs on
const TOPIC_PREFIX: &str = "playsync-";

/// A code a client enters to reach a host
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionCode(String);

impl SessionCode {
    /// Derive a session code from a peer ID
    ///
    /// Uses the trailing bytes of the peer ID, which come from the public key
    /// rather than the multihash/protobuf prefix.
    pub fn from_peer_id(peer_id: &PeerId) -> Self {
        let bytes = peer_id.to_bytes();
        let tail = &bytes[bytes.len().saturating_sub(CODE_LENGTH)..];
        SessionCode(encode_bytes(tail))
    }

    /// Generate a random session code
    pub fn random() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();

        let code = (0..CODE_LENGTH)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        SessionCode(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Gossipsub topic for this session
    pub fn topic(&self) -> String {
        format!("{}{}", TOPIC_PREFIX, self.0.to_lowercase())
    }

    /// Parse a session code from user input
    ///
    /// Normalizes to uppercase and ignores separators.
    pub fn parse(input: &str) -> Option<Self> {
        let normalized: String = input
            .chars()
            .filter(|c| c.is_alphanumeric())
            .map(|c| c.to_ascii_uppercase())
            .collect();

        if normalized.len() != CODE_LENGTH {
            return None;
        }

        if normalized.bytes().all(|b| ALPHABET.contains(&b)) {
            Some(SessionCode(normalized))
        } else {
            None
        }
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Format as XXXX-XXXX for readability
        if self.0.len() == CODE_LENGTH {
            write!(f, "{}-{}", &self.0[..4], &self.0[4..])
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Encode bytes to session code characters
fn encode_bytes(bytes: &[u8]) -> String {
    let mut accumulator: u128 = 0;
    for (i, &byte) in bytes.iter().take(CODE_LENGTH).enumerate() {
        accumulator |= (byte as u128) << (i * 8);
    }

    let mut result = String::with_capacity(CODE_LENGTH);
    for _ in 0..CODE_LENGTH {
        let idx = (accumulator % ALPHABET.len() as u128) as usize;
        result.push(ALPHABET[idx] as char);
        accumulator /= ALPHABET.len() as u128;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_peer() -> PeerId {
        libp2p::identity::Keypair::generate_ed25519()
            .public()
            .to_peer_id()
    }

    #[test]
    fn test_session_code_parse() {
        let code = SessionCode::parse("ABCD-EFGH").unwrap();
        assert_eq!(code.as_str(), "ABCDEFGH");

        let code = SessionCode::parse("abcd efgh").unwrap();
        assert_eq!(code.as_str(), "ABCDEFGH");

        assert!(SessionCode::parse("ABC").is_none());
        assert!(SessionCode::parse("ABCDEFGHJ").is_none());
        // 0 and O are excluded
        assert!(SessionCode::parse("ABCD-EFG0").is_none());
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        let code = SessionCode("ABCDEFGH".to_string());
        assert_eq!(code.to_string(), "ABCD-EFGH");
        assert_eq!(SessionCode::parse(&code.to_string()), Some(code));
    }

    #[test]
    fn test_code_from_peer_id_is_stable() {
        let peer = random_peer();
        let code = SessionCode::from_peer_id(&peer);
        assert_eq!(code, SessionCode::from_peer_id(&peer));
        assert_eq!(code.as_str().len(), CODE_LENGTH);
        assert_eq!(SessionCode::parse(code.as_str()), Some(code));
    }

    #[test]
    fn test_topic_is_lowercase() {
        let code = SessionCode("ABCDEFGH".to_string());
        assert_eq!(code.topic(), "playsync-abcdefgh");
    }

    #[test]
    fn test_random_code() {
        let code1 = SessionCode::random();
        let code2 = SessionCode::random();
        assert_ne!(code1, code2);
        assert!(SessionCode::parse(code1.as_str()).is_some());
    }
}

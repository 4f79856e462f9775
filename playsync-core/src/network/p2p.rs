//! [`Transport`] over the libp2p network task

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::behaviour::{NetworkCommand, NetworkHandle};
use super::session_code::SessionCode;
use super::transport::{ControlChannel, MediaSession, Transport, TransportError};
use crate::media::{MediaStream, OfferOptions};

/// Control channel to one peer on the session topic
#[derive(Debug)]
pub struct PeerChannel {
    peer_id: String,
    open: Arc<AtomicBool>,
    handle: NetworkHandle,
}

impl PeerChannel {
    pub(crate) fn new(peer_id: String, open: Arc<AtomicBool>, handle: NetworkHandle) -> Self {
        Self {
            peer_id,
            open,
            handle,
        }
    }
}

impl ControlChannel for PeerChannel {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send(&self, payload: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::ChannelClosed);
        }
        self.handle
            .send(NetworkCommand::Send {
                to: self.peer_id.clone(),
                payload,
            })
            .map_err(|_| TransportError::Shutdown)
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            debug!("Closing channel to {}", self.peer_id);
            let _ = self.handle.send(NetworkCommand::CloseChannel {
                to: self.peer_id.clone(),
            });
        }
    }
}

/// One media offer between host and client
#[derive(Debug)]
pub struct PeerMedia {
    peer_id: String,
    offer_id: u64,
    open: Arc<AtomicBool>,
    handle: NetworkHandle,
}

impl PeerMedia {
    pub(crate) fn new(
        peer_id: String,
        offer_id: u64,
        open: Arc<AtomicBool>,
        handle: NetworkHandle,
    ) -> Self {
        Self {
            peer_id,
            offer_id,
            open,
            handle,
        }
    }
}

impl MediaSession for PeerMedia {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn close(&self) {
        // Already closed by the remote end: nothing to tell it
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.handle.send(NetworkCommand::EndMedia {
                to: self.peer_id.clone(),
                offer_id: self.offer_id,
            });
        }
    }
}

/// Libp2p-backed transport. Hosting advertises a session code derived from
/// our peer ID; connecting joins the topic of the code entered.
pub struct Libp2pTransport {
    handle: NetworkHandle,
    hosted: Mutex<Option<SessionCode>>,
    /// Offers are told apart by this, not by the captured stream's ID
    next_offer: AtomicU64,
}

impl Libp2pTransport {
    pub fn new(handle: NetworkHandle) -> Self {
        Self {
            handle,
            hosted: Mutex::new(None),
            next_offer: AtomicU64::new(1),
        }
    }

    fn local_code(&self) -> Result<SessionCode, TransportError> {
        let peer_id = self
            .handle
            .local_peer_id
            .parse()
            .map_err(|_| TransportError::InvalidPeer(self.handle.local_peer_id.clone()))?;
        Ok(SessionCode::from_peer_id(&peer_id))
    }
}

impl Transport for Libp2pTransport {
    fn open(&self) -> Result<String, TransportError> {
        let mut hosted = self.hosted.lock();
        let code = match hosted.as_ref() {
            Some(code) => code.clone(),
            None => self.local_code()?,
        };

        self.handle
            .send(NetworkCommand::Host { code: code.clone() })
            .map_err(|_| TransportError::Shutdown)?;

        let display = code.to_string();
        *hosted = Some(code);
        Ok(display)
    }

    fn connect(&self, remote_id: &str) -> Result<Arc<dyn ControlChannel>, TransportError> {
        let code = SessionCode::parse(remote_id)
            .ok_or_else(|| TransportError::InvalidPeer(remote_id.to_string()))?;

        if self.hosted.lock().take().is_some() {
            debug!("Leaving hosted session to join {}", code);
        }

        let open = Arc::new(AtomicBool::new(true));
        self.handle
            .send(NetworkCommand::Join {
                code: code.clone(),
                open: Arc::clone(&open),
            })
            .map_err(|_| TransportError::Shutdown)?;

        Ok(Arc::new(PeerChannel::new(
            code.as_str().to_string(),
            open,
            self.handle.clone(),
        )))
    }

    fn call(
        &self,
        remote_id: &str,
        stream: MediaStream,
        offer: &OfferOptions,
    ) -> Result<Arc<dyn MediaSession>, TransportError> {
        let offer_id = self.next_offer.fetch_add(1, Ordering::SeqCst);
        let open = Arc::new(AtomicBool::new(true));
        self.handle
            .send(NetworkCommand::Offer {
                to: remote_id.to_string(),
                offer_id,
                stream_id: stream.id().to_string(),
                max_bitrate_bps: offer.max_bitrate_bps,
                open: Arc::clone(&open),
            })
            .map_err(|_| TransportError::Shutdown)?;

        debug!("Offer {} of {} to {}", offer_id, stream, remote_id);
        Ok(Arc::new(PeerMedia::new(
            remote_id.to_string(),
            offer_id,
            open,
            self.handle.clone(),
        )))
    }
}

//! libp2p Network Behaviour
//!
//! Implements the P2P layer under the [`Transport`](super::Transport) seam:
//! - mDNS for local network discovery
//! - TCP + QUIC transports for connectivity
//! - Relay client for NAT traversal (internet connectivity)
//! - DCUtR for hole punching (direct connections through NAT)
//! - Gossipsub, one topic per session code, carrying peer-addressed frames

use futures::StreamExt;
use libp2p::{
    dcutr, gossipsub, identify, identity, mdns, noise, ping, relay,
    swarm::{behaviour::toggle::Toggle, NetworkBehaviour, SwarmEvent},
    tcp, yamux, Multiaddr, PeerId, Swarm,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::p2p::{PeerChannel, PeerMedia};
use super::session_code::SessionCode;
use super::signaling::SignalingClient;
use super::transport::TransportEvent;
use crate::media::MediaStream;

/// Public IPFS nodes dialed at startup; any of them offering the relay
/// protocol is asked for a reservation
const DEFAULT_BOOTSTRAP_NODES: &[&str] = &[
    // mars.i.ipfs.io
    "/ip4/104.131.131.82/tcp/4001/p2p/QmaCpDMGvV2BGHeYERUEnRQAwe3N8SzbUtfsmvsqQLuvuJ",
    "/ip4/104.131.131.82/udp/4001/quic-v1/p2p/QmaCpDMGvV2BGHeYERUEnRQAwe3N8SzbUtfsmvsqQLuvuJ",
    // saturn.i.ipfs.io
    "/ip4/178.128.122.218/tcp/4001/p2p/QmbLHAnMoJPWSCR5Zhtx6BHJX9KiKNN6tpvbUcqanj75Nb",
    "/ip4/178.128.122.218/udp/4001/quic-v1/p2p/QmbLHAnMoJPWSCR5Zhtx6BHJX9KiKNN6tpvbUcqanj75Nb",
    // pluto.i.ipfs.io
    "/ip4/139.178.68.217/tcp/4001/p2p/QmNnooDu7bfjPFoTZYxMNLWUQJyrVwtbZg5gBMjTezGAJN",
    "/ip4/139.178.68.217/udp/4001/quic-v1/p2p/QmNnooDu7bfjPFoTZYxMNLWUQJyrVwtbZg5gBMjTezGAJN",
];

/// Default signaling server URL (ntfy.sh)
const DEFAULT_SIGNALING_URL: &str = "https://ntfy.sh";

const LISTEN_ADDRESSES: &[&str] = &["/ip4/0.0.0.0/tcp/0", "/ip4/0.0.0.0/udp/0/quic-v1"];

/// How many times a joining peer polls signaling for host addresses
const SIGNALING_POLL_ATTEMPTS: u32 = 5;
const SIGNALING_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Network configuration
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Nodes dialed at startup for relay reservations.
    /// If empty, uses DEFAULT_BOOTSTRAP_NODES
    pub bootstrap_nodes: Vec<String>,
    /// Signaling server URL (e.g., "https://ntfy.sh" or your own)
    pub signaling_url: String,
    /// Whether to enable mDNS for local network discovery
    pub enable_mdns: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bootstrap_nodes: Vec::new(),
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            enable_mdns: true,
        }
    }
}

impl NetworkConfig {
    pub fn with_bootstrap_nodes(mut self, nodes: Vec<String>) -> Self {
        self.bootstrap_nodes = nodes;
        self
    }

    pub fn with_signaling_url(mut self, url: impl Into<String>) -> Self {
        self.signaling_url = url.into();
        self
    }

    pub fn with_mdns(mut self, enabled: bool) -> Self {
        self.enable_mdns = enabled;
        self
    }

    /// Get the effective bootstrap nodes (custom or defaults)
    pub fn get_bootstrap_nodes(&self) -> Vec<&str> {
        if self.bootstrap_nodes.is_empty() {
            DEFAULT_BOOTSTRAP_NODES.to_vec()
        } else {
            self.bootstrap_nodes.iter().map(|s| s.as_str()).collect()
        }
    }
}

/// Network-related errors
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Failed to create transport: {0}")]
    Transport(String),

    #[error("libp2p error: {0}")]
    Libp2p(String),

    #[error("Signaling error: {0}")]
    Signaling(String),

    #[error("Not in a session")]
    NotInSession,

    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    #[error("Network task closed")]
    Closed,
}

/// Combined network behaviour with mDNS + Relay for internet connectivity
#[derive(NetworkBehaviour)]
pub struct PeerBehaviour {
    /// Ping for connection keep-alive
    ping: ping::Behaviour,
    /// Relay client for NAT traversal
    relay_client: relay::client::Behaviour,
    /// DCUtR for hole punching (direct connections through relay)
    dcutr: dcutr::Behaviour,
    /// mDNS for local network discovery
    mdns: Toggle<mdns::tokio::Behaviour>,
    /// Peer identification
    identify: identify::Behaviour,
    /// Pub/sub carrying session frames
    gossipsub: gossipsub::Behaviour,
}

/// Frame published on the session topic. Every frame names its recipient;
/// other subscribers drop it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub to: String,
    #[serde(flatten)]
    pub body: FrameBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FrameBody {
    /// Opaque control-channel payload
    Control { payload: String },
    /// The sender offers a media stream. `offer_id` is unique per offer even
    /// when the same captured stream is offered again.
    MediaOffer {
        offer_id: u64,
        stream_id: String,
        max_bitrate_bps: u64,
    },
    /// The sender stopped the media stream of an offer
    MediaEnd { offer_id: u64 },
    /// The sender closed the control channel
    Close,
}

/// Commands sent to the network manager
#[derive(Debug)]
pub enum NetworkCommand {
    /// Start hosting the session with the given code
    Host { code: SessionCode },
    /// Join the session hosted under the given code
    Join {
        code: SessionCode,
        open: Arc<AtomicBool>,
    },
    /// Send a control payload to a peer
    Send { to: String, payload: String },
    /// Offer a media stream to a peer
    Offer {
        to: String,
        offer_id: u64,
        stream_id: String,
        max_bitrate_bps: u64,
        open: Arc<AtomicBool>,
    },
    /// Stop the media stream of an offer
    EndMedia { to: String, offer_id: u64 },
    /// Close the control channel to a peer
    CloseChannel { to: String },
    /// Signaling never produced the host of a joined session
    HostNotFound { code: SessionCode },
    /// Dial a peer directly by multiaddr (for manual connection)
    DialPeer { multiaddr: String },
    /// Shutdown the network
    Shutdown,
}

/// Handle to communicate with the running network
#[derive(Debug, Clone)]
pub struct NetworkHandle {
    command_tx: mpsc::UnboundedSender<NetworkCommand>,
    pub local_peer_id: String,
}

impl NetworkHandle {
    /// Handle not attached to a running network task
    #[cfg(test)]
    pub(crate) fn detached(
        local_peer_id: String,
    ) -> (Self, mpsc::UnboundedReceiver<NetworkCommand>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        (
            Self {
                command_tx,
                local_peer_id,
            },
            command_rx,
        )
    }

    pub(crate) fn send(&self, command: NetworkCommand) -> Result<(), NetworkError> {
        self.command_tx
            .send(command)
            .map_err(|_| NetworkError::Closed)
    }

    pub fn dial_peer(&self, multiaddr: &str) -> Result<(), NetworkError> {
        self.send(NetworkCommand::DialPeer {
            multiaddr: multiaddr.to_string(),
        })
    }

    pub fn shutdown(&self) {
        let _ = self.command_tx.send(NetworkCommand::Shutdown);
    }
}

/// Which side of a session this node is on
#[derive(Debug)]
enum Membership {
    Hosting { code: SessionCode },
    Joining {
        code: SessionCode,
        host: Option<PeerId>,
    },
}

/// The media stream currently live with a peer
#[derive(Debug)]
struct LiveMedia {
    offer_id: u64,
    open: Arc<AtomicBool>,
}

/// Manages P2P networking - runs in a background task
pub struct NetworkManager {
    local_peer_id: PeerId,
    keypair: identity::Keypair,
    config: NetworkConfig,
    signaling: Arc<SignalingClient>,
    /// Handle given to channels created by this manager
    handle: Option<NetworkHandle>,
    /// Current session topic (if in a session)
    topic: Option<gossipsub::IdentTopic>,
    membership: Option<Membership>,
    /// Open control channels by peer label
    channels: HashMap<String, Arc<AtomicBool>>,
    /// Live media stream by peer label
    media: HashMap<String, LiveMedia>,
    /// Connected relay servers
    connected_relays: HashSet<PeerId>,
    /// Our listening addresses (for signaling)
    listening_addresses: Vec<String>,
}

impl NetworkManager {
    /// Create a new network manager with custom config
    pub fn with_config(config: NetworkConfig) -> Result<Self, NetworkError> {
        let keypair = identity::Keypair::generate_ed25519();
        let local_peer_id = PeerId::from(keypair.public());

        info!(
            "Local peer ID: {} (signaling: {})",
            local_peer_id, config.signaling_url
        );

        Ok(Self {
            local_peer_id,
            keypair,
            signaling: Arc::new(SignalingClient::new(&config.signaling_url)),
            config,
            handle: None,
            topic: None,
            membership: None,
            channels: HashMap::new(),
            media: HashMap::new(),
            connected_relays: HashSet::new(),
            listening_addresses: Vec::new(),
        })
    }

    /// Start the network and return a handle for communication.
    /// Must be called from within a tokio runtime.
    pub fn start(
        mut self,
    ) -> Result<(NetworkHandle, mpsc::UnboundedReceiver<TransportEvent>), NetworkError> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let handle = NetworkHandle {
            command_tx,
            local_peer_id: self.local_peer_id.to_string(),
        };
        self.handle = Some(handle.clone());

        let swarm = self.create_swarm()?;

        tokio::spawn(async move {
            if let Err(e) = self.run(swarm, event_tx, command_rx).await {
                warn!("Network task error: {}", e);
            }
        });

        Ok((handle, event_rx))
    }

    /// Create the libp2p swarm with relay support
    ///
    /// Transport chain: TCP (for relay) -> QUIC (for direct) -> DNS -> Relay Client
    fn create_swarm(&self) -> Result<Swarm<PeerBehaviour>, NetworkError> {
        let enable_mdns = self.config.enable_mdns;

        let swarm = libp2p::SwarmBuilder::with_existing_identity(self.keypair.clone())
            .with_tokio()
            // TCP first - needed for relay protocol (uses noise+yamux)
            .with_tcp(
                tcp::Config::default().nodelay(true),
                noise::Config::new,
                yamux::Config::default,
            )
            .map_err(|e| NetworkError::Transport(e.to_string()))?
            // QUIC for direct connections (has built-in encryption/mux)
            .with_quic()
            .with_dns()
            .map_err(|e| NetworkError::Transport(e.to_string()))?
            .with_relay_client(noise::Config::new, yamux::Config::default)
            .map_err(|e| NetworkError::Transport(e.to_string()))?
            .with_behaviour(|keypair, relay_client| {
                let ping = ping::Behaviour::new(
                    ping::Config::new()
                        .with_interval(Duration::from_secs(15))
                        .with_timeout(Duration::from_secs(20)),
                );

                let mdns = if enable_mdns {
                    Some(
                        mdns::tokio::Behaviour::new(
                            mdns::Config::default(),
                            keypair.public().to_peer_id(),
                        )
                        .map_err(|e| e.to_string())?,
                    )
                } else {
                    None
                };

                let dcutr = dcutr::Behaviour::new(keypair.public().to_peer_id());

                // Tuned for a two-peer session.
                // Must satisfy: mesh_outbound_min <= mesh_n_low <= mesh_n <= mesh_n_high
                let gossipsub_config = gossipsub::ConfigBuilder::default()
                    .heartbeat_interval(Duration::from_secs(1))
                    .validation_mode(gossipsub::ValidationMode::Strict)
                    .mesh_outbound_min(0)
                    .mesh_n_low(1)
                    .mesh_n(2)
                    .mesh_n_high(4)
                    .gossip_lazy(2)
                    .build()
                    .map_err(|e| e.to_string())?;

                let gossipsub = gossipsub::Behaviour::new(
                    gossipsub::MessageAuthenticity::Signed(keypair.clone()),
                    gossipsub_config,
                )
                .map_err(|e| e.to_string())?;

                let identify = identify::Behaviour::new(identify::Config::new(
                    "/playsync/1.0.0".into(),
                    keypair.public(),
                ));

                Ok(PeerBehaviour {
                    ping,
                    relay_client,
                    dcutr,
                    mdns: mdns.into(),
                    identify,
                    gossipsub,
                })
            })
            .map_err(|e| NetworkError::Transport(e.to_string()))?
            // Longer timeout to keep relay connections alive while waiting for peers
            .with_swarm_config(|c| c.with_idle_connection_timeout(Duration::from_secs(300)))
            .build();

        Ok(swarm)
    }

    /// Connect to bootstrap nodes for relay reservations
    fn connect_to_bootstrap_nodes(&self, swarm: &mut Swarm<PeerBehaviour>) {
        for addr_str in self.config.get_bootstrap_nodes() {
            match addr_str.parse::<Multiaddr>() {
                Ok(addr) => {
                    debug!("Connecting to bootstrap node: {}", addr);
                    if let Err(e) = swarm.dial(addr.clone()) {
                        debug!("Failed to dial bootstrap node {}: {}", addr, e);
                    }
                }
                Err(e) => warn!("Invalid bootstrap address {}: {}", addr_str, e),
            }
        }
    }

    /// Run the network event loop
    async fn run(
        mut self,
        mut swarm: Swarm<PeerBehaviour>,
        event_tx: mpsc::UnboundedSender<TransportEvent>,
        mut command_rx: mpsc::UnboundedReceiver<NetworkCommand>,
    ) -> Result<(), NetworkError> {
        for addr_str in LISTEN_ADDRESSES {
            let addr = addr_str
                .parse::<Multiaddr>()
                .map_err(|e| NetworkError::Transport(e.to_string()))?;
            match swarm.listen_on(addr) {
                Ok(id) => info!("Listener started on {}: {:?}", addr_str, id),
                Err(e) => warn!("Failed to listen on {}: {:?}", addr_str, e),
            }
        }

        self.connect_to_bootstrap_nodes(&mut swarm);

        loop {
            tokio::select! {
                event = swarm.select_next_some() => {
                    self.handle_swarm_event(&mut swarm, event, &event_tx);
                }
                command = command_rx.recv() => match command {
                    Some(NetworkCommand::Shutdown) | None => {
                        info!("Network shutting down");
                        break;
                    }
                    Some(command) => self.handle_command(&mut swarm, command, &event_tx),
                },
            }
        }

        self.leave(&mut swarm);
        Ok(())
    }

    fn handle_command(
        &mut self,
        swarm: &mut Swarm<PeerBehaviour>,
        command: NetworkCommand,
        event_tx: &mpsc::UnboundedSender<TransportEvent>,
    ) {
        match command {
            NetworkCommand::Host { code } => {
                if let Err(e) = self.host(swarm, code) {
                    warn!("Failed to host session: {}", e);
                }
            }
            NetworkCommand::Join { code, open } => {
                let label = code.as_str().to_string();
                match self.join(swarm, code) {
                    Ok(()) => {
                        self.channels.insert(label, open);
                    }
                    Err(e) => {
                        open.store(false, Ordering::SeqCst);
                        let _ = event_tx.send(TransportEvent::ChannelError {
                            peer_id: label,
                            error: e.to_string(),
                        });
                    }
                }
            }
            NetworkCommand::Send { to, payload } => {
                if let Err(e) = self.publish(swarm, &to, FrameBody::Control { payload }) {
                    debug!("Send to {} failed (may be no mesh yet): {}", to, e);
                }
            }
            NetworkCommand::Offer {
                to,
                offer_id,
                stream_id,
                max_bitrate_bps,
                open,
            } => {
                let body = FrameBody::MediaOffer {
                    offer_id,
                    stream_id,
                    max_bitrate_bps,
                };
                match self.publish(swarm, &to, body) {
                    Ok(()) => {
                        if let Some(previous) =
                            self.media.insert(to.clone(), LiveMedia { offer_id, open })
                        {
                            debug!("Offer {} to {} replaces {}", offer_id, to, previous.offer_id);
                        }
                    }
                    Err(e) => {
                        warn!("Media offer to {} failed: {}", to, e);
                        open.store(false, Ordering::SeqCst);
                        // The previous stream was already replaced locally
                        if let Some(previous) = self.media.remove(&to) {
                            previous.open.store(false, Ordering::SeqCst);
                        }
                        let _ = event_tx.send(TransportEvent::MediaClosed { peer_id: to });
                    }
                }
            }
            NetworkCommand::EndMedia { to, offer_id } => {
                if self.is_live_offer(&to, offer_id) {
                    self.media.remove(&to);
                } else {
                    debug!("Ending superseded offer {} to {}", offer_id, to);
                }
                if let Err(e) = self.publish(swarm, &to, FrameBody::MediaEnd { offer_id }) {
                    debug!("Media end to {} failed: {}", to, e);
                }
            }
            NetworkCommand::CloseChannel { to } => {
                if let Err(e) = self.publish(swarm, &to, FrameBody::Close) {
                    debug!("Close to {} failed: {}", to, e);
                }
                self.forget_peer(&to);
                if matches!(self.membership, Some(Membership::Joining { .. })) {
                    self.leave(swarm);
                }
            }
            NetworkCommand::HostNotFound { code } => {
                let waiting = matches!(
                    &self.membership,
                    Some(Membership::Joining { code: current, host: None }) if *current == code
                );
                if waiting {
                    warn!("No host found for session {}", code);
                    let label = code.as_str().to_string();
                    self.leave(swarm);
                    let _ = event_tx.send(TransportEvent::ChannelError {
                        peer_id: label,
                        error: format!("No host found for session {}", code),
                    });
                }
            }
            NetworkCommand::DialPeer { multiaddr } => match multiaddr.parse::<Multiaddr>() {
                Ok(addr) => {
                    info!("Dialing peer at {}", addr);
                    if let Err(e) = swarm.dial(addr) {
                        warn!("Failed to dial peer: {}", e);
                    }
                }
                Err(e) => warn!("Invalid multiaddr {}: {}", multiaddr, e),
            },
            NetworkCommand::Shutdown => {}
        }
    }

    fn handle_swarm_event(
        &mut self,
        swarm: &mut Swarm<PeerBehaviour>,
        event: SwarmEvent<PeerBehaviourEvent>,
        event_tx: &mpsc::UnboundedSender<TransportEvent>,
    ) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                // Relay addresses already end with our peer ID
                let addr_str = address.to_string();
                let full_addr = if addr_str.ends_with(&self.local_peer_id.to_string()) {
                    addr_str
                } else {
                    format!("{}/p2p/{}", address, self.local_peer_id)
                };
                let is_relay = full_addr.contains("p2p-circuit");

                info!("Listening on {} (relay: {})", full_addr, is_relay);
                self.listening_addresses.push(full_addr);

                // Relay addresses usually arrive after hosting started
                if is_relay {
                    self.publish_addresses();
                }
            }

            SwarmEvent::Behaviour(PeerBehaviourEvent::Mdns(mdns::Event::Discovered(peers))) => {
                for (peer_id, addr) in peers {
                    if peer_id != self.local_peer_id {
                        info!("mDNS discovered peer: {} at {}", peer_id, addr);
                        swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
                        if swarm.dial(addr).is_ok() {
                            debug!("Dialing discovered peer {}", peer_id);
                        }
                    }
                }
            }

            SwarmEvent::Behaviour(PeerBehaviourEvent::Mdns(mdns::Event::Expired(peers))) => {
                for (peer_id, _) in peers {
                    debug!("mDNS peer expired: {}", peer_id);
                }
            }

            SwarmEvent::Behaviour(PeerBehaviourEvent::RelayClient(
                relay::client::Event::ReservationReqAccepted {
                    relay_peer_id,
                    renewal,
                    limit,
                },
            )) => {
                info!(
                    "Relay reservation {} by {} (limit: {:?})",
                    if renewal { "renewed" } else { "accepted" },
                    relay_peer_id,
                    limit
                );
                self.connected_relays.insert(relay_peer_id);
            }

            SwarmEvent::Behaviour(PeerBehaviourEvent::Dcutr(dcutr::Event {
                remote_peer_id,
                result,
            })) => match result {
                Ok(_) => info!("DCUtR hole punch succeeded with {}", remote_peer_id),
                Err(e) => debug!("DCUtR hole punch failed with {}: {:?}", remote_peer_id, e),
            },

            SwarmEvent::Behaviour(PeerBehaviourEvent::Gossipsub(gossipsub::Event::Message {
                propagation_source,
                message,
                ..
            })) => {
                let source = message.source.unwrap_or(propagation_source);
                match serde_json::from_slice::<Frame>(&message.data) {
                    Ok(frame) => self.handle_frame(source, frame, event_tx),
                    Err(e) => debug!("Dropping undecodable frame from {}: {}", source, e),
                }
            }

            SwarmEvent::Behaviour(PeerBehaviourEvent::Gossipsub(
                gossipsub::Event::Subscribed { peer_id, topic },
            )) => {
                if self.topic.as_ref().map(|t| t.hash()) == Some(topic) {
                    self.on_peer_subscribed(peer_id, event_tx);
                }
            }

            SwarmEvent::Behaviour(PeerBehaviourEvent::Gossipsub(
                gossipsub::Event::Unsubscribed { peer_id, topic },
            )) => {
                if self.topic.as_ref().map(|t| t.hash()) == Some(topic) {
                    info!("Peer {} left the session topic", peer_id);
                    self.peer_gone(&peer_id, event_tx);
                }
            }

            SwarmEvent::Behaviour(PeerBehaviourEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                debug!(
                    "Identified peer {} running {} with {} protocols",
                    peer_id,
                    info.protocol_version,
                    info.protocols.len()
                );

                let supports_relay = info.protocols.iter().any(|p| {
                    let proto = p.as_ref();
                    proto.contains("circuit") && proto.contains("relay")
                });

                if supports_relay {
                    // Request a reservation through each non-localhost address
                    for addr in &info.listen_addrs {
                        let addr_str = addr.to_string();
                        if addr_str.contains("127.0.0.1") || addr_str.contains("/ip6/::1/") {
                            continue;
                        }

                        let relay_addr = addr
                            .clone()
                            .with(libp2p::multiaddr::Protocol::P2p(peer_id))
                            .with(libp2p::multiaddr::Protocol::P2pCircuit);

                        info!("Requesting relay listen on: {}", relay_addr);
                        if let Err(e) = swarm.listen_on(relay_addr.clone()) {
                            warn!("Failed to listen on relay {}: {}", relay_addr, e);
                        }
                    }
                }
            }

            SwarmEvent::ConnectionEstablished {
                peer_id, endpoint, ..
            } => {
                info!("Connection established with {} via {:?}", peer_id, endpoint);
                swarm.behaviour_mut().gossipsub.add_explicit_peer(&peer_id);
            }

            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                ..
            } => {
                debug!("Connection closed with {}", peer_id);
                self.connected_relays.remove(&peer_id);
                if num_established == 0 {
                    self.peer_gone(&peer_id, event_tx);
                }
            }

            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => match peer_id {
                Some(peer) => debug!("Failed to connect to {}: {}", peer, error),
                None => debug!("Outgoing connection error: {}", error),
            },

            SwarmEvent::ListenerError { listener_id, error } => {
                // Happens when a relay reservation fails
                warn!("Listener {} error: {}", listener_id, error);
            }

            _ => {}
        }
    }

    /// Route a frame from `source` to the session as a transport event
    fn handle_frame(
        &mut self,
        source: PeerId,
        frame: Frame,
        event_tx: &mpsc::UnboundedSender<TransportEvent>,
    ) {
        if frame.to != self.local_peer_id.to_string() {
            return;
        }
        let Some(label) = self.label_for(&source) else {
            debug!("Dropping frame from {} outside the session", source);
            return;
        };

        match frame.body {
            FrameBody::Control { payload } => {
                let _ = event_tx.send(TransportEvent::Message {
                    peer_id: label,
                    payload,
                });
            }

            FrameBody::MediaOffer {
                offer_id,
                stream_id,
                max_bitrate_bps,
            } => {
                debug!(
                    "Media offer {} ({}) from {} (max {} bps)",
                    offer_id, stream_id, label, max_bitrate_bps
                );
                let Some(handle) = self.handle.clone() else {
                    return;
                };
                let open = Arc::new(AtomicBool::new(true));
                self.media.insert(
                    label.clone(),
                    LiveMedia {
                        offer_id,
                        open: Arc::clone(&open),
                    },
                );
                let session = PeerMedia::new(label, offer_id, open, handle);
                let _ = event_tx.send(TransportEvent::IncomingCall {
                    session: Arc::new(session),
                    stream: MediaStream::new(stream_id),
                });
            }

            FrameBody::MediaEnd { offer_id } => {
                // A superseded offer ending is not a media loss
                if self.is_live_offer(&label, offer_id) {
                    if let Some(media) = self.media.remove(&label) {
                        media.open.store(false, Ordering::SeqCst);
                    }
                    let _ = event_tx.send(TransportEvent::MediaClosed { peer_id: label });
                } else {
                    debug!("Ignoring end of stale offer {} from {}", offer_id, label);
                }
            }

            FrameBody::Close => {
                info!("Peer {} closed the channel", label);
                self.forget_peer(&label);
                let _ = event_tx.send(TransportEvent::ChannelClosed { peer_id: label });
            }
        }
    }

    fn on_peer_subscribed(
        &mut self,
        peer_id: PeerId,
        event_tx: &mpsc::UnboundedSender<TransportEvent>,
    ) {
        match &mut self.membership {
            Some(Membership::Hosting { .. }) => {
                let label = peer_id.to_string();
                if self.channels.contains_key(&label) {
                    return;
                }
                let Some(handle) = self.handle.clone() else {
                    return;
                };
                info!("Peer {} joined the session", peer_id);
                let open = Arc::new(AtomicBool::new(true));
                self.channels.insert(label.clone(), Arc::clone(&open));
                let channel = PeerChannel::new(label.clone(), open, handle);
                let _ = event_tx.send(TransportEvent::IncomingConnection(Arc::new(channel)));
                let _ = event_tx.send(TransportEvent::ChannelOpen { peer_id: label });
            }

            Some(Membership::Joining { code, host }) => {
                if host.is_some() {
                    return;
                }
                // Other joiners can share the topic; only the code's owner is the host
                if SessionCode::from_peer_id(&peer_id) != *code {
                    debug!("Subscriber {} is not the host of {}", peer_id, code);
                    return;
                }
                info!("Found host {} for session {}", peer_id, code);
                *host = Some(peer_id);
                let _ = event_tx.send(TransportEvent::ChannelOpen {
                    peer_id: code.as_str().to_string(),
                });
            }

            None => {}
        }
    }

    /// The peer is no longer reachable; close its channel if it had one
    fn peer_gone(&mut self, peer_id: &PeerId, event_tx: &mpsc::UnboundedSender<TransportEvent>) {
        let Some(label) = self.label_for(peer_id) else {
            return;
        };
        if self.channels.contains_key(&label) {
            self.forget_peer(&label);
            let _ = event_tx.send(TransportEvent::ChannelClosed { peer_id: label });
        }
    }

    fn is_live_offer(&self, label: &str, offer_id: u64) -> bool {
        self.media.get(label).map(|m| m.offer_id) == Some(offer_id)
    }

    fn forget_peer(&mut self, label: &str) {
        if let Some(open) = self.channels.remove(label) {
            open.store(false, Ordering::SeqCst);
        }
        if let Some(media) = self.media.remove(label) {
            media.open.store(false, Ordering::SeqCst);
        }
    }

    /// Session label for a remote peer: its peer ID for a host, the session
    /// code for a joiner talking to its host
    fn label_for(&self, peer_id: &PeerId) -> Option<String> {
        match &self.membership {
            Some(Membership::Hosting { .. }) => Some(peer_id.to_string()),
            Some(Membership::Joining {
                code,
                host: Some(host),
            }) if host == peer_id => Some(code.as_str().to_string()),
            _ => None,
        }
    }

    /// Inverse of [`label_for`](Self::label_for)
    fn resolve(&self, label: &str) -> Option<PeerId> {
        match &self.membership {
            Some(Membership::Hosting { .. }) => label.parse().ok(),
            Some(Membership::Joining { code, host }) if code.as_str() == label => *host,
            _ => None,
        }
    }

    fn subscribe(
        &mut self,
        swarm: &mut Swarm<PeerBehaviour>,
        code: &SessionCode,
    ) -> Result<(), NetworkError> {
        let topic = gossipsub::IdentTopic::new(code.topic());
        swarm
            .behaviour_mut()
            .gossipsub
            .subscribe(&topic)
            .map_err(|e| NetworkError::Libp2p(e.to_string()))?;
        self.topic = Some(topic);
        Ok(())
    }

    /// Start hosting and advertise our addresses
    fn host(
        &mut self,
        swarm: &mut Swarm<PeerBehaviour>,
        code: SessionCode,
    ) -> Result<(), NetworkError> {
        if let Some(Membership::Hosting { code: current }) = &self.membership {
            if *current == code {
                return Ok(());
            }
        }
        self.leave(swarm);

        self.subscribe(swarm, &code)?;
        info!("Hosting session {}", code);
        self.membership = Some(Membership::Hosting { code });
        self.publish_addresses();
        Ok(())
    }

    /// Join a session and look for the host's addresses
    fn join(
        &mut self,
        swarm: &mut Swarm<PeerBehaviour>,
        code: SessionCode,
    ) -> Result<(), NetworkError> {
        self.leave(swarm);

        self.subscribe(swarm, &code)?;
        info!("Joining session {}", code);
        self.spawn_signaling_poll(code.clone());
        self.membership = Some(Membership::Joining { code, host: None });
        Ok(())
    }

    /// Leave the current session topic
    fn leave(&mut self, swarm: &mut Swarm<PeerBehaviour>) {
        if let Some(topic) = self.topic.take() {
            if !swarm.behaviour_mut().gossipsub.unsubscribe(&topic) {
                debug!("Was not subscribed to {}", topic);
            }
            info!("Left session topic");
        }
        self.membership = None;
        for (_, open) in self.channels.drain() {
            open.store(false, Ordering::SeqCst);
        }
        for (_, media) in self.media.drain() {
            media.open.store(false, Ordering::SeqCst);
        }
    }

    /// Publish a frame to the peer behind `label`
    fn publish(
        &self,
        swarm: &mut Swarm<PeerBehaviour>,
        label: &str,
        body: FrameBody,
    ) -> Result<(), NetworkError> {
        let topic = self.topic.as_ref().ok_or(NetworkError::NotInSession)?;
        let to = self
            .resolve(label)
            .ok_or_else(|| NetworkError::UnknownPeer(label.to_string()))?;

        let frame = Frame {
            to: to.to_string(),
            body,
        };
        let data = serde_json::to_vec(&frame).map_err(|e| NetworkError::Libp2p(e.to_string()))?;

        swarm
            .behaviour_mut()
            .gossipsub
            .publish(topic.clone(), data)
            .map_err(|e| NetworkError::Libp2p(e.to_string()))?;
        Ok(())
    }

    /// Post our relay addresses for the hosted code (local addresses filtered out)
    fn publish_addresses(&self) {
        let Some(Membership::Hosting { code }) = &self.membership else {
            return;
        };
        let relay_addresses: Vec<String> = self
            .listening_addresses
            .iter()
            .filter(|a| a.contains("p2p-circuit"))
            .cloned()
            .collect();
        if relay_addresses.is_empty() {
            debug!("No relay addresses yet for {}", code);
            return;
        }

        let signaling = Arc::clone(&self.signaling);
        let code = code.clone();
        let peer_id = self.local_peer_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = signaling
                .publish_session(&code, &peer_id, relay_addresses)
                .await
            {
                warn!("Failed to publish addresses for {}: {}", code, e);
            }
        });
    }

    /// Poll signaling for the host's addresses and dial them
    fn spawn_signaling_poll(&self, code: SessionCode) {
        let Some(handle) = self.handle.clone() else {
            return;
        };
        let signaling = Arc::clone(&self.signaling);

        tokio::spawn(async move {
            for attempt in 1..=SIGNALING_POLL_ATTEMPTS {
                match signaling.poll_session(&code).await {
                    Ok(announcements) => {
                        let addresses: Vec<String> = announcements
                            .into_iter()
                            .filter(|a| a.is_from_host_of(&code))
                            .flat_map(|a| a.addresses)
                            .collect();
                        if !addresses.is_empty() {
                            info!("Dialing {} host addresses for {}", addresses.len(), code);
                            for addr in addresses {
                                if handle.dial_peer(&addr).is_err() {
                                    return;
                                }
                            }
                            return;
                        }
                        debug!("No host addresses for {} (attempt {})", code, attempt);
                    }
                    Err(e) => debug!("Signaling poll for {} failed: {}", code, e),
                }
                tokio::time::sleep(SIGNALING_POLL_INTERVAL).await;
            }
            debug!("Gave up polling signaling for {}", code);
            let _ = handle.send(NetworkCommand::HostNotFound { code });
        });
    }
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
    fn test_frame_wire_format() {
        let frame = Frame {
            to: "peer".to_string(),
            body: FrameBody::Control {
                payload: r#"{"type":"PLAY","timestamp":1}"#.to_string(),
            },
        };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["kind"], "control");
        assert_eq!(value["to"], "peer");

        let close: Frame = serde_json::from_str(r#"{"to":"p","kind":"close"}"#).unwrap();
        assert_eq!(close.body, FrameBody::Close);

        let offer: Frame = serde_json::from_str(
            r#"{"to":"p","kind":"media_offer","offer_id":3,"stream_id":"s1","max_bitrate_bps":10000000}"#,
        )
        .unwrap();
        assert_eq!(
            offer.body,
            FrameBody::MediaOffer {
                offer_id: 3,
                stream_id: "s1".to_string(),
                max_bitrate_bps: 10_000_000,
            }
        );
    }

    #[test]
    fn test_unknown_frame_kind_rejected() {
        assert!(serde_json::from_str::<Frame>(r#"{"to":"p","kind":"teleport"}"#).is_err());
    }

    #[test]
    fn test_bootstrap_nodes_fallback() {
        let config = NetworkConfig::default();
        assert_eq!(config.get_bootstrap_nodes().len(), DEFAULT_BOOTSTRAP_NODES.len());

        let config = config.with_bootstrap_nodes(vec!["/ip4/10.0.0.1/tcp/4001".to_string()]);
        assert_eq!(config.get_bootstrap_nodes(), vec!["/ip4/10.0.0.1/tcp/4001"]);
    }

    #[test]
    fn test_labels_follow_membership() {
        let mut manager = NetworkManager::with_config(NetworkConfig::default().with_mdns(false))
            .unwrap();
        let peer = random_peer();
        assert_eq!(manager.label_for(&peer), None);

        let host_code = SessionCode::from_peer_id(&peer);
        manager.membership = Some(Membership::Joining {
            code: host_code.clone(),
            host: Some(peer),
        });
        assert_eq!(manager.label_for(&peer), Some(host_code.as_str().to_string()));
        assert_eq!(manager.resolve(host_code.as_str()), Some(peer));
        assert_eq!(manager.label_for(&random_peer()), None);

        manager.membership = Some(Membership::Hosting {
            code: SessionCode::random(),
        });
        assert_eq!(manager.label_for(&peer), Some(peer.to_string()));
        assert_eq!(manager.resolve(&peer.to_string()), Some(peer));
    }

    fn hosting_manager() -> NetworkManager {
        let mut manager =
            NetworkManager::with_config(NetworkConfig::default().with_mdns(false)).unwrap();
        manager.membership = Some(Membership::Hosting {
            code: SessionCode::random(),
        });
        manager
    }

    fn to_me(manager: &NetworkManager, body: FrameBody) -> Frame {
        Frame {
            to: manager.local_peer_id.to_string(),
            body,
        }
    }

    #[test]
    fn test_stale_media_end_ignored() {
        let mut manager = hosting_manager();
        let peer = random_peer();
        let open = Arc::new(AtomicBool::new(true));
        manager.media.insert(
            peer.to_string(),
            LiveMedia {
                offer_id: 2,
                open: Arc::clone(&open),
            },
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let stale = to_me(&manager, FrameBody::MediaEnd { offer_id: 1 });
        manager.handle_frame(peer, stale, &tx);
        assert!(rx.try_recv().is_err());
        assert!(open.load(Ordering::SeqCst));

        let current = to_me(&manager, FrameBody::MediaEnd { offer_id: 2 });
        manager.handle_frame(peer, current, &tx);
        assert!(matches!(
            rx.try_recv(),
            Ok(TransportEvent::MediaClosed { .. })
        ));
        assert!(!open.load(Ordering::SeqCst));
    }

    #[test]
    fn test_reoffer_of_same_stream_survives_end_of_previous() {
        let mut manager = hosting_manager();
        let (handle, _commands) = NetworkHandle::detached(manager.local_peer_id.to_string());
        manager.handle = Some(handle);
        let host = random_peer();
        let (tx, mut rx) = mpsc::unbounded_channel();

        // The host repairs by offering the same captured stream again, then
        // ends the first offer
        for offer_id in [1, 2] {
            let offer = to_me(
                &manager,
                FrameBody::MediaOffer {
                    offer_id,
                    stream_id: "video-element".to_string(),
                    max_bitrate_bps: 10_000_000,
                },
            );
            manager.handle_frame(host, offer, &tx);
            match rx.try_recv() {
                Ok(TransportEvent::IncomingCall { stream, .. }) => {
                    assert_eq!(stream.id(), "video-element")
                }
                _ => panic!("expected incoming call"),
            }
        }

        let end = to_me(&manager, FrameBody::MediaEnd { offer_id: 1 });
        manager.handle_frame(host, end, &tx);
        assert!(rx.try_recv().is_err());
        assert!(manager.is_live_offer(&host.to_string(), 2));
    }

    #[tokio::test]
    async fn test_ending_superseded_offer_keeps_live_media() {
        let mut manager = hosting_manager();
        let mut swarm = manager.create_swarm().unwrap();
        let peer = random_peer().to_string();
        let open = Arc::new(AtomicBool::new(true));
        manager.media.insert(
            peer.clone(),
            LiveMedia {
                offer_id: 2,
                open: Arc::clone(&open),
            },
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.handle_command(
            &mut swarm,
            NetworkCommand::EndMedia {
                to: peer.clone(),
                offer_id: 1,
            },
            &tx,
        );

        assert!(manager.is_live_offer(&peer, 2));
        assert!(open.load(Ordering::SeqCst));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_offer_reports_media_closed() {
        // Hosting without a topic: every publish fails
        let mut manager = hosting_manager();
        let mut swarm = manager.create_swarm().unwrap();
        let peer = random_peer().to_string();
        let previous = Arc::new(AtomicBool::new(true));
        manager.media.insert(
            peer.clone(),
            LiveMedia {
                offer_id: 1,
                open: Arc::clone(&previous),
            },
        );

        let open = Arc::new(AtomicBool::new(true));
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.handle_command(
            &mut swarm,
            NetworkCommand::Offer {
                to: peer.clone(),
                offer_id: 2,
                stream_id: "video-element".to_string(),
                max_bitrate_bps: 10_000_000,
                open: Arc::clone(&open),
            },
            &tx,
        );

        match rx.try_recv() {
            Ok(TransportEvent::MediaClosed { peer_id }) => assert_eq!(peer_id, peer),
            _ => panic!("expected media closed"),
        }
        assert!(!open.load(Ordering::SeqCst));
        assert!(!previous.load(Ordering::SeqCst));
        assert!(manager.media.is_empty());
    }

    #[tokio::test]
    async fn test_host_not_found_fails_waiting_join() {
        let mut manager =
            NetworkManager::with_config(NetworkConfig::default().with_mdns(false)).unwrap();
        let mut swarm = manager.create_swarm().unwrap();
        let code = SessionCode::random();
        let open = Arc::new(AtomicBool::new(true));
        manager.membership = Some(Membership::Joining {
            code: code.clone(),
            host: None,
        });
        manager
            .channels
            .insert(code.as_str().to_string(), Arc::clone(&open));

        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.handle_command(
            &mut swarm,
            NetworkCommand::HostNotFound { code: code.clone() },
            &tx,
        );

        match rx.try_recv() {
            Ok(TransportEvent::ChannelError { peer_id, error }) => {
                assert_eq!(peer_id, code.as_str());
                assert!(error.contains("No host found"));
            }
            _ => panic!("expected channel error"),
        }
        assert!(!open.load(Ordering::SeqCst));
        assert!(manager.membership.is_none());
    }

    #[tokio::test]
    async fn test_host_not_found_ignored_once_host_is_known() {
        let mut manager =
            NetworkManager::with_config(NetworkConfig::default().with_mdns(false)).unwrap();
        let mut swarm = manager.create_swarm().unwrap();
        let host = random_peer();
        let code = SessionCode::from_peer_id(&host);
        manager.membership = Some(Membership::Joining {
            code: code.clone(),
            host: Some(host),
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.handle_command(&mut swarm, NetworkCommand::HostNotFound { code }, &tx);

        assert!(rx.try_recv().is_err());
        assert!(manager.membership.is_some());
    }

    #[test]
    fn test_frames_for_others_dropped() {
        let mut manager = hosting_manager();
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.handle_frame(
            random_peer(),
            Frame {
                to: random_peer().to_string(),
                body: FrameBody::Control {
                    payload: "x".to_string(),
                },
            },
            &tx,
        );
        assert!(rx.try_recv().is_err());
    }
}

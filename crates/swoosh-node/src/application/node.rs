//! The node: every discovery and transport component wired together.
//!
//! [`Node::start`] builds the whole runtime from an explicit [`NodeConfig`]
//! and an already opened [`LinkLayer`]:
//!
//! ```text
//!            ┌──────────── SharedPeerRegistry ────────────┐
//!            │                                            │
//!  capture thread (responder)                 DiscoveryListener task
//!            │                                            │
//!   Announcer task ── ARP probe ──► LAN ──► 16-byte names ┘
//!
//!   SessionManager accept loop   or   LegacyChannel receive loop
//! ```
//!
//! All sockets are bound before any thread or task starts, so a bind failure
//! leaves nothing running.  [`Node::shutdown`] clears the shared running flag
//! and waits for every component to stop.

use std::net::{IpAddr, SocketAddr};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use swoosh_core::{DiscoveryProbe, PeerRecord, SessionInfo, SharedPeerRegistry};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::infrastructure::capture::{
    datalink, CaptureError, FrameCapture, FrameSender, LocalInterface,
};
use crate::infrastructure::network::{
    announcer::Announcer,
    legacy::{LegacyChannel, LegacyChannelError, LegacyMessage},
    listener::DiscoveryListener,
    responder::{start_discovery_responder, ResponderConfig, ResponderEvent},
    session_manager::{HandshakeError, SessionConfig, SessionManager},
    transport::SecureSession,
    DiscoveryError,
};
use crate::infrastructure::storage::config::{ConfigError, NodeConfig, TransportMode};

/// Read timeout of the capture channel; bounds how long shutdown waits for
/// the capture thread.
const CAPTURE_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Accepted sessions buffered before the accept loop waits for a consumer.
const ACCEPT_QUEUE_LEN: usize = 16;

/// Error type for node startup and operator operations.
#[derive(Debug, Error)]
pub enum NodeError {
    /// No interface name was configured.
    #[error("no network interface configured (set [node] interface or pass --interface)")]
    NoInterface,
    /// The interface cannot be used for discovery.
    #[error("network environment unavailable: {0}")]
    Environment(#[from] CaptureError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error(transparent)]
    Session(#[from] HandshakeError),
    #[error(transparent)]
    Legacy(#[from] LegacyChannelError),
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    /// The operation belongs to the transport mode this node is not running.
    #[error("operation needs {required:?} mode but the node runs {actual:?} mode")]
    WrongMode {
        required: TransportMode,
        actual: TransportMode,
    },
}

impl NodeError {
    /// `true` when the host cannot support discovery at all.  Such errors
    /// are reported and the process carries on without networking.
    pub fn is_environment(&self) -> bool {
        matches!(self, Self::NoInterface | Self::Environment(_))
    }
}

/// The link-layer endpoints discovery runs on.
pub struct LinkLayer {
    pub interface: LocalInterface,
    pub sender: Arc<dyn FrameSender>,
    pub capture: Box<dyn FrameCapture>,
}

impl LinkLayer {
    /// Resolves `interface` and opens a raw Ethernet channel on it.
    ///
    /// # Errors
    ///
    /// Every error is an environment error (see [`NodeError::is_environment`]).
    pub fn open(interface: &str) -> Result<Self, NodeError> {
        if interface.is_empty() {
            return Err(NodeError::NoInterface);
        }
        let local = datalink::resolve_interface(interface)?;
        let (sender, capture) = datalink::open_channel(interface, CAPTURE_READ_TIMEOUT)?;
        info!(
            interface = %local.name,
            ip = %local.ipv4,
            "link layer open"
        );
        Ok(Self {
            interface: local,
            sender: Arc::new(sender),
            capture: Box::new(capture),
        })
    }
}

/// Streams the node hands to its operator.
pub struct NodeEvents {
    /// Probers the capture thread answered.
    pub responder: mpsc::Receiver<ResponderEvent>,
    pub inbound: InboundTraffic,
}

/// Inbound traffic for the configured transport mode.
pub enum InboundTraffic {
    /// Sessions peers opened to us.
    Sessions(mpsc::Receiver<SecureSession>),
    /// Decrypted datagrams on the legacy channel.
    Legacy(mpsc::Receiver<LegacyMessage>),
}

enum Transport {
    Sessions {
        manager: Arc<SessionManager>,
        listen_addr: SocketAddr,
    },
    Legacy(Arc<LegacyChannel>),
}

/// A running Swoosh node.
pub struct Node {
    config: NodeConfig,
    interface: LocalInterface,
    registry: SharedPeerRegistry,
    transport: Transport,
    discovery_addr: SocketAddr,
    running: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
    capture_thread: Option<std::thread::JoinHandle<()>>,
}

impl Node {
    /// Binds every socket and starts discovery plus the configured transport.
    ///
    /// # Errors
    ///
    /// [`NodeError::Config`] for an invalid configuration, or the bind/spawn
    /// error of whichever component failed first.
    pub async fn start(config: NodeConfig, link: LinkLayer) -> Result<(Self, NodeEvents), NodeError> {
        config.validate()?;

        let local_ip = link.interface.ipv4;
        let registry = SharedPeerRegistry::new();
        let running = Arc::new(AtomicBool::new(true));

        let listener = DiscoveryListener::bind(
            SocketAddr::from((local_ip, config.discovery.port)),
            registry.clone(),
        )
        .await?;
        let discovery_addr = listener.local_addr()?;

        let pending = match config.transport.mode {
            TransportMode::Session => {
                let manager = Arc::new(SessionManager::new(SessionConfig {
                    bind_address: config.session.bind_address,
                    port: config.session.port,
                    handshake_timeout: config.handshake_timeout(),
                    ..SessionConfig::default()
                }));
                let tcp = manager.bind().await?;
                let listen_addr = tcp.local_addr()?;
                PendingTransport::Sessions(manager, tcp, listen_addr)
            }
            TransportMode::Legacy => {
                let addr = SocketAddr::new(config.session.bind_address, config.transport.legacy_port);
                let (channel, rx) = LegacyChannel::bind(addr).await?;
                PendingTransport::Legacy(channel, rx)
            }
        };

        let (capture_thread, responder_events) = start_discovery_responder(
            link.capture,
            ResponderConfig {
                local_ip,
                sentinel: config.discovery.sentinel,
                local_name: config.node.name.clone(),
                discovery_port: config.discovery.port,
            },
            registry.clone(),
            Arc::clone(&running),
        )?;

        let mut tasks = vec![tokio::spawn(listener.run(Arc::clone(&running)))];
        let probe = DiscoveryProbe::new(link.interface.mac, local_ip, config.discovery.sentinel);
        let announcer = Announcer::new(link.sender, probe, config.announce_interval());
        tasks.push(tokio::spawn(announcer.run(Arc::clone(&running))));

        let (transport, inbound) = match pending {
            PendingTransport::Sessions(manager, tcp, listen_addr) => {
                let (tx, rx) = mpsc::channel(ACCEPT_QUEUE_LEN);
                tasks.push(tokio::spawn(
                    Arc::clone(&manager).serve(tcp, tx, Arc::clone(&running)),
                ));
                (
                    Transport::Sessions {
                        manager,
                        listen_addr,
                    },
                    InboundTraffic::Sessions(rx),
                )
            }
            PendingTransport::Legacy(channel, rx) => {
                tasks.push(tokio::spawn(Arc::clone(&channel).run(Arc::clone(&running))));
                (Transport::Legacy(channel), InboundTraffic::Legacy(rx))
            }
        };

        info!(
            name = %config.node.name,
            ip = %local_ip,
            mode = ?config.transport.mode,
            "node started"
        );

        let node = Self {
            config,
            interface: link.interface,
            registry,
            transport,
            discovery_addr,
            running,
            tasks,
            capture_thread: Some(capture_thread),
        };
        let events = NodeEvents {
            responder: responder_events,
            inbound,
        };
        Ok((node, events))
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn interface(&self) -> &LocalInterface {
        &self.interface
    }

    pub fn mode(&self) -> TransportMode {
        match self.transport {
            Transport::Sessions { .. } => TransportMode::Session,
            Transport::Legacy(_) => TransportMode::Legacy,
        }
    }

    /// Address the identity-response listener is bound to.
    pub fn discovery_addr(&self) -> SocketAddr {
        self.discovery_addr
    }

    /// Address the session listener is bound to, in session mode.
    pub fn session_addr(&self) -> Option<SocketAddr> {
        match &self.transport {
            Transport::Sessions { listen_addr, .. } => Some(*listen_addr),
            Transport::Legacy(_) => None,
        }
    }

    /// Address the legacy channel is bound to, in legacy mode.
    pub fn legacy_addr(&self) -> Option<SocketAddr> {
        match &self.transport {
            Transport::Legacy(channel) => channel.local_addr().ok(),
            Transport::Sessions { .. } => None,
        }
    }

    /// The shared registry, for components that need live access.
    pub fn registry(&self) -> SharedPeerRegistry {
        self.registry.clone()
    }

    /// Every discovered peer, sorted by address.
    pub fn peers(&self) -> Vec<PeerRecord> {
        self.registry.snapshot()
    }

    /// Opens an encrypted session to `peer` on the configured session port.
    pub async fn connect(&self, peer: IpAddr) -> Result<SecureSession, NodeError> {
        let manager = self.session_manager()?;
        Ok(manager.connect(peer).await?)
    }

    /// Opens an encrypted session to an explicit address.
    pub async fn connect_addr(&self, addr: SocketAddr) -> Result<SecureSession, NodeError> {
        let manager = self.session_manager()?;
        Ok(manager.connect_addr(addr).await?)
    }

    /// Key-free snapshots of every active session.  Empty in legacy mode.
    pub async fn sessions(&self) -> Vec<SessionInfo> {
        match &self.transport {
            Transport::Sessions { manager, .. } => manager.sessions().await,
            Transport::Legacy(_) => Vec::new(),
        }
    }

    /// Starts the legacy key exchange with `peer` on the configured legacy
    /// port.
    pub async fn legacy_connect(&self, peer: IpAddr) -> Result<SocketAddr, NodeError> {
        let addr = SocketAddr::new(peer, self.config.transport.legacy_port);
        self.legacy_connect_addr(addr).await?;
        Ok(addr)
    }

    /// Starts the legacy key exchange with an explicit address.
    pub async fn legacy_connect_addr(&self, addr: SocketAddr) -> Result<(), NodeError> {
        Ok(self.legacy_channel()?.connect(addr).await?)
    }

    /// Waits until the legacy exchange with `peer` completes.
    pub async fn legacy_wait_established(&self, peer: SocketAddr, timeout: Duration) -> Result<bool, NodeError> {
        Ok(self.legacy_channel()?.wait_established(peer, timeout).await)
    }

    /// Sends one datagram on the legacy channel.
    pub async fn legacy_send(&self, peer: SocketAddr, plaintext: &[u8]) -> Result<(), NodeError> {
        Ok(self.legacy_channel()?.send(peer, plaintext).await?)
    }

    /// Stops every component and waits for them to finish.
    ///
    /// Active sessions are not closed here; their handles close them when
    /// dropped.
    pub async fn shutdown(mut self) {
        self.running.store(false, Ordering::Relaxed);
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("node task ended abnormally: {e}");
            }
        }
        if let Some(thread) = self.capture_thread.take() {
            let joined = tokio::task::spawn_blocking(move || thread.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                warn!("capture thread ended abnormally");
            }
        }
        info!("node stopped");
    }

    fn session_manager(&self) -> Result<&Arc<SessionManager>, NodeError> {
        match &self.transport {
            Transport::Sessions { manager, .. } => Ok(manager),
            Transport::Legacy(_) => Err(NodeError::WrongMode {
                required: TransportMode::Session,
                actual: TransportMode::Legacy,
            }),
        }
    }

    fn legacy_channel(&self) -> Result<&Arc<LegacyChannel>, NodeError> {
        match &self.transport {
            Transport::Legacy(channel) => Ok(channel),
            Transport::Sessions { .. } => Err(NodeError::WrongMode {
                required: TransportMode::Legacy,
                actual: TransportMode::Session,
            }),
        }
    }
}

/// A bound transport socket whose loop has not been spawned yet.
enum PendingTransport {
    Sessions(Arc<SessionManager>, tokio::net::TcpListener, SocketAddr),
    Legacy(Arc<LegacyChannel>, mpsc::Receiver<LegacyMessage>),
}

// ── Tests ─────────────────────────────────────────────────────────────────────

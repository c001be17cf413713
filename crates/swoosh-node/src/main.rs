//! Swoosh node entry point.
//!
//! Loads the configuration, applies CLI overrides, opens the link layer on
//! the chosen interface and runs a [`Node`] until Ctrl-C.
//!
//! # Usage
//!
//! ```text
//! swoosh-node [OPTIONS]
//!
//! Options:
//!   --name <NAME>              Display name announced to peers
//!   --interface <IFACE>        Interface to discover on (e.g. eth0)
//!   --config <PATH>            Config file [default: platform config dir]
//!   --discovery-port <PORT>    UDP port for identity responses [default: 9999]
//!   --session-port <PORT>      TCP port for sessions [default: 9998]
//!   --mode <session|legacy>    Encrypted transport [default: session]
//!   --connect <IP>             Open a channel to IP and send --message
//!   --message <TEXT>           Message sent with --connect [default: hello]
//!   --write-config             Save the effective config and exit
//! ```
//!
//! Raw capture needs elevated privileges.  Without them the node logs the
//! error and idles until Ctrl-C instead of exiting.

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use swoosh_node::application::node::{InboundTraffic, LinkLayer, Node, NodeEvents};
use swoosh_node::infrastructure::network::transport::SecureSession;
use swoosh_node::infrastructure::storage::config::{load_config, save_config, NodeConfig, TransportMode};

/// How long `--connect` waits for the legacy key exchange.
const LEGACY_EXCHANGE_TIMEOUT: Duration = Duration::from_secs(5);

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Swoosh LAN peer.
///
/// Announces itself on the local link, lists the peers that answer, and
/// exchanges encrypted messages with them.
#[derive(Debug, Parser)]
#[command(name = "swoosh-node", about = "LAN peer discovery and encrypted messaging", version)]
struct Cli {
    /// Display name announced to peers (16 ASCII bytes on the wire).
    #[arg(long, env = "SWOOSH_NAME")]
    name: Option<String>,

    /// Network interface to announce and capture on.
    #[arg(long, short = 'i', env = "SWOOSH_INTERFACE")]
    interface: Option<String>,

    /// Path to the TOML config file.
    #[arg(long, env = "SWOOSH_CONFIG")]
    config: Option<PathBuf>,

    /// UDP port identity responses are sent to.
    #[arg(long)]
    discovery_port: Option<u16>,

    /// TCP port for encrypted sessions.
    #[arg(long)]
    session_port: Option<u16>,

    /// Encrypted transport to run.
    #[arg(long, value_enum)]
    mode: Option<TransportMode>,

    /// Open a channel to this peer and send `--message`.
    #[arg(long)]
    connect: Option<IpAddr>,

    /// Message sent with `--connect`.
    #[arg(long, default_value = "hello")]
    message: String,

    /// Write the effective configuration to the config file and exit.
    #[arg(long)]
    write_config: bool,
}

impl Cli {
    /// CLI values win over the config file.
    fn apply_overrides(&self, config: &mut NodeConfig) {
        if let Some(name) = &self.name {
            config.node.name = name.clone();
        }
        if let Some(interface) = &self.interface {
            config.node.interface = interface.clone();
        }
        if let Some(port) = self.discovery_port {
            config.discovery.port = port;
        }
        if let Some(port) = self.session_port {
            config.session.port = port;
        }
        if let Some(mode) = self.mode {
            config.transport.mode = mode;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_deref()).context("failed to load configuration")?;
    cli.apply_overrides(&mut config);

    // Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.node.log_level)),
        )
        .init();

    config.validate().context("invalid configuration")?;

    if cli.write_config {
        let path = save_config(&config, cli.config.as_deref()).context("failed to write configuration")?;
        info!("configuration written to {}", path.display());
        return Ok(());
    }

    info!("Swoosh node starting");

    // Shutdown flag for the Ctrl-C handler.
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            running_clone.store(false, Ordering::Relaxed);
        }
    });

    let started = match LinkLayer::open(&config.node.interface) {
        Ok(link) => Node::start(config, link).await,
        Err(e) => Err(e),
    };
    let (node, events) = match started {
        Ok(pair) => pair,
        Err(e) if e.is_environment() => {
            error!("networking disabled: {e}");
            wait_for_shutdown(&running).await;
            info!("Swoosh node stopped");
            return Ok(());
        }
        Err(e) => return Err(e).context("failed to start node"),
    };

    spawn_event_pumps(events);

    if let Some(peer) = cli.connect {
        if let Err(e) = send_once(&node, peer, &cli.message).await {
            warn!("could not deliver message to {peer}: {e:#}");
        }
    }

    info!("Swoosh node ready.  Press Ctrl-C to exit.");
    wait_for_shutdown(&running).await;

    for peer in node.peers() {
        info!(
            peer = %peer.address,
            name = peer.name.as_deref().unwrap_or("?"),
            state = ?peer.state,
            "known peer"
        );
    }
    node.shutdown().await;
    info!("Swoosh node stopped");
    Ok(())
}

async fn wait_for_shutdown(running: &AtomicBool) {
    while running.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Logs discovery events and prints every inbound message to stdout.
fn spawn_event_pumps(events: NodeEvents) {
    let NodeEvents {
        mut responder,
        inbound,
    } = events;

    tokio::spawn(async move {
        while let Some(event) = responder.recv().await {
            info!("{event:?}");
        }
    });

    match inbound {
        InboundTraffic::Sessions(mut accepted) => {
            tokio::spawn(async move {
                while let Some(session) = accepted.recv().await {
                    tokio::spawn(print_session(session));
                }
            });
        }
        InboundTraffic::Legacy(mut messages) => {
            tokio::spawn(async move {
                while let Some(msg) = messages.recv().await {
                    println!("[{}] {}", msg.from, String::from_utf8_lossy(&msg.payload));
                }
            });
        }
    }
}

async fn print_session(mut session: SecureSession) {
    let peer = session.peer();
    while let Some(item) = session.recv().await {
        match item {
            Ok(message) => println!("[{peer}] {}", String::from_utf8_lossy(&message)),
            Err(e) => warn!(%peer, "session ended: {e}"),
        }
    }
}

/// Opens a channel to `peer` in the node's mode and sends one message.
async fn send_once(node: &Node, peer: IpAddr, message: &str) -> anyhow::Result<()> {
    match node.mode() {
        TransportMode::Session => {
            let session = node.connect(peer).await.context("handshake failed")?;
            session.send(message.as_bytes()).await.context("send failed")?;
            info!(session = %session.id(), %peer, "message sent");
            session.close().await;
        }
        TransportMode::Legacy => {
            let addr = node.legacy_connect(peer).await.context("key exchange failed")?;
            if !node.legacy_wait_established(addr, LEGACY_EXCHANGE_TIMEOUT).await? {
                anyhow::bail!("no key from {addr} within {LEGACY_EXCHANGE_TIMEOUT:?}");
            }
            node.legacy_send(addr, message.as_bytes()).await.context("send failed")?;
            info!(%addr, "message sent");
        }
    }
    Ok(())
}

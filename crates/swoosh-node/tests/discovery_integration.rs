//! Integration tests for link-layer discovery.
//!
//! # Purpose
//!
//! These tests run a full [`Node`] on loopback with an in-memory link layer
//! and a second, standalone responder playing a remote peer.  They verify:
//!
//! - The happy path: the probe Alice announces reaches Bob's capture thread,
//!   Bob answers with his name, and Alice's registry learns it.
//! - A repeated probe from the same address is answered once.
//! - Frames that are not discovery probes never produce a reply.
//!
//! # Topology
//!
//! ```text
//! Alice (Node, 127.0.0.1)                     Bob (responder, "10.0.0.9")
//! ───────────────────────                     ──────────────────────────
//! Announcer ── probe ──► RecordingSender ──► FrameInjector ──► capture thread
//! DiscoveryListener ◄──────── 16-byte "Bob" over UDP ─────────────┘
//! ```
//!
//! Bob's reply socket sends from loopback, so Alice records Bob under
//! `127.0.0.1`.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use swoosh_core::{DiscoveryProbe, DiscoveryState, SharedPeerRegistry};
use swoosh_node::application::node::{LinkLayer, Node};
use swoosh_node::infrastructure::capture::mock::{injected_capture, FrameInjector, RecordingSender};
use swoosh_node::infrastructure::capture::LocalInterface;
use swoosh_node::infrastructure::network::responder::{
    start_discovery_responder, ResponderConfig, ResponderEvent,
};
use swoosh_node::infrastructure::storage::config::{NodeConfig, TransportMode};
use tokio::sync::mpsc;

const ALICE_MAC: [u8; 6] = [0x02, 0, 0, 0, 0, 0x0A];
const BOB_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 9);

// ── Helpers ───────────────────────────────────────────────────────────────────

async fn start_alice() -> (Node, Arc<RecordingSender>, FrameInjector) {
    let sender = Arc::new(RecordingSender::new());
    let (injector, capture) = injected_capture(Duration::from_millis(20));
    let link = LinkLayer {
        interface: LocalInterface {
            name: "lo-test".to_string(),
            ipv4: Ipv4Addr::LOCALHOST,
            mac: ALICE_MAC,
        },
        sender: sender.clone(),
        capture: Box::new(capture),
    };

    let mut cfg = NodeConfig::default();
    cfg.node.name = "Alice".to_string();
    cfg.discovery.port = 0;
    cfg.session.bind_address = IpAddr::V4(Ipv4Addr::LOCALHOST);
    cfg.session.port = 0;
    cfg.transport.mode = TransportMode::Session;

    let (node, _events) = Node::start(cfg, link).await.expect("alice must start");
    (node, sender, injector)
}

struct Bob {
    injector: FrameInjector,
    registry: SharedPeerRegistry,
    events: mpsc::Receiver<ResponderEvent>,
    running: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Drop for Bob {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Starts Bob's responder, replying to Alice's discovery port.
fn start_bob(alice_discovery_port: u16) -> Bob {
    let (injector, capture) = injected_capture(Duration::from_millis(20));
    let registry = SharedPeerRegistry::new();
    let running = Arc::new(AtomicBool::new(true));
    let (thread, events) = start_discovery_responder(
        Box::new(capture),
        ResponderConfig {
            local_ip: BOB_IP,
            sentinel: swoosh_core::protocol::discovery::DEFAULT_SENTINEL,
            local_name: "Bob".to_string(),
            discovery_port: alice_discovery_port,
        },
        registry.clone(),
        Arc::clone(&running),
    )
    .expect("bob must start");
    Bob {
        injector,
        registry,
        events,
        running,
        thread: Some(thread),
    }
}

async fn wait_for_peer(node: &Node, addr: IpAddr) -> bool {
    for _ in 0..100 {
        if node.registry().get(&addr).is_some_and(|p| p.name.is_some()) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

// ── Discovery scenarios ───────────────────────────────────────────────────────

/// Alice's first announcement is delivered to Bob, Bob answers, and Alice
/// ends up with exactly one peer named "Bob".
#[tokio::test]
async fn test_announced_probe_is_answered_with_name() {
    // Arrange
    let (alice, sender, _alice_injector) = start_alice().await;
    let mut bob = start_bob(alice.discovery_addr().port());
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Act: forward what Alice put on the wire to Bob's capture.
    let probe = sender.frames().into_iter().next().expect("announcer sends at startup");
    assert!(bob.injector.inject_frame(probe));

    // Assert
    let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
    assert!(wait_for_peer(&alice, localhost).await, "alice must learn bob's name");
    let peers = alice.peers();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].name.as_deref(), Some("Bob"));
    assert_eq!(peers[0].state, DiscoveryState::Responded);

    let event = tokio::time::timeout(Duration::from_secs(1), bob.events.recv())
        .await
        .expect("event within a second")
        .expect("channel open");
    assert_eq!(event, ResponderEvent::ProbeAnswered { peer: Ipv4Addr::LOCALHOST });
    assert_eq!(bob.registry.len(), 1);

    alice.shutdown().await;
}

/// A second probe from an address Bob already answered gets no reply.
#[tokio::test]
async fn test_repeated_probe_is_answered_once() {
    // Arrange
    let (alice, sender, _alice_injector) = start_alice().await;
    let mut bob = start_bob(alice.discovery_addr().port());
    tokio::time::sleep(Duration::from_millis(50)).await;
    let probe = sender.frames().into_iter().next().expect("announcer sends at startup");

    // Act
    assert!(bob.injector.inject_frame(probe.clone()));
    assert!(bob.injector.inject_frame(probe));
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Assert
    assert!(bob.events.try_recv().is_ok(), "first probe is answered");
    assert!(bob.events.try_recv().is_err(), "second probe is not");
    assert_eq!(bob.registry.len(), 1);

    alice.shutdown().await;
}

/// An ARP request for a real address is ordinary traffic, not a probe.
#[tokio::test]
async fn test_non_sentinel_arp_is_ignored() {
    // Arrange
    let (alice, _sender, _alice_injector) = start_alice().await;
    let mut bob = start_bob(alice.discovery_addr().port());
    let ordinary = DiscoveryProbe::new(ALICE_MAC, Ipv4Addr::LOCALHOST, Ipv4Addr::new(10, 0, 0, 1));

    // Act
    assert!(bob.injector.inject_frame(ordinary.encode().to_vec()));
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Assert
    assert!(bob.events.try_recv().is_err());
    assert!(bob.registry.is_empty());
    assert!(alice.peers().is_empty());

    alice.shutdown().await;
}

/// Garbage on the wire neither crashes the capture thread nor blocks later
/// probes.
#[tokio::test]
async fn test_garbage_frame_does_not_stop_responder() {
    // Arrange
    let (alice, sender, _alice_injector) = start_alice().await;
    let bob = start_bob(alice.discovery_addr().port());
    tokio::time::sleep(Duration::from_millis(50)).await;
    let probe = sender.frames().into_iter().next().expect("announcer sends at startup");

    // Act
    assert!(bob.injector.inject_frame(vec![0xFFu8; 7]));
    assert!(bob.injector.inject_frame(probe));

    // Assert
    assert!(wait_for_peer(&alice, IpAddr::V4(Ipv4Addr::LOCALHOST)).await);

    alice.shutdown().await;
}

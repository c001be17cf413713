//! Discovery responder running on a dedicated capture thread.
//!
//! The worker reads link-layer frames from a [`FrameCapture`].  For every
//! discovery probe (an ARP request for the sentinel address) from an address
//! that is not yet in the [`SharedPeerRegistry`], it:
//!
//! 1. Records the address as `Announced`.
//! 2. Sends our 16-byte name to `prober:discovery_port` over UDP.
//! 3. Emits a [`ResponderEvent`] so the async side can log or react.
//!
//! Steps 1 and the "is it new?" check happen under one registry lock, so two
//! probes from the same address never produce two replies.  The UDP send runs
//! after the lock is released.
//!
//! "Already in the registry" includes peers the listener recorded from their
//! own identity response.  When two nodes both announce and A hears B's reply
//! first, A never answers B, so B keeps A as `Announced` without a name.
//!
//! Capture blocks, so this loop must not share a thread with the Tokio
//! runtime.  Each `next_frame` call returns within the capture read timeout,
//! at which point the `running` flag is checked.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use swoosh_core::protocol::discovery::{encode_name, parse_probe, DiscoveryProbe, NAME_LEN};
use swoosh_core::SharedPeerRegistry;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::DiscoveryError;
use crate::infrastructure::capture::{CaptureError, FrameCapture};

/// Pause after a hard capture error so a broken interface does not spin.
const CAPTURE_ERROR_PAUSE: Duration = Duration::from_millis(200);

/// Capacity of the event channel handed back to the caller.
const EVENT_QUEUE_LEN: usize = 64;

/// Static inputs of the responder.
#[derive(Debug, Clone)]
pub struct ResponderConfig {
    /// Our own IPv4 address; probes from it are ignored.
    pub local_ip: Ipv4Addr,
    /// The unassigned address probes target.
    pub sentinel: Ipv4Addr,
    /// Display name sent back to probers.
    pub local_name: String,
    /// UDP port probers listen on for identity responses.
    pub discovery_port: u16,
}

/// Something the responder did, for the async side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponderEvent {
    /// We answered the first probe seen from `peer`.
    ProbeAnswered { peer: Ipv4Addr },
}

/// Spawns the capture worker and returns its event receiver.
///
/// Events are delivered best-effort: if the receiver falls behind by more
/// than the queue capacity, events are dropped rather than stalling capture.
///
/// # Errors
///
/// [`DiscoveryError::BindFailed`] if the reply socket cannot be bound and
/// [`DiscoveryError::Spawn`] if the thread cannot be started.
pub fn start_discovery_responder(
    capture: Box<dyn FrameCapture>,
    config: ResponderConfig,
    registry: SharedPeerRegistry,
    running: Arc<AtomicBool>,
) -> Result<(std::thread::JoinHandle<()>, mpsc::Receiver<ResponderEvent>), DiscoveryError> {
    let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
    let socket = UdpSocket::bind(bind_addr).map_err(|source| DiscoveryError::BindFailed {
        addr: bind_addr,
        source,
    })?;

    let (tx, rx) = mpsc::channel(EVENT_QUEUE_LEN);
    let responder = Responder {
        reply: encode_name(&config.local_name),
        config,
        registry,
        socket,
        events: tx,
    };

    let handle = std::thread::Builder::new()
        .name("swoosh-capture".to_string())
        .spawn(move || responder.run(capture, running))
        .map_err(DiscoveryError::Spawn)?;

    info!("discovery responder started");
    Ok((handle, rx))
}

struct Responder {
    config: ResponderConfig,
    reply: [u8; NAME_LEN],
    registry: SharedPeerRegistry,
    socket: UdpSocket,
    events: mpsc::Sender<ResponderEvent>,
}

impl Responder {
    fn run(self, mut capture: Box<dyn FrameCapture>, running: Arc<AtomicBool>) {
        while running.load(Ordering::Relaxed) {
            let frame = match capture.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(CaptureError::Closed) => {
                    warn!("capture source closed");
                    break;
                }
                Err(e) => {
                    warn!("capture error: {e}");
                    std::thread::sleep(CAPTURE_ERROR_PAUSE);
                    continue;
                }
            };
            self.handle_frame(&frame);
        }

        info!("discovery responder stopped");
    }

    /// Processes one captured frame.  Returns the prober answered, if any.
    fn handle_frame(&self, frame: &[u8]) -> Option<Ipv4Addr> {
        let probe = match parse_probe(frame) {
            Ok(Some(probe)) => probe,
            Ok(None) => return None,
            Err(e) => {
                debug!("ignoring malformed ARP frame: {e}");
                return None;
            }
        };
        if !probe.is_announcement(self.config.sentinel, self.config.local_ip) {
            return None;
        }
        self.answer(&probe)
    }

    fn answer(&self, probe: &DiscoveryProbe) -> Option<Ipv4Addr> {
        let peer = probe.sender_ip;
        if !self.registry.claim_probe(IpAddr::V4(peer)) {
            return None;
        }

        let dest = SocketAddr::from((peer, self.config.discovery_port));
        match self.socket.send_to(&self.reply, dest) {
            Ok(_) => debug!("sent identity response to {dest}"),
            Err(e) => warn!("failed to send identity response to {dest}: {e}"),
        }

        match self.events.try_send(ResponderEvent::ProbeAnswered { peer }) {
            Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("responder event queue full, dropping event for {peer}");
            }
        }
        Some(peer)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::capture::mock::injected_capture;
    use swoosh_core::protocol::discovery::DEFAULT_SENTINEL;
    use swoosh_core::DiscoveryState;

    const LOCAL: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);

    /// A UDP socket standing in for the prober's discovery listener.
    fn prober_socket() -> (UdpSocket, u16) {
        let sock = UdpSocket::bind("127.0.0.1:0").expect("bind prober socket");
        sock.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let port = sock.local_addr().unwrap().port();
        (sock, port)
    }

    fn responder(port: u16, registry: SharedPeerRegistry) -> (Responder, mpsc::Receiver<ResponderEvent>) {
        let (tx, rx) = mpsc::channel(8);
        let config = ResponderConfig {
            local_ip: LOCAL,
            sentinel: DEFAULT_SENTINEL,
            local_name: "Alice".to_string(),
            discovery_port: port,
        };
        let r = Responder {
            reply: encode_name(&config.local_name),
            config,
            registry,
            socket: UdpSocket::bind("127.0.0.1:0").unwrap(),
            events: tx,
        };
        (r, rx)
    }

    fn probe_from(ip: Ipv4Addr) -> Vec<u8> {
        DiscoveryProbe::new([2, 0, 0, 0, 0, 9], ip, DEFAULT_SENTINEL)
            .encode()
            .to_vec()
    }

    #[test]
    fn test_new_prober_gets_name_and_is_registered() {
        // Arrange
        let (listener, port) = prober_socket();
        let registry = SharedPeerRegistry::new();
        let (r, mut events) = responder(port, registry.clone());

        // Act
        let answered = r.handle_frame(&probe_from(Ipv4Addr::LOCALHOST));

        // Assert
        assert_eq!(answered, Some(Ipv4Addr::LOCALHOST));
        let mut buf = [0u8; 64];
        let (len, _) = listener.recv_from(&mut buf).expect("identity response");
        assert_eq!(&buf[..len], &encode_name("Alice"));
        let rec = registry.get(&IpAddr::V4(Ipv4Addr::LOCALHOST)).unwrap();
        assert_eq!(rec.state, DiscoveryState::Announced);
        assert_eq!(
            events.try_recv().unwrap(),
            ResponderEvent::ProbeAnswered { peer: Ipv4Addr::LOCALHOST }
        );
    }

    #[test]
    fn test_known_prober_is_not_answered_again() {
        let (listener, port) = prober_socket();
        listener.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        let registry = SharedPeerRegistry::new();
        let (r, _events) = responder(port, registry.clone());

        assert!(r.handle_frame(&probe_from(Ipv4Addr::LOCALHOST)).is_some());
        assert!(r.handle_frame(&probe_from(Ipv4Addr::LOCALHOST)).is_none());

        let mut buf = [0u8; 64];
        assert!(listener.recv_from(&mut buf).is_ok());
        assert!(listener.recv_from(&mut buf).is_err(), "exactly one reply expected");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_prober_that_already_responded_is_not_answered() {
        let (listener, port) = prober_socket();
        listener.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
        let registry = SharedPeerRegistry::new();
        registry.record_response(IpAddr::V4(Ipv4Addr::LOCALHOST), "Bob".to_string());
        let (r, mut events) = responder(port, registry.clone());

        assert!(r.handle_frame(&probe_from(Ipv4Addr::LOCALHOST)).is_none());

        let mut buf = [0u8; 64];
        assert!(listener.recv_from(&mut buf).is_err(), "no reply expected");
        assert!(events.try_recv().is_err());
        let rec = registry.get(&IpAddr::V4(Ipv4Addr::LOCALHOST)).unwrap();
        assert_eq!(rec.state, DiscoveryState::Responded);
        assert_eq!(rec.name.as_deref(), Some("Bob"));
    }

    #[test]
    fn test_own_probe_is_ignored() {
        let (_listener, port) = prober_socket();
        let registry = SharedPeerRegistry::new();
        let (r, _events) = responder(port, registry.clone());

        assert!(r.handle_frame(&probe_from(LOCAL)).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_arp_for_other_target_is_ignored() {
        let (_listener, port) = prober_socket();
        let registry = SharedPeerRegistry::new();
        let (r, _events) = responder(port, registry.clone());
        let frame = DiscoveryProbe::new([2, 0, 0, 0, 0, 9], Ipv4Addr::LOCALHOST, Ipv4Addr::new(10, 0, 0, 1))
            .encode();

        assert!(r.handle_frame(&frame).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_garbage_frames_are_skipped() {
        let (_listener, port) = prober_socket();
        let registry = SharedPeerRegistry::new();
        let (r, _events) = responder(port, registry.clone());

        assert!(r.handle_frame(&[]).is_none());
        let mut truncated = probe_from(Ipv4Addr::LOCALHOST);
        truncated.truncate(20);
        assert!(r.handle_frame(&truncated).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_worker_thread_answers_injected_probe_and_stops() {
        // Arrange
        let (listener, port) = prober_socket();
        let registry = SharedPeerRegistry::new();
        let running = Arc::new(AtomicBool::new(true));
        let (injector, capture) = injected_capture(Duration::from_millis(20));
        let config = ResponderConfig {
            local_ip: LOCAL,
            sentinel: DEFAULT_SENTINEL,
            local_name: "Alice".to_string(),
            discovery_port: port,
        };

        // Act
        let (handle, mut events) =
            start_discovery_responder(Box::new(capture), config, registry.clone(), running.clone())
                .expect("responder must start");
        injector.inject_frame(vec![0u8; 3]);
        injector.inject_error(std::io::ErrorKind::Other);
        injector.inject_frame(probe_from(Ipv4Addr::LOCALHOST));

        // Assert
        let mut buf = [0u8; 64];
        let (len, _) = listener.recv_from(&mut buf).expect("identity response");
        assert_eq!(&buf[..len], &encode_name("Alice"));
        let event = events.blocking_recv().expect("event");
        assert_eq!(event, ResponderEvent::ProbeAnswered { peer: Ipv4Addr::LOCALHOST });

        running.store(false, Ordering::Relaxed);
        handle.join().expect("worker must exit cleanly");
    }

    #[test]
    fn test_worker_exits_when_capture_closes() {
        let running = Arc::new(AtomicBool::new(true));
        let (injector, capture) = injected_capture(Duration::from_millis(20));
        let config = ResponderConfig {
            local_ip: LOCAL,
            sentinel: DEFAULT_SENTINEL,
            local_name: "Alice".to_string(),
            discovery_port: 9,
        };
        let (handle, _events) =
            start_discovery_responder(Box::new(capture), config, SharedPeerRegistry::new(), running)
                .unwrap();

        drop(injector);

        handle.join().expect("worker must exit after capture closes");
    }
}

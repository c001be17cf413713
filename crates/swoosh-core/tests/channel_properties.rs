//! Integration tests for the swoosh-core public API.
//!
//! These exercise the pieces together the way a node uses them: two
//! ephemeral keypairs agree on a key, each side binds a cipher to it, and
//! frames pass through the wire encoding in between.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::thread;

use swoosh_core::protocol::discovery::{NAME_LEN, PROBE_FRAME_LEN};
use swoosh_core::protocol::frame::MAX_PLAINTEXT_LEN;
use swoosh_core::{
    decode_name, encode_name, parse_probe, CryptoError, DiscoveryProbe, EncryptedFrame,
    EphemeralKeypair, SessionCipher, SharedPeerRegistry,
};

fn handshake() -> (SessionCipher, SessionCipher) {
    let a = EphemeralKeypair::generate();
    let b = EphemeralKeypair::generate();
    let a_pub = a.public_bytes();
    let b_pub = b.public_bytes();
    let key_a = a.agree(&b_pub).expect("A agrees");
    let key_b = b.agree(&a_pub).expect("B agrees");
    assert_eq!(key_a.as_bytes(), key_b.as_bytes(), "both ends must hold the same key");
    (SessionCipher::new(key_a), SessionCipher::new(key_b))
}

#[test]
fn test_hello_survives_encrypt_wire_decrypt() {
    // Arrange
    let (alice, bob) = handshake();

    // Act: seal on A, ship the bytes, parse and open on B
    let wire = alice.seal(b"hello").unwrap().to_bytes();
    let received = EncryptedFrame::parse(&wire).unwrap();
    let plaintext = bob.open(&received).unwrap();

    // Assert
    assert_eq!(plaintext, b"hello");
}

#[test]
fn test_traffic_flows_both_directions() {
    let (alice, bob) = handshake();
    let to_bob = alice.seal(b"ping").unwrap();
    let to_alice = bob.seal(b"pong").unwrap();
    assert_eq!(bob.open(&to_bob).unwrap(), b"ping");
    assert_eq!(alice.open(&to_alice).unwrap(), b"pong");
}

#[test]
fn test_truncated_frame_never_yields_plaintext() {
    let (alice, bob) = handshake();
    let wire = alice.seal(&[0x5A; 64]).unwrap().to_bytes();

    for cut in 1..wire.len() {
        let outcome = EncryptedFrame::parse(&wire[..wire.len() - cut]).map(|f| bob.open(&f));
        match outcome {
            Err(_) => {} // too short to be a frame
            Ok(Err(CryptoError::Authentication)) => {}
            Ok(other) => panic!("truncation by {cut} bytes produced {other:?}"),
        }
    }
}

#[test]
fn test_largest_plaintext_round_trips() {
    let (alice, bob) = handshake();
    let payload = vec![0xEE; MAX_PLAINTEXT_LEN];
    let frame = EncryptedFrame::parse(&alice.seal(&payload).unwrap().to_bytes()).unwrap();
    assert_eq!(bob.open(&frame).unwrap(), payload);
}

#[test]
fn test_probe_and_identity_payload_formats_match_wire_sizes() {
    let probe = DiscoveryProbe::new(
        [0x02, 0, 0, 0, 0, 1],
        Ipv4Addr::new(10, 0, 0, 5),
        Ipv4Addr::new(0, 1, 1, 1),
    );
    let frame = probe.encode();
    assert_eq!(frame.len(), PROBE_FRAME_LEN);
    assert_eq!(parse_probe(&frame).unwrap(), Some(probe));

    let name = encode_name("Bob");
    assert_eq!(name.len(), NAME_LEN);
    assert_eq!(decode_name(&name).unwrap(), "Bob");
}

#[test]
fn test_same_identity_datagram_twice_leaves_single_entry() {
    let registry = SharedPeerRegistry::new();
    let bob = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9));
    let payload = encode_name("Bob");

    for _ in 0..2 {
        registry.record_response(bob, decode_name(&payload).unwrap());
    }

    assert_eq!(registry.len(), 1);
    assert_eq!(registry.get(&bob).unwrap().name.as_deref(), Some("Bob"));
}

#[test]
fn test_concurrent_registry_writers_never_expose_torn_records() {
    // Arrange: writers alternate between two consistent (name, padding)
    // shapes; readers check that every observed name is one of them.
    let registry = SharedPeerRegistry::new();
    let addr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 42));
    let names = Arc::new(["short".to_string(), "a-much-longer-name".to_string()]);

    // Act
    let mut handles = Vec::new();
    for w in 0..4 {
        let registry = registry.clone();
        let names = Arc::clone(&names);
        handles.push(thread::spawn(move || {
            for i in 0..2_000 {
                if (i + w) % 3 == 0 {
                    registry.claim_probe(addr);
                } else {
                    registry.record_response(addr, names[(i + w) % 2].clone());
                }
            }
        }));
    }
    for _ in 0..2 {
        let registry = registry.clone();
        let names = Arc::clone(&names);
        handles.push(thread::spawn(move || {
            for _ in 0..2_000 {
                if let Some(record) = registry.get(&addr) {
                    assert_eq!(record.address, addr);
                    if let Some(name) = record.name {
                        assert!(names.contains(&name), "torn name observed: {name:?}");
                    }
                }
            }
        }));
    }

    // Assert
    for handle in handles {
        handle.join().expect("no thread may panic");
    }
    assert_eq!(registry.len(), 1);
}

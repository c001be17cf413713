//! Discovery wire formats.
//!
//! Two things travel during discovery:
//!
//! 1. **The probe** – a broadcast Ethernet II frame carrying an ARP
//!    "who-has" request.  The requested address is a reserved sentinel
//!    (default `0.1.1.1`) that no host owns; it only marks the frame as a
//!    Swoosh presence announcement.  The ARP sender fields carry the
//!    announcer's real MAC and IPv4 address.
//!
//! 2. **The identity response** – a UDP datagram sent back to the announcer
//!    on the discovery port.  The payload is the responder's display name as
//!    exactly [`NAME_LEN`] ASCII bytes, left-justified and space padded.
//!
//! Probe layout (42 bytes, all multi-byte integers big-endian):
//!
//! ```text
//! Ethernet: [dst:6 = ff..ff][src:6][ethertype:2 = 0x0806]
//! ARP:      [htype:2 = 1][ptype:2 = 0x0800][hlen:1 = 6][plen:1 = 4][oper:2 = 1]
//!           [sha:6][spa:4][tha:6 = 00..00][tpa:4 = sentinel]
//! ```

use std::net::Ipv4Addr;

use super::ProtocolError;

/// Fixed width of the identity payload.
pub const NAME_LEN: usize = 16;

/// Default UDP port for identity responses.
pub const DEFAULT_DISCOVERY_PORT: u16 = 9999;

/// Default rendezvous marker requested by every probe.
pub const DEFAULT_SENTINEL: Ipv4Addr = Ipv4Addr::new(0, 1, 1, 1);

/// Length of an encoded probe frame.
pub const PROBE_FRAME_LEN: usize = ETH_HEADER_LEN + ARP_LEN;

/// A 48-bit hardware address.
pub type MacAddr = [u8; 6];

const ETH_HEADER_LEN: usize = 14;
const ARP_LEN: usize = 28;
const ETHERTYPE_ARP: u16 = 0x0806;
const HTYPE_ETHERNET: u16 = 1;
const PTYPE_IPV4: u16 = 0x0800;
const OPER_REQUEST: u16 = 1;
const BROADCAST_MAC: MacAddr = [0xFF; 6];

/// Encodes a display name into the fixed-width identity payload.
///
/// The name is left-justified, padded with spaces, and truncated to exactly
/// [`NAME_LEN`] bytes.  Characters outside ASCII are replaced by `?` so that
/// every character occupies one byte.
pub fn encode_name(name: &str) -> [u8; NAME_LEN] {
    let mut out = [b' '; NAME_LEN];
    for (slot, ch) in out.iter_mut().zip(name.chars()) {
        *slot = if ch.is_ascii() { ch as u8 } else { b'?' };
    }
    out
}

/// Decodes an identity payload back into a display name.
///
/// Trailing spaces and NUL bytes are trimmed.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidLength`] when `payload` is not exactly
/// [`NAME_LEN`] bytes, and [`ProtocolError::MalformedPayload`] when it
/// contains non-ASCII bytes.
pub fn decode_name(payload: &[u8]) -> Result<String, ProtocolError> {
    if payload.len() != NAME_LEN {
        return Err(ProtocolError::InvalidLength {
            expected: NAME_LEN,
            actual: payload.len(),
        });
    }
    if !payload.is_ascii() {
        return Err(ProtocolError::MalformedPayload(
            "identity name is not ASCII".to_string(),
        ));
    }
    let name: String = payload.iter().map(|&b| b as char).collect();
    Ok(name.trim_end_matches([' ', '\0']).to_string())
}

/// A link-layer discovery probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryProbe {
    /// Hardware address of the announcer.
    pub sender_mac: MacAddr,
    /// IPv4 address the announcer is reachable on.
    pub sender_ip: Ipv4Addr,
    /// The requested address; a Swoosh probe always asks for the sentinel.
    pub target_ip: Ipv4Addr,
}

impl DiscoveryProbe {
    /// Creates the probe an announcer broadcasts for itself.
    pub fn new(sender_mac: MacAddr, sender_ip: Ipv4Addr, sentinel: Ipv4Addr) -> Self {
        Self {
            sender_mac,
            sender_ip,
            target_ip: sentinel,
        }
    }

    /// Returns `true` when this probe is a presence announcement from
    /// another instance: it targets `sentinel` and did not come from `local_ip`.
    pub fn is_announcement(&self, sentinel: Ipv4Addr, local_ip: Ipv4Addr) -> bool {
        self.target_ip == sentinel && self.sender_ip != local_ip
    }

    /// Encodes the probe as a broadcast Ethernet II + ARP request frame.
    pub fn encode(&self) -> [u8; PROBE_FRAME_LEN] {
        let mut buf = [0u8; PROBE_FRAME_LEN];

        // Ethernet header
        buf[0..6].copy_from_slice(&BROADCAST_MAC);
        buf[6..12].copy_from_slice(&self.sender_mac);
        buf[12..14].copy_from_slice(&ETHERTYPE_ARP.to_be_bytes());

        // ARP body
        let arp = &mut buf[ETH_HEADER_LEN..];
        arp[0..2].copy_from_slice(&HTYPE_ETHERNET.to_be_bytes());
        arp[2..4].copy_from_slice(&PTYPE_IPV4.to_be_bytes());
        arp[4] = 6;
        arp[5] = 4;
        arp[6..8].copy_from_slice(&OPER_REQUEST.to_be_bytes());
        arp[8..14].copy_from_slice(&self.sender_mac);
        arp[14..18].copy_from_slice(&self.sender_ip.octets());
        // tha (18..24) stays zeroed
        arp[24..28].copy_from_slice(&self.target_ip.octets());

        buf
    }
}

/// Parses a captured link-layer frame.
///
/// Returns `Ok(None)` for frames that are well-formed but not ARP requests
/// (other ethertypes, ARP replies), so the capture loop can skip them
/// cheaply.
///
/// # Errors
///
/// Returns [`ProtocolError::InsufficientData`] for truncated frames and
/// [`ProtocolError::MalformedPayload`] for ARP bodies that do not describe
/// Ethernet/IPv4 addresses.
pub fn parse_probe(frame: &[u8]) -> Result<Option<DiscoveryProbe>, ProtocolError> {
    if frame.len() < ETH_HEADER_LEN {
        return Err(ProtocolError::InsufficientData {
            needed: ETH_HEADER_LEN,
            available: frame.len(),
        });
    }

    let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    if ethertype != ETHERTYPE_ARP {
        return Ok(None);
    }

    if frame.len() < PROBE_FRAME_LEN {
        return Err(ProtocolError::InsufficientData {
            needed: PROBE_FRAME_LEN,
            available: frame.len(),
        });
    }

    let arp = &frame[ETH_HEADER_LEN..PROBE_FRAME_LEN];
    let htype = u16::from_be_bytes([arp[0], arp[1]]);
    let ptype = u16::from_be_bytes([arp[2], arp[3]]);
    if htype != HTYPE_ETHERNET || ptype != PTYPE_IPV4 || arp[4] != 6 || arp[5] != 4 {
        return Err(ProtocolError::MalformedPayload(format!(
            "unsupported ARP address types: htype={htype} ptype=0x{ptype:04X} hlen={} plen={}",
            arp[4], arp[5]
        )));
    }

    let oper = u16::from_be_bytes([arp[6], arp[7]]);
    if oper != OPER_REQUEST {
        return Ok(None);
    }

    let mut sender_mac = [0u8; 6];
    sender_mac.copy_from_slice(&arp[8..14]);
    let sender_ip = Ipv4Addr::new(arp[14], arp[15], arp[16], arp[17]);
    let target_ip = Ipv4Addr::new(arp[24], arp[25], arp[26], arp[27]);

    Ok(Some(DiscoveryProbe {
        sender_mac,
        sender_ip,
        target_ip,
    }))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

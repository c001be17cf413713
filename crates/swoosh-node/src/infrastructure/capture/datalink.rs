//! Real capture and injection on an OS interface via `pnet_datalink`.
//!
//! Opening an Ethernet channel needs raw-socket privileges
//! (`CAP_NET_RAW` on Linux, root or BPF access on macOS).  Failure surfaces as
//! [`CaptureError::OpenFailed`] and the node keeps running without discovery.

use std::net::IpAddr;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use pnet_datalink::{Channel, Config, DataLinkReceiver, DataLinkSender, NetworkInterface};
use tracing::debug;

use super::{is_timeout_error, CaptureError, FrameCapture, FrameSender, LocalInterface};

/// Looks up `name` and returns its first IPv4 address and MAC.
///
/// # Errors
///
/// [`CaptureError::InterfaceNotFound`], [`CaptureError::NoIpv4Address`] or
/// [`CaptureError::NoMacAddress`].
pub fn resolve_interface(name: &str) -> Result<LocalInterface, CaptureError> {
    let iface = find_interface(name)?;
    local_interface_from(&iface)
}

/// Opens an Ethernet channel on `name`.
///
/// `read_timeout` bounds each [`FrameCapture::next_frame`] call so the worker
/// thread can observe shutdown.
pub fn open_channel(
    name: &str,
    read_timeout: Duration,
) -> Result<(DatalinkSender, DatalinkCapture), CaptureError> {
    let iface = find_interface(name)?;
    let config = Config {
        read_timeout: Some(read_timeout),
        ..Config::default()
    };

    match pnet_datalink::channel(&iface, config) {
        Ok(Channel::Ethernet(tx, rx)) => {
            debug!(interface = %iface.name, "datalink channel open");
            Ok((DatalinkSender { tx: Mutex::new(tx) }, DatalinkCapture { rx }))
        }
        Ok(_) => Err(CaptureError::UnsupportedChannel(iface.name.clone())),
        Err(source) => Err(CaptureError::OpenFailed {
            interface: iface.name.clone(),
            source,
        }),
    }
}

fn find_interface(name: &str) -> Result<NetworkInterface, CaptureError> {
    pnet_datalink::interfaces()
        .into_iter()
        .find(|iface| iface.name == name)
        .ok_or_else(|| CaptureError::InterfaceNotFound(name.to_string()))
}

fn local_interface_from(iface: &NetworkInterface) -> Result<LocalInterface, CaptureError> {
    let ipv4 = iface
        .ips
        .iter()
        .find_map(|net| match net.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| CaptureError::NoIpv4Address(iface.name.clone()))?;
    let mac = iface
        .mac
        .ok_or_else(|| CaptureError::NoMacAddress(iface.name.clone()))?;

    Ok(LocalInterface {
        name: iface.name.clone(),
        ipv4,
        mac: [mac.0, mac.1, mac.2, mac.3, mac.4, mac.5],
    })
}

/// Sending half of a datalink channel.
pub struct DatalinkSender {
    tx: Mutex<Box<dyn DataLinkSender>>,
}

impl FrameSender for DatalinkSender {
    fn send_frame(&self, frame: &[u8]) -> Result<(), CaptureError> {
        let mut tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        match tx.send_to(frame, None) {
            Some(result) => result.map_err(CaptureError::Send),
            None => Err(CaptureError::Send(std::io::Error::new(
                std::io::ErrorKind::Other,
                "datalink sender has no buffer space",
            ))),
        }
    }
}

/// Receiving half of a datalink channel.
pub struct DatalinkCapture {
    rx: Box<dyn DataLinkReceiver>,
}

impl FrameCapture for DatalinkCapture {
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>, CaptureError> {
        match self.rx.next() {
            Ok(frame) => Ok(Some(frame.to_vec())),
            Err(e) if is_timeout_error(&e) => Ok(None),
            Err(e) => Err(CaptureError::Recv(e)),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

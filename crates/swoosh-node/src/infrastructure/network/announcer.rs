//! Periodic discovery probe.
//!
//! Every interval the announcer injects one broadcast ARP request for the
//! sentinel address.  A failed send is logged and the next tick tries again;
//! there is no backoff.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use swoosh_core::protocol::discovery::{DiscoveryProbe, PROBE_FRAME_LEN};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::infrastructure::capture::{CaptureError, FrameSender};

/// Broadcasts our presence on the link layer.
pub struct Announcer {
    sender: Arc<dyn FrameSender>,
    frame: [u8; PROBE_FRAME_LEN],
    interval: Duration,
}

impl Announcer {
    /// `interval` must be non-zero.
    pub fn new(sender: Arc<dyn FrameSender>, probe: DiscoveryProbe, interval: Duration) -> Self {
        Self {
            sender,
            frame: probe.encode(),
            interval,
        }
    }

    /// Sends the probe once.
    pub fn announce_once(&self) -> Result<(), CaptureError> {
        self.sender.send_frame(&self.frame)
    }

    /// Announces immediately, then once per interval until `running` clears.
    pub async fn run(self, running: Arc<AtomicBool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("announcing every {:?}", self.interval);
        loop {
            ticker.tick().await;
            if !running.load(Ordering::Relaxed) {
                break;
            }
            match self.announce_once() {
                Ok(()) => debug!("discovery probe sent"),
                Err(e) => warn!("failed to send discovery probe: {e}"),
            }
        }
        info!("announcer stopped");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

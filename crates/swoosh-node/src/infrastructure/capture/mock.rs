//! In-memory capture and sender used in tests and for running without raw
//! socket access.
//!
//! [`injected_capture`] returns a [`FrameInjector`] and an
//! [`InjectedCapture`].  Frames pushed through the injector come out of
//! `next_frame` on the worker thread; an idle poll returns `Ok(None)` just
//! like a real read timeout.  [`RecordingSender`] keeps every frame it is
//! asked to send.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::{CaptureError, FrameCapture, FrameSender};

enum Injected {
    Frame(Vec<u8>),
    Error(std::io::ErrorKind),
}

/// Test-side handle that feeds an [`InjectedCapture`].
#[derive(Clone)]
pub struct FrameInjector {
    tx: Sender<Injected>,
}

impl FrameInjector {
    /// Queues a frame.  Returns `false` if the capture was dropped.
    pub fn inject_frame(&self, frame: impl Into<Vec<u8>>) -> bool {
        self.tx.send(Injected::Frame(frame.into())).is_ok()
    }

    /// Queues a receive error of the given kind.
    pub fn inject_error(&self, kind: std::io::ErrorKind) -> bool {
        self.tx.send(Injected::Error(kind)).is_ok()
    }
}

/// A [`FrameCapture`] fed from a [`FrameInjector`].
pub struct InjectedCapture {
    rx: Receiver<Injected>,
    poll: Duration,
}

/// Creates a connected injector/capture pair.  `poll` plays the role of the
/// read timeout.
pub fn injected_capture(poll: Duration) -> (FrameInjector, InjectedCapture) {
    let (tx, rx) = mpsc::channel();
    (FrameInjector { tx }, InjectedCapture { rx, poll })
}

impl FrameCapture for InjectedCapture {
    fn next_frame(&mut self) -> Result<Option<Vec<u8>>, CaptureError> {
        match self.rx.recv_timeout(self.poll) {
            Ok(Injected::Frame(frame)) => Ok(Some(frame)),
            Ok(Injected::Error(kind)) => Err(CaptureError::Recv(std::io::Error::new(
                kind,
                "injected capture error",
            ))),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(CaptureError::Closed),
        }
    }
}

/// A [`FrameSender`] that stores frames instead of transmitting them.
#[derive(Default)]
pub struct RecordingSender {
    frames: Mutex<Vec<Vec<u8>>>,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every frame sent so far, oldest first.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self) -> usize {
        self.frames.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl FrameSender for RecordingSender {
    fn send_frame(&self, frame: &[u8]) -> Result<(), CaptureError> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(frame.to_vec());
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

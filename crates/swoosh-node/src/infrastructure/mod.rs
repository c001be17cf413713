//! Infrastructure layer for the node.
//!
//! Contains OS-facing adapters: link-layer capture, UDP and TCP sockets, and
//! file-system storage for the configuration.
//!
//! **Dependency rule**: this layer may depend on `swoosh_core` but MUST NOT
//! import `application`.

pub mod capture;
pub mod network;
pub mod storage;

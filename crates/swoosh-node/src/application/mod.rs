//! Application layer for the node.
//!
//! - **`node`** – Builds the running node from a `NodeConfig` and exposes the
//!   operator operations: list peers, open a session, send and receive.

pub mod node;

//! Shared state tables with no I/O of their own.
//!
//! - **`peer`** – discovered addresses and their declared names.
//! - **`session`** – live encrypted sessions keyed by `(peer, session id)`.

pub mod peer;
pub mod session;

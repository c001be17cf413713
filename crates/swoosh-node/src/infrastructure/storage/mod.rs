//! Persistent storage for the node.
//!
//! - **`config`** – TOML configuration file: load, validate, save.

pub mod config;

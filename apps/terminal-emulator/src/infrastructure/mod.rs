//! Infrastructure Layer
//!
//! Everything that touches a socket, a file, or the environment.

/// Line-delimited JSON wire protocol: message vocabulary and frame buffering.
pub mod wire;

/// Emulator server: accept loop, connection handlers, bar streaming, fills.
pub mod server;

/// Terminal client: outbound connection, receive task, typed events.
pub mod client;

/// Bar data loading and resampling.
pub mod data;

/// Environment-driven configuration.
pub mod config;

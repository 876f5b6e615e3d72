//! Application Layer
//!
//! Port definitions that decouple the server from how bar data is produced.

/// Interfaces consumed by the infrastructure layer.
pub mod ports;

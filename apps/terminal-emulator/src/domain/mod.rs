//! Domain Layer
//!
//! Core types for replayed market data and simulated orders. These types
//! perform no I/O and carry no protocol detail beyond their wire spelling.

/// Bars and the ordered bar series.
pub mod market;

/// Order actions, tickets, and fill records.
pub mod orders;

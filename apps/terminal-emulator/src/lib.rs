#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::default_trait_access,
        clippy::items_after_statements
    )
)]

//! Terminal Emulator - Market Data Replay and Fill Simulation
//!
//! Emulates a remote broker trading-terminal over TCP so that strategy code
//! can be tested against recorded historical data without a live connection.
//! The server replays a fixed sequence of OHLC bars to each requesting client
//! and simulates synchronous order fills; the client consumes bars and submits
//! orders through the same wire protocol the production client uses.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core market and order types
//!   - `market`: Bars and the ordered bar series
//!   - `orders`: Order actions, tickets, and fill records
//!
//! - **Application**: Port definitions
//!   - `ports`: The `BarSource` interface consumed by the server
//!
//! - **Infrastructure**: Adapters and I/O
//!   - `wire`: Line-delimited JSON message codec and frame buffering
//!   - `server`: Accept loop, per-connection handlers, bar streaming, fills
//!   - `client`: Outbound connection with a single receive task and typed events
//!   - `data`: CSV bar loading and resampling to the canonical interval
//!   - `config`: Environment-driven configuration
//!
//! # Data Flow
//!
//! ```text
//!              reqRealTimeBars / placeOrder / disconnect
//! Client ────────────────────────────────────────────────► Server
//!        ◄──────────────────────────────────────────────── │
//!          barUpdate* endOfData / orderStatus              ▼
//!                                                      Bar Source
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core market and order types with no I/O dependencies.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Wire protocol, server, client, data loading, config.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market::{Bar, BarSeries, CANONICAL_BAR_SECONDS};
pub use domain::orders::{OrderAction, OrderRecord, OrderTicket};

// Application ports
pub use application::ports::BarSource;

// Wire protocol
pub use infrastructure::wire::{FrameDecoder, WireError, WireMessage};

// Server
pub use infrastructure::server::{EmulatorServer, FillEngine, ServerError, ServerHandle};

// Client
pub use infrastructure::client::{ClientError, OrderStatusEvent, TerminalClient, TerminalEvent};

// Data loading
pub use infrastructure::data::{DataError, load_bar_series};

// Configuration
pub use infrastructure::config::{ConfigError, EmulatorConfig};

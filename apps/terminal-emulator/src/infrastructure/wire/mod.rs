//! Wire Protocol
//!
//! The client and server exchange UTF-8 JSON objects, one per line, separated
//! by a single newline byte. Every message carries a `type` discriminator;
//! the remaining fields are type-specific.
//!
//! # Message Types
//!
//! ## Client → Server
//! - `reqRealTimeBars`: start streaming bars to this connection
//! - `placeOrder`: submit an order for synchronous simulated fill
//! - `disconnect`: notify orderly close
//!
//! ## Server → Client
//! - `barUpdate`: one OHLC bar
//! - `orderStatus`: fill result
//! - `endOfData`: bar sequence exhausted
//!
//! Unknown `type` values are ignored by both sides; a frame that fails to
//! parse is dropped by the caller with a diagnostic and never terminates the
//! connection.

use chrono::{DateTime, FixedOffset};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::market::Bar;
use crate::domain::orders::OrderTicket;

/// The single byte that terminates every frame.
pub const FRAME_DELIMITER: u8 = b'\n';

// =============================================================================
// Error Type
// =============================================================================

/// Errors produced while encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The frame is not valid JSON, or a known message is missing fields.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The frame is valid JSON but carries no `type` discriminator.
    #[error("frame has no type field")]
    MissingType,
}

// =============================================================================
// Message Vocabulary
// =============================================================================

/// One wire message, tagged by its `type` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    /// Client request to start streaming bars to this connection.
    #[serde(rename = "reqRealTimeBars")]
    ReqRealTimeBars {
        /// Requested bar interval in seconds.
        #[serde(rename = "barSize")]
        bar_size: u32,
    },

    /// Client order submission.
    #[serde(rename = "placeOrder")]
    PlaceOrder {
        /// The order to fill.
        order: OrderTicket,
    },

    /// Client notice of orderly close.
    #[serde(rename = "disconnect")]
    Disconnect,

    /// One bar pushed by the server.
    #[serde(rename = "barUpdate")]
    BarUpdate {
        /// Bar timestamp, ISO-8601 with offset.
        time: DateTime<FixedOffset>,
        /// Opening price.
        open: Decimal,
        /// Highest price.
        high: Decimal,
        /// Lowest price.
        low: Decimal,
        /// Closing price.
        close: Decimal,
    },

    /// Fill result pushed by the server.
    #[serde(rename = "orderStatus")]
    OrderStatus {
        /// Server-assigned order identifier.
        #[serde(rename = "orderId")]
        order_id: u32,
        /// Fill status, e.g. `Filled`.
        status: String,
        /// Average fill price.
        #[serde(rename = "avgFillPrice")]
        avg_fill_price: Decimal,
    },

    /// Bar sequence exhausted; the client decides whether to disconnect.
    #[serde(rename = "endOfData")]
    EndOfData,
}

impl WireMessage {
    /// Build a `barUpdate` from a bar.
    #[must_use]
    pub fn bar_update(bar: &Bar) -> Self {
        Self::BarUpdate {
            time: bar.time,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
        }
    }
}

/// Encode a message as one delimiter-terminated frame.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn encode(message: &WireMessage) -> Result<String, WireError> {
    let mut line = serde_json::to_string(message)?;
    line.push(char::from(FRAME_DELIMITER));
    Ok(line)
}

/// Decode one frame (without its delimiter) into a message.
///
/// Returns `Ok(None)` for a structurally valid message whose `type` is not in
/// the vocabulary; such frames are ignored, not fatal.
///
/// # Errors
///
/// Returns an error if the frame is not valid JSON, has no `type` field, or
/// is a known message with missing or invalid fields.
pub fn decode_frame(frame: &[u8]) -> Result<Option<WireMessage>, WireError> {
    let value: serde_json::Value = serde_json::from_slice(frame)?;

    let Some(kind) = value.get("type").and_then(serde_json::Value::as_str) else {
        return Err(WireError::MissingType);
    };

    match kind {
        "reqRealTimeBars" | "placeOrder" | "disconnect" | "barUpdate" | "orderStatus"
        | "endOfData" => Ok(Some(serde_json::from_value(value)?)),
        _ => Ok(None),
    }
}

// =============================================================================
// Frame Buffering
// =============================================================================

/// Accumulates raw socket reads and yields complete frames.
///
/// The connection is a byte stream: a single read may carry a partial frame
/// or several complete frames. `extend` appends whatever arrived and
/// `next_frame` yields each complete delimiter-terminated frame in order,
/// holding any trailing partial frame for the next read. Blank lines are
/// skipped.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub const fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Append bytes from a socket read.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Take the next complete frame, without its delimiter.
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            let pos = self.buf.iter().position(|&b| b == FRAME_DELIMITER)?;
            let mut frame: Vec<u8> = self.buf.drain(..=pos).collect();
            frame.pop();
            if frame.iter().any(|b| !b.is_ascii_whitespace()) {
                return Some(frame);
            }
        }
    }

    /// Bytes buffered but not yet forming a complete frame.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}

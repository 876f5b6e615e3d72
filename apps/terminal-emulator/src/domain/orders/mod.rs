//! Order Types
//!
//! The client-submitted order ticket and the server-side fill record. Fills
//! are deliberately simplified: every order fills instantly and completely at
//! a price looked up from the bar source, and records are never mutated after
//! creation.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order side, a closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderAction {
    /// Buy the instrument.
    Buy,
    /// Sell the instrument.
    Sell,
}

impl OrderAction {
    /// Wire spelling of the action.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
        }
    }
}

/// An order request as submitted by the client.
///
/// Consumed exactly once by the server's fill engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTicket {
    /// Buy or sell.
    pub action: OrderAction,
    /// Number of units, always positive.
    pub quantity: u32,
}

/// The server-side result of an order request.
///
/// Created at fill time and retained for the life of the server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderRecord {
    /// Server-assigned identifier, monotonically increasing from 1.
    pub order_id: u32,
    /// The requested side.
    pub action: OrderAction,
    /// The requested quantity.
    pub quantity: u32,
    /// The simulated fill price.
    pub fill_price: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_wire_spelling() {
        assert_eq!(OrderAction::Buy.as_str(), "BUY");
        assert_eq!(OrderAction::Sell.as_str(), "SELL");

        let json = serde_json::to_string(&OrderAction::Sell).unwrap();
        assert_eq!(json, r#""SELL""#);
        let parsed: OrderAction = serde_json::from_str(r#""BUY""#).unwrap();
        assert_eq!(parsed, OrderAction::Buy);
    }

    #[test]
    fn ticket_round_trip() {
        let ticket = OrderTicket {
            action: OrderAction::Buy,
            quantity: 10,
        };
        let json = serde_json::to_string(&ticket).unwrap();
        assert_eq!(json, r#"{"action":"BUY","quantity":10}"#);
    }
}

//! Market Data Types
//!
//! One OHLC sample per fixed time interval, and the ordered, finite sequence
//! of samples the emulator replays. Timestamps are timezone-aware and the
//! series preserves source timestamp order.

use chrono::{DateTime, FixedOffset};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Canonical replay interval in seconds.
///
/// Source data at a coarser interval is resampled down to this before
/// streaming (see `infrastructure::data`).
pub const CANONICAL_BAR_SECONDS: i64 = 5;

/// One OHLC price sample.
///
/// Immutable once produced; ordering is by `time`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    /// Bar timestamp (timezone-aware).
    pub time: DateTime<FixedOffset>,
    /// Opening price.
    pub open: Decimal,
    /// Highest traded price.
    pub high: Decimal,
    /// Lowest traded price.
    pub low: Decimal,
    /// Closing price.
    pub close: Decimal,
}

/// An ordered, finite sequence of bars.
///
/// Construction sorts by timestamp, so iteration order is always source
/// timestamp order regardless of input order.
#[derive(Debug, Clone, Default)]
pub struct BarSeries {
    bars: Vec<Bar>,
}

impl BarSeries {
    /// Create a series from bars, sorting them by timestamp.
    #[must_use]
    pub fn new(mut bars: Vec<Bar>) -> Self {
        bars.sort_by_key(|bar| bar.time);
        Self { bars }
    }

    /// Number of bars in the series.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    /// Whether the series is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// All bars in timestamp order.
    #[must_use]
    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    /// Closing price at `index`, if in range.
    #[must_use]
    pub fn close_at(&self, index: usize) -> Option<Decimal> {
        self.bars.get(index).map(|bar| bar.close)
    }
}

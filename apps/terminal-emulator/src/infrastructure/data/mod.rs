//! Bar Data Loading
//!
//! Loads recorded OHLC bars from a CSV file and resamples them to the
//! canonical replay interval. This is a pure data-preparation step: the
//! server only ever sees the finished [`BarSeries`].
//!
//! # File Format
//!
//! CSV with a header row and `date,open,high,low,close` columns. Timestamps
//! are RFC 3339 (`2024-01-15T09:30:00-05:00`), or naive
//! (`2024-01-15 09:30:00`), in which case they are localized to the
//! configured fallback offset.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::domain::market::{Bar, BarSeries, CANONICAL_BAR_SECONDS};

/// Tolerance around the canonical interval when detecting bar spacing.
const CANONICAL_TOLERANCE_SECONDS: i64 = 2;
/// Minute spacing and the tolerance used to recognize it.
const MINUTE_SECONDS: i64 = 60;
const MINUTE_TOLERANCE_SECONDS: i64 = 10;

// =============================================================================
// Error Type
// =============================================================================

/// Errors raised while loading or resampling bar data.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    /// The file could not be read.
    #[error("failed to read data file: {0}")]
    Io(#[from] std::io::Error),

    /// A CSV record could not be parsed.
    #[error("failed to parse data file: {0}")]
    Csv(#[from] csv::Error),

    /// A timestamp could not be parsed in any supported format.
    #[error("unparseable bar timestamp: {0}")]
    Timestamp(String),

    /// The source bar spacing is neither canonical nor one minute.
    #[error("unsupported bar frequency: {0} seconds")]
    UnsupportedFrequency(i64),
}

// =============================================================================
// Loading
// =============================================================================

#[derive(Debug, Deserialize)]
struct BarRow {
    date: String,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
}

/// Load a bar series from a CSV file and resample it to the canonical
/// interval.
///
/// Naive timestamps are localized to `fallback_offset`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or if the detected
/// bar spacing is unsupported.
pub fn load_bar_series(path: &Path, fallback_offset: FixedOffset) -> Result<BarSeries, DataError> {
    let mut reader = csv::Reader::from_path(path)?;

    let mut bars = Vec::new();
    for row in reader.deserialize::<BarRow>() {
        let row = row?;
        bars.push(Bar {
            time: parse_timestamp(&row.date, fallback_offset)?,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
        });
    }

    let bars = resample_to_canonical(bars)?;
    Ok(BarSeries::new(bars))
}

fn parse_timestamp(raw: &str, fallback_offset: FixedOffset) -> Result<DateTime<FixedOffset>, DataError> {
    if let Ok(time) = DateTime::parse_from_rfc3339(raw) {
        return Ok(time);
    }

    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            if let Some(time) = fallback_offset.from_local_datetime(&naive).single() {
                return Ok(time);
            }
        }
    }

    Err(DataError::Timestamp(raw.to_string()))
}

// =============================================================================
// Resampling
// =============================================================================

/// Resample bars to the canonical interval.
///
/// Detects the modal spacing between consecutive bars: roughly-canonical data
/// passes through untouched, roughly one-minute data is aggregated into
/// canonical-interval buckets (open = first, high = max, low = min,
/// close = last), and anything else is rejected.
///
/// # Errors
///
/// Returns [`DataError::UnsupportedFrequency`] for other spacings.
pub fn resample_to_canonical(mut bars: Vec<Bar>) -> Result<Vec<Bar>, DataError> {
    bars.sort_by_key(|bar| bar.time);

    let Some(spacing) = modal_spacing_seconds(&bars) else {
        return Ok(bars);
    };

    if (spacing - CANONICAL_BAR_SECONDS).abs() < CANONICAL_TOLERANCE_SECONDS {
        return Ok(bars);
    }
    if (spacing - MINUTE_SECONDS).abs() < MINUTE_TOLERANCE_SECONDS {
        return Ok(aggregate_into_buckets(&bars));
    }

    Err(DataError::UnsupportedFrequency(spacing))
}

/// The most common spacing between consecutive bars, in seconds.
fn modal_spacing_seconds(bars: &[Bar]) -> Option<i64> {
    if bars.len() < 2 {
        return None;
    }

    let mut counts: HashMap<i64, usize> = HashMap::new();
    for pair in bars.windows(2) {
        let diff = (pair[1].time - pair[0].time).num_seconds();
        *counts.entry(diff).or_insert(0) += 1;
    }

    counts
        .into_iter()
        .max_by_key(|&(diff, count)| (count, std::cmp::Reverse(diff)))
        .map(|(diff, _)| diff)
}

/// Aggregate bars into canonical-interval buckets.
fn aggregate_into_buckets(bars: &[Bar]) -> Vec<Bar> {
    let mut out: Vec<Bar> = Vec::new();
    let mut current_bucket: Option<i64> = None;

    for bar in bars {
        let bucket = bar.time.timestamp().div_euclid(CANONICAL_BAR_SECONDS);
        let bucket_start = bucket * CANONICAL_BAR_SECONDS;

        if current_bucket == Some(bucket) {
            if let Some(last) = out.last_mut() {
                last.high = last.high.max(bar.high);
                last.low = last.low.min(bar.low);
                last.close = bar.close;
            }
        } else {
            current_bucket = Some(bucket);
            let time = bar
                .time
                .timezone()
                .timestamp_opt(bucket_start, 0)
                .single()
                .unwrap_or(bar.time);
            out.push(Bar {
                time,
                open: bar.open,
                high: bar.high,
                low: bar.low,
                close: bar.close,
            });
        }
    }

    out
}

//! Canonical in-memory representation of a time-series bar (OHLCV).
//!
//! This struct is the standard output of every [`BarSource`](crate::sources::BarSource)
//! regardless of where the bars came from (disk, exchange, third party).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single time-series bar (OHLCV) for a given open time.
///
/// This struct is vendor-agnostic. Fields a vendor does not supply stay `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Open time of the bar interval (UTC).
    pub open_time: DateTime<Utc>,

    /// Opening price.
    pub open: f64,

    /// Highest price during the bar interval.
    pub high: f64,

    /// Lowest price during the bar interval.
    pub low: f64,

    /// Closing price.
    pub close: f64,

    /// Volume traded during the bar interval.
    pub volume: f64,

    /// Trade count for the bar. Not all sources supply this.
    #[serde(default)]
    pub trade_count: Option<u64>,

    /// Volume-weighted average price. Not all sources supply this.
    #[serde(default)]
    pub vwap: Option<f64>,
}

/// Which price series a bar was built from.
///
/// Part of every cache key so trade bars and mark-price bars for the same
/// symbol never collide.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarKind {
    #[default]
    Trade,
    MarkPrice,
    IndexPrice,
}

impl BarKind {
    pub const ALL: [BarKind; 3] = [BarKind::Trade, BarKind::MarkPrice, BarKind::IndexPrice];

    /// Stable lowercase name used in paths and URLs.
    pub const fn as_str(self) -> &'static str {
        match self {
            BarKind::Trade => "trade",
            BarKind::MarkPrice => "mark_price",
            BarKind::IndexPrice => "index_price",
        }
    }
}

/// A single scalar projection of a bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarAspect {
    Open,
    High,
    Low,
    Close,
    Volume,
    /// (high + low + close) / 3
    Typical,
    /// (high + low) / 2
    Median,
}

type AspectSelector = fn(&Bar) -> f64;

/// Indexed by `BarAspect as usize`.
const ASPECT_SELECTORS: [AspectSelector; 7] = [
    |b| b.open,
    |b| b.high,
    |b| b.low,
    |b| b.close,
    |b| b.volume,
    |b| (b.high + b.low + b.close) / 3.0,
    |b| (b.high + b.low) / 2.0,
];

impl BarAspect {
    /// Function extracting this aspect from a bar.
    pub fn selector(self) -> AspectSelector {
        ASPECT_SELECTORS[self as usize]
    }
}

impl Bar {
    /// Reads one scalar aspect of this bar.
    pub fn aspect(&self, aspect: BarAspect) -> f64 {
        aspect.selector()(self)
    }
}

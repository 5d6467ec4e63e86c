use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{bar::BarKind, timeframe::TimeFrame};

/// Universal parameters for requesting historical bars of one symbol.
///
/// The orchestrator receives this with an arbitrary caller range. Every tier
/// receives it with a chunk-aligned range, so a source never has to know how
/// ranges are chunked.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoricalDataRequest {
    /// Exchange key (e.g. `"binance"`). Sources are registered per exchange key.
    pub exchange: String,

    /// Market area within the exchange (e.g. `"spot"`, `"futures"`).
    pub exchange_area: String,

    /// Exchange-native symbol (e.g. `"BTCUSDT"`).
    pub symbol: String,

    /// The time interval for each bar.
    pub timeframe: TimeFrame,

    /// Which price series to build bars from.
    #[serde(default)]
    pub bar_kind: BarKind,

    /// Start of the requested time range (inclusive, UTC).
    pub start: DateTime<Utc>,

    /// End of the requested time range (exclusive, UTC).
    pub end_exclusive: DateTime<Utc>,
}

impl HistoricalDataRequest {
    pub fn new(
        exchange: impl Into<String>,
        exchange_area: impl Into<String>,
        symbol: impl Into<String>,
        timeframe: TimeFrame,
        start: DateTime<Utc>,
        end_exclusive: DateTime<Utc>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            exchange_area: exchange_area.into(),
            symbol: symbol.into(),
            timeframe,
            bar_kind: BarKind::default(),
            start,
            end_exclusive,
        }
    }

    pub fn with_bar_kind(mut self, bar_kind: BarKind) -> Self {
        self.bar_kind = bar_kind;
        self
    }

    /// Same instrument, different range.
    pub fn with_range(&self, start: DateTime<Utc>, end_exclusive: DateTime<Utc>) -> Self {
        Self {
            start,
            end_exclusive,
            ..self.clone()
        }
    }
}

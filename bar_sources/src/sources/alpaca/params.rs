use chrono::{DateTime, SecondsFormat, Utc};

use crate::models::{TimeFrame, TimeFrameUnit};

/// Maximum page size the bars endpoint accepts.
pub(super) const PAGE_LIMIT: u32 = 10_000;

/// Alpaca's name for a timeframe, or `None` when the API has no such bar size.
///
/// Minutes go up to 59, hours up to 23; days and weeks only in units of one.
pub fn alpaca_timeframe(timeframe: TimeFrame) -> Option<String> {
    let amount = timeframe.amount();
    match timeframe.unit() {
        TimeFrameUnit::Minute if amount <= 59 => Some(format!("{amount}Min")),
        TimeFrameUnit::Hour if amount <= 23 => Some(format!("{amount}Hour")),
        TimeFrameUnit::Day => Some("1Day".to_string()),
        TimeFrameUnit::Week => Some("1Week".to_string()),
        TimeFrameUnit::Month => Some(format!("{amount}Month")),
        _ => None,
    }
}

/// Query string for one page of a bars request.
pub(super) fn construct_params(
    symbol: &str,
    timeframe: &str,
    start: DateTime<Utc>,
    end_exclusive: DateTime<Utc>,
    page_token: Option<&str>,
) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("symbols", symbol.to_string()),
        ("timeframe", timeframe.to_string()),
        ("start", start.to_rfc3339_opts(SecondsFormat::Secs, true)),
        ("end", end_exclusive.to_rfc3339_opts(SecondsFormat::Secs, true)),
        ("limit", PAGE_LIMIT.to_string()),
        ("sort", "asc".to_string()),
    ];
    if let Some(token) = page_token {
        query.push(("page_token", token.to_string()));
    }
    query
}

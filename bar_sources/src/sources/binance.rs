//! Binance public kline REST endpoints, used as the exchange tier.
//!
//! The spot market serves trade klines only. The USD-M futures market also
//! serves mark-price and index-price klines, each from its own endpoint.

use std::num::NonZeroU32;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use snafu::ResultExt;
use tracing::debug;

use crate::{
    models::{Bar, BarKind, HistoricalDataRequest, TimeFrame, TimeFrameUnit},
    sources::{
        ApiSnafu, BarSource, ClientBuildSnafu, DecodeSnafu, InvalidConfigSnafu, ReqwestSnafu,
        SourceError, SourceInitError, ValidationSnafu, normalize_bars,
    },
};

const PAGE_LIMIT: usize = 1000;
/// Binance error code for an unknown symbol.
const INVALID_SYMBOL: i64 = -1121;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Market {
    Spot,
    Futures,
}

struct Endpoint {
    market: Market,
    kind: BarKind,
    path: &'static str,
    /// Index-price klines are keyed by pair, not symbol.
    symbol_param: &'static str,
}

const ENDPOINTS: [Endpoint; 4] = [
    Endpoint {
        market: Market::Spot,
        kind: BarKind::Trade,
        path: "/api/v3/klines",
        symbol_param: "symbol",
    },
    Endpoint {
        market: Market::Futures,
        kind: BarKind::Trade,
        path: "/fapi/v1/klines",
        symbol_param: "symbol",
    },
    Endpoint {
        market: Market::Futures,
        kind: BarKind::MarkPrice,
        path: "/fapi/v1/markPriceKlines",
        symbol_param: "symbol",
    },
    Endpoint {
        market: Market::Futures,
        kind: BarKind::IndexPrice,
        path: "/fapi/v1/indexPriceKlines",
        symbol_param: "pair",
    },
];

fn market_for_area(area: &str) -> Option<Market> {
    match area.to_ascii_lowercase().as_str() {
        "spot" => Some(Market::Spot),
        "futures" | "usdm" | "um" => Some(Market::Futures),
        _ => None,
    }
}

fn endpoint(market: Market, kind: BarKind) -> Option<&'static Endpoint> {
    ENDPOINTS.iter().find(|e| e.market == market && e.kind == kind)
}

/// Binance interval string, or `None` when Binance has no such kline size.
pub fn binance_interval(timeframe: TimeFrame) -> Option<String> {
    let amount = timeframe.amount();
    let supported = match timeframe.unit() {
        TimeFrameUnit::Minute => [1, 3, 5, 15, 30].contains(&amount),
        TimeFrameUnit::Hour => [1, 2, 4, 6, 8, 12].contains(&amount),
        TimeFrameUnit::Day | TimeFrameUnit::Week | TimeFrameUnit::Month => amount == 1,
    };
    if !supported {
        return None;
    }
    let suffix = match timeframe.unit() {
        TimeFrameUnit::Minute => "m",
        TimeFrameUnit::Hour => "h",
        TimeFrameUnit::Day => "d",
        TimeFrameUnit::Week => "w",
        TimeFrameUnit::Month => "M",
    };
    Some(format!("{amount}{suffix}"))
}

/// One kline row: open time, OHLCV as strings, close time, quote volume,
/// trade count, taker volumes, and an unused trailing field.
#[derive(Debug, Deserialize)]
struct BinanceKline(
    i64,
    String,
    String,
    String,
    String,
    String,
    i64,
    String,
    u64,
    String,
    String,
    serde_json::Value,
);

#[derive(Debug, Deserialize)]
struct BinanceApiError {
    code: i64,
    msg: String,
}

fn parse_price(field: &str, value: &str) -> Result<f64, SourceError> {
    value.parse::<f64>().map_err(|_| {
        DecodeSnafu {
            message: format!("kline {field} is not a number: {value:?}"),
        }
        .build()
    })
}

impl BinanceKline {
    fn into_bar(self, kind: BarKind) -> Result<Bar, SourceError> {
        let open_time = DateTime::<Utc>::from_timestamp_millis(self.0).ok_or_else(|| {
            DecodeSnafu {
                message: format!("kline open time out of range: {}", self.0),
            }
            .build()
        })?;
        let volume = parse_price("volume", &self.5)?;
        let quote_volume = parse_price("quote volume", &self.7)?;
        let is_trade = kind == BarKind::Trade;

        Ok(Bar {
            open_time,
            open: parse_price("open", &self.1)?,
            high: parse_price("high", &self.2)?,
            low: parse_price("low", &self.3)?,
            close: parse_price("close", &self.4)?,
            volume,
            trade_count: is_trade.then_some(self.8),
            vwap: (is_trade && volume > 0.0).then(|| quote_volume / volume),
        })
    }
}

fn default_spot_base_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_futures_base_url() -> String {
    "https://fapi.binance.com".to_string()
}

fn default_requests_per_minute() -> u32 {
    1200
}

#[derive(Debug, Clone, Deserialize)]
pub struct BinanceConfig {
    #[serde(default = "default_spot_base_url")]
    pub spot_base_url: String,
    #[serde(default = "default_futures_base_url")]
    pub futures_base_url: String,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            spot_base_url: default_spot_base_url(),
            futures_base_url: default_futures_base_url(),
            requests_per_minute: default_requests_per_minute(),
        }
    }
}

pub struct BinanceSource {
    id: String,
    client: Client,
    spot_base_url: String,
    futures_base_url: String,
    limiter: DefaultDirectRateLimiter,
}

impl BinanceSource {
    pub fn new(id: impl Into<String>, config: BinanceConfig) -> Result<Self, SourceInitError> {
        let client = Client::builder().build().context(ClientBuildSnafu)?;
        let per_minute = NonZeroU32::new(config.requests_per_minute).ok_or_else(|| {
            InvalidConfigSnafu {
                message: "binance requests_per_minute must be at least 1",
            }
            .build()
        })?;

        Ok(Self {
            id: id.into(),
            client,
            spot_base_url: config.spot_base_url.trim_end_matches('/').to_string(),
            futures_base_url: config.futures_base_url.trim_end_matches('/').to_string(),
            limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
        })
    }

    fn base_url(&self, market: Market) -> &str {
        match market {
            Market::Spot => &self.spot_base_url,
            Market::Futures => &self.futures_base_url,
        }
    }

    /// Fetches one page. `Ok(None)` means Binance does not know the symbol.
    async fn fetch_page(
        &self,
        url: &str,
        query: &[(&str, String)],
        kind: BarKind,
    ) -> Result<Option<Vec<Bar>>, SourceError> {
        self.limiter.until_ready().await;
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .context(ReqwestSnafu)?;

        let status = response.status();
        let body = response.text().await.context(ReqwestSnafu)?;

        if !status.is_success() {
            if let Ok(api_error) = serde_json::from_str::<BinanceApiError>(&body) {
                if api_error.code == INVALID_SYMBOL {
                    return Ok(None);
                }
                return ApiSnafu {
                    status: status.as_u16(),
                    message: format!("{} (code {})", api_error.msg, api_error.code),
                }
                .fail();
            }
            return ApiSnafu {
                status: status.as_u16(),
                message: body,
            }
            .fail();
        }

        let klines: Vec<BinanceKline> = serde_json::from_str(&body).map_err(|e| {
            DecodeSnafu {
                message: format!("kline page: {e}"),
            }
            .build()
        })?;
        klines
            .into_iter()
            .map(|k| k.into_bar(kind))
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }
}

#[async_trait]
impl BarSource for BinanceSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn try_get(
        &self,
        request: &HistoricalDataRequest,
    ) -> Result<Option<Vec<Bar>>, SourceError> {
        let Some(market) = market_for_area(&request.exchange_area) else {
            return ValidationSnafu {
                message: format!("unknown binance area {:?}", request.exchange_area),
            }
            .fail();
        };
        let Some(endpoint) = endpoint(market, request.bar_kind) else {
            debug!(source = %self.id, kind = request.bar_kind.as_str(), "kind not offered in this area");
            return Ok(None);
        };
        let Some(interval) = binance_interval(request.timeframe) else {
            debug!(source = %self.id, timeframe = %request.timeframe, "interval not offered");
            return Ok(None);
        };

        let url = format!("{}{}", self.base_url(market), endpoint.path);
        let end_ms = request.end_exclusive.timestamp_millis() - 1;
        let mut cursor = request.start;
        let mut all_bars = Vec::new();

        while cursor < request.end_exclusive {
            let query = [
                (endpoint.symbol_param, request.symbol.to_ascii_uppercase()),
                ("interval", interval.clone()),
                ("startTime", cursor.timestamp_millis().to_string()),
                ("endTime", end_ms.to_string()),
                ("limit", PAGE_LIMIT.to_string()),
            ];

            let Some(page) = self.fetch_page(&url, &query, request.bar_kind).await? else {
                debug!(source = %self.id, symbol = %request.symbol, "symbol unknown to binance");
                return Ok(None);
            };
            let page_len = page.len();
            let Some(last_open) = page.last().map(|b| b.open_time) else {
                break;
            };
            all_bars.extend(page);

            if page_len < PAGE_LIMIT {
                break;
            }
            match request.timeframe.add_bars(last_open, 1) {
                Some(next) if next > cursor => cursor = next,
                _ => break,
            }
        }

        debug!(source = %self.id, symbol = %request.symbol, bars = all_bars.len(), "binance fetch done");
        Ok(normalize_bars(all_bars, request))
    }
}

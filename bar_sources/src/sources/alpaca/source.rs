use std::num::NonZeroU32;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use indexmap::IndexMap;
use reqwest::{Client, header};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use shared_utils::env::get_env_pair;
use snafu::ResultExt;
use tracing::debug;

use crate::{
    models::{Bar, BarKind, HistoricalDataRequest},
    sources::{
        ApiSnafu, BarSource, ClientBuildSnafu, InvalidApiKeySnafu, InvalidConfigSnafu,
        MissingEnvVarSnafu, ReqwestSnafu, SourceError, SourceInitError,
        alpaca::{
            params::{alpaca_timeframe, construct_params},
            response::AlpacaResponse,
        },
        normalize_bars,
    },
};

const DEFAULT_BASE_URL: &str = "https://data.alpaca.markets";
const BARS_PATH: &str = "/v1beta3/crypto/us/bars";
const KEY_ID_VAR: &str = "APCA_API_KEY_ID";
const SECRET_KEY_VAR: &str = "APCA_API_SECRET_KEY";

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_requests_per_minute() -> u32 {
    200
}

/// Settings for one Alpaca tier.
#[derive(Debug, Clone, Deserialize)]
pub struct AlpacaConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Exchange symbol to Alpaca symbol, e.g. `BTCUSDT = "BTC/USD"`.
    /// Symbols not listed here are never requested.
    #[serde(default)]
    pub symbols: IndexMap<String, String>,

    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

impl Default for AlpacaConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            symbols: IndexMap::new(),
            requests_per_minute: default_requests_per_minute(),
        }
    }
}

pub struct AlpacaSource {
    id: String,
    client: Client,
    url: String,
    symbols: IndexMap<String, String>,
    limiter: DefaultDirectRateLimiter,
}

impl AlpacaSource {
    /// Creates a new Alpaca source.
    ///
    /// Reads API keys from the `APCA_API_KEY_ID` and `APCA_API_SECRET_KEY`
    /// environment variables. Crypto bars do not require authentication, so
    /// both may be absent; setting only one of them is an error.
    pub fn new(id: impl Into<String>, config: AlpacaConfig) -> Result<Self, SourceInitError> {
        let keys = get_env_pair(KEY_ID_VAR, SECRET_KEY_VAR).context(MissingEnvVarSnafu)?;

        let mut headers = header::HeaderMap::new();
        match keys {
            Some((key_id, secret_key)) => {
                let (key_id, secret_key) = (
                    SecretString::new(key_id.into()),
                    SecretString::new(secret_key.into()),
                );
                headers.insert(
                    "APCA-API-KEY-ID",
                    header::HeaderValue::from_str(key_id.expose_secret())
                        .context(InvalidApiKeySnafu)?,
                );
                let mut secret = header::HeaderValue::from_str(secret_key.expose_secret())
                    .context(InvalidApiKeySnafu)?;
                secret.set_sensitive(true);
                headers.insert("APCA-API-SECRET-KEY", secret);
            }
            None => debug!("Alpaca keys not set, using unauthenticated requests"),
        }

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .context(ClientBuildSnafu)?;

        let per_minute = NonZeroU32::new(config.requests_per_minute).ok_or_else(|| {
            InvalidConfigSnafu {
                message: "alpaca requests_per_minute must be at least 1",
            }
            .build()
        })?;

        Ok(Self {
            id: id.into(),
            client,
            url: format!("{}{BARS_PATH}", config.base_url.trim_end_matches('/')),
            symbols: config.symbols,
            limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
        })
    }
}

#[async_trait]
impl BarSource for AlpacaSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn try_get(
        &self,
        request: &HistoricalDataRequest,
    ) -> Result<Option<Vec<Bar>>, SourceError> {
        // Alpaca only serves trade bars.
        if request.bar_kind != BarKind::Trade {
            return Ok(None);
        }
        let Some(symbol) = self.symbols.get(&request.symbol) else {
            debug!(source = %self.id, symbol = %request.symbol, "symbol not mapped");
            return Ok(None);
        };
        let Some(timeframe) = alpaca_timeframe(request.timeframe) else {
            debug!(source = %self.id, timeframe = %request.timeframe, "timeframe not offered");
            return Ok(None);
        };

        let mut all_bars: Vec<Bar> = Vec::new();
        let mut next_page_token: Option<String> = None;

        loop {
            let query_params = construct_params(
                symbol,
                &timeframe,
                request.start,
                request.end_exclusive,
                next_page_token.as_deref(),
            );

            self.limiter.until_ready().await;
            let response = self
                .client
                .get(&self.url)
                .query(&query_params)
                .send()
                .await
                .context(ReqwestSnafu)?;

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown API error".to_string());
                return ApiSnafu { status, message }.fail();
            }

            let page = response
                .json::<AlpacaResponse>()
                .await
                .context(ReqwestSnafu)?;

            // Merge the bars from the current page.
            for (_, bars) in page.bars {
                all_bars.extend(bars.into_iter().map(Bar::from));
            }

            match page.next_page_token {
                Some(token) => next_page_token = Some(token),
                None => break,
            }
        }

        debug!(source = %self.id, symbol, bars = all_bars.len(), "alpaca fetch done");
        Ok(normalize_bars(all_bars, request))
    }
}

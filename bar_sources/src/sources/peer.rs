//! Another bar-history node on the local network, queried over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use chrono::SecondsFormat;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use snafu::ResultExt;
use tracing::debug;

use crate::{
    models::{Bar, HistoricalDataRequest},
    sources::{
        ApiSnafu, BarSource, ClientBuildSnafu, InvalidConfigSnafu, ReqwestSnafu, SourceError,
        SourceInitError, normalize_bars,
    },
};

fn default_timeout_ms() -> u64 {
    2_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    /// e.g. `http://10.0.0.5:8080`
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

pub struct PeerSource {
    id: String,
    client: Client,
    base_url: Url,
}

impl PeerSource {
    pub fn new(id: impl Into<String>, config: PeerConfig) -> Result<Self, SourceInitError> {
        let base_url = Url::parse(&config.base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| {
                InvalidConfigSnafu {
                    message: format!("peer base_url {:?} is not an http(s) URL", config.base_url),
                }
                .build()
            })?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context(ClientBuildSnafu)?;
        Ok(Self {
            id: id.into(),
            client,
            base_url,
        })
    }

    /// `{base}/bars/{exchange}/{area}/{symbol}/{timeframe}/{kind}`, each
    /// segment percent-encoded.
    pub(crate) fn url_for(&self, request: &HistoricalDataRequest) -> Url {
        let timeframe = request.timeframe.name();
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend([
                "bars",
                request.exchange.as_str(),
                request.exchange_area.as_str(),
                request.symbol.as_str(),
                timeframe.as_str(),
                request.bar_kind.as_str(),
            ]);
        }
        url
    }
}

#[async_trait]
impl BarSource for PeerSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn try_get(
        &self,
        request: &HistoricalDataRequest,
    ) -> Result<Option<Vec<Bar>>, SourceError> {
        let response = self
            .client
            .get(self.url_for(request))
            .query(&[
                ("start", request.start.to_rfc3339_opts(SecondsFormat::Secs, true)),
                ("end", request.end_exclusive.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ])
            .send()
            .await
            .context(ReqwestSnafu)?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => {
                debug!(peer = %self.id, "peer has no data");
                Ok(None)
            }
            status if status.is_success() => {
                let bars = response.json::<Vec<Bar>>().await.context(ReqwestSnafu)?;
                Ok(normalize_bars(bars, request))
            }
            status => {
                let message = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown peer error".to_string());
                ApiSnafu {
                    status: status.as_u16(),
                    message,
                }
                .fail()
            }
        }
    }
}

//! Tier abstraction for historical bar sources.
//!
//! This module defines the [`BarSource`] trait, a unified interface for
//! fetching the bars of one chunk-aligned range from anywhere: a peer on the
//! local network, a directory on disk, an exchange REST API or a third-party
//! vendor. [`BarSink`] extends it for tiers that can also persist chunks
//! (the disk tier, used for write-back).
//!
//! A soft miss is `Ok(None)` and lets the caller fall through to the next
//! tier. `Err` is reserved for hard failures (network, auth, I/O) and stops
//! resolution of the chunk.
//!
//! # Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use bar_sources::models::{Bar, HistoricalDataRequest};
//! use bar_sources::sources::{BarSource, SourceError};
//!
//! struct EmptySource;
//!
//! #[async_trait]
//! impl BarSource for EmptySource {
//!     fn id(&self) -> &str {
//!         "empty"
//!     }
//!
//!     async fn try_get(
//!         &self,
//!         _request: &HistoricalDataRequest,
//!     ) -> Result<Option<Vec<Bar>>, SourceError> {
//!         Ok(None)
//!     }
//! }
//! ```

pub mod alpaca;
pub mod binance;
pub mod disk;
pub mod peer;
pub mod registry;

pub use registry::SourceRegistry;

use std::{fmt, path::PathBuf};

use async_trait::async_trait;
use shared_utils::env::MissingEnvVarError;
use snafu::{Backtrace, Snafu};

use crate::models::{Bar, HistoricalDataRequest};

/// Where a source sits in the resolution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TierCategory {
    LocalNetwork,
    Disk,
    Exchange,
    ThirdParty,
}

impl TierCategory {
    /// Remote tiers are the ones whose hits get written back to disk.
    pub const fn is_remote(self) -> bool {
        matches!(self, TierCategory::Exchange | TierCategory::ThirdParty)
    }
}

impl fmt::Display for TierCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TierCategory::LocalNetwork => "local-network",
            TierCategory::Disk => "disk",
            TierCategory::Exchange => "exchange",
            TierCategory::ThirdParty => "third-party",
        };
        f.write_str(s)
    }
}

/// Fetches the bars of one chunk-aligned range.
///
/// Implementations must return bars sorted by open time, inside
/// `[request.start, request.end_exclusive)`; [`normalize_bars`] does that for
/// sources whose upstream is sloppy about it.
#[async_trait]
pub trait BarSource: Send + Sync {
    /// Stable identifier, used in logs and recorded with written-back chunks.
    fn id(&self) -> &str;

    /// Returns `Ok(None)` when this source has no data for the range.
    async fn try_get(
        &self,
        request: &HistoricalDataRequest,
    ) -> Result<Option<Vec<Bar>>, SourceError>;
}

/// A source that can also persist a chunk.
#[async_trait]
pub trait BarSink: BarSource {
    /// Persists `bars` as the content of the chunk described by `request`.
    ///
    /// Must be atomic: a reader never observes a partially written chunk.
    async fn save(
        &self,
        source_id: &str,
        bars: &[Bar],
        request: &HistoricalDataRequest,
    ) -> Result<(), SourceError>;
}

/// Sorts by open time, drops duplicates and anything outside the request
/// range. Empty input becomes `None`.
pub fn normalize_bars(mut bars: Vec<Bar>, request: &HistoricalDataRequest) -> Option<Vec<Bar>> {
    bars.retain(|b| b.open_time >= request.start && b.open_time < request.end_exclusive);
    bars.sort_by_key(|b| b.open_time);
    bars.dedup_by_key(|b| b.open_time);
    if bars.is_empty() { None } else { Some(bars) }
}

/// Errors that can occur during the creation of a source instance.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SourceInitError {
    /// missed environment variable.
    #[snafu(display("Missing environment variable: {source}"))]
    MissingEnvVar {
        source: MissingEnvVarError,
        backtrace: Backtrace,
    },

    /// failed to init reqwest client
    #[snafu(display("Failed to build HTTP client: {source}"))]
    ClientBuild {
        source: reqwest::Error,
        backtrace: Backtrace,
    },

    /// API key contains invalid characters.
    #[snafu(display("Invalid API key format: {source}"))]
    InvalidApiKey {
        source: reqwest::header::InvalidHeaderValue,
        backtrace: Backtrace,
    },

    /// A configured value cannot be used.
    #[snafu(display("Invalid source configuration: {message}"))]
    InvalidConfig {
        message: String,
        backtrace: Backtrace,
    },
}

/// Hard failures of a [`BarSource`]. A plain miss is never an error.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SourceError {
    /// An error during an API request (e.g., network failure, timeout).
    #[snafu(display("API request failed: {source}"))]
    Reqwest {
        source: reqwest::Error,
        backtrace: Backtrace,
    },

    /// The upstream API answered with an error status.
    #[snafu(display("API error (HTTP {status}): {message}"))]
    Api {
        status: u16,
        message: String,
        backtrace: Backtrace,
    },

    /// The request cannot be expressed for this source.
    #[snafu(display("Invalid parameters for source: {message}"))]
    Validation {
        message: String,
        backtrace: Backtrace,
    },

    /// The upstream answered with a body we could not interpret.
    #[snafu(display("Malformed response: {message}"))]
    Decode {
        message: String,
        backtrace: Backtrace,
    },

    /// Local filesystem failure.
    #[snafu(display("I/O error on {}: {source}", path.display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// A chunk could not be encoded for storage.
    #[snafu(display("Chunk encoding failed for {}: {message}", path.display()))]
    Codec {
        path: PathBuf,
        message: String,
        backtrace: Backtrace,
    },

    /// An error during source configuration or initialization.
    #[snafu(display("Source initialization error: {source}"))]
    Init {
        #[snafu(backtrace)]
        source: SourceInitError,
    },
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::models::TimeFrame;

    struct FixedSource(Vec<Bar>);
    struct FailingSource;

    #[async_trait]
    impl BarSource for FixedSource {
        fn id(&self) -> &str {
            "fixed"
        }

        async fn try_get(
            &self,
            request: &HistoricalDataRequest,
        ) -> Result<Option<Vec<Bar>>, SourceError> {
            Ok(normalize_bars(self.0.clone(), request))
        }
    }

    #[async_trait]
    impl BarSource for FailingSource {
        fn id(&self) -> &str {
            "failing"
        }

        async fn try_get(
            &self,
            _request: &HistoricalDataRequest,
        ) -> Result<Option<Vec<Bar>>, SourceError> {
            ApiSnafu {
                status: 503u16,
                message: "unavailable",
            }
            .fail()
        }
    }

    fn bar_at(minute: i64) -> Bar {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute);
        Bar {
            open_time: t,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 0.0,
            trade_count: None,
            vwap: None,
        }
    }

    fn request() -> HistoricalDataRequest {
        HistoricalDataRequest::new(
            "binance",
            "spot",
            "BTCUSDT",
            TimeFrame::M1,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 3, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn sources_are_usable_as_trait_objects() {
        let sources: Vec<Arc<dyn BarSource>> = vec![
            Arc::new(FixedSource(vec![bar_at(2), bar_at(0), bar_at(0), bar_at(5)])),
            Arc::new(FailingSource),
        ];

        let bars = sources[0].try_get(&request()).await.unwrap().unwrap();
        let minutes: Vec<_> = bars.iter().map(|b| b.open_time).collect();
        assert_eq!(minutes, vec![bar_at(0).open_time, bar_at(2).open_time]);

        let err = sources[1].try_get(&request()).await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn normalize_empty_is_none() {
        assert!(normalize_bars(vec![bar_at(10)], &request()).is_none());
    }

    #[test]
    fn only_exchange_and_third_party_are_remote() {
        assert!(TierCategory::Exchange.is_remote());
        assert!(TierCategory::ThirdParty.is_remote());
        assert!(!TierCategory::Disk.is_remote());
        assert!(!TierCategory::LocalNetwork.is_remote());
    }
}

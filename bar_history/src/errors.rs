//! Error types for chunk arithmetic and query resolution.

use bar_sources::{SourceError, SourceInitError, TierCategory, TimeFrame};
use chrono::{DateTime, Utc};
use shared_utils::config::ConfigError;

use crate::chunks::ChunkDescriptor;

/// Calendar and range errors. These are usage errors: never retried, never
/// coerced into a nearby valid range.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    /// No chunk rule exists for this timeframe family.
    #[error("no chunk rule for timeframe {0}")]
    UnsupportedTimeFrame(TimeFrame),

    /// The range is not exactly one canonical chunk, or its ends are not bar
    /// boundaries.
    #[error("[{start}, {end}) is not aligned to {timeframe} chunk boundaries")]
    ChunkAlignment {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        timeframe: TimeFrame,
    },

    #[error("empty or inverted range [{start}, {end})")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// A trim asked for bars outside the result it was applied to.
    #[error("trim to [{start}, {end}) exceeds result bounds [{bound_start}, {bound_end})")]
    TrimOutOfBounds {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        bound_start: DateTime<Utc>,
        bound_end: DateTime<Utc>,
    },

    /// A trim boundary is not a whole number of bars from the result start.
    #[error("{at} is not a whole number of {timeframe} bars from the result start")]
    Misaligned {
        at: DateTime<Utc>,
        timeframe: TimeFrame,
    },

    /// Bar at `index` is out of order, duplicated or outside the range.
    #[error("bar {index} is out of order or outside the chunk range")]
    Unordered { index: usize },

    /// Bar at `index` does not open on a bar boundary of its timeframe.
    #[error("bar {index} opens at {at}, which is not a {timeframe} bar boundary")]
    OffGrid {
        index: usize,
        at: DateTime<Utc>,
        timeframe: TimeFrame,
    },
}

/// A failed query. The variant names the stage that failed.
#[derive(thiserror::Error, Debug)]
pub enum HistoryError {
    /// The request could not be decomposed into chunks.
    #[error("classify: {0}")]
    Classify(#[source] ChunkError),

    /// A tier failed hard while resolving `chunk`. Later tiers were not tried.
    #[error("resolve {chunk} via {category} source {tier}: {source}")]
    Resolve {
        chunk: ChunkDescriptor,
        tier: String,
        category: TierCategory,
        source: SourceError,
    },

    /// A tier answered with bars that do not fit the chunk.
    #[error("resolve {chunk} via {tier}: invalid bars: {source}")]
    InvalidBars {
        chunk: ChunkDescriptor,
        tier: String,
        source: ChunkError,
    },

    /// Per-chunk results could not be joined or trimmed.
    #[error("aggregate: {0}")]
    Aggregate(#[source] ChunkError),

    #[error("query cancelled")]
    Cancelled,

    /// Persisting a fetched chunk failed. Only ever logged; the fetched bars
    /// are still returned.
    #[error("write-back of {chunk} to {sink} failed: {reason}")]
    WriteBack {
        chunk: ChunkDescriptor,
        sink: String,
        reason: String,
    },
}

impl HistoryError {
    /// The chunk this error is about, if it is about one.
    pub fn chunk(&self) -> Option<&ChunkDescriptor> {
        match self {
            HistoryError::Resolve { chunk, .. }
            | HistoryError::InvalidBars { chunk, .. }
            | HistoryError::WriteBack { chunk, .. } => Some(chunk),
            _ => None,
        }
    }
}

/// Failure to assemble an engine from configuration.
#[derive(thiserror::Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to initialise source {id}: {source}")]
    Source { id: String, source: SourceInitError },
}

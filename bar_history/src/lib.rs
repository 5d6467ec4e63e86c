//! Tiered historical bar retrieval.
//!
//! A query for bars over an arbitrary range is split into canonical
//! calendar-aligned chunks ([`chunks`]). Each chunk is resolved through the
//! memory cache and then the configured source tiers ([`chain`]); bars
//! fetched from the network are written back to disk. The per-chunk results
//! are joined in order and trimmed to the requested range ([`orchestrator`]).

pub mod chain;
pub mod chunks;
pub mod config;
pub mod errors;
pub mod memory;
pub mod orchestrator;
pub mod result;
pub mod series;

pub use chain::TierResolutionChain;
pub use chunks::{ChunkClassifier, ChunkDescriptor, ChunkIter, Clock, FixedClock, SystemClock};
pub use config::EngineConfig;
pub use errors::{BuildError, ChunkError, HistoryError};
pub use memory::{MemoryCache, MemoryCacheKey, MemoryCacheOptions};
pub use orchestrator::{ChunkMode, HistoricalBars, HistoricalBarsBuilder, QueryOptions};
pub use result::ChunkResult;
pub use series::{AspectSeries, BarSeries};

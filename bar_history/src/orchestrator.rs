use std::sync::Arc;

use bar_sources::{BarAspect, HistoricalDataRequest, TimeFrame, sources::SourceRegistry};
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt, stream};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    chain::TierResolutionChain,
    chunks::{ChunkClassifier, ChunkDescriptor, Clock, SystemClock},
    errors::{ChunkError, HistoryError},
    memory::MemoryCache,
    result::ChunkResult,
    series::{AspectSeries, BarSeries},
};

pub const DEFAULT_MAX_CONCURRENT_CHUNKS: usize = 4;

/// How a query range maps onto chunks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChunkMode {
    /// Decompose into whatever chunks the classifier picks.
    #[default]
    Any,
    /// Decompose into short chunks only.
    ShortOnly,
    /// The range must be exactly one short chunk.
    ExactShort,
    /// The range must be exactly one long chunk.
    ExactLong,
}

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub chunk_mode: ChunkMode,
    pub use_memory_cache: bool,
    pub cancel: Option<CancellationToken>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            chunk_mode: ChunkMode::Any,
            use_memory_cache: true,
            cancel: None,
        }
    }
}

impl QueryOptions {
    pub fn with_chunk_mode(mut self, chunk_mode: ChunkMode) -> Self {
        self.chunk_mode = chunk_mode;
        self
    }

    pub fn without_memory_cache(mut self) -> Self {
        self.use_memory_cache = false;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Entry point for historical bar queries.
///
/// A query range is split into canonical chunks; chunks are resolved
/// concurrently (up to `max_concurrent_chunks` at a time) through the
/// [`TierResolutionChain`], joined in chunk order and trimmed back to the
/// requested range.
pub struct HistoricalBars {
    classifier: ChunkClassifier,
    chain: TierResolutionChain,
    max_concurrent_chunks: usize,
}

impl HistoricalBars {
    /// An engine over `registry` with a fresh unbounded memory cache and the
    /// system clock.
    pub fn new(registry: SourceRegistry) -> Self {
        HistoricalBarsBuilder::new(registry).build()
    }

    pub fn builder(registry: SourceRegistry) -> HistoricalBarsBuilder {
        HistoricalBarsBuilder::new(registry)
    }

    pub fn classifier(&self) -> &ChunkClassifier {
        &self.classifier
    }

    pub fn memory_cache(&self) -> &Arc<MemoryCache> {
        self.chain.memory()
    }

    pub fn registry(&self) -> &SourceRegistry {
        self.chain.registry()
    }

    /// Whether `result` holds every bar that should exist by now.
    pub fn is_up_to_date(&self, result: &ChunkResult) -> bool {
        result.is_up_to_date_at(self.classifier.now())
    }

    /// The chunks a query over `request` would resolve.
    pub fn chunks_for(
        &self,
        request: &HistoricalDataRequest,
        short_only: bool,
    ) -> Result<Vec<ChunkDescriptor>, HistoryError> {
        self.validate(request)?;
        let chunks = self
            .classifier
            .chunks(request.start, request.end_exclusive, request.timeframe, short_only)
            .map_err(HistoryError::Classify)?;
        Ok(chunks.collect())
    }

    /// Bars for `[request.start, request.end_exclusive)`.
    ///
    /// `Ok(None)` when no tier had data for any chunk of the range. Chunks
    /// some tiers lacked contribute no bars.
    pub async fn get(
        &self,
        request: &HistoricalDataRequest,
        options: &QueryOptions,
    ) -> Result<Option<ChunkResult>, HistoryError> {
        self.validate(request)?;
        let descriptors = self.plan(request, options.chunk_mode)?;
        let cancel = options.cancel.clone().unwrap_or_default();
        debug!(
            symbol = %request.symbol,
            timeframe = %request.timeframe,
            chunks = descriptors.len(),
            "resolving query"
        );

        let resolved: Vec<Option<ChunkResult>> = stream::iter(descriptors.iter().copied())
            .map(|chunk| {
                let chunk_request = request.with_range(chunk.start, chunk.end_exclusive);
                let cancel = &cancel;
                async move {
                    self.chain
                        .resolve(&chunk_request, chunk, options.use_memory_cache, cancel)
                        .await
                }
            })
            .buffered(self.max_concurrent_chunks)
            .try_collect()
            .await?;

        if resolved.iter().all(Option::is_none) {
            return Ok(None);
        }

        let parts = descriptors
            .iter()
            .zip(resolved)
            .map(|(chunk, result)| match result {
                Some(result) => Ok(result),
                None => ChunkResult::empty(request.timeframe, chunk.start, chunk.end_exclusive),
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(HistoryError::Aggregate)?;

        let joined = ChunkResult::concat(parts).map_err(HistoryError::Aggregate)?;
        let trimmed = joined
            .trim(request.start, request.end_exclusive)
            .map_err(HistoryError::Aggregate)?;
        Ok(Some(trimmed))
    }

    pub fn series(
        self: &Arc<Self>,
        exchange: &str,
        exchange_area: &str,
        symbol: &str,
        timeframe: TimeFrame,
    ) -> BarSeries {
        BarSeries::new(Arc::clone(self), exchange, exchange_area, symbol, timeframe)
    }

    pub fn aspect_series(
        self: &Arc<Self>,
        exchange: &str,
        exchange_area: &str,
        symbol: &str,
        timeframe: TimeFrame,
        aspect: BarAspect,
    ) -> AspectSeries {
        self.series(exchange, exchange_area, symbol, timeframe)
            .aspect(aspect)
    }

    /// Rejects empty ranges and ends that are not bar boundaries.
    fn validate(&self, request: &HistoricalDataRequest) -> Result<(), HistoryError> {
        let (start, end) = (request.start, request.end_exclusive);
        if end <= start {
            return Err(HistoryError::Classify(ChunkError::InvalidRange { start, end }));
        }
        let tf = request.timeframe;
        if !tf.is_aligned(start) || !tf.is_aligned(end) {
            return Err(HistoryError::Classify(ChunkError::ChunkAlignment {
                start,
                end,
                timeframe: tf,
            }));
        }
        Ok(())
    }

    fn plan(
        &self,
        request: &HistoricalDataRequest,
        mode: ChunkMode,
    ) -> Result<Vec<ChunkDescriptor>, HistoryError> {
        let (start, end, tf) = (request.start, request.end_exclusive, request.timeframe);
        let exact = |range: (DateTime<Utc>, DateTime<Utc>),
                     is_long: bool|
         -> Result<Vec<ChunkDescriptor>, ChunkError> {
            if range == (start, end) {
                Ok(vec![ChunkDescriptor {
                    start,
                    end_exclusive: end,
                    is_long,
                }])
            } else {
                Err(ChunkError::ChunkAlignment {
                    start,
                    end,
                    timeframe: tf,
                })
            }
        };

        let planned = match mode {
            ChunkMode::ExactShort => self
                .classifier
                .short_range_for_date(start, tf)
                .and_then(|range| exact(range, false)),
            ChunkMode::ExactLong => self
                .classifier
                .long_range_for_date(start, tf)
                .and_then(|range| exact(range, true)),
            ChunkMode::Any | ChunkMode::ShortOnly => self
                .classifier
                .chunks(start, end, tf, mode == ChunkMode::ShortOnly)
                .map(|chunks| chunks.collect()),
        };
        planned.map_err(HistoryError::Classify)
    }
}

/// Assembles a [`HistoricalBars`].
pub struct HistoricalBarsBuilder {
    registry: SourceRegistry,
    memory: Option<Arc<MemoryCache>>,
    clock: Option<Arc<dyn Clock>>,
    max_concurrent_chunks: usize,
}

impl HistoricalBarsBuilder {
    pub fn new(registry: SourceRegistry) -> Self {
        Self {
            registry,
            memory: None,
            clock: None,
            max_concurrent_chunks: DEFAULT_MAX_CONCURRENT_CHUNKS,
        }
    }

    /// Shares `memory` with other engines instead of creating a private cache.
    pub fn memory_cache(mut self, memory: Arc<MemoryCache>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Values below one are raised to one.
    pub fn max_concurrent_chunks(mut self, n: usize) -> Self {
        self.max_concurrent_chunks = n.max(1);
        self
    }

    pub fn build(self) -> HistoricalBars {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let memory = self.memory.unwrap_or_default();
        HistoricalBars {
            classifier: ChunkClassifier::new(clock),
            chain: TierResolutionChain::new(Arc::new(self.registry), memory),
            max_concurrent_chunks: self.max_concurrent_chunks,
        }
    }
}

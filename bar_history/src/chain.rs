//! Resolution of one chunk through the tiers.

use std::sync::Arc;

use bar_sources::{BarSink, HistoricalDataRequest, sources::SourceRegistry};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    chunks::ChunkDescriptor,
    errors::HistoryError,
    memory::{MemoryCache, MemoryCacheKey},
    result::ChunkResult,
};

/// Asks the tiers for one chunk, strictly one after another:
///
/// 1. the memory cache, when enabled for the query
/// 2. local-network peers
/// 3. disk sources, in registration order
/// 4. the exchange source for the request's exchange key
/// 5. third-party sources for that key, in registration order
///
/// The first tier with data wins. Bars from steps 4 and 5 are written back
/// to the registry's write-back sink before they are returned.
pub struct TierResolutionChain {
    registry: Arc<SourceRegistry>,
    memory: Arc<MemoryCache>,
}

impl TierResolutionChain {
    pub fn new(registry: Arc<SourceRegistry>, memory: Arc<MemoryCache>) -> Self {
        Self { registry, memory }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn memory(&self) -> &Arc<MemoryCache> {
        &self.memory
    }

    /// Resolves `request`, whose range must be exactly `chunk`.
    ///
    /// `Ok(None)` when no tier has data for the chunk.
    #[instrument(skip_all, fields(symbol = %request.symbol, timeframe = %request.timeframe, %chunk))]
    pub async fn resolve(
        &self,
        request: &HistoricalDataRequest,
        chunk: ChunkDescriptor,
        use_memory: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<ChunkResult>, HistoryError> {
        let key = MemoryCacheKey::for_request(request);
        if use_memory {
            if let Some(hit) = self.memory.get(&key) {
                debug!("memory cache hit");
                return Ok(Some(hit));
            }
        }

        for (category, source) in self.registry.tiers_for(&request.exchange) {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(HistoryError::Cancelled),
                outcome = source.try_get(request) => outcome,
            };

            let bars = match outcome {
                Ok(Some(bars)) => bars,
                Ok(None) => {
                    debug!(%category, tier = source.id(), "miss");
                    continue;
                }
                Err(e) => {
                    return Err(HistoryError::Resolve {
                        chunk,
                        tier: source.id().to_string(),
                        category,
                        source: e,
                    });
                }
            };

            let result = ChunkResult::new(request.timeframe, chunk.start, chunk.end_exclusive, bars)
                .map_err(|e| HistoryError::InvalidBars {
                    chunk,
                    tier: source.id().to_string(),
                    source: e,
                })?;

            if category.is_remote() {
                info!(%category, tier = source.id(), bars = result.len(), "fetched from remote tier");
                match self.write_back(request, chunk, source.id(), &result, cancel).await {
                    Ok(()) => {}
                    Err(HistoryError::Cancelled) => return Err(HistoryError::Cancelled),
                    Err(e) => warn!(error = %e, "write-back failed, returning fetched bars"),
                }
            } else {
                debug!(%category, tier = source.id(), bars = result.len(), "hit");
            }

            if use_memory {
                self.memory.insert(key, result.clone(), chunk.is_long);
            }
            return Ok(Some(result));
        }

        debug!("no tier has this chunk");
        Ok(None)
    }

    /// Persists a remote hit. The save runs on its own task and is awaited,
    /// so it finishes even if the query future is dropped mid-write.
    async fn write_back(
        &self,
        request: &HistoricalDataRequest,
        chunk: ChunkDescriptor,
        source_id: &str,
        result: &ChunkResult,
        cancel: &CancellationToken,
    ) -> Result<(), HistoryError> {
        let Some(sink) = self.registry.write_back() else {
            return Ok(());
        };
        if cancel.is_cancelled() {
            return Err(HistoryError::Cancelled);
        }

        let sink: Arc<dyn BarSink> = Arc::clone(sink);
        let sink_id = sink.id().to_string();
        let request = request.clone();
        let source_id = source_id.to_string();
        let bars = result.shared_values();

        let handle = tokio::spawn(async move { sink.save(&source_id, &bars, &request).await });
        let reason = match handle.await {
            Ok(Ok(())) => {
                debug!(sink = %sink_id, "chunk written back");
                return Ok(());
            }
            Ok(Err(e)) => e.to_string(),
            Err(join) => join.to_string(),
        };
        Err(HistoryError::WriteBack {
            chunk,
            sink: sink_id,
            reason,
        })
    }
}

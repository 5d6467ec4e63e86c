//! Process-wide chunk cache shared by all queries of one engine.
//!
//! Chunk content for a key is deterministic, so concurrent writers racing on
//! the same key only duplicate work; the last writer wins.

use std::{
    sync::{PoisonError, RwLock},
    time::{Duration, Instant},
};

use bar_sources::{BarKind, HistoricalDataRequest, TimeFrame};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Deserialize;

use crate::result::ChunkResult;

/// Identity of one cached chunk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoryCacheKey {
    pub value_kind: BarKind,
    pub exchange: String,
    pub exchange_area: String,
    pub symbol: String,
    pub timeframe: TimeFrame,
    pub start: DateTime<Utc>,
    pub end_exclusive: DateTime<Utc>,
}

impl MemoryCacheKey {
    /// Key for a chunk-aligned request.
    pub fn for_request(request: &HistoricalDataRequest) -> Self {
        Self {
            value_kind: request.bar_kind,
            exchange: request.exchange.to_ascii_lowercase(),
            exchange_area: request.exchange_area.to_ascii_lowercase(),
            symbol: request.symbol.clone(),
            timeframe: request.timeframe,
            start: request.start,
            end_exclusive: request.end_exclusive,
        }
    }
}

/// Bounds for the cache. Both default to unbounded.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MemoryCacheOptions {
    /// When full, the oldest insertion is evicted first.
    pub max_entries: Option<usize>,

    /// Lifetime of short (recent) chunks. Long chunks never expire.
    #[serde(rename = "short_chunk_ttl_secs", deserialize_with = "opt_secs::deserialize")]
    pub short_chunk_ttl: Option<Duration>,
}

mod opt_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}

#[derive(Debug)]
struct Entry {
    result: ChunkResult,
    is_long: bool,
    inserted_at: Instant,
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<IndexMap<MemoryCacheKey, Entry>>,
    options: MemoryCacheOptions,
}

impl MemoryCache {
    /// An unbounded cache.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: MemoryCacheOptions) -> Self {
        Self {
            entries: RwLock::default(),
            options,
        }
    }

    pub fn options(&self) -> &MemoryCacheOptions {
        &self.options
    }

    fn is_expired(&self, entry: &Entry, now: Instant) -> bool {
        match self.options.short_chunk_ttl {
            Some(ttl) if !entry.is_long => now.duration_since(entry.inserted_at) >= ttl,
            _ => false,
        }
    }

    pub fn get(&self, key: &MemoryCacheKey) -> Option<ChunkResult> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let entry = entries.get(key)?;
        if self.is_expired(entry, Instant::now()) {
            return None;
        }
        Some(entry.result.clone())
    }

    /// Inserts or replaces the entry for `key`. A replaced entry counts as a
    /// new insertion for eviction order.
    pub fn insert(&self, key: MemoryCacheKey, result: ChunkResult, is_long: bool) {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.shift_remove(&key);
        if self.options.short_chunk_ttl.is_some() {
            entries.retain(|_, e| !self.is_expired(e, now));
        }
        entries.insert(
            key,
            Entry {
                result,
                is_long,
                inserted_at: now,
            },
        );
        if let Some(max) = self.options.max_entries {
            while entries.len() > max {
                entries.shift_remove_index(0);
            }
        }
    }

    pub fn remove(&self, key: &MemoryCacheKey) -> Option<ChunkResult> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .shift_remove(key)
            .map(|e| e.result)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

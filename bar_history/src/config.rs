//! Engine configuration file.
//!
//! ```toml
//! [engine]
//! max_concurrent_chunks = 4
//!
//! [memory_cache]
//! max_entries = 10000
//! short_chunk_ttl_secs = 300
//!
//! [[local_network]]
//! id = "peer-a"
//! base_url = "http://10.0.0.5:8080"
//!
//! [[disk]]
//! id = "disk"
//! root = "data/bars"
//!
//! [exchanges.binance.exchange]
//! source = "binance"
//!
//! [[exchanges.binance.third_party]]
//! source = "alpaca"
//! symbols = { BTCUSDT = "BTC/USD" }
//! ```
//!
//! Exchange keys are normalised to lowercase. The first writable disk entry
//! receives write-backs.

use std::{path::PathBuf, sync::Arc};

use bar_sources::sources::{
    BarSource, SourceInitError, SourceRegistry,
    alpaca::{AlpacaConfig, AlpacaSource},
    binance::{BinanceConfig, BinanceSource},
    disk::DiskSource,
    peer::{PeerConfig, PeerSource},
};
use indexmap::IndexMap;
use serde::Deserialize;
use shared_utils::config::{ConfigError, load_toml, parse_toml};
use tracing::info;

use crate::{
    errors::BuildError,
    memory::{MemoryCache, MemoryCacheOptions},
    orchestrator::{DEFAULT_MAX_CONCURRENT_CHUNKS, HistoricalBars},
};

fn default_max_concurrent_chunks() -> usize {
    DEFAULT_MAX_CONCURRENT_CHUNKS
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineSection {
    #[serde(default = "default_max_concurrent_chunks")]
    pub max_concurrent_chunks: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_concurrent_chunks: default_max_concurrent_chunks(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PeerEntry {
    pub id: String,
    #[serde(flatten)]
    pub config: PeerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiskEntry {
    pub id: String,
    pub root: PathBuf,
    /// Read-only disk tiers never receive write-backs.
    #[serde(default = "default_true")]
    pub writable: bool,
}

/// A network source, tagged by `source = "..."`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum NetworkSourceConfig {
    Binance(BinanceConfig),
    Alpaca(AlpacaConfig),
}

impl NetworkSourceConfig {
    fn name(&self) -> &'static str {
        match self {
            NetworkSourceConfig::Binance(_) => "binance",
            NetworkSourceConfig::Alpaca(_) => "alpaca",
        }
    }

    fn build(self, id: String) -> Result<Arc<dyn BarSource>, SourceInitError> {
        Ok(match self {
            NetworkSourceConfig::Binance(config) => Arc::new(BinanceSource::new(id, config)?),
            NetworkSourceConfig::Alpaca(config) => Arc::new(AlpacaSource::new(id, config)?),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExchangeEntry {
    pub exchange: Option<NetworkSourceConfig>,
    #[serde(default)]
    pub third_party: Vec<NetworkSourceConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub memory_cache: MemoryCacheOptions,
    #[serde(default)]
    pub local_network: Vec<PeerEntry>,
    #[serde(default)]
    pub disk: Vec<DiskEntry>,
    #[serde(default)]
    pub exchanges: IndexMap<String, ExchangeEntry>,
}

impl EngineConfig {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let config: Self = load_toml(path.into())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = parse_toml(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.max_concurrent_chunks == 0 {
            return Err(ConfigError::Invalid(
                "engine.max_concurrent_chunks must be at least 1".into(),
            ));
        }
        if self.memory_cache.max_entries == Some(0) {
            return Err(ConfigError::Invalid(
                "memory_cache.max_entries must be at least 1".into(),
            ));
        }
        let mut ids: Vec<&str> = self
            .local_network
            .iter()
            .map(|p| p.id.as_str())
            .chain(self.disk.iter().map(|d| d.id.as_str()))
            .collect();
        ids.sort_unstable();
        if let Some(pair) = ids.windows(2).find(|w| w[0] == w[1]) {
            return Err(ConfigError::Invalid(format!("duplicate source id {:?}", pair[0])));
        }
        // Exchange names are matched case-insensitively.
        let mut names: Vec<(String, &str)> = self
            .exchanges
            .keys()
            .map(|name| (name.to_ascii_lowercase(), name.as_str()))
            .collect();
        names.sort_unstable();
        if let Some(pair) = names.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(ConfigError::Invalid(format!(
                "exchanges {:?} and {:?} differ only in case",
                pair[0].1, pair[1].1
            )));
        }
        Ok(())
    }

    /// Instantiates every configured source.
    pub fn build_registry(&self) -> Result<SourceRegistry, BuildError> {
        let mut registry = SourceRegistry::new();

        for peer in &self.local_network {
            let source = PeerSource::new(peer.id.clone(), peer.config.clone()).map_err(|source| {
                BuildError::Source {
                    id: peer.id.clone(),
                    source,
                }
            })?;
            registry.add_local_network(Arc::new(source));
        }

        for disk in &self.disk {
            let source = Arc::new(DiskSource::new(disk.id.clone(), disk.root.clone()));
            if disk.writable {
                registry.add_disk_sink(source);
            } else {
                registry.add_disk(source);
            }
        }

        for (key, entry) in &self.exchanges {
            let key = key.to_ascii_lowercase();
            if let Some(exchange) = entry.exchange.clone() {
                let id = format!("{key}:{}", exchange.name());
                let source = exchange
                    .build(id.clone())
                    .map_err(|source| BuildError::Source { id, source })?;
                registry.set_exchange(&key, source);
            }
            for (i, third_party) in entry.third_party.iter().cloned().enumerate() {
                let id = format!("{key}:{}#{i}", third_party.name());
                let source = third_party
                    .build(id.clone())
                    .map_err(|source| BuildError::Source { id, source })?;
                registry.add_third_party(&key, source);
            }
        }

        Ok(registry)
    }

    /// A ready engine with its own memory cache.
    pub fn build_engine(&self) -> Result<HistoricalBars, BuildError> {
        self.validate()?;
        let registry = self.build_registry()?;
        info!(
            local_network = registry.local_network().len(),
            disk = registry.disk().len(),
            exchanges = self.exchanges.len(),
            "engine configured"
        );
        Ok(HistoricalBars::builder(registry)
            .memory_cache(Arc::new(MemoryCache::with_options(self.memory_cache.clone())))
            .max_concurrent_chunks(self.engine.max_concurrent_chunks)
            .build())
    }
}

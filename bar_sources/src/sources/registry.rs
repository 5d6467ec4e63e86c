use std::sync::Arc;

use indexmap::IndexMap;

use crate::sources::{BarSink, BarSource, TierCategory};

/// The configured sources, grouped by tier.
///
/// Exchange and third-party sources are keyed by exchange key (lowercase).
/// At most one exchange source exists per key; third-party sources keep their
/// registration order.
#[derive(Default, Clone)]
pub struct SourceRegistry {
    local_network: Vec<Arc<dyn BarSource>>,
    disk: Vec<Arc<dyn BarSource>>,
    exchange: IndexMap<String, Arc<dyn BarSource>>,
    third_party: IndexMap<String, Vec<Arc<dyn BarSource>>>,
    write_back: Option<Arc<dyn BarSink>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_local_network(&mut self, source: Arc<dyn BarSource>) -> &mut Self {
        self.local_network.push(source);
        self
    }

    /// Adds a read-only disk source.
    pub fn add_disk(&mut self, source: Arc<dyn BarSource>) -> &mut Self {
        self.disk.push(source);
        self
    }

    /// Adds a disk source that can also persist chunks. The first one added
    /// becomes the write-back sink.
    pub fn add_disk_sink<S: BarSink + 'static>(&mut self, sink: Arc<S>) -> &mut Self {
        if self.write_back.is_none() {
            self.write_back = Some(sink.clone());
        }
        self.disk.push(sink);
        self
    }

    /// Sets the exchange source for `exchange`, returning the one it replaces.
    pub fn set_exchange(
        &mut self,
        exchange: &str,
        source: Arc<dyn BarSource>,
    ) -> Option<Arc<dyn BarSource>> {
        self.exchange.insert(exchange.to_ascii_lowercase(), source)
    }

    pub fn add_third_party(&mut self, exchange: &str, source: Arc<dyn BarSource>) -> &mut Self {
        self.third_party
            .entry(exchange.to_ascii_lowercase())
            .or_default()
            .push(source);
        self
    }

    pub fn local_network(&self) -> &[Arc<dyn BarSource>] {
        &self.local_network
    }

    pub fn disk(&self) -> &[Arc<dyn BarSource>] {
        &self.disk
    }

    pub fn exchange(&self, exchange: &str) -> Option<&Arc<dyn BarSource>> {
        self.exchange.get(&exchange.to_ascii_lowercase())
    }

    pub fn third_party(&self, exchange: &str) -> &[Arc<dyn BarSource>] {
        self.third_party
            .get(&exchange.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn write_back(&self) -> Option<&Arc<dyn BarSink>> {
        self.write_back.as_ref()
    }

    /// Every source that may serve `exchange`, in resolution order.
    pub fn tiers_for<'a>(
        &'a self,
        exchange: &str,
    ) -> impl Iterator<Item = (TierCategory, &'a Arc<dyn BarSource>)> + 'a {
        let local = self
            .local_network
            .iter()
            .map(|s| (TierCategory::LocalNetwork, s));
        let disk = self.disk.iter().map(|s| (TierCategory::Disk, s));
        let exchange_source = self
            .exchange(exchange)
            .into_iter()
            .map(|s| (TierCategory::Exchange, s));
        let third_party = self
            .third_party(exchange)
            .iter()
            .map(|s| (TierCategory::ThirdParty, s));
        local.chain(disk).chain(exchange_source).chain(third_party)
    }
}

//! Read-only views bound to one instrument and timeframe.
//!
//! Views keep no state of their own beyond the binding; every call goes
//! through [`HistoricalBars::get`]. "No data" comes back as an empty vector.

use std::sync::Arc;

use bar_sources::{Bar, BarAspect, BarKind, HistoricalDataRequest, TimeFrame};
use chrono::{DateTime, Utc};

use crate::{
    errors::HistoryError,
    orchestrator::{HistoricalBars, QueryOptions},
};

#[derive(Clone)]
pub struct BarSeries {
    engine: Arc<HistoricalBars>,
    exchange: String,
    exchange_area: String,
    symbol: String,
    timeframe: TimeFrame,
    bar_kind: BarKind,
}

impl BarSeries {
    pub fn new(
        engine: Arc<HistoricalBars>,
        exchange: &str,
        exchange_area: &str,
        symbol: &str,
        timeframe: TimeFrame,
    ) -> Self {
        Self {
            engine,
            exchange: exchange.to_string(),
            exchange_area: exchange_area.to_string(),
            symbol: symbol.to_string(),
            timeframe,
            bar_kind: BarKind::Trade,
        }
    }

    pub fn with_bar_kind(mut self, bar_kind: BarKind) -> Self {
        self.bar_kind = bar_kind;
        self
    }

    /// Projects this series onto one scalar aspect.
    pub fn aspect(self, aspect: BarAspect) -> AspectSeries {
        AspectSeries {
            bars: self,
            aspect,
        }
    }

    pub fn timeframe(&self) -> TimeFrame {
        self.timeframe
    }

    fn request(&self, start: DateTime<Utc>, end_exclusive: DateTime<Utc>) -> HistoricalDataRequest {
        HistoricalDataRequest::new(
            self.exchange.as_str(),
            self.exchange_area.as_str(),
            self.symbol.as_str(),
            self.timeframe,
            start,
            end_exclusive,
        )
        .with_bar_kind(self.bar_kind)
    }

    pub async fn get(
        &self,
        start: DateTime<Utc>,
        end_exclusive: DateTime<Utc>,
    ) -> Result<Vec<Bar>, HistoryError> {
        let request = self.request(start, end_exclusive);
        let result = self.engine.get(&request, &QueryOptions::default()).await?;
        Ok(result.map(|r| r.values().to_vec()).unwrap_or_default())
    }
}

/// One scalar per bar, e.g. close prices.
#[derive(Clone)]
pub struct AspectSeries {
    bars: BarSeries,
    aspect: BarAspect,
}

impl AspectSeries {
    pub fn aspect(&self) -> BarAspect {
        self.aspect
    }

    pub async fn get(
        &self,
        start: DateTime<Utc>,
        end_exclusive: DateTime<Utc>,
    ) -> Result<Vec<(DateTime<Utc>, f64)>, HistoryError> {
        let select = self.aspect.selector();
        let bars = self.bars.get(start, end_exclusive).await?;
        Ok(bars.iter().map(|b| (b.open_time, select(b))).collect())
    }
}

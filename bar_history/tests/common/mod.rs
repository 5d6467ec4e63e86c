#![allow(dead_code)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bar_history::{FixedClock, HistoricalBars, HistoricalBarsBuilder};
use bar_sources::{
    Bar, BarSink, BarSource, HistoricalDataRequest, SourceError, TimeFrame,
    sources::{ApiSnafu, SourceRegistry},
};
use chrono::{DateTime, Datelike, TimeZone, Utc};
use tokio_util::sync::CancellationToken;

pub fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

/// "Now" for every engine built here: mid-June 2024, so January 2024 is
/// archival for minute bars and June 2024 is not.
pub fn now() -> DateTime<Utc> {
    utc(2024, 6, 15, 12, 0)
}

pub fn bar(open_time: DateTime<Utc>) -> Bar {
    let price = open_time.timestamp() as f64 / 60.0;
    Bar {
        open_time,
        open: price,
        high: price + 2.0,
        low: price - 1.0,
        close: price + 1.0,
        volume: 10.0,
        trade_count: Some(3),
        vwap: None,
    }
}

/// `n` consecutive bars of `timeframe` starting at `start`.
pub fn bars(start: DateTime<Utc>, timeframe: TimeFrame, n: u32) -> Vec<Bar> {
    (0..n)
        .filter_map(|i| timeframe.add_bars(start, i))
        .map(bar)
        .collect()
}

pub fn request(
    timeframe: TimeFrame,
    start: DateTime<Utc>,
    end_exclusive: DateTime<Utc>,
) -> HistoricalDataRequest {
    HistoricalDataRequest::new("binance", "spot", "BTCUSDT", timeframe, start, end_exclusive)
}

#[derive(Debug, Clone)]
pub enum Behavior {
    Miss,
    /// Every bar of the requested range.
    Fill,
    /// At most this many bars from the start of the requested range.
    FillFirst(u32),
    /// Fill after sleeping.
    FillAfter(Duration),
    /// A chunk-relative delay: later chunks answer sooner.
    FillReversed,
    Fail,
    Fixed(Vec<Bar>),
    /// Cancel the query's token, then answer with every bar.
    CancelThenFill(CancellationToken),
}

/// A tier that records how often, and how concurrently, it was asked.
#[derive(Debug)]
pub struct MockSource {
    id: String,
    behavior: Behavior,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    requests: Mutex<Vec<HistoricalDataRequest>>,
}

impl MockSource {
    pub fn new(id: &str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            behavior,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most `try_get` calls that were running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<HistoricalDataRequest> {
        self.requests.lock().unwrap().clone()
    }

    async fn answer(
        &self,
        request: &HistoricalDataRequest,
    ) -> Result<Option<Vec<Bar>>, SourceError> {
        match &self.behavior {
            Behavior::Miss => Ok(None),
            Behavior::Fill => Ok(fill(request, None)),
            Behavior::FillFirst(n) => Ok(fill(request, Some(*n))),
            Behavior::FillAfter(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(fill(request, None))
            }
            Behavior::FillReversed => {
                // chunks starting earlier in the month wait longer
                let day = u64::from(request.start.day());
                tokio::time::sleep(Duration::from_millis(5 * (32 - day))).await;
                Ok(fill(request, None))
            }
            Behavior::Fail => ApiSnafu {
                status: 503u16,
                message: "unavailable",
            }
            .fail(),
            Behavior::Fixed(bars) => Ok(Some(bars.clone())),
            Behavior::CancelThenFill(cancel) => {
                cancel.cancel();
                Ok(fill(request, None))
            }
        }
    }
}

fn fill(request: &HistoricalDataRequest, limit: Option<u32>) -> Option<Vec<Bar>> {
    let tf = request.timeframe;
    let n = tf.bar_count(request.start, request.end_exclusive) as u32;
    let n = limit.map_or(n, |limit| n.min(limit));
    let out = bars(request.start, tf, n);
    if out.is_empty() { None } else { Some(out) }
}

#[async_trait]
impl BarSource for MockSource {
    fn id(&self) -> &str {
        &self.id
    }

    async fn try_get(
        &self,
        request: &HistoricalDataRequest,
    ) -> Result<Option<Vec<Bar>>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        let outcome = self.answer(request).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

#[derive(Debug, Clone)]
pub struct Saved {
    pub source_id: String,
    pub request: HistoricalDataRequest,
    pub bars: Vec<Bar>,
}

/// A write-back sink that never has data of its own.
#[derive(Debug, Default)]
pub struct MockSink {
    fail: bool,
    saved: Mutex<Vec<Saved>>,
}

impl MockSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn saved(&self) -> Vec<Saved> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl BarSource for MockSink {
    fn id(&self) -> &str {
        "sink"
    }

    async fn try_get(
        &self,
        _request: &HistoricalDataRequest,
    ) -> Result<Option<Vec<Bar>>, SourceError> {
        Ok(None)
    }
}

#[async_trait]
impl BarSink for MockSink {
    async fn save(
        &self,
        source_id: &str,
        bars: &[Bar],
        request: &HistoricalDataRequest,
    ) -> Result<(), SourceError> {
        if self.fail {
            return ApiSnafu {
                status: 507u16,
                message: "disk full",
            }
            .fail();
        }
        self.saved.lock().unwrap().push(Saved {
            source_id: source_id.to_string(),
            request: request.clone(),
            bars: bars.to_vec(),
        });
        Ok(())
    }
}

pub fn builder(registry: SourceRegistry) -> HistoricalBarsBuilder {
    HistoricalBars::builder(registry).clock(Arc::new(FixedClock(now())))
}

pub fn engine(registry: SourceRegistry) -> HistoricalBars {
    builder(registry).build()
}

mod common;

use std::{sync::Arc, time::Duration};

use bar_history::{ChunkError, ChunkResult, HistoryError, MemoryCacheKey, QueryOptions};
use bar_sources::{TierCategory, TimeFrame, sources::SourceRegistry};
use common::{Behavior, MockSink, MockSource, bar, bars, engine, request, utc};
use tokio_util::sync::CancellationToken;

/// One short minute chunk: 2024-06-03.
fn day_request() -> bar_sources::HistoricalDataRequest {
    request(TimeFrame::M1, utc(2024, 6, 3, 0, 0), utc(2024, 6, 4, 0, 0))
}

#[tokio::test]
async fn memory_hit_calls_no_tier() {
    let exchange = MockSource::new("binance-ex", Behavior::Fill);
    let mut registry = SourceRegistry::new();
    registry.set_exchange("binance", exchange.clone());
    let engine = engine(registry);

    let req = day_request();
    let cached = ChunkResult::new(
        TimeFrame::M1,
        req.start,
        req.end_exclusive,
        bars(req.start, TimeFrame::M1, 10),
    )
    .unwrap();
    engine
        .memory_cache()
        .insert(MemoryCacheKey::for_request(&req), cached.clone(), false);

    let got = engine.get(&req, &QueryOptions::default()).await.unwrap().unwrap();
    assert_eq!(got, cached);
    assert_eq!(exchange.calls(), 0);
}

#[tokio::test]
async fn exchange_hit_is_written_back_once() {
    let sink = MockSink::new();
    let exchange = MockSource::new("binance-ex", Behavior::FillFirst(100));
    let mut registry = SourceRegistry::new();
    registry.add_disk_sink(sink.clone());
    registry.set_exchange("binance", exchange.clone());
    let engine = engine(registry);

    let req = day_request();
    let got = engine.get(&req, &QueryOptions::default()).await.unwrap().unwrap();
    assert_eq!(got.len(), 100);

    let saved = sink.saved();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].source_id, "binance-ex");
    assert_eq!(saved[0].bars, got.values());
    assert_eq!(saved[0].request.start, req.start);
    assert_eq!(saved[0].request.end_exclusive, req.end_exclusive);

    // served from memory now
    engine.get(&req, &QueryOptions::default()).await.unwrap();
    assert_eq!(exchange.calls(), 1);
    assert_eq!(sink.saved().len(), 1);
}

#[tokio::test]
async fn third_party_is_consulted_after_exchange_miss() {
    let sink = MockSink::new();
    let exchange = MockSource::new("binance-ex", Behavior::Miss);
    let vendor = MockSource::new("vendor", Behavior::Fill);
    let mut registry = SourceRegistry::new();
    registry.add_disk_sink(sink.clone());
    registry.set_exchange("binance", exchange.clone());
    registry.add_third_party("binance", vendor.clone());
    let engine = engine(registry);

    let got = engine
        .get(&day_request(), &QueryOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got.len(), 1440);
    assert_eq!(exchange.calls(), 1);
    assert_eq!(vendor.calls(), 1);
    assert_eq!(sink.saved()[0].source_id, "vendor");
}

#[tokio::test]
async fn local_hits_are_not_written_back() {
    let sink = MockSink::new();
    let peer = MockSource::new("peer", Behavior::Fill);
    let exchange = MockSource::new("binance-ex", Behavior::Fill);
    let mut registry = SourceRegistry::new();
    registry.add_local_network(peer.clone());
    registry.add_disk_sink(sink.clone());
    registry.set_exchange("binance", exchange.clone());
    let engine = engine(registry);

    let got = engine.get(&day_request(), &QueryOptions::default()).await.unwrap();
    assert!(got.is_some());
    assert_eq!(peer.calls(), 1);
    assert_eq!(exchange.calls(), 0);
    assert!(sink.saved().is_empty());
}

#[tokio::test]
async fn hard_failure_stops_the_chain() {
    let disk = MockSource::new("disk", Behavior::Fail);
    let exchange = MockSource::new("binance-ex", Behavior::Fill);
    let mut registry = SourceRegistry::new();
    registry.add_disk(disk.clone());
    registry.set_exchange("binance", exchange.clone());
    let engine = engine(registry);

    let err = engine
        .get(&day_request(), &QueryOptions::default())
        .await
        .unwrap_err();
    match &err {
        HistoryError::Resolve { tier, category, .. } => {
            assert_eq!(tier, "disk");
            assert_eq!(*category, TierCategory::Disk);
        }
        other => panic!("expected a resolve error, got {other:?}"),
    }
    assert!(err.chunk().is_some());
    assert_eq!(exchange.calls(), 0);
}

#[tokio::test]
async fn write_back_failure_still_returns_bars() {
    let sink = MockSink::failing();
    let exchange = MockSource::new("binance-ex", Behavior::Fill);
    let mut registry = SourceRegistry::new();
    registry.add_disk_sink(sink);
    registry.set_exchange("binance", exchange);
    let engine = engine(registry);

    let got = engine
        .get(&day_request(), &QueryOptions::default())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got.len(), 1440);
}

#[tokio::test]
async fn cancellation_interrupts_a_slow_tier() {
    let exchange = MockSource::new("slow", Behavior::FillAfter(Duration::from_secs(5)));
    let mut registry = SourceRegistry::new();
    registry.set_exchange("binance", exchange.clone());
    let engine = Arc::new(engine(registry));

    let cancel = CancellationToken::new();
    let options = QueryOptions::default().with_cancel(cancel.clone());
    let task = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.get(&day_request(), &options).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, HistoryError::Cancelled));
    assert_eq!(exchange.calls(), 1);
    assert!(engine.memory_cache().is_empty());
}

#[tokio::test]
async fn disabled_memory_cache_asks_tiers_again() {
    let exchange = MockSource::new("binance-ex", Behavior::Fill);
    let mut registry = SourceRegistry::new();
    registry.set_exchange("binance", exchange.clone());
    let engine = engine(registry);
    let options = QueryOptions::default().without_memory_cache();

    let first = engine.get(&day_request(), &options).await.unwrap();
    let second = engine.get(&day_request(), &options).await.unwrap();
    assert_eq!(exchange.calls(), 2);
    assert_eq!(first, second);
    assert!(engine.memory_cache().is_empty());
}

#[tokio::test]
async fn exchange_keys_are_case_insensitive() {
    let exchange = MockSource::new("binance-ex", Behavior::Fill);
    let mut registry = SourceRegistry::new();
    registry.set_exchange("Binance", exchange.clone());
    let engine = engine(registry);

    let mut req = day_request();
    req.exchange = "BINANCE".into();
    assert!(engine.get(&req, &QueryOptions::default()).await.unwrap().is_some());
    assert_eq!(exchange.calls(), 1);
}

#[tokio::test]
async fn out_of_range_bars_are_rejected() {
    let stray = bars(utc(2024, 6, 5, 0, 0), TimeFrame::M1, 3);
    let exchange = MockSource::new("binance-ex", Behavior::Fixed(stray));
    let mut registry = SourceRegistry::new();
    registry.set_exchange("binance", exchange);
    let engine = engine(registry);

    let err = engine
        .get(&day_request(), &QueryOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, HistoryError::InvalidBars { ref tier, .. } if tier == "binance-ex"));
}

#[tokio::test]
async fn cancellation_after_a_remote_hit_skips_the_write_back() {
    let sink = MockSink::new();
    let cancel = CancellationToken::new();
    let exchange = MockSource::new("binance-ex", Behavior::CancelThenFill(cancel.clone()));
    let mut registry = SourceRegistry::new();
    registry.add_disk_sink(sink.clone());
    registry.set_exchange("binance", exchange.clone());
    let engine = engine(registry);

    let options = QueryOptions::default().with_cancel(cancel.clone());
    let err = engine.get(&day_request(), &options).await.unwrap_err();
    assert!(matches!(err, HistoryError::Cancelled));
    assert!(cancel.is_cancelled());
    assert_eq!(exchange.calls(), 1);
    assert!(sink.saved().is_empty());
    assert!(engine.memory_cache().is_empty());
}

#[tokio::test]
async fn bars_off_the_minute_grid_are_rejected() {
    let day = day_request();
    let mut stray = bars(day.start, TimeFrame::M1, 1440);
    stray[1] = bar(day.start + chrono::Duration::seconds(30));
    let exchange = MockSource::new("binance-ex", Behavior::Fixed(stray));
    let mut registry = SourceRegistry::new();
    registry.set_exchange("binance", exchange);
    let engine = engine(registry);

    let req = request(TimeFrame::M1, utc(2024, 6, 3, 0, 1), utc(2024, 6, 3, 0, 3));
    let err = engine.get(&req, &QueryOptions::default()).await.unwrap_err();
    match err {
        HistoryError::InvalidBars { tier, source, .. } => {
            assert_eq!(tier, "binance-ex");
            assert!(matches!(source, ChunkError::OffGrid { index: 1, .. }));
        }
        other => panic!("expected invalid bars, got {other:?}"),
    }
}

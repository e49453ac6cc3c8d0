use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use assert2::{check, let_assert};
use flushkit_aggregation::{
    AggregateStore, AggregateStoreConfig, FlushReason, FlushWorkerBuilder, FlushWorkerError,
    PartitionKey, RecordDto, StoreKey,
    test_util::{CountingFactory, RecordingFlushSink, VecAggregate},
};
use flushkit_timesource::{TimeSource, fakes::ManuallyAdvancedTimeSource};
use metrique::test_util::{TestEntrySink, test_entry_sink};
use tracing_subscriber::EnvFilter;

type Store = AggregateStore<CountingFactory<u64>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn store(config: AggregateStoreConfig, clock: &ManuallyAdvancedTimeSource) -> Arc<Store> {
    Arc::new(
        AggregateStore::new(config, CountingFactory::new())
            .unwrap()
            .with_time_source(TimeSource::custom(clock.clone())),
    )
}

fn record(id: u64, partition: &str, size: u64) -> RecordDto<u64> {
    RecordDto::new(id, PartitionKey::new(partition), size, 0)
}

fn wait_for(mut condition: impl FnMut() -> bool) {
    let start = Instant::now();
    while !condition() {
        if start.elapsed() > Duration::from_secs(60) {
            panic!("condition never held");
        }
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn flushes_complete_aggregates_in_background() {
    init_tracing();
    let clock = ManuallyAdvancedTimeSource::at_epoch_millis(0);
    let config = AggregateStoreConfig::builder()
        .max_records_per_agg(5)
        .build()
        .unwrap();
    let store = store(config, &clock);
    let sink = RecordingFlushSink::new();
    let (worker, handle) = FlushWorkerBuilder::new()
        .poll_interval(Duration::from_millis(10))
        .time_source(TimeSource::custom(clock.clone()))
        .build(Arc::clone(&store), sink.clone())
        .unwrap();

    let key = StoreKey::unqualified("events");
    for id in 0..5 {
        store.accept_for(&key, record(id, "p", 1)).unwrap();
    }
    worker.notify();
    wait_for(|| !sink.flushed().is_empty());

    let flushed = sink.take_flushed();
    check!(flushed.len() == 1);
    check!(flushed[0].reason == FlushReason::RecordCount);
    check!(flushed[0].key == key);
    check!(flushed[0].value.records() == [0u64, 1, 2, 3, 4]);
    check!(flushed[0].partition_counts.get(&PartitionKey::new("p")) == Some(5));
    check!(store.is_empty());

    let stats = handle.shut_down().unwrap();
    check!(stats.aggregates_flushed == 1);
    check!(stats.records_flushed == 5);
}

#[test]
fn flushes_stale_aggregates() {
    init_tracing();
    let clock = ManuallyAdvancedTimeSource::at_epoch_millis(1_000);
    let config = AggregateStoreConfig::builder()
        .staleness_deadline_per_agg(Duration::from_secs(30))
        .build()
        .unwrap();
    let store = store(config, &clock);
    let sink = RecordingFlushSink::new();
    let (worker, _handle) = FlushWorkerBuilder::new()
        .poll_interval(Duration::from_millis(10))
        .time_source(TimeSource::custom(clock.clone()))
        .build(Arc::clone(&store), sink.clone())
        .unwrap();

    store
        .accept_for(&StoreKey::unqualified("slow"), record(0, "p", 1))
        .unwrap();
    thread::sleep(Duration::from_millis(50));
    check!(sink.flushed().is_empty());

    clock.advance(Duration::from_secs(30));
    worker.notify();
    wait_for(|| !sink.flushed().is_empty());
    check!(sink.flushed()[0].reason == FlushReason::Stale);
}

#[test]
fn worker_reads_the_store_clock_by_default() {
    let clock = ManuallyAdvancedTimeSource::at_epoch_millis(1_000);
    let config = AggregateStoreConfig::builder()
        .staleness_deadline_per_agg(Duration::from_secs(30))
        .build()
        .unwrap();
    let store = store(config, &clock);
    let sink = RecordingFlushSink::new();
    let (worker, _handle) = FlushWorkerBuilder::new()
        .poll_interval(Duration::from_millis(10))
        .build(Arc::clone(&store), sink.clone())
        .unwrap();

    store
        .accept_for(&StoreKey::unqualified("slow"), record(0, "p", 1))
        .unwrap();
    thread::sleep(Duration::from_millis(50));
    // the system clock is decades past the fake one, so reading it would flush already
    check!(sink.flushed().is_empty());

    clock.advance(Duration::from_secs(30));
    worker.notify();
    wait_for(|| !sink.flushed().is_empty());
    check!(sink.flushed()[0].reason == FlushReason::Stale);
}

#[tokio::test]
async fn flush_all_flushes_everything() {
    init_tracing();
    let clock = ManuallyAdvancedTimeSource::at_epoch_millis(0);
    let store = store(AggregateStoreConfig::default(), &clock);
    let sink = RecordingFlushSink::new();
    let (worker, handle) = FlushWorkerBuilder::new()
        .poll_interval(Duration::from_secs(59))
        .time_source(TimeSource::custom(clock.clone()))
        .build(Arc::clone(&store), sink.clone())
        .unwrap();

    for name in ["a", "b", "c"] {
        store
            .accept_for(&StoreKey::unqualified(name), record(0, "p", 10))
            .unwrap();
    }
    worker.flush_all().await;

    let flushed = sink.flushed();
    check!(flushed.len() == 3);
    check!(flushed.iter().all(|f| f.reason == FlushReason::Forced));
    check!(store.is_empty());

    let stats = handle.shut_down().unwrap();
    check!(stats.aggregates_flushed == 3);
    check!(stats.bytes_flushed == 30);
    check!(stats.forced_evictions == 0);
}

#[tokio::test]
async fn flush_all_resolves_after_shutdown() {
    let clock = ManuallyAdvancedTimeSource::at_epoch_millis(0);
    let store = store(AggregateStoreConfig::default(), &clock);
    let (worker, handle) = FlushWorkerBuilder::new()
        .build(store, RecordingFlushSink::<VecAggregate<u64>>::new())
        .unwrap();
    handle.shut_down().unwrap();
    worker.flush_all().await;
}

#[test]
fn shutdown_flushes_remaining_aggregates() {
    init_tracing();
    let clock = ManuallyAdvancedTimeSource::at_epoch_millis(0);
    let store = store(AggregateStoreConfig::default(), &clock);
    let sink = RecordingFlushSink::new();
    let (_worker, handle) = FlushWorkerBuilder::new()
        .thread_name("shutdown-test")
        .build(Arc::clone(&store), sink.clone())
        .unwrap();

    let key = StoreKey::new(Some("public"), "users");
    store.accept_for(&key, record(0, "p-0", 7)).unwrap();
    store.accept_for(&key, record(1, "p-1", 9)).unwrap();

    let stats = handle.shut_down().unwrap();
    check!(stats.aggregates_flushed == 1);
    check!(stats.records_flushed == 2);
    check!(stats.bytes_flushed == 16);

    let flushed = sink.flushed();
    check!(flushed.len() == 1);
    check!(flushed[0].reason == FlushReason::Forced);
    check!(flushed[0].partition_bytes.get(&PartitionKey::new("p-1")) == Some(9));
    check!(store.is_empty());
}

#[test]
fn dropping_join_handle_flushes() {
    let clock = ManuallyAdvancedTimeSource::at_epoch_millis(0);
    let store = store(AggregateStoreConfig::default(), &clock);
    let sink = RecordingFlushSink::new();
    let (_worker, handle) = FlushWorkerBuilder::new()
        .build(Arc::clone(&store), sink.clone())
        .unwrap();
    store
        .accept_for(&StoreKey::unqualified("t"), record(0, "p", 1))
        .unwrap();

    drop(handle);
    check!(sink.flushed().len() == 1);
}

#[test]
fn sink_error_stops_worker() {
    init_tracing();
    let clock = ManuallyAdvancedTimeSource::at_epoch_millis(0);
    let config = AggregateStoreConfig::builder()
        .max_records_per_agg(1)
        .build()
        .unwrap();
    let store = store(config, &clock);
    let sink = RecordingFlushSink::new();
    sink.fail_with("destination unavailable");
    let (worker, handle) = FlushWorkerBuilder::new()
        .poll_interval(Duration::from_millis(10))
        .time_source(TimeSource::custom(clock.clone()))
        .build(Arc::clone(&store), sink.clone())
        .unwrap();

    store
        .accept_for(&StoreKey::unqualified("t"), record(0, "p", 1))
        .unwrap();
    worker.notify();

    let_assert!(Err(FlushWorkerError::Sink(err)) = handle.shut_down());
    check!(err.to_string() == "destination unavailable");
    check!(sink.flushed().is_empty());
}

#[test]
fn emits_flush_metrics() {
    let clock = ManuallyAdvancedTimeSource::at_epoch_millis(0);
    let store = store(AggregateStoreConfig::default(), &clock);
    let TestEntrySink { inspector, sink } = test_entry_sink();
    let (_worker, handle) = FlushWorkerBuilder::new()
        .metrics_sink(sink)
        .build(Arc::clone(&store), RecordingFlushSink::new())
        .unwrap();

    let key = StoreKey::new(Some("public"), "users");
    store.accept_for(&key, record(0, "p-0", 100)).unwrap();
    store.accept_for(&key, record(1, "p-1", 50)).unwrap();
    store.accept_for(&key, record(2, "p-1", 50)).unwrap();
    handle.shut_down().unwrap();

    let entries = inspector.entries();
    check!(entries.len() == 1);
    let entry = &entries[0];
    check!(entry.values["Stream"] == "public.users");
    check!(entry.values["Reason"] == "Forced");
    check!(entry.metrics["Records"].as_u64() == 3);
    check!(entry.metrics["EstimatedBytes"].as_u64() == 200);
    check!(entry.metrics["EstimatedBytes"].unit.to_string() == "Bytes");
    check!(entry.metrics["Partitions"].as_u64() == 2);
    check!(entry.metrics["FlushTime"].unit.to_string() == "Milliseconds");
}

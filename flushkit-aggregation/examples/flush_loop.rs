//! Producers feeding several tables while a background worker flushes them.
//!
//! Run with `RUST_LOG=debug` to see every flush the worker makes.

use std::{convert::Infallible, sync::Arc, thread, time::Duration};

use flushkit_aggregation::{
    AggregateEntry, AggregateStore, AggregateStoreConfig, FlushReason, FlushWorkerBuilder,
    PartitionKey, RecordDto, StoreKey, test_util::VecAggregate,
};
use tracing_subscriber::EnvFilter;

const TABLES: [&str; 3] = ["users", "orders", "events"];

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = AggregateStoreConfig::builder()
        .max_records_per_agg(500)
        .max_est_bytes_per_agg(64 * 1024)
        .max_est_bytes_all_aggregates(128 * 1024)
        .staleness_deadline_per_agg(Duration::from_millis(200))
        .build()
        .expect("valid config");
    let store = Arc::new(
        AggregateStore::new(config, |_: &StoreKey| {
            Ok::<_, Infallible>(VecAggregate::<serde_json::Value>::default())
        })
        .expect("valid config"),
    );

    let sink = |reason: FlushReason, entry: AggregateEntry<VecAggregate<serde_json::Value>>| {
        let key = entry.key().to_string();
        let (rows, partition_counts, _) = entry.into_parts();
        let mut partitions: Vec<_> = partition_counts
            .iter()
            .map(|(partition, count)| format!("{partition}={count}"))
            .collect();
        partitions.sort();
        println!(
            "{key}: wrote {} rows ({reason}), acked {}",
            rows.records().len(),
            partitions.join(",")
        );
        Ok::<_, Infallible>(())
    };
    let (worker, handle) = FlushWorkerBuilder::new()
        .poll_interval(Duration::from_millis(50))
        .build(Arc::clone(&store), sink)
        .expect("spawn flush worker");

    thread::scope(|s| {
        for producer in 0..4 {
            let (store, worker) = (&store, &worker);
            s.spawn(move || {
                let partition = PartitionKey::new(&format!("shard-{producer}"));
                for i in 0..2_000u64 {
                    let table = StoreKey::new(Some("public"), TABLES[i as usize % TABLES.len()]);
                    let row = serde_json::json!({ "producer": producer, "seq": i });
                    let size = row.to_string().len() as u64;
                    store
                        .accept_for(&table, RecordDto::new(row, partition.clone(), size, 0))
                        .expect("infallible factory");
                    if i % 250 == 0 {
                        worker.notify();
                    }
                }
            });
        }
    });

    let stats = handle.shut_down().expect("flush worker failed");
    println!(
        "flushed {} aggregates, {} rows, {} bytes ({} evicted under memory pressure)",
        stats.aggregates_flushed,
        stats.records_flushed,
        stats.bytes_flushed,
        stats.forced_evictions
    );
}

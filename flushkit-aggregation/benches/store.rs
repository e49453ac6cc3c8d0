use divan::{Bencher, black_box};
use flushkit_aggregation::{
    AggregateStore, AggregateStoreConfig, PartitionKey, RecordDto, StoreKey,
    test_util::CountingFactory,
};

fn main() {
    divan::main();
}

const THREADS: &[usize] = &[1, 2, 4, 8];
const KEYS: &[usize] = &[1, 16, 256];

fn new_store() -> AggregateStore<CountingFactory<u64>> {
    let config = AggregateStoreConfig::builder()
        .max_records_per_agg(u64::MAX)
        .max_est_bytes_per_agg(u64::MAX)
        .max_est_bytes_all_aggregates(u64::MAX)
        .build()
        .unwrap();
    AggregateStore::new(config, CountingFactory::new()).unwrap()
}

#[divan::bench(consts = THREADS, args = KEYS)]
fn accept_for<const T: usize>(bencher: Bencher, keys: usize) {
    let keys: Vec<StoreKey> = (0..keys)
        .map(|k| StoreKey::unqualified(&format!("table-{k}")))
        .collect();
    let partition = PartitionKey::new("p");
    bencher.with_inputs(new_store).bench_values(|store| {
        std::thread::scope(|s| {
            for t in 0..T {
                let (store, keys, partition) = (&store, &keys, &partition);
                s.spawn(move || {
                    for i in 0..1_000u64 {
                        let key = &keys[(t + i as usize) % keys.len()];
                        let record = RecordDto::new(i, partition.clone(), 64, 0);
                        store.accept_for(key, black_box(record)).unwrap();
                    }
                });
            }
        });
        store
    });
}

#[divan::bench(args = KEYS)]
fn remove_next_complete_scan(bencher: Bencher, keys: usize) {
    let store = new_store();
    let partition = PartitionKey::new("p");
    for k in 0..keys {
        let record = RecordDto::new(0, partition.clone(), 64, 0);
        store
            .accept_for(&StoreKey::unqualified(&format!("table-{k}")), record)
            .unwrap();
    }
    // nothing is ready, so every call scans the whole store
    bencher.bench(|| black_box(store.remove_next_complete(black_box(0))).is_none());
}

use std::{
    collections::HashSet,
    sync::{
        Arc, Barrier,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use assert2::check;
use flushkit_aggregation::{
    AggregateStore, AggregateStoreConfig, PartitionKey, RecordDto, StoreKey,
    test_util::CountingFactory,
};

const THREADS: u64 = 8;
const RECORDS_PER_THREAD: u64 = 2_000;

fn record(id: u64) -> RecordDto<u64> {
    RecordDto::new(id, PartitionKey::new("p"), 3, 0)
}

#[test]
fn distinct_keys_per_thread() {
    let store =
        AggregateStore::new(AggregateStoreConfig::default(), CountingFactory::<u64>::new())
            .unwrap();

    thread::scope(|s| {
        for t in 0..THREADS {
            let store = &store;
            s.spawn(move || {
                let key = StoreKey::unqualified(&format!("table-{t}"));
                for i in 0..RECORDS_PER_THREAD {
                    store.accept_for(&key, record(i)).unwrap();
                }
            });
        }
    });

    let all = store.get_all();
    check!(all.len() as u64 == THREADS);
    check!(store.factory().total_created() as u64 == THREADS);
    for snapshot in all {
        check!(snapshot.record_count == RECORDS_PER_THREAD);
        check!(snapshot.estimated_bytes == RECORDS_PER_THREAD * 3);
    }
}

#[test]
fn first_touch_creates_once() {
    let store =
        AggregateStore::new(AggregateStoreConfig::default(), CountingFactory::<u64>::new())
            .unwrap();
    let key = StoreKey::new(Some("public"), "contended");
    let barrier = Barrier::new(THREADS as usize);

    thread::scope(|s| {
        for t in 0..THREADS {
            let (store, key, barrier) = (&store, &key, &barrier);
            s.spawn(move || {
                barrier.wait();
                for i in 0..RECORDS_PER_THREAD {
                    store
                        .accept_for(key, record(t * RECORDS_PER_THREAD + i))
                        .unwrap();
                }
            });
        }
    });

    let snapshot = store.get(&key).unwrap();
    check!(snapshot.record_count == THREADS * RECORDS_PER_THREAD);
    check!(store.factory().created(&key) == 1);

    let entry = store.remove(&key).unwrap();
    let mut ids = entry.into_value().into_records();
    ids.sort_unstable();
    check!(ids == (0..THREADS * RECORDS_PER_THREAD).collect::<Vec<_>>());
}

#[test]
fn drainer_racing_producers_loses_nothing() {
    let config = AggregateStoreConfig::builder()
        .max_records_per_agg(97)
        .build()
        .unwrap();
    let store = Arc::new(AggregateStore::new(config, CountingFactory::<u64>::new()).unwrap());
    let keys: Vec<StoreKey> = (0..4)
        .map(|k| StoreKey::unqualified(&format!("t{k}")))
        .collect();
    let producing = AtomicBool::new(true);

    let mut flushed_ids = thread::scope(|s| {
        let drainer = s.spawn(|| {
            let mut seen = vec![];
            loop {
                let done = !producing.load(Ordering::Acquire);
                while let Some(entry) = store.remove_next_complete(0) {
                    seen.extend(entry.into_value().into_records());
                }
                if done {
                    return seen;
                }
                thread::yield_now();
            }
        });

        let producers: Vec<_> = (0..THREADS)
            .map(|t| {
                let (store, keys) = (&store, &keys);
                s.spawn(move || {
                    for i in 0..RECORDS_PER_THREAD {
                        let key = &keys[(i % keys.len() as u64) as usize];
                        store
                            .accept_for(key, record(t * RECORDS_PER_THREAD + i))
                            .unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        producing.store(false, Ordering::Release);
        drainer.join().unwrap()
    });

    // whatever did not fill up is still in the store
    for entry in store.drain_all() {
        flushed_ids.extend(entry.into_value().into_records());
    }

    let unique: HashSet<u64> = flushed_ids.iter().copied().collect();
    check!(unique.len() == flushed_ids.len(), "a record was flushed twice");
    check!(flushed_ids.len() as u64 == THREADS * RECORDS_PER_THREAD);
    check!(store.is_empty());
}

#[test]
fn concurrent_drainers_never_share_an_entry() {
    let config = AggregateStoreConfig::builder()
        .max_records_per_agg(1)
        .build()
        .unwrap();
    let store = AggregateStore::new(config, CountingFactory::<u64>::new()).unwrap();
    let entries = THREADS * 250;
    for id in 0..entries {
        store
            .accept_for(&StoreKey::unqualified(&format!("t{id}")), record(id))
            .unwrap();
    }

    let drained: Vec<Vec<u64>> = thread::scope(|s| {
        let drainers: Vec<_> = (0..THREADS)
            .map(|_| {
                let store = &store;
                s.spawn(move || {
                    let mut seen = vec![];
                    while let Some(entry) = store.remove_next_complete(0) {
                        seen.extend(entry.into_value().into_records());
                    }
                    seen
                })
            })
            .collect();
        drainers.into_iter().map(|d| d.join().unwrap()).collect()
    });

    let all: Vec<u64> = drained.into_iter().flatten().collect();
    let unique: HashSet<u64> = all.iter().copied().collect();
    check!(all.len() as u64 == entries);
    check!(unique.len() == all.len(), "an entry was handed to two drainers");
    check!(store.is_empty());
}

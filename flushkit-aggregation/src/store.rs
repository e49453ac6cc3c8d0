//! The concurrent aggregate store
//!
//! [`AggregateStore`] maps each destination table to an [`AggregateEntry`]. Producer threads
//! admit records with [`AggregateStore::accept_for`]; a flush scheduler repeatedly calls
//! [`AggregateStore::remove_next_complete`] and writes out whatever it gets back.
//!
//! # Flush policy
//!
//! `remove_next_complete(now)` picks, in order:
//!
//! 1. any aggregate that is complete (record count or estimated bytes reached its limit) or stale
//!    (older than the staleness deadline at `now`);
//! 2. if none is, and the estimated bytes across every aggregate exceed the global ceiling, the
//!    aggregate holding the most bytes;
//! 3. otherwise nothing.
//!
//! Aggregates that are individually ready are always preferred over a forced eviction.
//!
//! # Concurrency
//!
//! Each key's slot is locked while a record is admitted into it, so get-or-create is a single
//! atomic step (the factory runs at most once per aggregate) and removal can never race with an
//! admission into the same aggregate. Once an entry has been returned by `remove_next_complete`,
//! later records for its key go into a fresh entry.
//!
//! ```
//! use flushkit_aggregation::config::AggregateStoreConfig;
//! use flushkit_aggregation::key::{PartitionKey, RecordDto, StoreKey};
//! use flushkit_aggregation::store::AggregateStore;
//! use flushkit_aggregation::test_util::VecAggregate;
//! use std::convert::Infallible;
//!
//! let config = AggregateStoreConfig::builder()
//!     .max_records_per_agg(2)
//!     .build()
//!     .unwrap();
//! let store = AggregateStore::new(config, |_: &StoreKey| {
//!     Ok::<_, Infallible>(VecAggregate::<&str>::default())
//! })
//! .unwrap();
//!
//! let users = StoreKey::new(Some("public"), "users");
//! let partition = PartitionKey::new("p-0");
//! store.accept_for(&users, RecordDto::new("a", partition.clone(), 10, 0)).unwrap();
//! assert!(store.remove_next_complete(0).is_none());
//!
//! store.accept_for(&users, RecordDto::new("b", partition.clone(), 10, 0)).unwrap();
//! let entry = store.remove_next_complete(0).unwrap();
//! assert_eq!(entry.value().records().len(), 2);
//! assert_eq!(entry.partition_counts().get(&partition), Some(2));
//! assert!(store.is_empty());
//! ```

use std::{
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
};

use dashmap::{DashMap, mapref::one::RefMut};
use flushkit_timesource::TimeSource;

use crate::{
    config::{AggregateStoreConfig, ConfigError},
    entry::{AggregateEntry, EntrySnapshot},
    key::{RecordDto, StoreKey},
    traits::{AggregateFactory, RecordOf},
};

/// Why an aggregate was handed out for flushing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushReason {
    /// The record-count trigger fired
    RecordCount,
    /// The estimated-bytes trigger fired
    EstimatedBytes,
    /// The staleness deadline passed
    Stale,
    /// Evicted because the store exceeded its global byte ceiling
    MemoryPressure,
    /// Removed on request, e.g. at end of input or during shutdown
    Forced,
}

impl FlushReason {
    /// Stable name, used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RecordCount => "RecordCount",
            Self::EstimatedBytes => "EstimatedBytes",
            Self::Stale => "Stale",
            Self::MemoryPressure => "MemoryPressure",
            Self::Forced => "Forced",
        }
    }
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<A> AggregateEntry<A> {
    // record count wins over bytes, bytes over staleness
    pub(crate) fn ready_reason(&self, now_ms: u64) -> Option<FlushReason> {
        if self.record_count_trigger().is_complete() {
            Some(FlushReason::RecordCount)
        } else if self.estimated_bytes_trigger().is_complete() {
            Some(FlushReason::EstimatedBytes)
        } else if self.is_stale(now_ms) {
            Some(FlushReason::Stale)
        } else {
            None
        }
    }
}

/// Concurrent map from destination table to aggregate, with the flush policy on top
///
/// Share it between producers and the flush scheduler with an `Arc`. See the
/// [module documentation](self) for the policy and the concurrency guarantees.
pub struct AggregateStore<F: AggregateFactory> {
    aggregates: DashMap<StoreKey, AggregateEntry<F::Aggregate>>,
    factory: F,
    config: AggregateStoreConfig,
    time_source: TimeSource,
    // serializes every removal path so two drainers never pick the same entry
    drain_lock: Mutex<()>,
}

impl<F: AggregateFactory> fmt::Debug for AggregateStore<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateStore")
            .field("aggregates", &self.aggregates.len())
            .field("config", &self.config)
            .field("time_source", &self.time_source)
            .finish_non_exhaustive()
    }
}

impl<F> AggregateStore<F>
where
    F: AggregateFactory,
    F::Aggregate: Sync,
{
    /// Create an empty store, rejecting an invalid `config`
    ///
    /// Aggregates are timestamped with the system clock; see [`Self::with_time_source`].
    pub fn new(config: AggregateStoreConfig, factory: F) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            aggregates: DashMap::new(),
            factory,
            config,
            time_source: TimeSource::System,
            drain_lock: Mutex::new(()),
        })
    }

    /// Use `time_source` to timestamp newly created aggregates
    ///
    /// The creation time seeds each aggregate's staleness clock. Eviction itself never reads the
    /// clock: callers pass the current time to [`Self::remove_next_complete`].
    pub fn with_time_source(mut self, time_source: TimeSource) -> Self {
        self.time_source = time_source;
        self
    }

    /// The clock that timestamps newly created aggregates
    ///
    /// A [`FlushWorker`](crate::FlushWorker) reads this clock unless it is given its own.
    pub fn time_source(&self) -> &TimeSource {
        &self.time_source
    }

    /// Admit `record` into the aggregate for `key`, creating the aggregate if needed
    ///
    /// Safe to call from any number of threads. If the aggregate does not exist yet the factory
    /// is called exactly once, even when several threads race on the first record for `key`.
    /// A factory error is returned as is, and no aggregate is left behind for `key`.
    pub fn accept_for(&self, key: &StoreKey, record: RecordDto<RecordOf<F>>) -> Result<(), F::Error> {
        let mut entry = self.entry_mut(key)?;
        entry.accept(record);
        Ok(())
    }

    /// Detach and return the next aggregate that should be flushed at `now_ms`
    ///
    /// Returns `None` when nothing is complete, stale, or needed to get back under the global
    /// byte ceiling. This is the steady state, not an error.
    pub fn remove_next_complete(&self, now_ms: u64) -> Option<AggregateEntry<F::Aggregate>> {
        self.remove_next_complete_with_reason(now_ms)
            .map(|(_, entry)| entry)
    }

    /// Like [`Self::remove_next_complete`], also returning why the aggregate was picked
    pub fn remove_next_complete_with_reason(
        &self,
        now_ms: u64,
    ) -> Option<(FlushReason, AggregateEntry<F::Aggregate>)> {
        let _guard = self.lock_drain();

        let mut total_bytes = 0u64;
        let mut largest: Option<(StoreKey, u64)> = None;
        let mut ready: Option<(StoreKey, FlushReason)> = None;
        for entry in self.aggregates.iter() {
            if let Some(reason) = entry.ready_reason(now_ms) {
                ready = Some((entry.key().clone(), reason));
                break;
            }
            let bytes = entry.estimated_bytes_trigger().watermark();
            total_bytes = total_bytes.saturating_add(bytes);
            if largest.as_ref().is_none_or(|(_, max)| bytes > *max) {
                largest = Some((entry.key().clone(), bytes));
            }
        }
        // the iterator's shard guards must be released before removing

        if let Some((key, reason)) = ready {
            return self.aggregates.remove(&key).map(|(_, entry)| (reason, entry));
        }
        if total_bytes > self.config.max_est_bytes_all_aggregates() {
            if let Some((key, _)) = largest {
                return self
                    .aggregates
                    .remove(&key)
                    .map(|(_, entry)| (FlushReason::MemoryPressure, entry));
            }
        }
        None
    }

    /// Detach the aggregate for `key`, if there is one, regardless of its triggers
    pub fn remove(&self, key: &StoreKey) -> Option<AggregateEntry<F::Aggregate>> {
        let _guard = self.lock_drain();
        self.aggregates.remove(key).map(|(_, entry)| entry)
    }

    /// Detach every aggregate present when the call starts
    ///
    /// Records admitted concurrently may land in fresh aggregates that are not part of the
    /// returned set; they stay in the store.
    pub fn drain_all(&self) -> Vec<AggregateEntry<F::Aggregate>> {
        let _guard = self.lock_drain();
        self.keys()
            .iter()
            .filter_map(|key| self.aggregates.remove(key).map(|(_, entry)| entry))
            .collect()
    }

    /// Snapshot of every aggregate currently in the store, in no particular order
    pub fn get_all(&self) -> Vec<EntrySnapshot> {
        self.aggregates
            .iter()
            .map(|entry| entry.snapshot())
            .collect()
    }

    /// Snapshot of the aggregate for `key`, creating it (through the factory) if needed
    ///
    /// This runs the same get-or-create step as [`Self::accept_for`] without admitting a record.
    pub fn get_or_create(&self, key: &StoreKey) -> Result<EntrySnapshot, F::Error> {
        Ok(self.entry_mut(key)?.snapshot())
    }

    /// Snapshot of the aggregate for `key`, if it exists
    pub fn get(&self, key: &StoreKey) -> Option<EntrySnapshot> {
        self.aggregates.get(key).map(|entry| entry.snapshot())
    }

    /// Keys of every aggregate currently in the store, in no particular order
    pub fn keys(&self) -> Vec<StoreKey> {
        self.aggregates
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Whether an aggregate exists for `key`
    pub fn contains_key(&self, key: &StoreKey) -> bool {
        self.aggregates.contains_key(key)
    }

    /// Number of aggregates in the store
    pub fn len(&self) -> usize {
        self.aggregates.len()
    }

    /// Whether the store holds no aggregates
    pub fn is_empty(&self) -> bool {
        self.aggregates.is_empty()
    }

    /// Sum of the estimated bytes of every aggregate
    pub fn estimated_bytes(&self) -> u64 {
        self.aggregates
            .iter()
            .map(|entry| entry.estimated_bytes_trigger().watermark())
            .fold(0u64, u64::saturating_add)
    }

    /// The factory aggregates are created with
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// The limits this store was built with
    pub fn config(&self) -> &AggregateStoreConfig {
        &self.config
    }

    // Holds the key's shard write lock for as long as the returned guard lives.
    fn entry_mut(
        &self,
        key: &StoreKey,
    ) -> Result<RefMut<'_, StoreKey, AggregateEntry<F::Aggregate>>, F::Error> {
        if let Some(entry) = self.aggregates.get_mut(key) {
            return Ok(entry);
        }
        self.aggregates.entry(key.clone()).or_try_insert_with(|| {
            let value = self.factory.create(key)?;
            Ok(AggregateEntry::new(
                key.clone(),
                value,
                &self.config,
                self.time_source.epoch_millis(),
            ))
        })
    }

    fn lock_drain(&self) -> MutexGuard<'_, ()> {
        // the guarded unit carries no state, so a poisoned lock is still usable
        self.drain_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

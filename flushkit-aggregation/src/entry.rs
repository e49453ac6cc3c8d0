//! The per-table unit of aggregation state

use crate::{
    config::AggregateStoreConfig,
    histogram::PartitionHistogram,
    key::{RecordDto, StoreKey},
    traits::Aggregate,
    trigger::{SizeTrigger, TimeTrigger},
};

/// An aggregate plus the trigger and histogram state the store tracks for it
///
/// Entries live inside an [`AggregateStore`](crate::store::AggregateStore). Once the store hands
/// one out from [`remove_next_complete`](crate::store::AggregateStore::remove_next_complete) it is
/// owned by the caller and detached: later records for the same key go to a new entry.
///
/// The flushing caller typically writes [`value`](Self::value) to the destination, then uses
/// [`partition_counts`](Self::partition_counts) and [`partition_bytes`](Self::partition_bytes) to
/// acknowledge progress per partition.
#[derive(Debug)]
pub struct AggregateEntry<A> {
    key: StoreKey,
    value: A,
    partition_counts: PartitionHistogram,
    partition_bytes: PartitionHistogram,
    staleness_trigger: TimeTrigger,
    record_count_trigger: SizeTrigger,
    estimated_bytes_trigger: SizeTrigger,
}

impl<A> AggregateEntry<A> {
    /// Create an empty entry, seeding the staleness clock at `created_at_ms`
    pub(crate) fn new(
        key: StoreKey,
        value: A,
        config: &AggregateStoreConfig,
        created_at_ms: u64,
    ) -> Self {
        let staleness_trigger = TimeTrigger::new(config.staleness_deadline_per_agg_ms());
        staleness_trigger.update(created_at_ms);
        Self {
            key,
            value,
            partition_counts: PartitionHistogram::new(),
            partition_bytes: PartitionHistogram::new(),
            staleness_trigger,
            record_count_trigger: SizeTrigger::new(config.max_records_per_agg()),
            estimated_bytes_trigger: SizeTrigger::new(config.max_est_bytes_per_agg()),
        }
    }

    /// Whether the record-count or the estimated-bytes trigger has fired
    pub fn is_complete(&self) -> bool {
        self.record_count_trigger.is_complete() || self.estimated_bytes_trigger.is_complete()
    }

    /// Whether the staleness deadline has passed at `now_ms`
    pub fn is_stale(&self, now_ms: u64) -> bool {
        self.staleness_trigger.is_complete(now_ms)
    }

    /// Destination table this entry aggregates
    pub fn key(&self) -> &StoreKey {
        &self.key
    }

    /// The accumulator
    pub fn value(&self) -> &A {
        &self.value
    }

    /// Mutable access to the accumulator, e.g. to finish a batch before writing it
    pub fn value_mut(&mut self) -> &mut A {
        &mut self.value
    }

    /// Records admitted per partition
    pub fn partition_counts(&self) -> &PartitionHistogram {
        &self.partition_counts
    }

    /// Estimated bytes admitted per partition
    pub fn partition_bytes(&self) -> &PartitionHistogram {
        &self.partition_bytes
    }

    /// Time since creation, compared against the staleness deadline
    pub fn staleness_trigger(&self) -> &TimeTrigger {
        &self.staleness_trigger
    }

    /// Records admitted, compared against the per-aggregate record limit
    pub fn record_count_trigger(&self) -> &SizeTrigger {
        &self.record_count_trigger
    }

    /// Estimated bytes admitted, compared against the per-aggregate byte limit
    pub fn estimated_bytes_trigger(&self) -> &SizeTrigger {
        &self.estimated_bytes_trigger
    }

    /// Take the accumulator, discarding trigger state
    pub fn into_value(self) -> A {
        self.value
    }

    /// Take the accumulator together with the per-partition counts and bytes
    pub fn into_parts(self) -> (A, PartitionHistogram, PartitionHistogram) {
        (self.value, self.partition_counts, self.partition_bytes)
    }

    /// Point-in-time copy of the bookkeeping state, without the accumulator
    pub fn snapshot(&self) -> EntrySnapshot {
        EntrySnapshot {
            key: self.key.clone(),
            record_count: self.record_count_trigger.watermark(),
            estimated_bytes: self.estimated_bytes_trigger.watermark(),
            created_at_ms: self.staleness_trigger.reference(),
            is_complete: self.is_complete(),
            partition_counts: self.partition_counts.clone(),
            partition_bytes: self.partition_bytes.clone(),
        }
    }
}

impl<A: Aggregate> AggregateEntry<A> {
    /// Route a record into the accumulator and update triggers and histograms
    ///
    /// Only the store calls this, while it holds the entry's slot.
    pub(crate) fn accept(&mut self, record: RecordDto<A::Record>) {
        let size_bytes = record.size_bytes;
        let partition = record.partition_key.clone();
        self.value.accept(record);
        self.record_count_trigger.increment(1);
        self.estimated_bytes_trigger.increment(size_bytes);
        self.partition_counts.increment(&partition, 1);
        self.partition_bytes.increment(&partition, size_bytes);
    }
}

/// Bookkeeping state of an [`AggregateEntry`] at one instant
///
/// Returned by [`AggregateStore::get_all`](crate::store::AggregateStore::get_all) and
/// [`AggregateStore::get_or_create`](crate::store::AggregateStore::get_or_create).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySnapshot {
    /// Destination table
    pub key: StoreKey,
    /// Record-count trigger watermark
    pub record_count: u64,
    /// Estimated-bytes trigger watermark
    pub estimated_bytes: u64,
    /// Staleness reference, the creation time of the entry
    pub created_at_ms: Option<u64>,
    /// Whether a size trigger had fired
    pub is_complete: bool,
    /// Records per partition
    pub partition_counts: PartitionHistogram,
    /// Estimated bytes per partition
    pub partition_bytes: PartitionHistogram,
}

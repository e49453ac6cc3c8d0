//! Test doubles for aggregates, factories and flush sinks
//!
//! Enabled by the `test-util` feature.

use std::{
    fmt,
    marker::PhantomData,
    sync::{Arc, Mutex, PoisonError},
};

use crate::{
    entry::AggregateEntry,
    histogram::PartitionHistogram,
    key::{RecordDto, StoreKey},
    sink::FlushSink,
    store::FlushReason,
    traits::{Aggregate, AggregateFactory},
};

/// Aggregate that keeps the payload of every record it accepts, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VecAggregate<T> {
    records: Vec<T>,
}

impl<T> Default for VecAggregate<T> {
    fn default() -> Self {
        Self { records: vec![] }
    }
}

impl<T> VecAggregate<T> {
    /// Payloads accepted so far
    pub fn records(&self) -> &[T] {
        &self.records
    }

    /// Take the payloads
    pub fn into_records(self) -> Vec<T> {
        self.records
    }
}

impl<T: Send> Aggregate for VecAggregate<T> {
    type Record = T;

    fn accept(&mut self, record: RecordDto<T>) {
        self.records.push(record.data);
    }
}

/// Error returned by the test doubles when told to fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestError(pub String);

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for TestError {}

/// Factory of [`VecAggregate`]s that counts how often each key was created
///
/// ```
/// use flushkit_aggregation::key::StoreKey;
/// use flushkit_aggregation::test_util::CountingFactory;
/// use flushkit_aggregation::traits::AggregateFactory;
///
/// let factory = CountingFactory::<u32>::new();
/// let key = StoreKey::unqualified("t");
/// factory.fail_next("no staging bucket");
/// assert!(factory.create(&key).is_err());
/// assert!(factory.create(&key).is_ok());
/// assert_eq!(factory.created(&key), 1);
/// ```
pub struct CountingFactory<T> {
    created: Mutex<hashbrown::HashMap<StoreKey, usize>>,
    fail_next: Mutex<Option<String>>,
    _record: PhantomData<fn() -> T>,
}

impl<T> Default for CountingFactory<T> {
    fn default() -> Self {
        Self {
            created: Mutex::default(),
            fail_next: Mutex::default(),
            _record: PhantomData,
        }
    }
}

impl<T> fmt::Debug for CountingFactory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountingFactory")
            .field("total_created", &self.total_created())
            .finish()
    }
}

impl<T> CountingFactory<T> {
    /// Create a factory that has created nothing yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `create` call fail with `message`
    pub fn fail_next(&self, message: impl Into<String>) {
        *self.fail_next.lock().unwrap_or_else(PoisonError::into_inner) = Some(message.into());
    }

    /// Successful `create` calls for `key`
    pub fn created(&self, key: &StoreKey) -> usize {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Successful `create` calls across all keys
    pub fn total_created(&self) -> usize {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }
}

impl<T: Send> AggregateFactory for CountingFactory<T> {
    type Aggregate = VecAggregate<T>;
    type Error = TestError;

    fn create(&self, key: &StoreKey) -> Result<VecAggregate<T>, TestError> {
        if let Some(message) = self
            .fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            return Err(TestError(message));
        }
        *self
            .created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default() += 1;
        Ok(VecAggregate::default())
    }
}

/// One aggregate received by a [`RecordingFlushSink`]
#[derive(Debug, Clone, PartialEq)]
pub struct FlushedAggregate<A> {
    /// Why it was flushed
    pub reason: FlushReason,
    /// Its key
    pub key: StoreKey,
    /// The accumulator
    pub value: A,
    /// Records per partition
    pub partition_counts: PartitionHistogram,
    /// Estimated bytes per partition
    pub partition_bytes: PartitionHistogram,
}

/// [`FlushSink`] that keeps everything it is given
///
/// Clones share the same recording, so keep one clone to inspect what a worker flushed.
pub struct RecordingFlushSink<A> {
    flushed: Arc<Mutex<Vec<FlushedAggregate<A>>>>,
    failure: Arc<Mutex<Option<String>>>,
}

impl<A> Clone for RecordingFlushSink<A> {
    fn clone(&self) -> Self {
        Self {
            flushed: Arc::clone(&self.flushed),
            failure: Arc::clone(&self.failure),
        }
    }
}

impl<A> Default for RecordingFlushSink<A> {
    fn default() -> Self {
        Self {
            flushed: Arc::default(),
            failure: Arc::default(),
        }
    }
}

impl<A> fmt::Debug for RecordingFlushSink<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingFlushSink").finish_non_exhaustive()
    }
}

impl<A> RecordingFlushSink<A> {
    /// Create an empty recording
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every later flush with `message`, without recording the aggregate
    pub fn fail_with(&self, message: impl Into<String>) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(message.into());
    }

    /// Everything flushed so far, in flush order
    pub fn flushed(&self) -> Vec<FlushedAggregate<A>>
    where
        A: Clone,
    {
        self.flushed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Take everything flushed so far, leaving the recording empty
    pub fn take_flushed(&self) -> Vec<FlushedAggregate<A>> {
        std::mem::take(&mut *self.flushed.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl<A> FlushSink<A> for RecordingFlushSink<A> {
    type Error = TestError;

    fn flush(&mut self, reason: FlushReason, entry: AggregateEntry<A>) -> Result<(), TestError> {
        if let Some(message) = &*self.failure.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(TestError(message.clone()));
        }
        let key = entry.key().clone();
        let (value, partition_counts, partition_bytes) = entry.into_parts();
        self.flushed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(FlushedAggregate {
                reason,
                key,
                value,
                partition_counts,
                partition_bytes,
            });
        Ok(())
    }
}

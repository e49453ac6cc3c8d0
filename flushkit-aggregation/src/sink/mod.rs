//! Moving aggregates out of the store and into a destination
//!
//! A [`FlushSink`] receives each aggregate the store hands out. [`FlushWorkerBuilder`] runs the
//! scheduling loop on a background thread: it polls
//! [`remove_next_complete_with_reason`](crate::store::AggregateStore::remove_next_complete_with_reason)
//! and feeds every result to the sink, flushes everything on request, and drains the store on
//! shutdown.
//!
//! ```
//! use flushkit_aggregation::config::AggregateStoreConfig;
//! use flushkit_aggregation::key::{PartitionKey, RecordDto, StoreKey};
//! use flushkit_aggregation::sink::FlushWorkerBuilder;
//! use flushkit_aggregation::store::AggregateStore;
//! use flushkit_aggregation::test_util::{RecordingFlushSink, VecAggregate};
//! use std::convert::Infallible;
//! use std::sync::Arc;
//!
//! let store = Arc::new(
//!     AggregateStore::new(AggregateStoreConfig::default(), |_: &StoreKey| {
//!         Ok::<_, Infallible>(VecAggregate::<u32>::default())
//!     })
//!     .unwrap(),
//! );
//! let sink = RecordingFlushSink::new();
//! let (_worker, handle) = FlushWorkerBuilder::new()
//!     .build(Arc::clone(&store), sink.clone())
//!     .unwrap();
//!
//! store
//!     .accept_for(&StoreKey::unqualified("users"), RecordDto::new(7, PartitionKey::new("p"), 16, 0))
//!     .unwrap();
//!
//! // shutting down flushes whatever is left
//! let stats = handle.shut_down().unwrap();
//! assert_eq!(stats.records_flushed, 1);
//! assert_eq!(sink.flushed().len(), 1);
//! ```

use std::{error::Error, fmt};

use crate::{entry::AggregateEntry, store::FlushReason};

mod worker;

pub use worker::{FlushWorker, FlushWorkerBuilder, FlushWorkerJoinHandle};

/// Destination for flushed aggregates
///
/// Any closure `FnMut(FlushReason, AggregateEntry<A>) -> Result<(), E>` is a sink.
pub trait FlushSink<A> {
    /// Error returned when the destination write fails
    type Error;

    /// Write out one detached aggregate
    fn flush(&mut self, reason: FlushReason, entry: AggregateEntry<A>) -> Result<(), Self::Error>;
}

impl<A, E, F> FlushSink<A> for F
where
    F: FnMut(FlushReason, AggregateEntry<A>) -> Result<(), E>,
{
    type Error = E;

    fn flush(&mut self, reason: FlushReason, entry: AggregateEntry<A>) -> Result<(), E> {
        self(reason, entry)
    }
}

/// Totals for everything a flush worker handed to its sink
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    /// Aggregates flushed successfully
    pub aggregates_flushed: u64,
    /// Records in those aggregates
    pub records_flushed: u64,
    /// Estimated bytes in those aggregates
    pub bytes_flushed: u64,
    /// Aggregates flushed with [`FlushReason::MemoryPressure`]
    pub forced_evictions: u64,
}

impl FlushStats {
    pub(crate) fn record(&mut self, reason: FlushReason, records: u64, bytes: u64) {
        self.aggregates_flushed += 1;
        self.records_flushed = self.records_flushed.saturating_add(records);
        self.bytes_flushed = self.bytes_flushed.saturating_add(bytes);
        if reason == FlushReason::MemoryPressure {
            self.forced_evictions += 1;
        }
    }
}

/// Why a flush worker stopped abnormally
#[derive(Debug)]
pub enum FlushWorkerError<E> {
    /// The sink failed; the worker stopped at the first failure
    Sink(E),
    /// The worker thread panicked
    Panicked,
}

impl<E: fmt::Display> fmt::Display for FlushWorkerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sink(err) => write!(f, "flush sink failed: {err}"),
            Self::Panicked => f.write_str("aggregate flush worker panicked"),
        }
    }
}

impl<E: Error + 'static> Error for FlushWorkerError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sink(err) => Some(err),
            Self::Panicked => None,
        }
    }
}

//! Traits for aggregation
//!
//! The store is polymorphic over how records are buffered. Two traits form the seam:
//!
//! ## The accumulator: [`Aggregate`]
//!
//! An aggregate buffers the records of one destination table until it is flushed. How it does
//! that (row buffers, columnar batches, a staged file) is up to the destination. The store only
//! ever calls [`Aggregate::accept`].
//!
//! ## Construction: [`AggregateFactory`]
//!
//! The store creates aggregates lazily, the first time a record arrives for a key. Creation may
//! fail (for example when it has to open a staging location), and the failure is returned to the
//! producer that admitted the record.
//!
//! Any closure `Fn(&StoreKey) -> Result<A, E>` is a factory:
//!
//! ```rust
//! use flushkit_aggregation::key::{RecordDto, StoreKey};
//! use flushkit_aggregation::traits::{Aggregate, AggregateFactory};
//! use std::convert::Infallible;
//!
//! #[derive(Default)]
//! struct JsonLines {
//!     lines: Vec<String>,
//! }
//!
//! impl Aggregate for JsonLines {
//!     type Record = String;
//!
//!     fn accept(&mut self, record: RecordDto<String>) {
//!         self.lines.push(record.data);
//!     }
//! }
//!
//! let factory = |_key: &StoreKey| Ok::<_, Infallible>(JsonLines::default());
//! let aggregate = factory.create(&StoreKey::unqualified("users")).unwrap();
//! assert!(aggregate.lines.is_empty());
//! ```

use crate::key::{RecordDto, StoreKey};

/// Per-table accumulator that buffers records before a destination write
///
/// `accept` is called while the store holds exclusive access to this aggregate's slot, so it must
/// stay cheap: buffer in memory, do not perform I/O, and never call back into the store.
pub trait Aggregate: Send {
    /// Payload type carried by admitted records
    type Record;

    /// Buffer a record
    ///
    /// Aggregates never refuse a record.
    fn accept(&mut self, record: RecordDto<Self::Record>);
}

/// Constructs a fresh [`Aggregate`] for a key
///
/// The store calls `create` at most once per aggregate lifetime. Like [`Aggregate::accept`],
/// it runs while the store holds the key's slot and must not call back into the store.
pub trait AggregateFactory: Send + Sync {
    /// Aggregate type produced
    type Aggregate: Aggregate;
    /// Error returned when an aggregate cannot be created
    type Error;

    /// Create an empty aggregate for `key`
    fn create(&self, key: &StoreKey) -> Result<Self::Aggregate, Self::Error>;
}

impl<F, A, E> AggregateFactory for F
where
    F: Fn(&StoreKey) -> Result<A, E> + Send + Sync,
    A: Aggregate,
{
    type Aggregate = A;
    type Error = E;

    fn create(&self, key: &StoreKey) -> Result<A, E> {
        self(key)
    }
}

/// Record payload type accepted by the aggregates a factory builds
pub type RecordOf<F> = <<F as AggregateFactory>::Aggregate as Aggregate>::Record;

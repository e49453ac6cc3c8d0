#![deny(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod entry;
pub mod histogram;
pub mod key;
mod metrics;
pub mod sink;
pub mod store;
#[cfg(feature = "test-util")]
#[cfg_attr(docsrs, doc(cfg(feature = "test-util")))]
pub mod test_util;
pub mod traits;
pub mod trigger;

pub use config::{AggregateStoreConfig, ConfigError};
pub use entry::{AggregateEntry, EntrySnapshot};
pub use key::{PartitionKey, RecordDto, StoreKey};
pub use sink::{
    FlushSink, FlushStats, FlushWorker, FlushWorkerBuilder, FlushWorkerError,
    FlushWorkerJoinHandle,
};
pub use store::{AggregateStore, FlushReason};
pub use traits::{Aggregate, AggregateFactory};

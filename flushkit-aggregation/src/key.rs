//! Keys and records admitted into the aggregate store

use std::{fmt, sync::Arc};

/// Identifies a destination table
///
/// Keys are compared structurally and are cheap to clone, since the store clones one for every
/// aggregate it creates.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreKey {
    namespace: Option<Arc<str>>,
    name: Arc<str>,
}

impl StoreKey {
    /// Key for the table `name` in `namespace`
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        Self {
            namespace: namespace.map(Arc::from),
            name: Arc::from(name),
        }
    }

    /// Key for a table with no namespace
    pub fn unqualified(name: &str) -> Self {
        Self::new(None, name)
    }

    /// The namespace, if any
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// The table name
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{namespace}.{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl fmt::Debug for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreKey({self})")
    }
}

/// Identifies a sub-partition of a stream within a [`StoreKey`]
///
/// For example a file-transfer partition or a parallel-ingest shard. Partition totals are kept
/// so the flushing caller can acknowledge progress per partition.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey(Arc<str>);

impl PartitionKey {
    /// Create a partition key
    pub fn new(id: &str) -> Self {
        Self(Arc::from(id))
    }

    /// The partition id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PartitionKey {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PartitionKey({})", self.0)
    }
}

/// One record admitted into an aggregate
///
/// `data` is opaque to the store. `size_bytes` is the caller's estimate of the record's
/// serialized size and is what the byte triggers and the global memory ceiling are computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordDto<T> {
    /// The record payload
    pub data: T,
    /// Partition the record was read from
    pub partition_key: PartitionKey,
    /// Estimated serialized size
    pub size_bytes: u64,
    /// When the source emitted the record, in milliseconds since the Unix epoch
    pub emitted_at_ms: u64,
}

impl<T> RecordDto<T> {
    /// Create a record
    pub fn new(data: T, partition_key: PartitionKey, size_bytes: u64, emitted_at_ms: u64) -> Self {
        Self {
            data,
            partition_key,
            size_bytes,
            emitted_at_ms,
        }
    }
}

//! Per-partition running totals
//!
//! Every aggregate keeps two [`PartitionHistogram`]s: one counting records and one summing
//! estimated bytes, both keyed by the [`PartitionKey`] each record was read from. The flush policy
//! never looks at them. They exist so that whoever flushes an aggregate can acknowledge exactly
//! how much of each partition has been durably written.
//!
//! ```
//! use flushkit_aggregation::histogram::PartitionHistogram;
//! use flushkit_aggregation::key::PartitionKey;
//!
//! let mut counts = PartitionHistogram::default();
//! counts.increment(&PartitionKey::new("p-0"), 1);
//! counts.increment(&PartitionKey::new("p-0"), 1);
//! counts.increment(&PartitionKey::new("p-1"), 1);
//!
//! assert_eq!(counts.get(&PartitionKey::new("p-0")), Some(2));
//! assert_eq!(counts.get(&PartitionKey::new("p-2")), None);
//! assert_eq!(counts.total(), 3);
//! ```

use crate::key::PartitionKey;

/// Mapping from partition to an accumulating total
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionHistogram {
    totals: hashbrown::HashMap<PartitionKey, u64>,
}

impl PartitionHistogram {
    /// Create an empty histogram
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `delta` to the total for `partition`, inserting it if absent
    pub fn increment(&mut self, partition: &PartitionKey, delta: u64) {
        match self.totals.get_mut(partition) {
            Some(total) => *total = total.saturating_add(delta),
            None => {
                self.totals.insert(partition.clone(), delta);
            }
        }
    }

    /// Current total for `partition`, or `None` if it was never incremented
    pub fn get(&self, partition: &PartitionKey) -> Option<u64> {
        self.totals.get(partition).copied()
    }

    /// Iterate over every partition and its total, in no particular order
    pub fn iter(&self) -> impl Iterator<Item = (&PartitionKey, u64)> + '_ {
        self.totals.iter().map(|(k, v)| (k, *v))
    }

    /// Number of distinct partitions seen
    pub fn len(&self) -> usize {
        self.totals.len()
    }

    /// Whether no partition has been incremented
    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }

    /// Sum over all partitions
    pub fn total(&self) -> u64 {
        self.totals
            .values()
            .fold(0u64, |acc, v| acc.saturating_add(*v))
    }

    /// Add every total in `other` into `self`
    pub fn merge(&mut self, other: &PartitionHistogram) {
        for (partition, delta) in other.iter() {
            self.increment(partition, delta);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PartitionHistogram;
    use crate::key::PartitionKey;

    #[test]
    fn increment_is_additive() {
        let p = PartitionKey::new("p");
        let mut hist = PartitionHistogram::new();
        hist.increment(&p, 10);
        hist.increment(&p, 5);
        assert_eq!(hist.get(&p), Some(15));
        assert_eq!(hist.len(), 1);
    }

    #[test]
    fn zero_increment_still_records_partition() {
        let p = PartitionKey::new("p");
        let mut hist = PartitionHistogram::new();
        hist.increment(&p, 0);
        assert_eq!(hist.get(&p), Some(0));
        assert!(!hist.is_empty());
    }

    #[test]
    fn merge_adds_totals() {
        let a = PartitionKey::new("a");
        let b = PartitionKey::new("b");
        let mut left = PartitionHistogram::new();
        left.increment(&a, 1);
        let mut right = PartitionHistogram::new();
        right.increment(&a, 2);
        right.increment(&b, 3);

        left.merge(&right);
        assert_eq!(left.get(&a), Some(3));
        assert_eq!(left.get(&b), Some(3));
        assert_eq!(left.total(), 6);
    }
}

//! Aggregate store limits

use std::{fmt, time::Duration};

/// Limits that drive the flush policy of an [`AggregateStore`](crate::store::AggregateStore)
///
/// Build one with [`AggregateStoreConfig::builder`], or deserialize it (with the `serde` feature)
/// and call [`AggregateStoreConfig::validate`]. The store validates again on construction, so an
/// invalid config can never produce a store.
///
/// ```
/// use flushkit_aggregation::config::AggregateStoreConfig;
/// use std::time::Duration;
///
/// let config = AggregateStoreConfig::builder()
///     .max_records_per_agg(10_000)
///     .staleness_deadline_per_agg(Duration::from_secs(60))
///     .build()
///     .unwrap();
/// assert_eq!(config.max_records_per_agg(), 10_000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Deserialize),
    serde(default, deny_unknown_fields)
)]
pub struct AggregateStoreConfig {
    max_est_bytes_all_aggregates: u64,
    max_records_per_agg: u64,
    max_est_bytes_per_agg: u64,
    staleness_deadline_per_agg_ms: u64,
}

impl Default for AggregateStoreConfig {
    fn default() -> Self {
        Self {
            max_est_bytes_all_aggregates: 350_000_000,
            max_records_per_agg: 100_000,
            max_est_bytes_per_agg: 70_000_000,
            staleness_deadline_per_agg_ms: 5 * 60 * 1_000,
        }
    }
}

impl AggregateStoreConfig {
    /// Start from the defaults
    pub fn builder() -> AggregateStoreConfigBuilder {
        AggregateStoreConfigBuilder::default()
    }

    /// Check every limit, returning the first violation
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("max_est_bytes_all_aggregates", self.max_est_bytes_all_aggregates),
            ("max_records_per_agg", self.max_records_per_agg),
            ("max_est_bytes_per_agg", self.max_est_bytes_per_agg),
            ("staleness_deadline_per_agg", self.staleness_deadline_per_agg_ms),
        ];
        if let Some((field, _)) = non_zero.into_iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Zero { field });
        }
        Ok(())
    }

    /// Ceiling on the estimated bytes held across all aggregates
    pub fn max_est_bytes_all_aggregates(&self) -> u64 {
        self.max_est_bytes_all_aggregates
    }

    /// Records after which a single aggregate is complete
    pub fn max_records_per_agg(&self) -> u64 {
        self.max_records_per_agg
    }

    /// Estimated bytes after which a single aggregate is complete
    pub fn max_est_bytes_per_agg(&self) -> u64 {
        self.max_est_bytes_per_agg
    }

    /// Age after which an aggregate is stale
    pub fn staleness_deadline_per_agg(&self) -> Duration {
        Duration::from_millis(self.staleness_deadline_per_agg_ms)
    }

    pub(crate) fn staleness_deadline_per_agg_ms(&self) -> u64 {
        self.staleness_deadline_per_agg_ms
    }
}

/// Builder for [`AggregateStoreConfig`]
#[derive(Debug, Clone, Default)]
pub struct AggregateStoreConfigBuilder {
    config: AggregateStoreConfig,
}

impl AggregateStoreConfigBuilder {
    /// Sets the ceiling on estimated bytes across all aggregates.
    ///
    /// Defaults to 350 MB. When the sum of every aggregate's estimated bytes exceeds this, the
    /// largest aggregate is evicted even if it is not complete. It may be set below
    /// [`max_est_bytes_per_agg`](Self::max_est_bytes_per_agg), in which case eviction fires
    /// before any single aggregate fills up.
    pub fn max_est_bytes_all_aggregates(mut self, bytes: u64) -> Self {
        self.config.max_est_bytes_all_aggregates = bytes;
        self
    }

    /// Sets the number of records after which an aggregate is complete.
    ///
    /// Defaults to `100_000`.
    pub fn max_records_per_agg(mut self, records: u64) -> Self {
        self.config.max_records_per_agg = records;
        self
    }

    /// Sets the estimated bytes after which an aggregate is complete.
    ///
    /// Defaults to 70 MB.
    pub fn max_est_bytes_per_agg(mut self, bytes: u64) -> Self {
        self.config.max_est_bytes_per_agg = bytes;
        self
    }

    /// Sets how long an aggregate may exist before it is flushed regardless of size.
    ///
    /// Defaults to 5 minutes. The clock starts when the aggregate is created and is not reset
    /// by later records. Sub-millisecond precision is truncated.
    pub fn staleness_deadline_per_agg(mut self, deadline: Duration) -> Self {
        self.config.staleness_deadline_per_agg_ms =
            deadline.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    /// Validate and return the config
    pub fn build(self) -> Result<AggregateStoreConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Why an [`AggregateStoreConfig`] was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A limit was zero
    Zero {
        /// Name of the offending limit
        field: &'static str,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zero { field } => write!(f, "`{field}` must be greater than zero"),
        }
    }
}

impl std::error::Error for ConfigError {}

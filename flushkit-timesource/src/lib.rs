// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

use std::{
    fmt::Debug,
    time::{SystemTime, UNIX_EPOCH},
};

/// Module containing fake time sources for testing
///
/// To enable this module, you must enable the `test-util` feature.
#[cfg(feature = "test-util")]
pub mod fakes;

/// Trait for providing custom time sources
///
/// Implementors of this trait can be used to provide custom time behavior
/// for testing or specialized use cases.
pub trait Time: Send + Sync + Debug {
    /// Get the current system time
    fn now(&self) -> SystemTime;
}

/// Where the flush scheduler reads the current time from
///
/// `TimeSource` is cheap to clone and is passed explicitly to whatever needs a clock. There is no
/// process-wide override.
#[derive(Clone, Default)]
pub enum TimeSource {
    /// Use the system time
    #[default]
    System,
    #[cfg(feature = "custom-timesource")]
    /// Use a custom time source
    Custom(std::sync::Arc<dyn Time + Send + Sync>),
}

impl std::fmt::Debug for TimeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "TimeSource::System"),
            #[cfg(feature = "custom-timesource")]
            Self::Custom(_) => write!(f, "TimeSource::Custom(...)"),
        }
    }
}

impl TimeSource {
    /// Get the current [`SystemTime`] from this time source
    ///
    /// # Examples
    ///
    /// ```
    /// use flushkit_timesource::TimeSource;
    ///
    /// let ts = TimeSource::System;
    /// let now = ts.system_time();
    /// ```
    pub fn system_time(&self) -> SystemTime {
        match self {
            Self::System => SystemTime::now(),
            #[cfg(feature = "custom-timesource")]
            Self::Custom(ts) => ts.now(),
        }
    }

    /// Milliseconds since the Unix epoch, as read from this time source
    ///
    /// This is the unit every deadline in flushkit is expressed in.
    ///
    /// # Examples
    ///
    /// ```
    /// use flushkit_timesource::{TimeSource, fakes::StaticTimeSource};
    ///
    /// let ts = TimeSource::custom(StaticTimeSource::at_epoch_millis(42));
    /// assert_eq!(ts.epoch_millis(), 42);
    /// ```
    pub fn epoch_millis(&self) -> u64 {
        epoch_millis(self.system_time())
    }

    /// Create a new TimeSource with a custom time implementation
    ///
    /// This method is only available when the `custom-timesource` feature is enabled.
    ///
    /// # Examples
    ///
    /// ```
    /// use flushkit_timesource::{TimeSource, fakes::StaticTimeSource};
    /// use std::time::UNIX_EPOCH;
    ///
    /// let static_time = StaticTimeSource::at_time(UNIX_EPOCH);
    /// let ts = TimeSource::custom(static_time);
    /// assert_eq!(ts.system_time(), UNIX_EPOCH);
    /// ```
    #[cfg(feature = "custom-timesource")]
    pub fn custom(custom: impl Time + 'static) -> TimeSource {
        Self::Custom(std::sync::Arc::new(custom))
    }
}

/// Convert a [`SystemTime`] into milliseconds since the Unix epoch
///
/// Times before the epoch clamp to `0`, and times past `u64::MAX` milliseconds clamp to
/// `u64::MAX`.
pub fn epoch_millis(time: SystemTime) -> u64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => since.as_millis().try_into().unwrap_or(u64::MAX),
        Err(_) => 0,
    }
}

// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crate::Time;

/// Simple static timesource that will always return the same time
#[derive(Debug)]
pub struct StaticTimeSource {
    now: SystemTime,
}

impl StaticTimeSource {
    /// Create a new StaticTimeSource that always returns the given time
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
    pub fn at_time(time: impl Into<SystemTime>) -> Self {
        Self { now: time.into() }
    }

    /// Create a new StaticTimeSource fixed at `millis` milliseconds after the Unix epoch
    pub fn at_epoch_millis(millis: u64) -> Self {
        Self::at_time(UNIX_EPOCH + Duration::from_millis(millis))
    }
}

impl Time for StaticTimeSource {
    fn now(&self) -> SystemTime {
        self.now
    }
}

/// Dummy timesource that is loaded with one time,
/// but you can clone it and further modify the time via a shared handle
#[derive(Debug, Clone)]
pub struct ManuallyAdvancedTimeSource(Arc<Mutex<StaticTimeSource>>);

impl ManuallyAdvancedTimeSource {
    /// Create a new ManuallyAdvancedTimeSource that is started with the given time.
    ///
    /// You can subsequently call [`Self::update_time`] or [`Self::advance`] to modify the
    /// loaded time.
    ///
    /// # Examples
    ///
    /// ```
    /// use flushkit_timesource::{TimeSource, fakes::ManuallyAdvancedTimeSource};
    /// use std::time::UNIX_EPOCH;
    ///
    /// let dummy_time = ManuallyAdvancedTimeSource::at_time(UNIX_EPOCH);
    /// let ts = TimeSource::custom(dummy_time);
    /// assert_eq!(ts.system_time(), UNIX_EPOCH);
    /// ```
    pub fn at_time(time: impl Into<SystemTime>) -> Self {
        let ts = StaticTimeSource::at_time(time);
        Self(Arc::from(Mutex::from(ts)))
    }

    /// Create a new ManuallyAdvancedTimeSource started at `millis` milliseconds after the Unix
    /// epoch
    pub fn at_epoch_millis(millis: u64) -> Self {
        Self::at_time(UNIX_EPOCH + Duration::from_millis(millis))
    }

    /// Replace the SystemTime loaded into the ManuallyAdvancedTimeSource.
    ///
    /// # Examples
    ///
    /// ```
    /// use flushkit_timesource::{TimeSource, fakes::ManuallyAdvancedTimeSource};
    /// use std::time::{Duration, UNIX_EPOCH};
    ///
    /// let dummy_time = ManuallyAdvancedTimeSource::at_time(UNIX_EPOCH);
    /// let ts = TimeSource::custom(dummy_time.clone());
    ///
    /// let new_timestamp = UNIX_EPOCH + Duration::from_secs(100);
    /// dummy_time.update_time(new_timestamp);
    /// assert_eq!(ts.system_time(), new_timestamp);
    /// ```
    pub fn update_time(&self, time: impl Into<SystemTime>) {
        let mut guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        guard.now = time.into();
    }

    /// Move the loaded SystemTime forward by `elapsed`.
    ///
    /// # Examples
    ///
    /// ```
    /// use flushkit_timesource::{TimeSource, fakes::ManuallyAdvancedTimeSource};
    /// use std::time::Duration;
    ///
    /// let dummy_time = ManuallyAdvancedTimeSource::at_epoch_millis(0);
    /// let ts = TimeSource::custom(dummy_time.clone());
    ///
    /// dummy_time.advance(Duration::from_millis(250));
    /// assert_eq!(ts.epoch_millis(), 250);
    /// ```
    pub fn advance(&self, elapsed: Duration) {
        let mut guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        guard.now += elapsed;
    }
}

impl Time for ManuallyAdvancedTimeSource {
    fn now(&self) -> SystemTime {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).now
    }
}

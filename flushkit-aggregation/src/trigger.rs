//! Flush triggers
//!
//! A trigger is a predicate over accumulated state that tells the store an aggregate is ready to
//! be flushed. [`SizeTrigger`] fires once a counter reaches a threshold, [`TimeTrigger`] once a
//! window has elapsed since a reference instant.
//!
//! Both are backed by atomics and take `&self`, so readers (snapshots, the eviction scan) never
//! need exclusive access to the aggregate that owns them.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter compared against a fixed threshold
///
/// ```
/// use flushkit_aggregation::trigger::SizeTrigger;
///
/// let trigger = SizeTrigger::new(100);
/// trigger.increment(99);
/// assert!(!trigger.is_complete());
/// trigger.increment(1);
/// assert!(trigger.is_complete());
/// ```
#[derive(Debug)]
pub struct SizeTrigger {
    threshold: u64,
    watermark: AtomicU64,
}

impl SizeTrigger {
    /// Create a trigger that fires once `threshold` has been accumulated
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold,
            watermark: AtomicU64::new(0),
        }
    }

    /// Add `delta` to the watermark
    ///
    /// Saturates at `u64::MAX` rather than wrapping.
    pub fn increment(&self, delta: u64) {
        // fetch_update never fails when the closure always returns Some
        let _ = self
            .watermark
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_add(delta))
            });
    }

    /// Whether the watermark has reached the threshold
    ///
    /// Overshooting the threshold stays complete.
    pub fn is_complete(&self) -> bool {
        self.watermark() >= self.threshold
    }

    /// Total accumulated so far
    pub fn watermark(&self) -> u64 {
        self.watermark.load(Ordering::Relaxed)
    }

    /// The threshold this trigger was created with
    pub fn threshold(&self) -> u64 {
        self.threshold
    }
}

// u64::MAX is never a realistic epoch-millis reference
const UNSET: u64 = u64::MAX;

/// Deadline tracker relative to a replaceable reference instant
///
/// All instants are milliseconds since the Unix epoch. Until [`TimeTrigger::update`] is called the
/// trigger has no reference and never completes.
///
/// ```
/// use flushkit_aggregation::trigger::TimeTrigger;
///
/// let trigger = TimeTrigger::new(1_000);
/// trigger.update(5_000);
/// assert!(!trigger.is_complete(5_999));
/// assert!(trigger.is_complete(6_000));
///
/// // moving the reference restarts the window
/// trigger.update(6_000);
/// assert!(!trigger.is_complete(6_000));
/// ```
#[derive(Debug)]
pub struct TimeTrigger {
    window_ms: u64,
    reference: AtomicU64,
}

impl TimeTrigger {
    /// Create a trigger with a window of `window_ms` milliseconds and no reference
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            reference: AtomicU64::new(UNSET),
        }
    }

    /// Replace the reference instant
    ///
    /// Moving the reference backwards is allowed; the trigger does not check monotonicity.
    pub fn update(&self, now_ms: u64) {
        // keep UNSET reserved
        self.reference.store(now_ms.min(UNSET - 1), Ordering::Relaxed);
    }

    /// Whether `window_ms` has elapsed between the reference and `now_ms`
    ///
    /// A `now_ms` earlier than the reference is never complete.
    pub fn is_complete(&self, now_ms: u64) -> bool {
        match self.reference() {
            Some(reference) => now_ms
                .checked_sub(reference)
                .is_some_and(|elapsed| elapsed >= self.window_ms),
            None => false,
        }
    }

    /// The current reference instant, if one has been set
    pub fn reference(&self) -> Option<u64> {
        match self.reference.load(Ordering::Relaxed) {
            UNSET => None,
            reference => Some(reference),
        }
    }

    /// The window this trigger was created with, in milliseconds
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Dual-threshold accumulation of expired keys.
//!
//! A flush fires when either threshold trips: the batch reaches
//! `size_threshold` entries (checked on push), or `time_threshold` has
//! passed since the previous flush (checked against the message stream).
//! The time baseline is only established on first use, so an idle listener
//! does not flush an empty batch the moment its first event arrives.

use std::time::{Duration, Instant};

/// One expired entry: the composed final key and its precomputed hash.
///
/// The hash is computed here, at observation time, because the
/// reconciliation script needs it to locate shard sets and cannot compute
/// it server-side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredKey {
    pub final_key: String,
    pub hash: u32,
}

/// Why a batch was handed off for reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// The size threshold was reached.
    Count,
    /// The time threshold elapsed since the previous flush.
    Time,
    /// The event stream ended; the remainder is drained so a clean
    /// shutdown loses nothing.
    Shutdown,
}

impl FlushReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Time => "time",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Accumulator for expired keys awaiting reconciliation.
#[derive(Debug)]
pub struct ExpiryBatch {
    keys: Vec<ExpiredKey>,
    size_threshold: usize,
    time_threshold: Duration,
    last_flush: Option<Instant>,
}

impl ExpiryBatch {
    #[must_use]
    pub fn new(size_threshold: usize, time_threshold: Duration) -> Self {
        Self {
            keys: Vec::new(),
            size_threshold: size_threshold.max(1),
            time_threshold,
            last_flush: None,
        }
    }

    /// Add an expired key. Returns `Some(FlushReason::Count)` when this
    /// push filled the batch to its size threshold.
    pub fn push(&mut self, key: ExpiredKey) -> Option<FlushReason> {
        self.keys.push(key);
        (self.keys.len() >= self.size_threshold).then_some(FlushReason::Count)
    }

    /// Whether the time threshold has elapsed since the previous flush.
    ///
    /// The first call only records the baseline and reports `false`;
    /// subsequent calls compare against it. Never fires for an empty batch.
    pub fn should_flush_by_time(&mut self, now: Instant) -> bool {
        let Some(last) = self.last_flush else {
            self.last_flush = Some(now);
            return false;
        };
        !self.keys.is_empty() && now.duration_since(last) >= self.time_threshold
    }

    /// Drain the accumulated keys and reset the time baseline.
    pub fn take(&mut self, now: Instant) -> Vec<ExpiredKey> {
        self.last_flush = Some(now);
        std::mem::take(&mut self.keys)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> ExpiredKey {
        ExpiredKey {
            final_key: name.to_string(),
            hash: crate::keys::stable_hash(name),
        }
    }

    #[test]
    fn test_count_threshold_fires_exactly_at_size() {
        let mut batch = ExpiryBatch::new(3, Duration::from_secs(1));
        assert_eq!(batch.push(key("a")), None);
        assert_eq!(batch.push(key("b")), None);
        assert_eq!(batch.push(key("c")), Some(FlushReason::Count));
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn test_take_drains_and_resets() {
        let mut batch = ExpiryBatch::new(2, Duration::from_secs(1));
        batch.push(key("a"));
        batch.push(key("b"));
        let drained = batch.take(Instant::now());
        assert_eq!(drained.len(), 2);
        assert!(batch.is_empty());
        // Counting starts over after a drain
        assert_eq!(batch.push(key("c")), None);
    }

    #[test]
    fn test_first_time_check_only_records_baseline() {
        let mut batch = ExpiryBatch::new(100, Duration::from_millis(10));
        batch.push(key("a"));
        let start = Instant::now();
        assert!(!batch.should_flush_by_time(start));
        // Past the threshold relative to the recorded baseline
        assert!(batch.should_flush_by_time(start + Duration::from_millis(11)));
    }

    #[test]
    fn test_time_threshold_never_fires_empty() {
        let mut batch = ExpiryBatch::new(100, Duration::from_millis(10));
        let start = Instant::now();
        batch.should_flush_by_time(start);
        assert!(!batch.should_flush_by_time(start + Duration::from_secs(5)));
    }

    #[test]
    fn test_burst_larger_than_threshold_flushes_in_waves() {
        // 150 events against a threshold of 100: one count-triggered flush
        // at 100, the remaining 50 wait for the time threshold.
        let mut batch = ExpiryBatch::new(100, Duration::from_secs(1));
        let mut count_flushes = 0;
        for i in 0..150 {
            if batch.push(key(&format!("k{i}"))) == Some(FlushReason::Count) {
                batch.take(Instant::now());
                count_flushes += 1;
            }
        }
        assert_eq!(count_flushes, 1);
        assert_eq!(batch.len(), 50);

        let now = Instant::now();
        batch.should_flush_by_time(now);
        assert!(batch.should_flush_by_time(now + Duration::from_secs(2)));
        assert_eq!(batch.take(Instant::now()).len(), 50);
    }
}

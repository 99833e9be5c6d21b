// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Sliding-window byte accounting (spec.md §4.6, grounded on
//! `Bandwidth_Monitor.h`).

use std::collections::VecDeque;
use std::sync::Mutex;

struct Inner {
    messages: VecDeque<(u64, u64)>,
    utilization: u64,
    window_secs: u64,
}

/// Tracks bytes sent/received over a sliding time window. `-1`-style "no
/// limit" sentinels from the original are `Option::None` here rather
/// than a magic negative number.
pub struct BandwidthMonitor {
    inner: Mutex<Inner>,
}

impl BandwidthMonitor {
    pub fn new(window_secs: u64) -> Self {
        BandwidthMonitor {
            inner: Mutex::new(Inner { messages: VecDeque::new(), utilization: 0, window_secs: window_secs.max(1) }),
        }
    }

    pub fn set_window(&self, window_secs: u64) {
        self.inner.lock().expect("bandwidth monitor lock poisoned").window_secs = window_secs.max(1);
    }

    /// Records `bytes` as having been transferred at `now` (Unix
    /// seconds).
    pub fn add(&self, now: u64, bytes: u64) {
        let mut inner = self.inner.lock().expect("bandwidth monitor lock poisoned");
        inner.messages.push_back((now, bytes));
        inner.utilization += bytes;
        Self::evict_expired(&mut inner, now);
    }

    fn evict_expired(inner: &mut Inner, now: u64) {
        let window_secs = inner.window_secs;
        while let Some(&(ts, bytes)) = inner.messages.front() {
            if now.saturating_sub(ts) > window_secs {
                inner.utilization = inner.utilization.saturating_sub(bytes);
                inner.messages.pop_front();
            } else {
                break;
            }
        }
    }

    /// Total bytes transferred within the window (not bytes/second).
    pub fn get_utilization(&self, now: u64) -> u64 {
        let mut inner = self.inner.lock().expect("bandwidth monitor lock poisoned");
        Self::evict_expired(&mut inner, now);
        inner.utilization
    }

    pub fn get_bytes_per_second(&self, now: u64) -> u64 {
        let window_secs = {
            let mut inner = self.inner.lock().expect("bandwidth monitor lock poisoned");
            Self::evict_expired(&mut inner, now);
            inner.window_secs
        };
        self.get_utilization(now) / window_secs
    }

    /// `limit < 0` (expressed here as `None`) never violates.
    pub fn is_violated(&self, now: u64, limit: Option<u64>) -> bool {
        match limit {
            None => false,
            Some(limit) => self.get_utilization(now) > limit,
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("bandwidth monitor lock poisoned");
        inner.messages.clear();
        inner.utilization = 0;
    }

    pub fn get_number_of_messages(&self) -> usize {
        self.inner.lock().expect("bandwidth monitor lock poisoned").messages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utilization_accumulates_within_window() {
        let monitor = BandwidthMonitor::new(10);
        monitor.add(100, 500);
        monitor.add(101, 300);
        assert_eq!(monitor.get_utilization(101), 800);
    }

    #[test]
    fn expired_entries_drop_out_of_the_window() {
        let monitor = BandwidthMonitor::new(10);
        monitor.add(100, 500);
        assert_eq!(monitor.get_utilization(120), 0, "entry older than the window must be evicted");
    }

    #[test]
    fn unlimited_is_never_violated() {
        let monitor = BandwidthMonitor::new(10);
        monitor.add(100, 10_000_000);
        assert!(!monitor.is_violated(100, None));
    }

    #[test]
    fn limit_is_enforced() {
        let monitor = BandwidthMonitor::new(10);
        monitor.add(100, 1000);
        assert!(monitor.is_violated(100, Some(500)));
        assert!(!monitor.is_violated(100, Some(5000)));
    }
}

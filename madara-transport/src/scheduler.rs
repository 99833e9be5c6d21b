// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Deterministic/probabilistic packet dropping for testing degraded
//! links (spec.md §4.6, grounded on `QoSTransportSettings.h`'s
//! `PacketDropType`).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DropPolicy {
    /// Drop the next `burst` packets every `1 / rate` packets sent.
    Deterministic { rate: f64, burst: u64 },
    /// Each packet is independently dropped with probability `rate`; a
    /// drop triggers `burst` total consecutive drops.
    Probabilistic { rate: f64, burst: u64 },
}

impl Default for DropPolicy {
    fn default() -> Self {
        DropPolicy::Deterministic { rate: 0.0, burst: 1 }
    }
}

struct Inner {
    policy: DropPolicy,
    sent_count: u64,
    remaining_drops: u64,
    rng: StdRng,
}

/// Decides per-packet whether to drop, deterministically reproducible
/// from a seed so tests can replay a sequence (spec.md §4.6).
pub struct PacketScheduler {
    inner: Mutex<Inner>,
}

impl PacketScheduler {
    pub fn new(policy: DropPolicy, seed: u64) -> Self {
        PacketScheduler {
            inner: Mutex::new(Inner { policy, sent_count: 0, remaining_drops: 0, rng: StdRng::seed_from_u64(seed) }),
        }
    }

    pub fn set_policy(&self, policy: DropPolicy) {
        let mut inner = self.inner.lock().expect("scheduler lock poisoned");
        inner.policy = policy;
        inner.remaining_drops = 0;
        inner.sent_count = 0;
    }

    pub fn policy(&self) -> DropPolicy {
        self.inner.lock().expect("scheduler lock poisoned").policy
    }

    /// Call once per packet about to be sent. Returns `true` if this
    /// packet should be dropped.
    pub fn should_drop(&self) -> bool {
        let mut inner = self.inner.lock().expect("scheduler lock poisoned");

        if inner.remaining_drops > 0 {
            inner.remaining_drops -= 1;
            return true;
        }

        match inner.policy {
            DropPolicy::Deterministic { rate, burst } => {
                inner.sent_count += 1;
                if rate <= 0.0 {
                    return false;
                }
                let interval = (1.0 / rate).round().max(1.0) as u64;
                if inner.sent_count.is_multiple_of(interval) {
                    inner.remaining_drops = burst.saturating_sub(1);
                    true
                } else {
                    false
                }
            }
            DropPolicy::Probabilistic { rate, burst } => {
                if rate <= 0.0 {
                    return false;
                }
                if inner.rng.gen::<f64>() < rate {
                    inner.remaining_drops = burst.saturating_sub(1);
                    true
                } else {
                    false
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_drop_policy_never_drops() {
        let scheduler = PacketScheduler::new(DropPolicy::Deterministic { rate: 0.0, burst: 1 }, 1);
        for _ in 0..50 {
            assert!(!scheduler.should_drop());
        }
    }

    #[test]
    fn deterministic_drops_every_nth_packet() {
        let scheduler = PacketScheduler::new(DropPolicy::Deterministic { rate: 0.25, burst: 1 }, 1);
        let drops: Vec<bool> = (0..8).map(|_| scheduler.should_drop()).collect();
        assert_eq!(drops, vec![false, false, false, true, false, false, false, true]);
    }

    #[test]
    fn deterministic_burst_drops_consecutive_packets() {
        let scheduler = PacketScheduler::new(DropPolicy::Deterministic { rate: 0.5, burst: 3 }, 1);
        let drops: Vec<bool> = (0..6).map(|_| scheduler.should_drop()).collect();
        assert_eq!(drops, vec![false, true, true, true, false, true]);
    }

    #[test]
    fn probabilistic_is_reproducible_given_a_seed() {
        let a = PacketScheduler::new(DropPolicy::Probabilistic { rate: 0.4, burst: 1 }, 42);
        let b = PacketScheduler::new(DropPolicy::Probabilistic { rate: 0.4, burst: 1 }, 42);
        let seq_a: Vec<bool> = (0..20).map(|_| a.should_drop()).collect();
        let seq_b: Vec<bool> = (0..20).map(|_| b.should_drop()).collect();
        assert_eq!(seq_a, seq_b);
    }
}

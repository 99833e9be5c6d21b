// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Splitting an oversized update list into fragments on send, and
//! reassembling them on receive (spec.md §4.4).

use crate::header::{FragmentHeader, FullHeader, FRAGMENT_HEADER_SIZE};
use log::debug;
use std::collections::{HashMap, VecDeque};

/// Splits `updates` (the already-encoded update list, not the header)
/// into fragments no larger than `max_fragment_size` bytes of payload
/// each, stamping each with a [`FragmentHeader`] carrying
/// `(update_number, total_updates)` (spec.md §4.4).
pub fn split(base: &FullHeader, updates: &[u8], max_fragment_size: usize) -> Vec<Vec<u8>> {
    let max_fragment_size = max_fragment_size.max(1);
    let chunks: Vec<&[u8]> = updates.chunks(max_fragment_size).collect();
    let total_updates = chunks.len().max(1) as u32;

    if updates.is_empty() {
        let header = FragmentHeader { base: base.clone(), update_number: 0, total_updates: 1 };
        let mut buf = Vec::with_capacity(FRAGMENT_HEADER_SIZE);
        header.write(&mut buf);
        return vec![buf];
    }

    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let header = FragmentHeader {
                base: base.clone(),
                update_number: i as u32,
                total_updates,
            };
            let mut buf = Vec::with_capacity(FRAGMENT_HEADER_SIZE + chunk.len());
            header.write(&mut buf);
            buf.extend_from_slice(chunk);
            buf
        })
        .collect()
}

#[derive(Default)]
struct PendingMessage {
    total_updates: u32,
    pieces: HashMap<u32, Vec<u8>>,
}

/// Per-`(originator, clock)` reassembly state, bounded to
/// `fragment_queue_length` in-flight messages with oldest-first eviction
/// (spec.md §4.4). Duplicate `(originator, clock, update_number)`
/// fragments are ignored rather than overwriting the stored piece.
pub struct FragmentMap {
    queue_length: usize,
    order: VecDeque<(String, u64)>,
    pending: HashMap<(String, u64), PendingMessage>,
    dropped: u64,
}

impl FragmentMap {
    pub fn new(queue_length: usize) -> Self {
        FragmentMap {
            queue_length: queue_length.max(1),
            order: VecDeque::new(),
            pending: HashMap::new(),
            dropped: 0,
        }
    }

    /// Number of in-flight messages evicted before every fragment
    /// arrived (the original `Transport.cpp`'s fragment-drop counter,
    /// SPEC_FULL.md "#fragment diagnostics").
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Feeds in one fragment. Returns `Some(reassembled_updates)` once
    /// every piece of its message has arrived.
    pub fn accept(&mut self, header: &FragmentHeader, payload: &[u8]) -> Option<Vec<u8>> {
        let key = (header.base.originator.clone(), header.base.clock);

        if !self.pending.contains_key(&key) {
            self.evict_if_full();
            self.order.push_back(key.clone());
            self.pending.insert(
                key.clone(),
                PendingMessage { total_updates: header.total_updates, pieces: HashMap::new() },
            );
        }

        let entry = self.pending.get_mut(&key).expect("just inserted");
        entry.pieces.entry(header.update_number).or_insert_with(|| payload.to_vec());

        if entry.pieces.len() as u32 >= entry.total_updates {
            let entry = self.pending.remove(&key).expect("checked above");
            self.order.retain(|k| k != &key);
            let mut reassembled = Vec::new();
            for i in 0..entry.total_updates {
                if let Some(piece) = entry.pieces.get(&i) {
                    reassembled.extend_from_slice(piece);
                }
            }
            Some(reassembled)
        } else {
            None
        }
    }

    fn evict_if_full(&mut self) {
        while self.order.len() >= self.queue_length {
            if let Some(oldest) = self.order.pop_front() {
                self.pending.remove(&oldest);
                self.dropped += 1;
                debug!("evicted incomplete fragmented message from {} before it reassembled", oldest.0);
            } else {
                break;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::MULTIASSIGN;

    fn base(originator: &str, clock: u64) -> FullHeader {
        FullHeader { originator: originator.into(), clock, message_type: MULTIASSIGN, ..FullHeader::default() }
    }

    #[test]
    fn split_then_reassemble_round_trips() {
        let payload: Vec<u8> = (0..1000u32).flat_map(|v| v.to_be_bytes()).collect();
        let header = base("host:1", 5);
        let fragments = split(&header, &payload, 777);
        assert!(fragments.len() > 1);

        let mut map = FragmentMap::new(8);
        let mut result = None;
        for frag in &fragments {
            let fh = FragmentHeader::read(frag).unwrap();
            result = map.accept(&fh, &frag[crate::header::FRAGMENT_HEADER_SIZE..]);
        }
        assert_eq!(result.unwrap(), payload);
        assert!(map.is_empty());
    }

    #[test]
    fn duplicate_fragment_is_ignored() {
        let payload = vec![1u8, 2, 3, 4];
        let header = base("host:1", 1);
        let fragments = split(&header, &payload, 2);
        let mut map = FragmentMap::new(8);

        let fh0 = FragmentHeader::read(&fragments[0]).unwrap();
        assert!(map.accept(&fh0, &fragments[0][crate::header::FRAGMENT_HEADER_SIZE..]).is_none());
        // Resend the same fragment — must not corrupt the pending count.
        assert!(map.accept(&fh0, &fragments[0][crate::header::FRAGMENT_HEADER_SIZE..]).is_none());

        let fh1 = FragmentHeader::read(&fragments[1]).unwrap();
        let result = map.accept(&fh1, &fragments[1][crate::header::FRAGMENT_HEADER_SIZE..]);
        assert_eq!(result.unwrap(), payload);
    }

    #[test]
    fn queue_evicts_oldest_when_full() {
        let mut map = FragmentMap::new(2);
        for clock in 0..3u64 {
            let header = base("host:1", clock);
            let fh = FragmentHeader { base: header, update_number: 0, total_updates: 2 };
            map.accept(&fh, &[1, 2, 3]);
        }
        assert_eq!(map.len(), 2, "oldest (originator, clock) entry should have been evicted");
        assert_eq!(map.dropped(), 1);
    }
}

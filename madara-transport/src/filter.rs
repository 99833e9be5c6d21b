// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The three symmetric filter chains — send, receive, rebroadcast — plus
//! the buffer-filter stack applied once at the framing layer (spec.md
//! §4.5).

use madara_context::Record;
use std::collections::HashMap;
use std::sync::Arc;

/// What the transport is doing when a filter runs (spec.md §4.5
/// `TransportContext`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Idle,
    Sending,
    Receiving,
    Rebroadcasting,
}

/// Passed to every filter invocation. `records` is a mutable scratch map
/// a filter may add entries to; those entries are merged into the
/// outgoing/incoming set after the chain runs (spec.md §4.5).
pub struct TransportContext {
    pub operation: Operation,
    pub send_bandwidth: u64,
    pub receive_bandwidth: u64,
    pub message_timestamp: u64,
    pub current_time: u64,
    pub domain: String,
    pub originator: String,
    pub records: HashMap<String, Record>,
}

impl TransportContext {
    pub fn new(operation: Operation, domain: impl Into<String>, originator: impl Into<String>) -> Self {
        TransportContext {
            operation,
            send_bandwidth: 0,
            receive_bandwidth: 0,
            message_timestamp: 0,
            current_time: 0,
            domain: domain.into(),
            originator: originator.into(),
            records: HashMap::new(),
        }
    }
}

/// A per-record-type filter (spec.md §4.5). Returning an uncreated
/// record drops it from the set being built.
pub trait RecordFilter: Send + Sync {
    fn apply(&self, name: &str, record: Record, ctx: &mut TransportContext) -> Record;
}

/// Invoked once per message with the whole update set, free to add,
/// modify, or erase entries (spec.md §4.5).
pub trait AggregateFilter: Send + Sync {
    fn apply(&self, records: &mut HashMap<String, Record>, ctx: &mut TransportContext);
}

/// A buffer filter transforms the fully-serialized datagram, applied
/// outside the record layer (spec.md §4.5). Multiple filters form a
/// stack: encode runs in registration order, decode in the reverse
/// order, so the last filter to encode is the first to decode.
pub trait BufferFilter: Send + Sync {
    fn encode(&self, buf: &[u8]) -> Vec<u8>;
    fn decode(&self, buf: &[u8]) -> Vec<u8>;
}

/// One directional chain: record filters keyed by a type bitmask, then
/// aggregate filters (spec.md §4.5).
#[derive(Default)]
pub struct FilterStage {
    record_filters: Vec<(u32, Arc<dyn RecordFilter>)>,
    aggregate_filters: Vec<Arc<dyn AggregateFilter>>,
}

impl FilterStage {
    pub fn add_record_filter(&mut self, types: u32, filter: Arc<dyn RecordFilter>) {
        self.record_filters.push((types, filter));
    }

    pub fn add_aggregate_filter(&mut self, filter: Arc<dyn AggregateFilter>) {
        self.aggregate_filters.push(filter);
    }

    pub fn number_of_filtered_types(&self) -> usize {
        self.record_filters.len()
    }

    pub fn number_of_aggregate_filters(&self) -> usize {
        self.aggregate_filters.len()
    }

    /// Runs every record filter whose type mask matches, dropping
    /// records that come back uncreated, then runs the aggregate
    /// filters, then merges any scratch records the filters injected.
    pub fn apply(&self, records: &mut HashMap<String, Record>, ctx: &mut TransportContext) {
        for (name, record) in std::mem::take(records) {
            let mut current = record;
            for (mask, filter) in &self.record_filters {
                if mask & current.type_tag() == 0 {
                    continue;
                }
                current = filter.apply(&name, current, ctx);
                if current.is_uncreated() {
                    break;
                }
            }
            if !current.is_uncreated() {
                records.insert(name, current);
            }
        }

        for filter in &self.aggregate_filters {
            filter.apply(records, ctx);
        }

        for (name, record) in ctx.records.drain() {
            records.insert(name, record);
        }
    }
}

/// The three symmetric chains plus the shared buffer-filter stack
/// (spec.md §4.5).
#[derive(Default)]
pub struct FilterChain {
    pub send: FilterStage,
    pub receive: FilterStage,
    pub rebroadcast: FilterStage,
    buffer_filters: Vec<Arc<dyn BufferFilter>>,
}

impl FilterChain {
    pub fn add_buffer_filter(&mut self, filter: Arc<dyn BufferFilter>) {
        self.buffer_filters.push(filter);
    }

    pub fn number_of_buffer_filters(&self) -> usize {
        self.buffer_filters.len()
    }

    /// Runs the buffer-filter stack in registration order on egress.
    pub fn encode(&self, buf: &[u8]) -> Vec<u8> {
        let mut out = buf.to_vec();
        for filter in &self.buffer_filters {
            out = filter.encode(&out);
        }
        out
    }

    /// Runs the buffer-filter stack in reverse registration order on
    /// ingress, undoing `encode`.
    pub fn decode(&self, buf: &[u8]) -> Vec<u8> {
        let mut out = buf.to_vec();
        for filter in self.buffer_filters.iter().rev() {
            out = filter.decode(&out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use madara_context::RecordValue;

    struct DoubleIntegers;
    impl RecordFilter for DoubleIntegers {
        fn apply(&self, _name: &str, record: Record, _ctx: &mut TransportContext) -> Record {
            Record::new(RecordValue::Integer(record.as_i64() * 2), record.clock(), record.quality())
        }
    }

    struct DropEverything;
    impl RecordFilter for DropEverything {
        fn apply(&self, _name: &str, _record: Record, _ctx: &mut TransportContext) -> Record {
            Record::uncreated()
        }
    }

    struct InjectExtra;
    impl AggregateFilter for InjectExtra {
        fn apply(&self, _records: &mut HashMap<String, Record>, ctx: &mut TransportContext) {
            ctx.records.insert("injected".into(), Record::new(RecordValue::Integer(99), 0, 0));
        }
    }

    #[test]
    fn record_filter_transforms_matching_type() {
        use madara_record::record_type;
        let mut stage = FilterStage::default();
        stage.add_record_filter(record_type::INTEGER, Arc::new(DoubleIntegers));
        let mut records = HashMap::new();
        records.insert("x".to_string(), Record::new(RecordValue::Integer(5), 1, 0));
        let mut ctx = TransportContext::new(Operation::Sending, "default", "host:1");
        stage.apply(&mut records, &mut ctx);
        assert_eq!(records["x"].as_i64(), 10);
    }

    #[test]
    fn record_filter_can_drop_a_record() {
        use madara_record::record_type;
        let mut stage = FilterStage::default();
        stage.add_record_filter(record_type::ALL, Arc::new(DropEverything));
        let mut records = HashMap::new();
        records.insert("x".to_string(), Record::new(RecordValue::Integer(5), 1, 0));
        let mut ctx = TransportContext::new(Operation::Sending, "default", "host:1");
        stage.apply(&mut records, &mut ctx);
        assert!(records.is_empty());
    }

    #[test]
    fn aggregate_filter_can_inject_records() {
        let mut stage = FilterStage::default();
        stage.add_aggregate_filter(Arc::new(InjectExtra));
        let mut records = HashMap::new();
        let mut ctx = TransportContext::new(Operation::Sending, "default", "host:1");
        stage.apply(&mut records, &mut ctx);
        assert_eq!(records["injected"].as_i64(), 99);
    }
}

// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Per-update wire encoding (spec.md §4.3 "Update encoding"):
//!
//! ```text
//! [name-length:u32][name:bytes][type:u32][value-length:u32][value:bytes]
//! ```
//!
//! Each update also carries the record's own `clock` and `quality` so a
//! receiver can run conflict resolution per key, independent of the
//! message-level clock in the header.

use crate::error::{TransportError, TransportResult};
use madara_context::{Record, RecordValue};

/// Type tags used on the wire. Deliberately distinct from
/// [`madara_record::record_type`]'s filter-chain bitmask: this is a
/// dense wire enum, not a bitmask receivers OR together.
pub mod wire_type {
    pub const INTEGER: u32 = 0;
    pub const DOUBLE: u32 = 1;
    pub const INTEGER_ARRAY: u32 = 2;
    pub const DOUBLE_ARRAY: u32 = 3;
    pub const STRING: u32 = 4;
    pub const BLOB: u32 = 5;
}

fn read_u32(buf: &[u8], at: &mut usize) -> TransportResult<u32> {
    if buf.len() < *at + 4 {
        return Err(TransportError::BufferTooShort { needed: *at + 4, available: buf.len() });
    }
    let v = u32::from_be_bytes(buf[*at..*at + 4].try_into().unwrap());
    *at += 4;
    Ok(v)
}

fn read_u64(buf: &[u8], at: &mut usize) -> TransportResult<u64> {
    if buf.len() < *at + 8 {
        return Err(TransportError::BufferTooShort { needed: *at + 8, available: buf.len() });
    }
    let v = u64::from_be_bytes(buf[*at..*at + 8].try_into().unwrap());
    *at += 8;
    Ok(v)
}

fn read_bytes<'a>(buf: &'a [u8], at: &mut usize, len: usize) -> TransportResult<&'a [u8]> {
    if buf.len() < *at + len {
        return Err(TransportError::BufferTooShort { needed: *at + len, available: buf.len() });
    }
    let slice = &buf[*at..*at + len];
    *at += len;
    Ok(slice)
}

/// Encodes `(name, record)` as one update frame, appending to `buf`.
pub fn encode_update(buf: &mut Vec<u8>, name: &str, record: &Record) {
    buf.extend_from_slice(&(name.len() as u32).to_be_bytes());
    buf.extend_from_slice(name.as_bytes());

    let (type_tag, mut value) = encode_value(record.value());

    buf.extend_from_slice(&type_tag.to_be_bytes());
    buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
    buf.append(&mut value);

    buf.extend_from_slice(&record.clock().to_be_bytes());
    buf.extend_from_slice(&record.quality().to_be_bytes());
}

fn encode_value(value: &RecordValue) -> (u32, Vec<u8>) {
    match value {
        RecordValue::Integer(i) => (wire_type::INTEGER, i.to_be_bytes().to_vec()),
        RecordValue::Double(d) => (wire_type::DOUBLE, d.to_be_bytes().to_vec()),
        RecordValue::IntegerArray(a) => {
            let mut out = Vec::with_capacity(4 + a.len() * 8);
            out.extend_from_slice(&(a.len() as u32).to_be_bytes());
            for v in a.iter() {
                out.extend_from_slice(&v.to_be_bytes());
            }
            (wire_type::INTEGER_ARRAY, out)
        }
        RecordValue::DoubleArray(a) => {
            let mut out = Vec::with_capacity(4 + a.len() * 8);
            out.extend_from_slice(&(a.len() as u32).to_be_bytes());
            for v in a.iter() {
                out.extend_from_slice(&v.to_be_bytes());
            }
            (wire_type::DOUBLE_ARRAY, out)
        }
        RecordValue::String(s) => {
            let mut out = Vec::with_capacity(4 + s.len() + 1);
            out.extend_from_slice(&(s.len() as u32).to_be_bytes());
            out.extend_from_slice(s.as_bytes());
            out.push(0);
            (wire_type::STRING, out)
        }
        // Every other blob-shaped variant (text file, XML, JPEG, unknown
        // file, opaque "any") is indistinguishable on the wire: the
        // filter chain and application are responsible for interpreting
        // the bytes (spec.md §4.3 only names `blob` as a wire type).
        RecordValue::TextFile(b) | RecordValue::Xml(b) | RecordValue::JpegImage(b) | RecordValue::UnknownFile(b) | RecordValue::Any(b) => {
            let mut out = Vec::with_capacity(4 + b.len());
            out.extend_from_slice(&(b.len() as u32).to_be_bytes());
            out.extend_from_slice(b);
            (wire_type::BLOB, out)
        }
        RecordValue::None => (wire_type::BLOB, Vec::new()),
    }
}

/// Decodes one update frame starting at `*at`, advancing `*at` past it.
pub fn decode_update(buf: &[u8], at: &mut usize) -> TransportResult<(String, Record)> {
    let name_len = read_u32(buf, at)? as usize;
    let name_bytes = read_bytes(buf, at, name_len)?;
    let name = std::str::from_utf8(name_bytes).map_err(|_| TransportError::InvalidName)?.to_string();

    let type_tag = read_u32(buf, at)?;
    let value_len = read_u32(buf, at)? as usize;
    let value_bytes = read_bytes(buf, at, value_len)?;
    let value = decode_value(type_tag, value_bytes)?;

    let clock = read_u64(buf, at)?;
    let quality = read_u32(buf, at)?;

    Ok((name, Record::new(value, clock, quality)))
}

fn decode_value(type_tag: u32, bytes: &[u8]) -> TransportResult<RecordValue> {
    match type_tag {
        wire_type::INTEGER => {
            if bytes.len() < 8 {
                return Err(TransportError::BufferTooShort { needed: 8, available: bytes.len() });
            }
            Ok(RecordValue::Integer(i64::from_be_bytes(bytes[0..8].try_into().unwrap())))
        }
        wire_type::DOUBLE => {
            if bytes.len() < 8 {
                return Err(TransportError::BufferTooShort { needed: 8, available: bytes.len() });
            }
            Ok(RecordValue::Double(f64::from_be_bytes(bytes[0..8].try_into().unwrap())))
        }
        wire_type::INTEGER_ARRAY => {
            let mut at = 0;
            let count = read_u32(bytes, &mut at)? as usize;
            // Bounds-check the claimed count against what's actually in the
            // buffer before allocating — an attacker-controlled length
            // must not drive an unbounded `Vec::with_capacity`.
            if bytes.len() - at < count * 8 {
                return Err(TransportError::BufferTooShort { needed: at + count * 8, available: bytes.len() });
            }
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                values.push(i64::from_be_bytes(read_bytes(bytes, &mut at, 8)?.try_into().unwrap()));
            }
            Ok(RecordValue::IntegerArray(std::sync::Arc::new(values)))
        }
        wire_type::DOUBLE_ARRAY => {
            let mut at = 0;
            let count = read_u32(bytes, &mut at)? as usize;
            if bytes.len() - at < count * 8 {
                return Err(TransportError::BufferTooShort { needed: at + count * 8, available: bytes.len() });
            }
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                values.push(f64::from_be_bytes(read_bytes(bytes, &mut at, 8)?.try_into().unwrap()));
            }
            Ok(RecordValue::DoubleArray(std::sync::Arc::new(values)))
        }
        wire_type::STRING => {
            let mut at = 0;
            let len = read_u32(bytes, &mut at)? as usize;
            let str_bytes = read_bytes(bytes, &mut at, len)?;
            let s = std::str::from_utf8(str_bytes).map_err(|_| TransportError::InvalidString)?;
            Ok(RecordValue::String(std::sync::Arc::from(s)))
        }
        wire_type::BLOB => {
            let mut at = 0;
            let len = read_u32(bytes, &mut at)? as usize;
            let payload = read_bytes(bytes, &mut at, len)?;
            if payload.is_empty() {
                Ok(RecordValue::None)
            } else {
                Ok(RecordValue::Any(std::sync::Arc::from(payload)))
            }
        }
        other => Err(TransportError::UnknownRecordType(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(record: Record) -> Record {
        let mut buf = Vec::new();
        encode_update(&mut buf, "x", &record);
        let mut at = 0;
        let (name, decoded) = decode_update(&buf, &mut at).unwrap();
        assert_eq!(name, "x");
        assert_eq!(at, buf.len());
        decoded
    }

    #[test]
    fn integer_round_trips_with_clock_and_quality() {
        let r = Record::new(RecordValue::Integer(-42), 7, 3);
        let decoded = round_trip(r.clone());
        assert_eq!(decoded, r);
    }

    #[test]
    fn double_round_trips() {
        let r = Record::new(RecordValue::Double(3.5), 1, 0);
        assert_eq!(round_trip(r.clone()), r);
    }

    #[test]
    fn integer_array_round_trips() {
        let r = Record::new(RecordValue::IntegerArray(std::sync::Arc::new(vec![1, 2, 3])), 1, 0);
        assert_eq!(round_trip(r.clone()), r);
    }

    #[test]
    fn string_round_trips() {
        let r = Record::new(RecordValue::String(std::sync::Arc::from("hello")), 1, 0);
        assert_eq!(round_trip(r.clone()), r);
    }

    #[test]
    fn multiple_updates_decode_in_sequence() {
        let mut buf = Vec::new();
        encode_update(&mut buf, "a", &Record::new(RecordValue::Integer(1), 1, 0));
        encode_update(&mut buf, "b", &Record::new(RecordValue::Integer(2), 1, 0));
        let mut at = 0;
        let (n1, r1) = decode_update(&buf, &mut at).unwrap();
        let (n2, r2) = decode_update(&buf, &mut at).unwrap();
        assert_eq!((n1.as_str(), r1.as_i64()), ("a", 1));
        assert_eq!((n2.as_str(), r2.as_i64()), ("b", 2));
        assert_eq!(at, buf.len());
    }

    #[test]
    fn truncated_update_is_an_error_not_a_panic() {
        let mut buf = Vec::new();
        encode_update(&mut buf, "x", &Record::new(RecordValue::Integer(1), 1, 0));
        buf.truncate(buf.len() - 4);
        let mut at = 0;
        assert!(decode_update(&buf, &mut at).is_err());
    }

    #[test]
    fn a_corrupted_update_never_panics_the_decoder() {
        let mut buf = Vec::new();
        encode_update(&mut buf, "x", &Record::new(RecordValue::Integer(42), 1, 0));
        for _ in 0..200 {
            let mut corrupted = buf.clone();
            madara_utils::test_utils::corrupt(&mut corrupted);
            let mut at = 0;
            let _ = decode_update(&corrupted, &mut at);
        }
    }
}

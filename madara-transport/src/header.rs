// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The on-wire message headers (spec.md §4.3). All multi-byte integers
//! are big-endian regardless of host byte order. Three variants share a
//! common prefix so a receiver can distinguish them by probing bytes
//! `[8..15]` before committing to a layout.

use crate::error::{TransportError, TransportResult};

pub const MADARA_IDENTIFIER_LENGTH: usize = 8;
pub const MADARA_IDENTIFIER: &str = "KaRL1.4";
pub const REDUCED_MADARA_ID: &str = "karl1.3";
pub const FRAGMENT_MADARA_ID: &str = "KaRL1.F";
pub const MADARA_DOMAIN_MAX_LENGTH: usize = 32;
pub const MAX_ORIGINATOR_LENGTH: usize = 64;
pub const MAX_PACKET_SIZE: usize = 512_000;

/// `type` field value for a plain knowledge-update message (spec.md
/// §4.3).
pub const MULTIASSIGN: u32 = 2;

pub const FULL_HEADER_SIZE: usize = 141;
pub const REDUCED_HEADER_SIZE: usize = 37;
pub const FRAGMENT_HEADER_SIZE: usize = FULL_HEADER_SIZE + 8;

fn write_fixed(buf: &mut Vec<u8>, s: &str, len: usize) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(len);
    buf.extend_from_slice(&bytes[..n]);
    buf.resize(buf.len() + (len - n), 0);
}

fn read_fixed(bytes: &[u8]) -> String {
    let nul = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..nul]).into_owned()
}

fn need(buffer: &[u8], offset: usize, len: usize) -> TransportResult<()> {
    if buffer.len() < offset + len {
        return Err(TransportError::BufferTooShort {
            needed: offset + len,
            available: buffer.len(),
        });
    }
    Ok(())
}

/// The full 141-byte header (spec.md §4.3 table).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullHeader {
    pub size: u64,
    pub domain: String,
    pub originator: String,
    pub message_type: u32,
    pub updates: u32,
    pub quality: u32,
    pub clock: u64,
    pub timestamp: u64,
    pub ttl: u8,
}

impl Default for FullHeader {
    fn default() -> Self {
        FullHeader {
            size: FULL_HEADER_SIZE as u64,
            domain: String::new(),
            originator: String::new(),
            message_type: MULTIASSIGN,
            updates: 0,
            quality: 0,
            clock: 0,
            timestamp: 0,
            ttl: 0,
        }
    }
}

impl FullHeader {
    /// Probes bytes `[8..15]` for the full-header identifier, matching
    /// only 7 of the 8 identifier bytes the way the original discriminator
    /// does (the 8th byte is the NUL terminator, not part of the compare).
    pub fn identifies(buffer: &[u8]) -> bool {
        identifier_matches(buffer, MADARA_IDENTIFIER)
    }

    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.size.to_be_bytes());
        write_fixed(buf, MADARA_IDENTIFIER, MADARA_IDENTIFIER_LENGTH);
        write_fixed(buf, &self.domain, MADARA_DOMAIN_MAX_LENGTH);
        write_fixed(buf, &self.originator, MAX_ORIGINATOR_LENGTH);
        buf.extend_from_slice(&self.message_type.to_be_bytes());
        buf.extend_from_slice(&self.updates.to_be_bytes());
        buf.extend_from_slice(&self.quality.to_be_bytes());
        buf.extend_from_slice(&self.clock.to_be_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.push(self.ttl);
    }

    pub fn read(buffer: &[u8]) -> TransportResult<Self> {
        need(buffer, 0, FULL_HEADER_SIZE)?;
        Ok(FullHeader {
            size: u64::from_be_bytes(buffer[0..8].try_into().unwrap()),
            domain: read_fixed(&buffer[16..48]),
            originator: read_fixed(&buffer[48..112]),
            message_type: u32::from_be_bytes(buffer[112..116].try_into().unwrap()),
            updates: u32::from_be_bytes(buffer[116..120].try_into().unwrap()),
            quality: u32::from_be_bytes(buffer[120..124].try_into().unwrap()),
            clock: u64::from_be_bytes(buffer[124..132].try_into().unwrap()),
            timestamp: u64::from_be_bytes(buffer[132..140].try_into().unwrap()),
            ttl: buffer[140],
        })
    }
}

/// The 29-byte-update-savings reduced header: omits domain, originator,
/// quality and `type` (spec.md §4.3). Used by transports (e.g.
/// multicast/broadcast) that can assume a shared domain and always
/// MULTIASSIGN.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReducedHeader {
    pub size: u64,
    pub updates: u32,
    pub clock: u64,
    pub timestamp: u64,
    pub ttl: u8,
}

impl ReducedHeader {
    pub fn identifies(buffer: &[u8]) -> bool {
        identifier_matches(buffer, REDUCED_MADARA_ID)
    }

    pub fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.size.to_be_bytes());
        write_fixed(buf, REDUCED_MADARA_ID, MADARA_IDENTIFIER_LENGTH);
        buf.extend_from_slice(&self.updates.to_be_bytes());
        buf.extend_from_slice(&self.clock.to_be_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.push(self.ttl);
    }

    pub fn read(buffer: &[u8]) -> TransportResult<Self> {
        need(buffer, 0, REDUCED_HEADER_SIZE)?;
        Ok(ReducedHeader {
            size: u64::from_be_bytes(buffer[0..8].try_into().unwrap()),
            updates: u32::from_be_bytes(buffer[16..20].try_into().unwrap()),
            clock: u64::from_be_bytes(buffer[20..28].try_into().unwrap()),
            timestamp: u64::from_be_bytes(buffer[28..36].try_into().unwrap()),
            ttl: buffer[36],
        })
    }
}

/// A full header plus the `(update_number, total_updates)` pair needed
/// to stitch a reassembly back together (spec.md §4.3, §4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentHeader {
    pub base: FullHeader,
    pub update_number: u32,
    pub total_updates: u32,
}

impl FragmentHeader {
    pub fn identifies(buffer: &[u8]) -> bool {
        identifier_matches(buffer, FRAGMENT_MADARA_ID)
    }

    pub fn write(&self, buf: &mut Vec<u8>) {
        let mut base = self.base.clone();
        base.size = FRAGMENT_HEADER_SIZE as u64;
        let start = buf.len();
        base.write(buf);
        // Stamp the fragment identifier over the full header's, keeping
        // everything else about the layout identical.
        let mut id = Vec::new();
        write_fixed(&mut id, FRAGMENT_MADARA_ID, MADARA_IDENTIFIER_LENGTH);
        let id_start = start + 8;
        buf[id_start..id_start + MADARA_IDENTIFIER_LENGTH].copy_from_slice(&id);
        buf.extend_from_slice(&self.update_number.to_be_bytes());
        buf.extend_from_slice(&self.total_updates.to_be_bytes());
    }

    pub fn read(buffer: &[u8]) -> TransportResult<Self> {
        let base = FullHeader::read(buffer)?;
        need(buffer, FULL_HEADER_SIZE, 8)?;
        Ok(FragmentHeader {
            base,
            update_number: u32::from_be_bytes(buffer[FULL_HEADER_SIZE..FULL_HEADER_SIZE + 4].try_into().unwrap()),
            total_updates: u32::from_be_bytes(buffer[FULL_HEADER_SIZE + 4..FULL_HEADER_SIZE + 8].try_into().unwrap()),
        })
    }
}

/// Which header a datagram starts with, discovered by probing
/// `[8..15]` (spec.md §4.3 "Identification").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderVariant {
    Full,
    Reduced,
    Fragment,
}

pub fn identify(buffer: &[u8]) -> TransportResult<HeaderVariant> {
    if buffer.len() < MADARA_IDENTIFIER_LENGTH + 8 {
        return Err(TransportError::BufferTooShort {
            needed: MADARA_IDENTIFIER_LENGTH + 8,
            available: buffer.len(),
        });
    }
    if FragmentHeader::identifies(buffer) {
        Ok(HeaderVariant::Fragment)
    } else if FullHeader::identifies(buffer) {
        Ok(HeaderVariant::Full)
    } else if ReducedHeader::identifies(buffer) {
        Ok(HeaderVariant::Reduced)
    } else {
        Err(TransportError::UnknownIdentifier)
    }
}

/// Matches only the first 7 of the 8 identifier bytes, mirroring the
/// original discriminator (`strncmp(&buffer[8], id, 7)`); the 8th byte
/// is the NUL terminator and is never compared.
fn identifier_matches(buffer: &[u8], id: &str) -> bool {
    let id = id.as_bytes();
    buffer.len() >= 8 + 7 && &buffer[8..15] == id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_header_round_trips() {
        let header = FullHeader {
            size: 200,
            domain: "default".into(),
            originator: "127.0.0.1:4150".into(),
            message_type: MULTIASSIGN,
            updates: 3,
            quality: 5,
            clock: 42,
            timestamp: 1_700_000_000,
            ttl: 1,
        };
        let mut buf = Vec::new();
        header.write(&mut buf);
        assert_eq!(buf.len(), FULL_HEADER_SIZE);
        assert!(FullHeader::identifies(&buf));
        let parsed = FullHeader::read(&buf).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn reduced_header_round_trips() {
        let header = ReducedHeader {
            size: 100,
            updates: 2,
            clock: 7,
            timestamp: 1_700_000_000,
            ttl: 3,
        };
        let mut buf = Vec::new();
        header.write(&mut buf);
        assert_eq!(buf.len(), REDUCED_HEADER_SIZE);
        assert!(ReducedHeader::identifies(&buf));
        assert_eq!(ReducedHeader::read(&buf).unwrap(), header);
    }

    #[test]
    fn identify_distinguishes_variants() {
        let mut full_buf = Vec::new();
        FullHeader::default().write(&mut full_buf);
        assert_eq!(identify(&full_buf).unwrap(), HeaderVariant::Full);

        let mut reduced_buf = Vec::new();
        ReducedHeader::default().write(&mut reduced_buf);
        assert_eq!(identify(&reduced_buf).unwrap(), HeaderVariant::Reduced);
    }

    #[test]
    fn unknown_identifier_is_rejected() {
        let buf = vec![0u8; FULL_HEADER_SIZE];
        assert_eq!(identify(&buf), Err(TransportError::UnknownIdentifier));
    }

    #[test]
    fn short_buffer_is_rejected_not_panicking() {
        let buf = vec![0u8; 4];
        assert!(matches!(identify(&buf), Err(TransportError::BufferTooShort { .. })));
    }
}

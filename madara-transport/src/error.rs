// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

/// Errors raised while encoding or decoding the wire format (spec.md
/// §4.3, §4.4). Malformed input from the network is always an `Err`
/// here — callers at the transport layer turn that into a dropped
/// datagram, never a panic.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("buffer too short: needed {needed} bytes, had {available}")]
    BufferTooShort { needed: usize, available: usize },
    #[error("unrecognized message identifier in header")]
    UnknownIdentifier,
    #[error("update payload declares an unknown type tag {0}")]
    UnknownRecordType(u32),
    #[error("update name is not valid UTF-8")]
    InvalidName,
    #[error("string value is not valid UTF-8")]
    InvalidString,
}

pub type TransportResult<T> = Result<T, TransportError>;

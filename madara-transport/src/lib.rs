// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! MADARA's wire codec, fragmentation, filter chain, and UDP transport
//! (spec.md §4.3–§4.7, §5, §6).
//!
//! Built on `std::net::UdpSocket` and `std::thread`: one OS thread per
//! read thread, matching MADARA's one-participant/one-thread
//! concurrency model (spec.md §5) rather than an async runtime.

mod aes_filter;
mod bandwidth;
mod codec;
mod error;
mod filter;
mod fragment;
mod header;
mod scheduler;
mod settings;
mod transport;

pub use aes_filter::AesBufferFilter;
pub use bandwidth::BandwidthMonitor;
pub use codec::{decode_update, encode_update, wire_type};
pub use error::{TransportError, TransportResult};
pub use filter::{AggregateFilter, BufferFilter, FilterChain, FilterStage, Operation, RecordFilter, TransportContext};
pub use fragment::{split, FragmentMap};
pub use header::{
    identify, FragmentHeader, FullHeader, HeaderVariant, ReducedHeader, FRAGMENT_HEADER_SIZE, FULL_HEADER_SIZE,
    MADARA_DOMAIN_MAX_LENGTH, MADARA_IDENTIFIER, MAX_ORIGINATOR_LENGTH, MAX_PACKET_SIZE, MULTIASSIGN, REDUCED_HEADER_SIZE,
};
pub use scheduler::{DropPolicy, PacketScheduler};
pub use settings::QoSSettings;
pub use transport::{receive_status, validate, Transport};

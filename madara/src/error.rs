// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use madara_karl::KarlError;

/// The facade's one error boundary: either a KaRL compile error or an
/// I/O failure from the transport (spec.md §7).
#[derive(thiserror::Error, Debug)]
pub enum MadaraError {
    #[error(transparent)]
    Karl(#[from] KarlError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("no transport attached to this participant")]
    NoTransport,
}

pub type MadaraResult<T> = Result<T, MadaraError>;

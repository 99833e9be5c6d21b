// Copyright 2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! Shared randomized-test helpers used by the other MADARA crates' test
//! suites.

pub mod random;
pub mod test_utils;

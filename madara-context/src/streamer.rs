// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use madara_record::Record;

/// Receives a callback for every record change applied to a [`crate::Context`],
/// whether from a local `set` or an external `update_record_from_external`
/// (spec.md §4.1 `attach_streamer`). Used by the transport layer to push
/// a live feed of updates without polling `get_modifieds`.
pub trait Streamer: Send {
    fn on_record_changed(&mut self, name: &str, record: &Record);
}

// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

/// Controls the side effects of [`crate::Context::set`] and friends
/// (spec.md §4.1 `set`). `-1`/unlimited style sentinels from the original
/// wire protocol are represented with plain booleans here since none of
/// these flags are ever serialized.
#[derive(Debug, Clone, Copy)]
pub struct EvalSettings {
    /// Treat writes to global names as if they were local: don't advance
    /// `global_clock` and don't add the key to `changed`.
    pub treat_globals_as_locals: bool,
    /// Signal `changed_cv` after a successful write.
    pub signal_changes: bool,
    /// Bypass the clock/quality check that `update_record_from_external`
    /// normally performs (only meaningful for local writes who always
    /// win against themselves).
    pub always_overwrite: bool,
    /// Append to `changed`/`local_changed` so the write shows up in the
    /// transport/checkpoint diff.
    pub track_local_changes: bool,
    /// The quality this participant should stamp on its own writes.
    pub quality: u32,
}

impl Default for EvalSettings {
    fn default() -> Self {
        EvalSettings {
            treat_globals_as_locals: false,
            signal_changes: true,
            always_overwrite: true,
            track_local_changes: true,
            quality: 0,
        }
    }
}

/// Settings passed to [`crate::Context::update_record_from_external`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateSettings {
    /// Mark the record modified (and add it to `changed`) so that it is
    /// eligible to be rebroadcast. The receive path sets this only when
    /// the caller intends to propagate the update further.
    pub track_local_changes: bool,
}

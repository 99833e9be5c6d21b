// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use madara_record::Record;
use std::sync::{Arc, RwLock};

/// A stable handle to a context entry: name plus a direct, reference
/// counted pointer into the map's slot (spec.md §3 "VariableReference").
/// Cloning is O(1); reads and writes through a `VariableReference` never
/// re-hash the variable name.
#[derive(Clone)]
pub struct VariableReference {
    pub(crate) name: Arc<str>,
    pub(crate) slot: Arc<RwLock<Record>>,
}

impl VariableReference {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this reference names a variable-local (`.`-prefixed)
    /// record rather than a global one (spec.md §3 "Context").
    pub fn is_local(&self) -> bool {
        is_local_name(&self.name)
    }

    pub fn get(&self) -> Record {
        self.slot.read().expect("record lock poisoned").clone()
    }
}

impl PartialEq for VariableReference {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl Eq for VariableReference {}

impl std::fmt::Debug for VariableReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableReference").field("name", &self.name).finish()
    }
}

pub(crate) fn is_local_name(name: &str) -> bool {
    name.starts_with('.')
}

// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use crate::new_lock;
use std::sync::{Arc, RwLock};

/// A stable, reference-counted handle to a guarded value. Cloning an
/// `RLUVar` is O(1) and all clones observe the same underlying data.
pub struct RLUVar<T> {
    inner: Arc<RwLock<T>>,
}

impl<T> RLUVar<T> {
    pub(crate) fn new(data: T) -> Self {
        Self { inner: new_lock(data) }
    }

    pub(crate) fn lock(&self) -> &RwLock<T> {
        &self.inner
    }
}

impl<T> Clone for RLUVar<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

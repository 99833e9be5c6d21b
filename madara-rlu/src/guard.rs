// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use std::ops::{Deref, DerefMut};
use std::sync::{RwLockReadGuard, RwLockWriteGuard};

pub struct ReadGuard<'a, T> {
    inner: RwLockReadGuard<'a, T>,
}

impl<'a, T> ReadGuard<'a, T> {
    pub(crate) fn new(inner: RwLockReadGuard<'a, T>) -> Self {
        Self { inner }
    }
}

impl<'a, T> Deref for ReadGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

pub struct WriteGuard<'a, T> {
    inner: RwLockWriteGuard<'a, T>,
}

impl<'a, T> WriteGuard<'a, T> {
    pub(crate) fn new(inner: RwLockWriteGuard<'a, T>) -> Self {
        Self { inner }
    }
}

impl<'a, T> Deref for WriteGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<'a, T> DerefMut for WriteGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

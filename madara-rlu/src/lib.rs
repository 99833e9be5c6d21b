// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! # MADARA Read-Log-Update
//!
//! A small transactional-variable primitive used by [`madara_context`] to
//! hand out stable, O(1) handles into the knowledge base without re-hashing
//! on every access.
//!
//! The public shape (`RLUObject`, `RLUVar`, `RLU::execute`) mirrors the
//! read-log-update synchronization mechanism this crate is ported from;
//! the body is a plain reader/writer lock rather than the original's
//! hand-rolled epoch-based RCU, since a single-writer-at-a-time knowledge
//! base has no need for the original's optimistic multi-writer retries.
#![allow(clippy::type_complexity)]

mod guard;
mod var;

pub use guard::{ReadGuard, WriteGuard};
pub use var::RLUVar;

use std::sync::{Arc, RwLock};

/// Result type used throughout this crate.
pub type Result<T> = core::result::Result<T, TransactionError>;

#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("lock was poisoned by a panicking thread")]
    Poisoned,

    #[error("inner error occurred ({0})")]
    Inner(String),
}

/// A variable together with the controller used to run transactions over it.
///
/// Constructed with `RLUObject::from(value)`, analogous to the teacher's
/// `impl<T> From<T> for RLUObject<T>`.
pub struct RLUObject<T>
where
    T: Clone,
{
    rlu: RLU<T>,
    var: RLUVar<T>,
}

impl<T> From<T> for RLUObject<T>
where
    T: Clone,
{
    fn from(data: T) -> Self {
        let var = RLUVar::new(data);
        let rlu = RLU { inner: var.clone() };
        Self { rlu, var }
    }
}

impl<T> RLUObject<T>
where
    T: Clone,
{
    pub fn ctrl(&self) -> RLU<T> {
        self.rlu.clone()
    }

    pub fn var(&self) -> &RLUVar<T> {
        &self.var
    }
}

impl<T> Clone for RLUObject<T>
where
    T: Clone,
{
    fn clone(&self) -> Self {
        Self {
            rlu: self.rlu.clone(),
            var: self.var.clone(),
        }
    }
}

/// The transaction controller for a single [`RLUVar`].
pub struct RLU<T>
where
    T: Clone,
{
    inner: RLUVar<T>,
}

impl<T> Clone for RLU<T>
where
    T: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> RLU<T>
where
    T: Clone,
{
    /// Runs `func` once, handing it a context that can read or write the
    /// guarded variable. Mirrors `RLU::execute` from the source algorithm;
    /// since writes take the lock directly there is nothing to retry.
    pub fn execute<F>(&self, func: F) -> Result<()>
    where
        F: FnOnce(RluContext<'_, T>) -> Result<()>,
    {
        func(RluContext { var: &self.inner })
    }
}

/// Per-call handle into a transaction. Reads and writes both go through the
/// same reader/writer lock backing the [`RLUVar`].
pub struct RluContext<'a, T>
where
    T: Clone,
{
    var: &'a RLUVar<T>,
}

pub trait Read<T> {
    fn get(&self, var: &RLUVar<T>) -> Result<ReadGuard<'_, T>>;
}

pub trait Write<T> {
    fn get_mut(&mut self, var: &RLUVar<T>) -> Result<WriteGuard<'_, T>>;
}

impl<'a, T> Read<T> for RluContext<'a, T>
where
    T: Clone,
{
    fn get(&self, _var: &RLUVar<T>) -> Result<ReadGuard<'_, T>> {
        self.var.read()
    }
}

impl<'a, T> Write<T> for RluContext<'a, T>
where
    T: Clone,
{
    fn get_mut(&mut self, _var: &RLUVar<T>) -> Result<WriteGuard<'_, T>> {
        self.var.write()
    }
}

impl<T> RLUVar<T>
where
    T: Clone,
{
    fn read(&self) -> Result<ReadGuard<'_, T>> {
        self.lock().read().map(ReadGuard::new).map_err(|_| TransactionError::Poisoned)
    }

    fn write(&self) -> Result<WriteGuard<'_, T>> {
        self.lock().write().map(WriteGuard::new).map_err(|_| TransactionError::Poisoned)
    }
}

pub(crate) fn new_lock<T>(data: T) -> Arc<RwLock<T>> {
    Arc::new(RwLock::new(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_reads_and_writes() {
        let obj = RLUObject::from(0_i64);
        let var = obj.var().clone();

        obj.ctrl()
            .execute(|mut ctx| {
                let mut guard = ctx.get_mut(&var)?;
                *guard += 1;
                Ok(())
            })
            .unwrap();

        obj.ctrl()
            .execute(|ctx| {
                let guard = ctx.get(&var)?;
                assert_eq!(*guard, 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn clone_shares_state() {
        let obj = RLUObject::from(vec![1, 2, 3]);
        let other = obj.clone();
        let var = obj.var().clone();

        obj.ctrl()
            .execute(|mut ctx| {
                ctx.get_mut(&var)?.push(4);
                Ok(())
            })
            .unwrap();

        other
            .ctrl()
            .execute(|ctx| {
                assert_eq!(ctx.get(&var)?.len(), 4);
                Ok(())
            })
            .unwrap();
    }
}

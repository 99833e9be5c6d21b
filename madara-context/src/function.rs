// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

use crate::Context;
use madara_record::Record;
use std::sync::Arc;

/// A KaRL sub-program (or any other host-compiled callable) registered as
/// a function. Defined as a trait here rather than depending on the KaRL
/// crate directly, so that `madara-context` stays the narrow, crate-
/// private "internal facade" the design notes call for (spec.md §9
/// design notes, "Friend classes reaching into Context"): `madara-karl`
/// depends on this crate and implements `CompiledFunction` for its own
/// expression-tree type, rather than this crate depending on the parser.
pub trait CompiledFunction: Send + Sync {
    fn call(&self, args: &[Record], ctx: &Context) -> Record;
}

/// A native Rust callback registered as a MADARA function (spec.md §4.2
/// "Functions", shape (a)).
pub type NativeFunction = Arc<dyn Fn(&[Record], &Context) -> Record + Send + Sync>;

/// One of the three function shapes spec.md §4.2 allows.
#[derive(Clone)]
pub enum Function {
    Native(NativeFunction),
    Compiled(Arc<dyn CompiledFunction>),
}

impl Function {
    pub fn call(&self, args: &[Record], ctx: &Context) -> Record {
        match self {
            Function::Native(f) => f(args, ctx),
            Function::Compiled(f) => f.call(args, ctx),
        }
    }
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Function::Native(_) => write!(f, "Function::Native(..)"),
            Function::Compiled(_) => write!(f, "Function::Compiled(..)"),
        }
    }
}

// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! The thread-safe context: a shared mapping from variable name to
//! [`Record`], with Lamport clocks, change tracking and the
//! conflict-resolution rules that let independent participants converge
//! (spec.md §3, §4.1).

mod function;
mod settings;
mod streamer;
mod var_ref;

pub use function::{CompiledFunction, Function, NativeFunction};
pub use madara_record::{Record, RecordStatus, RecordValue};
pub use settings::{EvalSettings, UpdateSettings};
pub use streamer::Streamer;
pub use var_ref::VariableReference;

use madara_rlu::{Read, RLUObject, Write};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, RwLock};

type SlotMap = HashMap<Arc<str>, Arc<RwLock<Record>>>;

/// Return codes for [`Context::set`] and [`Context::set_index`] (spec.md
/// §4.1). Kept as plain `i32`s rather than a `Result` because these are
/// the one place spec.md keeps the original's wire-boundary-style numeric
/// codes rather than a typed error (see SPEC_FULL.md's error handling
/// section and the REDESIGN FLAGS unification note).
pub mod status {
    pub const OK: i32 = 0;
    pub const NULL_KEY: i32 = -1;
    pub const LOWER_QUALITY: i32 = -2;
}

/// Return codes for [`Context::update_record_from_external`].
pub mod update_status {
    pub const CHANGED: i32 = 1;
    pub const SAME: i32 = 0;
    pub const NULL_KEY: i32 = -1;
    pub const LOWER_QUALITY: i32 = -2;
    pub const OLDER_CLOCK: i32 = -3;
}

#[derive(Default)]
struct ContextState {
    global_clock: u64,
    changed: HashSet<Arc<str>>,
    local_changed: HashSet<Arc<str>>,
}

/// The thread-safe knowledge base. Every participant owns exactly one.
pub struct Context {
    records: RLUObject<SlotMap>,
    state: Mutex<ContextState>,
    changed_cv: Condvar,
    functions: Mutex<HashMap<String, Function>>,
    streamer: Mutex<Option<Box<dyn Streamer>>>,
    trace_level: std::sync::atomic::AtomicU8,
}

impl Default for Context {
    fn default() -> Self {
        Context {
            records: RLUObject::from(HashMap::new()),
            state: Mutex::new(ContextState::default()),
            changed_cv: Condvar::new(),
            functions: Mutex::new(HashMap::new()),
            streamer: Mutex::new(None),
            trace_level: std::sync::atomic::AtomicU8::new(log::LevelFilter::Off as u8),
        }
    }
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// `get(key) -> Record`: a copy of the current value, or an
    /// uncreated record for a name that has never been written
    /// (spec.md §4.1).
    pub fn get(&self, key: &str) -> Record {
        let var = self.records.var().clone();
        let mut result = Record::uncreated();
        self.records
            .ctrl()
            .execute(|ctx| {
                let map = ctx.get(&var)?;
                if let Some(slot) = map.get(key) {
                    result = slot.read().expect("record lock poisoned").clone();
                }
                Ok(())
            })
            .expect("lock poisoned");
        result
    }

    /// `get_ref(key) -> VariableReference`: creates the entry as
    /// uncreated if absent, so the handle is valid until an explicit
    /// `delete` (spec.md §4.1).
    pub fn get_ref(&self, key: &str) -> VariableReference {
        let var = self.records.var().clone();
        let mut slot = None;
        self.records
            .ctrl()
            .execute(|mut ctx| {
                let mut map = ctx.get_mut(&var)?;
                let entry = map
                    .entry(Arc::from(key))
                    .or_insert_with(|| Arc::new(RwLock::new(Record::uncreated())));
                slot = Some(entry.clone());
                Ok(())
            })
            .expect("lock poisoned");

        VariableReference {
            name: Arc::from(key),
            slot: slot.expect("transaction always populates slot"),
        }
    }

    /// `set(key, value, settings) -> {0 ok, -1 null-key, -2 lower-quality}`
    /// (spec.md §4.1).
    pub fn set(&self, key: &str, value: Record, settings: &EvalSettings) -> i32 {
        if key.is_empty() {
            return status::NULL_KEY;
        }
        let var_ref = self.get_ref(key);
        self.set_ref(&var_ref, value, settings)
    }

    /// As [`Context::set`], but against an already-resolved reference so
    /// repeated writes to the same key never re-hash.
    pub fn set_ref(&self, var_ref: &VariableReference, value: Record, settings: &EvalSettings) -> i32 {
        self.compound_assign(var_ref, settings, |_| value.value().clone())
    }

    /// Read-modify-write a record's value under a single lock acquisition,
    /// applying the same clock/quality propagation rules as [`Context::set`]
    /// (spec.md §4.1). Used directly by [`Context::set_ref`] and by KaRL's
    /// compound assignment operators, so that `x += 1` never takes the
    /// record lock twice.
    pub fn compound_assign<F>(&self, var_ref: &VariableReference, settings: &EvalSettings, f: F) -> i32
    where
        F: FnOnce(&Record) -> RecordValue,
    {
        let mut slot = var_ref.slot.write().expect("record lock poisoned");

        if !settings.always_overwrite && settings.quality < slot.quality() {
            return status::LOWER_QUALITY;
        }

        let new_value = f(&slot);

        let is_local = var_ref.is_local();
        let clock = if settings.treat_globals_as_locals || is_local {
            slot.clock()
        } else {
            let mut state = self.state.lock().expect("state lock poisoned");
            state.global_clock += 1;
            state.global_clock
        };

        *slot = Record::new(new_value, clock, settings.quality);
        slot.mark_modified();
        let record_snapshot = slot.clone();
        drop(slot);

        if settings.track_local_changes {
            self.mark_changed(var_ref);
        }

        self.notify_streamer(var_ref.name(), &record_snapshot);

        if settings.signal_changes {
            self.changed_cv.notify_all();
        }

        status::OK
    }

    /// `set_index(ref, i, value)`: in-place array update with
    /// copy-on-write (spec.md §4.1).
    pub fn set_index_int(&self, var_ref: &VariableReference, index: usize, v: i64, settings: &EvalSettings) -> i32 {
        {
            let mut slot = var_ref.slot.write().expect("record lock poisoned");
            if slot.set_index_int(index, v).is_err() {
                return status::LOWER_QUALITY;
            }
            slot.mark_modified();
        }
        self.finish_write(var_ref, settings);
        status::OK
    }

    pub fn set_index_double(&self, var_ref: &VariableReference, index: usize, v: f64, settings: &EvalSettings) -> i32 {
        {
            let mut slot = var_ref.slot.write().expect("record lock poisoned");
            if slot.set_index_double(index, v).is_err() {
                return status::LOWER_QUALITY;
            }
            slot.mark_modified();
        }
        self.finish_write(var_ref, settings);
        status::OK
    }

    /// Read-modify-write a single array element under one lock
    /// acquisition, the indexed counterpart to [`Context::compound_assign`]
    /// (spec.md §4.2: "compound assignments read-modify-write within a
    /// single lock scope", which also binds `arr[i] += 1`). `f` receives
    /// the element's current value and returns its replacement; the
    /// array stays an integer array unless either the array itself or
    /// the replacement value is already floating point.
    pub fn compound_assign_index<F>(&self, var_ref: &VariableReference, index: usize, settings: &EvalSettings, f: F) -> i32
    where
        F: FnOnce(&Record) -> Record,
    {
        {
            let mut slot = var_ref.slot.write().expect("record lock poisoned");
            let current_elem = slot.index(index);
            let new_elem = f(&current_elem);
            let wants_double =
                matches!(slot.value(), RecordValue::DoubleArray(_)) || matches!(new_elem.value(), RecordValue::Double(_));
            let result =
                if wants_double { slot.set_index_double(index, new_elem.as_f64()) } else { slot.set_index_int(index, new_elem.as_i64()) };
            if result.is_err() {
                return status::LOWER_QUALITY;
            }
            slot.mark_modified();
        }
        self.finish_write(var_ref, settings);
        status::OK
    }

    /// `inc`/`dec`: integer/double increment, applied atomically under
    /// the record's own lock, with the same propagation rules as `set`
    /// (spec.md §4.1).
    pub fn inc(&self, var_ref: &VariableReference, by: f64, settings: &EvalSettings) -> i32 {
        {
            let mut slot = var_ref.slot.write().expect("record lock poisoned");
            slot.inc(by);
            slot.mark_modified();
        }
        self.finish_write(var_ref, settings);
        status::OK
    }

    pub fn dec(&self, var_ref: &VariableReference, by: f64, settings: &EvalSettings) -> i32 {
        self.inc(var_ref, -by, settings)
    }

    fn finish_write(&self, var_ref: &VariableReference, settings: &EvalSettings) {
        if settings.track_local_changes {
            self.mark_changed(var_ref);
        }
        let snapshot = var_ref.get();
        self.notify_streamer(var_ref.name(), &snapshot);
        if settings.signal_changes {
            self.changed_cv.notify_all();
        }
    }

    /// Applies the conflict-resolution rules of spec.md §3 against an
    /// incoming `(key, new_record)`, returning the code described at
    /// spec.md §4.1 `update_record_from_external`.
    pub fn update_record_from_external(&self, key: &str, new: Record, settings: &UpdateSettings) -> i32 {
        if key.is_empty() {
            return update_status::NULL_KEY;
        }
        let var_ref = self.get_ref(key);
        let code = {
            let mut slot = var_ref.slot.write().expect("record lock poisoned");

            if new.quality() < slot.quality() {
                update_status::LOWER_QUALITY
            } else if new.quality() > slot.quality() || new.clock() > slot.clock() {
                *slot = new;
                slot.mark_modified();
                update_status::CHANGED
            } else if new.clock() == slot.clock() {
                update_status::SAME
            } else {
                update_status::OLDER_CLOCK
            }
        };

        if code == update_status::CHANGED {
            if settings.track_local_changes {
                self.mark_changed(&var_ref);
            }
            let snapshot = var_ref.get();
            self.notify_streamer(key, &snapshot);
            self.changed_cv.notify_all();
        }

        code
    }

    fn mark_changed(&self, var_ref: &VariableReference) {
        let mut state = self.state.lock().expect("state lock poisoned");
        if var_ref.is_local() {
            state.local_changed.insert(var_ref.name.clone());
        } else {
            state.changed.insert(var_ref.name.clone());
        }
    }

    fn notify_streamer(&self, name: &str, record: &Record) {
        if let Some(streamer) = self.streamer.lock().expect("streamer lock poisoned").as_mut() {
            streamer.on_record_changed(name, record);
        }
    }

    /// Returns this record to the uncreated state; the slot and any
    /// outstanding [`VariableReference`] remain valid (spec.md §4.1
    /// `clear`).
    pub fn clear(&self, key: &str) {
        let var_ref = self.get_ref(key);
        var_ref.slot.write().expect("record lock poisoned").clear();
    }

    /// Removes the entry entirely. Any outstanding [`VariableReference`]
    /// to it keeps the record alive (Rust has no dangling references)
    /// but is logically stale from this point on — using it is the
    /// caller's responsibility, per spec.md §9's open question on
    /// `delete_variable`.
    pub fn delete(&self, key: &str) {
        let var = self.records.var().clone();
        self.records
            .ctrl()
            .execute(|mut ctx| {
                ctx.get_mut(&var)?.remove(key);
                Ok(())
            })
            .expect("lock poisoned");

        let mut state = self.state.lock().expect("state lock poisoned");
        state.changed.remove(key);
        state.local_changed.remove(key);
    }

    /// `wait_for_change(extra_release)`: blocks on `changed_cv`.
    /// `extra_release` is for callers already holding a second, outer
    /// lock that must be released for the duration of the wait; since
    /// this context exposes no separate outer lock, that release is a
    /// no-op here and exists only to keep the call signature aligned
    /// with spec.md §4.1.
    pub fn wait_for_change(&self, _extra_release: bool) {
        let state = self.state.lock().expect("state lock poisoned");
        let _unused = self.changed_cv.wait(state).expect("state lock poisoned");
    }

    /// Forces `var_ref` into the outgoing-send diff even if it names a
    /// local variable (spec.md §4.1 `mark_to_send`).
    pub fn mark_to_send(&self, var_ref: &VariableReference) {
        let mut state = self.state.lock().expect("state lock poisoned");
        state.changed.insert(var_ref.name.clone());
    }

    /// Forces `var_ref` into the checkpoint diff even if it names a
    /// global variable (spec.md §4.1 `mark_to_checkpoint`).
    pub fn mark_to_checkpoint(&self, var_ref: &VariableReference) {
        let mut state = self.state.lock().expect("state lock poisoned");
        state.local_changed.insert(var_ref.name.clone());
    }

    /// `get_modifieds() -> VarRefMap`: the records the transport should
    /// serialize on the next send (spec.md §4.1).
    pub fn get_modifieds(&self) -> HashMap<String, VariableReference> {
        let names: Vec<Arc<str>> = {
            let state = self.state.lock().expect("state lock poisoned");
            state.changed.iter().cloned().collect()
        };
        names
            .into_iter()
            .map(|name| {
                let var_ref = self.get_ref(&name);
                (name.to_string(), var_ref)
            })
            .collect()
    }

    /// `save_modifieds() -> Vec<VarRef>`: a snapshot of the current
    /// changed set without clearing it (spec.md §4.1).
    pub fn save_modifieds(&self) -> Vec<VariableReference> {
        self.get_modifieds().into_values().collect()
    }

    /// `add_modifieds(Vec)`: merges a previously saved diff back into
    /// the changed set (spec.md §4.1), used to restore a diff after an
    /// aborted send.
    pub fn add_modifieds(&self, refs: Vec<VariableReference>) {
        let mut state = self.state.lock().expect("state lock poisoned");
        for var_ref in refs {
            if var_ref.is_local() {
                state.local_changed.insert(var_ref.name);
            } else {
                state.changed.insert(var_ref.name);
            }
        }
    }

    /// `reset_modified()`: clears both the send and checkpoint diffs
    /// (spec.md §4.1).
    pub fn reset_modified(&self) {
        let mut state = self.state.lock().expect("state lock poisoned");
        state.changed.clear();
        state.local_changed.clear();
    }

    /// Local-only records modified since the last checkpoint
    /// (spec.md §3 `local_changed`).
    pub fn local_modifieds(&self) -> Vec<VariableReference> {
        let names: Vec<Arc<str>> = {
            let state = self.state.lock().expect("state lock poisoned");
            state.local_changed.iter().cloned().collect()
        };
        names.into_iter().map(|name| self.get_ref(&name)).collect()
    }

    pub fn global_clock(&self) -> u64 {
        self.state.lock().expect("state lock poisoned").global_clock
    }

    pub fn set_global_clock(&self, clock: u64) {
        self.state.lock().expect("state lock poisoned").global_clock = clock;
    }

    /// `attach_streamer(Option<Streamer>)`: replaces the record-change
    /// streamer, returning the previous one (spec.md §4.1).
    pub fn attach_streamer(&self, streamer: Option<Box<dyn Streamer>>) -> Option<Box<dyn Streamer>> {
        std::mem::replace(&mut self.streamer.lock().expect("streamer lock poisoned"), streamer)
    }

    /// `set_log_level`/`get_log_level` (`ThreadSafeContext`): a per-context
    /// `log::LevelFilter` gating how verbosely KaRL's own expression
    /// evaluator traces itself, independent of any other context's level
    /// (spec.md §4.2 system calls; SPEC_FULL.md logging section).
    pub fn set_trace_level(&self, level: log::LevelFilter) {
        self.trace_level.store(level as u8, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn trace_level(&self) -> log::LevelFilter {
        match self.trace_level.load(std::sync::atomic::Ordering::Relaxed) {
            0 => log::LevelFilter::Off,
            1 => log::LevelFilter::Error,
            2 => log::LevelFilter::Warn,
            3 => log::LevelFilter::Info,
            4 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }

    pub fn define_function(&self, name: impl Into<String>, function: Function) {
        self.functions
            .lock()
            .expect("functions lock poisoned")
            .insert(name.into(), function);
    }

    pub fn call_function(&self, name: &str, args: &[Record]) -> Option<Record> {
        let function = self.functions.lock().expect("functions lock poisoned").get(name).cloned();
        function.map(|f| f.call(args, self))
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.lock().expect("functions lock poisoned").contains_key(name)
    }

    /// Iterates over every created (non-uncreated) record. Holds the
    /// records lock for the duration of the closure, matching spec.md
    /// §9's "Thread-local iterator state in containers" design note
    /// ("explicit borrow of the map's iterator; hold the lock for the
    /// duration of iteration").
    pub fn for_each<F: FnMut(&str, &Record)>(&self, mut f: F) {
        let var = self.records.var().clone();
        self.records
            .ctrl()
            .execute(|ctx| {
                let map = ctx.get(&var)?;
                for (name, slot) in map.iter() {
                    let record = slot.read().expect("record lock poisoned");
                    if !record.is_uncreated() {
                        f(name, &record);
                    }
                }
                Ok(())
            })
            .expect("lock poisoned");
    }

    /// Deep copy except for shared array/blob payloads, which remain
    /// shared behind their `Arc` (spec.md §3 "Lifecycle").
    pub fn deep_clone(&self) -> Context {
        let clone = Context::new();
        self.for_each(|name, record| {
            let var_ref = clone.get_ref(name);
            *var_ref.slot.write().expect("record lock poisoned") = record.clone();
        });
        clone.set_global_clock(self.global_clock());
        clone
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use madara_record::RecordValue;

    fn int(v: i64) -> Record {
        Record::new(RecordValue::Integer(v), 0, 0)
    }

    #[test]
    fn set_then_get_round_trips() {
        let ctx = Context::new();
        let settings = EvalSettings::default();
        assert_eq!(ctx.set("x", int(5), &settings), status::OK);
        assert_eq!(ctx.get("x").as_i64(), 5);
        assert_eq!(ctx.get("x").clock(), ctx.global_clock());
    }

    #[test]
    fn missing_key_reads_as_uncreated() {
        let ctx = Context::new();
        assert!(ctx.get("missing").is_uncreated());
    }

    #[test]
    fn clear_leaves_record_uncreated_and_out_of_diff() {
        let ctx = Context::new();
        let settings = EvalSettings::default();
        ctx.set("x", int(5), &settings);
        ctx.reset_modified();
        ctx.clear("x");
        assert!(ctx.get("x").is_uncreated());
        assert!(ctx.get_modifieds().is_empty());
    }

    #[test]
    fn conflict_resolution_prefers_higher_quality() {
        let ctx = Context::new();
        ctx.update_record_from_external("x", Record::new(RecordValue::Integer(5), 1, 10), &UpdateSettings::default());
        let code = ctx.update_record_from_external("x", Record::new(RecordValue::Integer(7), 2, 5), &UpdateSettings::default());
        assert_eq!(code, update_status::LOWER_QUALITY);
        assert_eq!(ctx.get("x").as_i64(), 5);
    }

    #[test]
    fn conflict_resolution_prefers_higher_clock_at_same_quality() {
        let ctx = Context::new();
        ctx.update_record_from_external("x", Record::new(RecordValue::Integer(5), 1, 0), &UpdateSettings::default());
        let code = ctx.update_record_from_external("x", Record::new(RecordValue::Integer(7), 2, 0), &UpdateSettings::default());
        assert_eq!(code, update_status::CHANGED);
        assert_eq!(ctx.get("x").as_i64(), 7);
    }

    #[test]
    fn same_quality_and_clock_is_rejected_as_same() {
        let ctx = Context::new();
        ctx.update_record_from_external("x", Record::new(RecordValue::Integer(5), 2, 0), &UpdateSettings::default());
        let code = ctx.update_record_from_external("x", Record::new(RecordValue::Integer(9), 2, 0), &UpdateSettings::default());
        assert_eq!(code, update_status::SAME);
        assert_eq!(ctx.get("x").as_i64(), 5);
    }

    #[test]
    fn older_clock_at_same_quality_is_rejected() {
        let ctx = Context::new();
        ctx.update_record_from_external("x", Record::new(RecordValue::Integer(5), 5, 0), &UpdateSettings::default());
        let code = ctx.update_record_from_external("x", Record::new(RecordValue::Integer(9), 1, 0), &UpdateSettings::default());
        assert_eq!(code, update_status::OLDER_CLOCK);
        assert_eq!(ctx.get("x").as_i64(), 5);
    }

    #[test]
    fn variable_reference_survives_new_insertions() {
        let ctx = Context::new();
        let r1 = ctx.get_ref("x");
        for i in 0..100 {
            ctx.set(&format!("y{i}"), int(i), &EvalSettings::default());
        }
        ctx.set_ref(&r1, int(42), &EvalSettings::default());
        assert_eq!(r1.get().as_i64(), 42);
    }

    #[test]
    fn local_variable_tracked_separately_from_global() {
        let ctx = Context::new();
        ctx.set(".local", int(1), &EvalSettings::default());
        ctx.set("global", int(1), &EvalSettings::default());
        assert!(ctx.get_modifieds().contains_key("global"));
        assert!(!ctx.get_modifieds().contains_key(".local"));
        assert_eq!(ctx.local_modifieds().len(), 1);
    }

    #[test]
    fn concurrent_writers_do_not_lose_updates() {
        use std::sync::Arc as StdArc;
        use std::thread;

        let ctx = StdArc::new(Context::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let ctx = ctx.clone();
            handles.push(thread::spawn(move || {
                let var_ref = ctx.get_ref("counter");
                for _ in 0..100 {
                    ctx.inc(&var_ref, 1.0, &EvalSettings::default());
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(ctx.get("counter").as_i64(), 800);
    }
}

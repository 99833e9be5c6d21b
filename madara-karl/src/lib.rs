// Copyright 2020-2021 IOTA Stiftung
// SPDX-License-Identifier: Apache-2.0

//! KaRL: the small interpreted expression language participants use to
//! read and transform the knowledge base in place (spec.md §4.2).
//!
//! `Context::compile` (via [`ContextExt`]) lexes, parses and prunes an
//! expression once; the resulting [`Compiled`] tree can be evaluated
//! repeatedly, and cheaply cloned (an `Arc` clone of the root) across
//! the OS threads that each own their own `Context` (spec.md §5).

mod ast;
mod error;
mod eval;
mod lexer;
mod parser;
mod prune;
mod syscalls;

pub use ast::{AssignOp, BinOp, Node, SysCall, UnaryOp};
pub use error::{KarlError, KarlException, KarlResult, Position};

use madara_context::{CompiledFunction, Context, EvalSettings, Record};
use std::sync::Arc as Rc;

/// A parsed and pruned KaRL expression tree, ready to evaluate against
/// any `Context` (spec.md §4.2). Clones share the same tree.
#[derive(Clone)]
pub struct Compiled {
    root: Rc<Node>,
}

impl Compiled {
    /// Lexes, parses, and folds constant sub-expressions. Variable names
    /// are resolved into stable [`madara_context::VariableReference`]s
    /// against `ctx` at this point, not at evaluation time.
    pub fn compile(source: &str, ctx: &Context) -> KarlResult<Self> {
        let node = parser::parse(source, ctx)?;
        let (node, _can_change) = prune::prune(node);
        Ok(Compiled { root: Rc::new(node) })
    }

    pub fn evaluate(&self, ctx: &Context, settings: &EvalSettings) -> Record {
        eval::evaluate(&self.root, ctx, settings)
    }

    pub fn root(&self) -> &Node {
        &self.root
    }
}

impl std::fmt::Debug for Compiled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compiled").finish_non_exhaustive()
    }
}

/// Lets a compiled KaRL expression serve as a user-defined function
/// body (spec.md §4.1 function table). Positional arguments are bound
/// to local variables `.arg0`, `.arg1`, ... before the body runs, using
/// the same `.`-prefixed local-name convention as everywhere else in
/// the context (spec.md §4.1 "local" variables).
impl CompiledFunction for Compiled {
    fn call(&self, args: &[Record], ctx: &Context) -> Record {
        let settings = EvalSettings::default();
        for (i, arg) in args.iter().enumerate() {
            ctx.set(&format!(".arg{i}"), arg.clone(), &settings);
        }
        self.evaluate(ctx, &settings)
    }
}

/// Adds `compile`/`evaluate` convenience methods directly to
/// [`Context`], matching spec.md §4.1's description of them as part of
/// the context's own contract even though the expression engine lives
/// in a separate crate.
pub trait ContextExt {
    fn compile(&self, source: &str) -> KarlResult<Compiled>;
    fn evaluate(&self, source: &str, settings: &EvalSettings) -> KarlResult<Record>;
}

impl ContextExt for Context {
    fn compile(&self, source: &str) -> KarlResult<Compiled> {
        Compiled::compile(source, self)
    }

    fn evaluate(&self, source: &str, settings: &EvalSettings) -> KarlResult<Record> {
        let compiled = self.compile(source)?;
        Ok(compiled.evaluate(self, settings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use madara_context::{Function, RecordValue};

    fn eval(ctx: &Context, src: &str) -> Record {
        ctx.evaluate(src, &EvalSettings::default()).unwrap()
    }

    #[test]
    fn arithmetic_precedence() {
        let ctx = Context::new();
        assert_eq!(eval(&ctx, "2 + 3 * 4").as_i64(), 14);
        assert_eq!(eval(&ctx, "(2 + 3) * 4").as_i64(), 20);
    }

    #[test]
    fn assignment_and_compound_assignment_round_trip() {
        let ctx = Context::new();
        eval(&ctx, "x = 10");
        assert_eq!(ctx.get("x").as_i64(), 10);
        eval(&ctx, "x += 5");
        assert_eq!(ctx.get("x").as_i64(), 15);
        eval(&ctx, "x *= 2");
        assert_eq!(ctx.get("x").as_i64(), 30);
    }

    #[test]
    fn pre_increment_and_decrement() {
        let ctx = Context::new();
        eval(&ctx, "x = 1");
        assert_eq!(eval(&ctx, "++x").as_i64(), 2);
        assert_eq!(eval(&ctx, "--x").as_i64(), 1);
    }

    #[test]
    fn ternary_and_conditional_forms() {
        let ctx = Context::new();
        assert_eq!(eval(&ctx, "1 ? 10 : 20").as_i64(), 10);
        eval(&ctx, "(1) => (y = 99)");
        assert_eq!(ctx.get("y").as_i64(), 99);
    }

    #[test]
    fn while_loop_form() {
        let ctx = Context::new();
        eval(&ctx, "i = 0; (i < 5) { i += 1 }");
        assert_eq!(ctx.get("i").as_i64(), 5);
    }

    #[test]
    fn for_loop_form() {
        let ctx = Context::new();
        eval(&ctx, "(i = 0; i < 10; i += 1) { sum += i }");
        assert_eq!(ctx.get("sum").as_i64(), 45);
    }

    #[test]
    fn sequence_return_operator() {
        let ctx = Context::new();
        let result = eval(&ctx, "x = 1; x += 1 ;> x * 100");
        assert_eq!(result.as_i64(), 200);
        assert_eq!(ctx.get("x").as_i64(), 2);
    }

    #[test]
    fn string_concatenation() {
        let ctx = Context::new();
        let r = eval(&ctx, "\"a\" + \"b\"");
        assert!(matches!(r.value(), RecordValue::String(s) if &**s == "ab"));
    }

    #[test]
    fn array_indexing_and_copy_on_write_semantics() {
        let ctx = Context::new();
        eval(&ctx, "a[0] = 1");
        eval(&ctx, "a[1] = 2");
        assert_eq!(eval(&ctx, "a[1]").as_i64(), 2);
        eval(&ctx, "a[1] += 10");
        assert_eq!(eval(&ctx, "a[1]").as_i64(), 12);
    }

    #[test]
    fn division_and_modulo_by_zero_do_not_panic() {
        let ctx = Context::new();
        assert_eq!(eval(&ctx, "5 / 0").as_i64(), 0);
        assert_eq!(eval(&ctx, "5 % 0").as_i64(), 0);
    }

    #[test]
    fn size_and_type_syscalls() {
        let ctx = Context::new();
        eval(&ctx, "a[0] = 1; a[1] = 2; a[2] = 3");
        assert_eq!(eval(&ctx, "#size(a)").as_i64(), 3);
        assert_eq!(eval(&ctx, "#type(a)").to_display_string(), "integer_array");
    }

    #[test]
    fn rand_int_stays_within_bounds() {
        let ctx = Context::new();
        for _ in 0..50 {
            let v = eval(&ctx, "#rand_int(1, 6)").as_i64();
            assert!((1..=6).contains(&v));
        }
    }

    #[test]
    fn delete_variable_syscall() {
        let ctx = Context::new();
        eval(&ctx, "x = 42");
        eval(&ctx, "#delete_variable(x)");
        assert!(ctx.get("x").is_uncreated());
    }

    #[test]
    fn indexed_compound_assignment_does_not_lose_concurrent_updates() {
        use std::sync::Arc as StdArc;
        use std::thread;

        let ctx = StdArc::new(Context::new());
        eval(&ctx, "arr[0] = 0");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let ctx = ctx.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    eval(&ctx, "arr[0] += 1");
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(eval(&ctx, "arr[0]").as_i64(), 800);
    }

    #[test]
    fn log_level_sets_the_context_own_trace_gate_not_a_global() {
        let ctx = Context::new();
        let other = Context::new();
        assert_eq!(ctx.trace_level(), log::LevelFilter::Off);

        eval(&ctx, "#log_level(5)");
        assert_eq!(ctx.trace_level(), log::LevelFilter::Trace);
        assert_eq!(other.trace_level(), log::LevelFilter::Off, "each context's trace gate is independent");
    }

    #[test]
    fn unknown_system_call_is_a_parse_error() {
        let ctx = Context::new();
        let err = Compiled::compile("#not_a_real_call()", &ctx).unwrap_err();
        assert!(err.message.contains("unknown system call"));
    }

    #[test]
    fn for_each_binds_loop_variable() {
        let ctx = Context::new();
        eval(&ctx, "a[0] = 1; a[1] = 2; a[2] = 3");
        eval(&ctx, "for_each (item, a) { total += item }");
        assert_eq!(ctx.get("total").as_i64(), 6);
    }

    #[test]
    fn compiled_tree_is_cheap_to_clone_and_reusable() {
        let ctx = Context::new();
        let compiled = ctx.compile("counter += 1").unwrap();
        let settings = EvalSettings::default();
        compiled.evaluate(&ctx, &settings);
        compiled.clone().evaluate(&ctx, &settings);
        assert_eq!(ctx.get("counter").as_i64(), 2);
    }

    #[test]
    fn sleep_takes_its_argument_as_seconds_not_milliseconds() {
        let ctx = Context::new();
        let start = std::time::Instant::now();
        eval(&ctx, "#sleep(0.05)");
        assert!(start.elapsed() >= std::time::Duration::from_millis(40));
    }

    #[test]
    fn a_compiled_function_body_reads_back_its_bound_arguments() {
        let ctx = Context::new();
        let body = ctx.compile(".arg0 + .arg1").unwrap();
        ctx.define_function("add", Function::Compiled(std::sync::Arc::new(body)));

        let result = ctx
            .call_function("add", &[Record::new(RecordValue::Integer(3), 0, 0), Record::new(RecordValue::Integer(4), 0, 0)])
            .unwrap();
        assert_eq!(result.as_i64(), 7);
    }
}

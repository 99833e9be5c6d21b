use crate::ast::{AssignOp, BinOp, LValue, Node, SysCall, UnaryOp};
use crate::syscalls::{self, NumberFormat};
use madara_context::{Context, EvalSettings, Record, RecordValue};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Tree-walking evaluator (spec.md §4.2). Only a handful of node kinds
/// touch the `Context` lock; everything else is pure arithmetic over
/// detached `Record` values.
pub fn evaluate(node: &Node, ctx: &Context, settings: &EvalSettings) -> Record {
    if log::Level::Trace <= ctx.trace_level() {
        log::trace!(target: "karl::eval", "{node:?}");
    }
    match node {
        Node::Integer(v) => Record::new(RecordValue::Integer(*v), 0, 0),
        Node::Double(v) => Record::new(RecordValue::Double(*v), 0, 0),
        Node::Str(s) => Record::new(RecordValue::String(Arc::from(s.as_str())), 0, 0),
        Node::Variable(var) => var.get(),
        Node::Index(base, idx) => {
            let base_val = evaluate(base, ctx, settings);
            let i = index_of(idx, ctx, settings);
            base_val.index(i)
        }
        Node::Unary(op, inner) => {
            let v = evaluate(inner, ctx, settings);
            match op {
                UnaryOp::Neg => {
                    if matches!(v.value(), RecordValue::Integer(_)) {
                        Record::new(RecordValue::Integer(-v.as_i64()), 0, 0)
                    } else {
                        Record::new(RecordValue::Double(-v.as_f64()), 0, 0)
                    }
                }
                UnaryOp::Not => bool_record(!v.is_truthy()),
            }
        }
        Node::Binary(op, l, r) => binary(*op, evaluate(l, ctx, settings), evaluate(r, ctx, settings)),
        Node::LogicalAnd(l, r) => {
            if !evaluate(l, ctx, settings).is_truthy() {
                return bool_record(false);
            }
            bool_record(evaluate(r, ctx, settings).is_truthy())
        }
        Node::LogicalOr(l, r) => {
            if evaluate(l, ctx, settings).is_truthy() {
                return bool_record(true);
            }
            bool_record(evaluate(r, ctx, settings).is_truthy())
        }
        Node::Ternary(cond, then, els) => {
            if evaluate(cond, ctx, settings).is_truthy() {
                evaluate(then, ctx, settings)
            } else {
                evaluate(els, ctx, settings)
            }
        }
        Node::PreIncrement(lv) => apply_step(lv, ctx, settings, 1),
        Node::PreDecrement(lv) => apply_step(lv, ctx, settings, -1),
        Node::Assign(op, lv, rhs) => {
            let rhs_val = evaluate(rhs, ctx, settings);
            assign(*op, lv, rhs_val, ctx, settings)
        }
        Node::Sequence(nodes) => {
            let mut last = Record::uncreated();
            for n in nodes {
                last = evaluate(n, ctx, settings);
            }
            last
        }
        Node::SequenceReturn(body, ret) => {
            evaluate(body, ctx, settings);
            evaluate(ret, ctx, settings)
        }
        Node::If(cond, then, els) => {
            if evaluate(cond, ctx, settings).is_truthy() {
                evaluate(then, ctx, settings)
            } else if let Some(e) = els {
                evaluate(e, ctx, settings)
            } else {
                Record::uncreated()
            }
        }
        Node::While(cond, body) => {
            let mut last = Record::uncreated();
            while evaluate(cond, ctx, settings).is_truthy() {
                last = evaluate(body, ctx, settings);
            }
            last
        }
        Node::For(init, cond, step, body) => {
            evaluate(init, ctx, settings);
            let mut last = Record::uncreated();
            while evaluate(cond, ctx, settings).is_truthy() {
                last = evaluate(body, ctx, settings);
                evaluate(step, ctx, settings);
            }
            last
        }
        Node::ForEach(var, array, body) => {
            let arr = evaluate(array, ctx, settings);
            let mut last = Record::uncreated();
            for i in 0..arr.size() {
                ctx.set_ref(var, arr.index(i), settings);
                last = evaluate(body, ctx, settings);
            }
            last
        }
        Node::Call(sys, args) => dispatch_syscall(*sys, args, ctx, settings),
    }
}

fn index_of(node: &Node, ctx: &Context, settings: &EvalSettings) -> usize {
    let i = evaluate(node, ctx, settings).as_i64();
    if i < 0 {
        log::warn!("karl: negative array index {i}, evaluates to out-of-bounds");
        usize::MAX
    } else {
        i as usize
    }
}

fn both_integer(l: &Record, r: &Record) -> bool {
    matches!(l.value(), RecordValue::Integer(_)) && matches!(r.value(), RecordValue::Integer(_))
}

fn bool_record(b: bool) -> Record {
    Record::new(RecordValue::Integer(if b { 1 } else { 0 }), 0, 0)
}

fn values_equal(l: &Record, r: &Record) -> bool {
    match (l.value(), r.value()) {
        (RecordValue::String(a), RecordValue::String(b)) => a == b,
        _ => l.as_f64() == r.as_f64(),
    }
}

fn arith(l: Record, r: Record, fi: impl Fn(i64, i64) -> i64, fd: impl Fn(f64, f64) -> f64) -> Record {
    if both_integer(&l, &r) {
        Record::new(RecordValue::Integer(fi(l.as_i64(), r.as_i64())), 0, 0)
    } else {
        Record::new(RecordValue::Double(fd(l.as_f64(), r.as_f64())), 0, 0)
    }
}

/// Binary operator semantics: division/modulo by zero evaluate to `0`
/// rather than faulting (spec.md §4.2).
pub(crate) fn binary(op: BinOp, l: Record, r: Record) -> Record {
    match op {
        BinOp::Add => {
            if matches!(l.value(), RecordValue::String(_)) || matches!(r.value(), RecordValue::String(_)) {
                let s = format!("{}{}", l.to_display_string(), r.to_display_string());
                Record::new(RecordValue::String(Arc::from(s.as_str())), 0, 0)
            } else {
                arith(l, r, i64::wrapping_add, |a, b| a + b)
            }
        }
        BinOp::Sub => arith(l, r, i64::wrapping_sub, |a, b| a - b),
        BinOp::Mul => arith(l, r, i64::wrapping_mul, |a, b| a * b),
        BinOp::Div => {
            if both_integer(&l, &r) {
                let rv = r.as_i64();
                let v = if rv == 0 {
                    log::warn!("karl: integer division by zero");
                    0
                } else {
                    l.as_i64() / rv
                };
                Record::new(RecordValue::Integer(v), 0, 0)
            } else {
                let rv = r.as_f64();
                let v = if rv == 0.0 {
                    log::warn!("karl: division by zero");
                    0.0
                } else {
                    l.as_f64() / rv
                };
                Record::new(RecordValue::Double(v), 0, 0)
            }
        }
        BinOp::Mod => {
            let rv = r.as_i64();
            let v = if rv == 0 {
                log::warn!("karl: modulo by zero");
                0
            } else {
                l.as_i64() % rv
            };
            Record::new(RecordValue::Integer(v), 0, 0)
        }
        BinOp::Eq => bool_record(values_equal(&l, &r)),
        BinOp::NotEq => bool_record(!values_equal(&l, &r)),
        BinOp::Lt => bool_record(l.as_f64() < r.as_f64()),
        BinOp::LtEq => bool_record(l.as_f64() <= r.as_f64()),
        BinOp::Gt => bool_record(l.as_f64() > r.as_f64()),
        BinOp::GtEq => bool_record(l.as_f64() >= r.as_f64()),
    }
}

fn assign_op_to_binop(op: AssignOp) -> BinOp {
    match op {
        AssignOp::Add => BinOp::Add,
        AssignOp::Sub => BinOp::Sub,
        AssignOp::Mul => BinOp::Mul,
        AssignOp::Div => BinOp::Div,
        AssignOp::Mod => BinOp::Mod,
        AssignOp::Set => unreachable!("Set is handled separately"),
    }
}

fn compound_value(op: AssignOp, current: &Record, rhs: &Record) -> Record {
    if op == AssignOp::Set {
        rhs.clone()
    } else {
        binary(assign_op_to_binop(op), current.clone(), rhs.clone())
    }
}

fn assign(op: AssignOp, lv: &LValue, rhs: Record, ctx: &Context, settings: &EvalSettings) -> Record {
    match &lv.index {
        None => {
            if op == AssignOp::Set {
                ctx.set_ref(&lv.var, rhs, settings);
            } else {
                ctx.compound_assign(&lv.var, settings, |current| compound_value(op, current, &rhs).into_value());
            }
            lv.var.get()
        }
        Some(idx_node) => {
            let i = index_of(idx_node, ctx, settings);
            ctx.compound_assign_index(&lv.var, i, settings, |existing_elem| compound_value(op, existing_elem, &rhs));
            lv.var.get().index(i)
        }
    }
}

fn apply_step(lv: &LValue, ctx: &Context, settings: &EvalSettings, delta: i64) -> Record {
    let step = Record::new(RecordValue::Integer(delta), 0, 0);
    match &lv.index {
        None => {
            ctx.compound_assign(&lv.var, settings, |current| binary(BinOp::Add, current.clone(), step).into_value());
            lv.var.get()
        }
        Some(idx_node) => {
            let i = index_of(idx_node, ctx, settings);
            ctx.compound_assign_index(&lv.var, i, settings, |existing_elem| binary(BinOp::Add, existing_elem.clone(), step));
            lv.var.get().index(i)
        }
    }
}

fn dispatch_syscall(sys: SysCall, args: &[Node], ctx: &Context, settings: &EvalSettings) -> Record {
    match sys {
        SysCall::Size => Record::new(RecordValue::Integer(evaluate(&args[0], ctx, settings).size() as i64), 0, 0),
        SysCall::Type => {
            let name = evaluate(&args[0], ctx, settings).type_name();
            Record::new(RecordValue::String(Arc::from(name)), 0, 0)
        }
        SysCall::Clock => {
            let clock = if let Some(arg) = args.first() {
                evaluate(arg, ctx, settings).clock()
            } else {
                ctx.global_clock()
            };
            Record::new(RecordValue::Integer(clock as i64), 0, 0)
        }
        SysCall::SetClock => {
            let clock = evaluate(&args[0], ctx, settings).as_i64().max(0) as u64;
            ctx.set_global_clock(clock);
            Record::new(RecordValue::Integer(clock as i64), 0, 0)
        }
        SysCall::SetFixed => {
            syscalls::set_number_format(NumberFormat::Fixed);
            Record::uncreated()
        }
        SysCall::SetScientific => {
            syscalls::set_number_format(NumberFormat::Scientific);
            Record::uncreated()
        }
        SysCall::Eval => {
            let src = evaluate(&args[0], ctx, settings).to_display_string();
            match crate::parser::parse(&src, ctx) {
                Ok(node) => evaluate(&node, ctx, settings),
                Err(e) => {
                    log::warn!("karl: #eval parse error: {e}");
                    Record::uncreated()
                }
            }
        }
        SysCall::ReadFile => {
            let path = evaluate(&args[0], ctx, settings).to_display_string();
            match std::fs::read(&path) {
                Ok(bytes) => Record::new(RecordValue::TextFile(Arc::from(bytes)), 0, 0),
                Err(e) => {
                    log::warn!("karl: #read_file({path}): {e}");
                    Record::uncreated()
                }
            }
        }
        SysCall::WriteFile => {
            let path = evaluate(&args[0], ctx, settings).to_display_string();
            let data = evaluate(&args[1], ctx, settings);
            let bytes = record_bytes(&data);
            match std::fs::write(&path, bytes) {
                Ok(()) => Record::new(RecordValue::Integer(1), 0, 0),
                Err(e) => {
                    log::warn!("karl: #write_file({path}): {e}");
                    Record::new(RecordValue::Integer(0), 0, 0)
                }
            }
        }
        SysCall::Print => {
            let mut out = String::new();
            for arg in args {
                let v = evaluate(arg, ctx, settings);
                if let RecordValue::Double(d) = v.value() {
                    out.push_str(&syscalls::format_double(*d));
                } else {
                    out.push_str(&v.to_display_string());
                }
            }
            log::info!(target: "karl::print", "{out}");
            Record::uncreated()
        }
        SysCall::LogLevel => {
            let n = evaluate(&args[0], ctx, settings).as_i64();
            ctx.set_trace_level(syscalls::trace_level_from_karl(n));
            Record::new(RecordValue::Integer(n), 0, 0)
        }
        SysCall::DeleteVariable => {
            if let Node::Variable(var) = &args[0] {
                ctx.delete(var.name());
            }
            Record::uncreated()
        }
        SysCall::RandInt => {
            use rand::Rng;
            let lo = evaluate(&args[0], ctx, settings).as_i64();
            let hi = evaluate(&args[1], ctx, settings).as_i64();
            let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
            Record::new(RecordValue::Integer(rand::thread_rng().gen_range(lo..=hi)), 0, 0)
        }
        SysCall::RandDouble => {
            use rand::Rng;
            let lo = evaluate(&args[0], ctx, settings).as_f64();
            let hi = evaluate(&args[1], ctx, settings).as_f64();
            let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
            let value = if lo == hi { lo } else { rand::thread_rng().gen_range(lo..hi) };
            Record::new(RecordValue::Double(value), 0, 0)
        }
        SysCall::GetTime => {
            let secs = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
            Record::new(RecordValue::Integer(secs as i64), 0, 0)
        }
        SysCall::Sleep => {
            let seconds = evaluate(&args[0], ctx, settings).as_f64().max(0.0);
            std::thread::sleep(std::time::Duration::from_secs_f64(seconds));
            Record::uncreated()
        }
    }
}

fn record_bytes(record: &Record) -> Vec<u8> {
    match record.value() {
        RecordValue::TextFile(b)
        | RecordValue::Xml(b)
        | RecordValue::JpegImage(b)
        | RecordValue::UnknownFile(b)
        | RecordValue::Any(b) => b.to_vec(),
        _ => record.to_display_string().into_bytes(),
    }
}

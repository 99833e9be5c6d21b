use crate::ast::{LValue, Node};
use crate::eval::evaluate;
use madara_context::{Context, EvalSettings, Record, RecordValue};

/// Idempotent constant folding. A sub-tree that reads no variable and
/// has no side effect collapses to a single literal node. Nodes with a
/// side effect — assignment, increment, system calls, loops — are
/// never folded away, even when every operand happens to be a literal
/// (spec.md §9 design note on expression-tree pruning).
pub fn prune(node: Node) -> (Node, bool) {
    match node {
        Node::Integer(_) | Node::Double(_) | Node::Str(_) => (node, false),
        Node::Variable(_) => (node, true),

        Node::Index(base, idx) => {
            let (base, bc) = prune(*base);
            let (idx, ic) = prune(*idx);
            fold_or_keep(Node::Index(Box::new(base), Box::new(idx)), bc || ic)
        }
        Node::Unary(op, inner) => {
            let (inner, c) = prune(*inner);
            fold_or_keep(Node::Unary(op, Box::new(inner)), c)
        }
        Node::Binary(op, l, r) => {
            let (l, lc) = prune(*l);
            let (r, rc) = prune(*r);
            fold_or_keep(Node::Binary(op, Box::new(l), Box::new(r)), lc || rc)
        }
        Node::LogicalAnd(l, r) => {
            let (l, lc) = prune(*l);
            let (r, rc) = prune(*r);
            fold_or_keep(Node::LogicalAnd(Box::new(l), Box::new(r)), lc || rc)
        }
        Node::LogicalOr(l, r) => {
            let (l, lc) = prune(*l);
            let (r, rc) = prune(*r);
            fold_or_keep(Node::LogicalOr(Box::new(l), Box::new(r)), lc || rc)
        }
        Node::Ternary(cond, then, els) => {
            let (cond, cc) = prune(*cond);
            let (then, tc) = prune(*then);
            let (els, ec) = prune(*els);
            fold_or_keep(Node::Ternary(Box::new(cond), Box::new(then), Box::new(els)), cc || tc || ec)
        }

        // Side-effecting or control-flow nodes: children are pruned for
        // their own sake, but the node itself always survives.
        Node::PreIncrement(lv) => (Node::PreIncrement(prune_lvalue(lv)), true),
        Node::PreDecrement(lv) => (Node::PreDecrement(prune_lvalue(lv)), true),
        Node::Assign(op, lv, rhs) => {
            let (rhs, _) = prune(*rhs);
            (Node::Assign(op, prune_lvalue(lv), Box::new(rhs)), true)
        }
        Node::Sequence(nodes) => {
            let pruned = nodes.into_iter().map(|n| prune(n).0).collect();
            (Node::Sequence(pruned), true)
        }
        Node::SequenceReturn(body, ret) => {
            let (body, _) = prune(*body);
            let (ret, _) = prune(*ret);
            (Node::SequenceReturn(Box::new(body), Box::new(ret)), true)
        }
        Node::If(cond, then, els) => {
            let (cond, _) = prune(*cond);
            let (then, _) = prune(*then);
            let els = els.map(|e| Box::new(prune(*e).0));
            (Node::If(Box::new(cond), Box::new(then), els), true)
        }
        Node::While(cond, body) => {
            let (cond, _) = prune(*cond);
            let (body, _) = prune(*body);
            (Node::While(Box::new(cond), Box::new(body)), true)
        }
        Node::For(init, cond, step, body) => {
            let (init, _) = prune(*init);
            let (cond, _) = prune(*cond);
            let (step, _) = prune(*step);
            let (body, _) = prune(*body);
            (Node::For(Box::new(init), Box::new(cond), Box::new(step), Box::new(body)), true)
        }
        Node::ForEach(var, array, body) => {
            let (array, _) = prune(*array);
            let (body, _) = prune(*body);
            (Node::ForEach(var, Box::new(array), Box::new(body)), true)
        }
        Node::Call(sys, args) => {
            let pruned = args.into_iter().map(|n| prune(n).0).collect();
            (Node::Call(sys, pruned), true)
        }
    }
}

fn prune_lvalue(lv: LValue) -> LValue {
    LValue {
        var: lv.var,
        index: lv.index.map(|idx| Box::new(prune(*idx).0)),
    }
}

fn fold_or_keep(node: Node, can_change: bool) -> (Node, bool) {
    if can_change {
        return (node, true);
    }
    let scratch = Context::new();
    let settings = EvalSettings::default();
    let value = evaluate(&node, &scratch, &settings);
    (literal_from_record(&value), false)
}

fn literal_from_record(record: &Record) -> Node {
    match record.value() {
        RecordValue::Integer(i) => Node::Integer(*i),
        RecordValue::Double(d) => Node::Double(*d),
        RecordValue::String(s) => Node::Str(s.to_string()),
        _ => Node::Integer(record.as_i64()),
    }
}

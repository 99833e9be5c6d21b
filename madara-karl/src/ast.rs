use madara_context::VariableReference;

/// A single tagged sum type for every expression-tree shape, visited by
/// one tree-walking `match` rather than double dispatch across a node
/// class hierarchy (spec.md §9 design note: "Visitor over expression
/// nodes").
#[derive(Debug, Clone)]
pub enum Node {
    Integer(i64),
    Double(f64),
    Str(String),

    /// Resolved once, at parse time, against the `Context` the
    /// expression was compiled with (spec.md §4.1: "lookups by
    /// reference are O(1) and do not re-hash").
    Variable(VariableReference),
    Index(Box<Node>, Box<Node>),

    Unary(UnaryOp, Box<Node>),
    Binary(BinOp, Box<Node>, Box<Node>),
    LogicalAnd(Box<Node>, Box<Node>),
    LogicalOr(Box<Node>, Box<Node>),
    Ternary(Box<Node>, Box<Node>, Box<Node>),

    PreIncrement(LValue),
    PreDecrement(LValue),
    Assign(AssignOp, LValue, Box<Node>),

    /// `expr ; expr ; expr`: evaluates each in turn, yields the last.
    Sequence(Vec<Node>),
    /// `body ;> expr`: evaluates `body` for effect, then yields `expr`.
    SequenceReturn(Box<Node>, Box<Node>),

    If(Box<Node>, Box<Node>, Option<Box<Node>>),
    While(Box<Node>, Box<Node>),
    For(Box<Node>, Box<Node>, Box<Node>, Box<Node>),
    ForEach(VariableReference, Box<Node>, Box<Node>),

    /// `#name(args)`. The recognized system call table is fixed and
    /// validated at parse time: an unrecognized `#ident` is a syntax
    /// error, not something deferred to evaluation (spec.md §4.2).
    Call(SysCall, Vec<Node>),
}

/// The system call table (spec.md §4.2). User-defined functions are a
/// separate, host-driven path (`Context::define_function` /
/// `call_function`), not part of KaRL's own `#`-call grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysCall {
    Size,
    Type,
    Clock,
    SetClock,
    SetFixed,
    SetScientific,
    Eval,
    ReadFile,
    WriteFile,
    Print,
    LogLevel,
    DeleteVariable,
    RandInt,
    RandDouble,
    GetTime,
    Sleep,
}

impl SysCall {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "size" => SysCall::Size,
            "type" => SysCall::Type,
            "clock" => SysCall::Clock,
            "set_clock" => SysCall::SetClock,
            "set_fixed" => SysCall::SetFixed,
            "set_scientific" => SysCall::SetScientific,
            "eval" => SysCall::Eval,
            "read_file" => SysCall::ReadFile,
            "write_file" => SysCall::WriteFile,
            "print" => SysCall::Print,
            "log_level" => SysCall::LogLevel,
            "delete_variable" => SysCall::DeleteVariable,
            "rand_int" => SysCall::RandInt,
            "rand_double" => SysCall::RandDouble,
            "get_time" => SysCall::GetTime,
            "sleep" => SysCall::Sleep,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
pub struct LValue {
    pub var: VariableReference,
    pub index: Option<Box<Node>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

use std::cell::Cell;

/// Numeric display mode toggled by `#set_fixed`/`#set_scientific`
/// (spec.md §4.2). Kept thread-local rather than process-global: MADARA
/// runs one participant per OS thread (spec.md §5), and each should be
/// free to pick its own print formatting without racing the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberFormat {
    Default,
    Fixed,
    Scientific,
}

thread_local! {
    static NUMBER_FORMAT: Cell<NumberFormat> = const { Cell::new(NumberFormat::Default) };
}

pub fn set_number_format(format: NumberFormat) {
    NUMBER_FORMAT.with(|f| f.set(format));
}

pub fn format_double(value: f64) -> String {
    match NUMBER_FORMAT.with(Cell::get) {
        NumberFormat::Default => value.to_string(),
        NumberFormat::Fixed => format!("{value:.6}"),
        NumberFormat::Scientific => format!("{value:e}"),
    }
}

/// Maps `#log_level(n)`'s numeric argument onto the `log` crate's five
/// severity levels, clamped into range (spec.md §4.2, SPEC_FULL.md
/// logging section). The resulting filter gates the evaluator's own
/// tracing, not `#print`'s fixed `log::Level::Info`.
pub fn trace_level_from_karl(n: i64) -> log::LevelFilter {
    match n {
        i if i <= 0 => log::LevelFilter::Off,
        1 => log::LevelFilter::Error,
        2 => log::LevelFilter::Warn,
        3 => log::LevelFilter::Info,
        4 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    }
}

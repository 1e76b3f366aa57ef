//! Context-tagged debug output, in the spirit of kernel `printk`.
//!
//! Every line is tagged with the emitting worker and, where applicable, the
//! currently running fiber, without requiring callers to thread that
//! context through manually.
//!
//! # Environment variables
//!
//! - `FIBRT_FLUSH_EPRINT=1` — flush stderr after every line (useful when
//!   chasing a crash, costly under load).
//! - `FIBRT_LOG_LEVEL=<level>` — `off|error|warn|info|debug|trace` or `0`-`5`.
//! - `FIBRT_LOG_TIME=1` — prefix each line with nanoseconds since first use.
//!
//! # Output format
//!
//! `[LEVEL] [w<worker>:f<fiber>] message`, with an optional `[<ns>]`
//! timestamp segment between the level and the context tag.

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Instant;
use crate::env::env_get_bool;

/// Log levels, lower is more severe and enabled at a stricter filter.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Off,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "[ERROR]",
            LogLevel::Warn => "[WARN] ",
            LogLevel::Info => "[INFO] ",
            LogLevel::Debug => "[DEBUG]",
            LogLevel::Trace => "[TRACE]",
        }
    }
}

static FLUSH_ENABLED: AtomicBool = AtomicBool::new(false);
static TIME_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static INITIALIZED: AtomicBool = AtomicBool::new(false);

static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Read `FIBRT_*` environment variables. Called lazily on first log, but
/// exposed so a caller can force deterministic initialization up front.
pub fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    START_TIME.get_or_init(Instant::now);

    FLUSH_ENABLED.store(env_get_bool("FIBRT_FLUSH_EPRINT", false), Ordering::Relaxed);
    TIME_ENABLED.store(env_get_bool("FIBRT_LOG_TIME", false), Ordering::Relaxed);

    if let Ok(val) = std::env::var("FIBRT_LOG_LEVEL") {
        let level = match val.to_lowercase().as_str() {
            "off" | "0" => LogLevel::Off,
            "error" | "1" => LogLevel::Error,
            "warn" | "2" => LogLevel::Warn,
            "info" | "3" => LogLevel::Info,
            "debug" | "4" => LogLevel::Debug,
            "trace" | "5" => LogLevel::Trace,
            _ => LogLevel::Info,
        };
        LOG_LEVEL.store(level as u8, Ordering::Relaxed);
    }
}

#[inline]
pub fn flush_enabled() -> bool {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    FLUSH_ENABLED.load(Ordering::Relaxed)
}

#[inline]
pub fn time_enabled() -> bool {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    TIME_ENABLED.load(Ordering::Relaxed)
}

#[inline]
pub fn log_level() -> LogLevel {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

pub fn set_log_level(level: LogLevel) {
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn set_flush_enabled(enabled: bool) {
    FLUSH_ENABLED.store(enabled, Ordering::Relaxed);
}

pub fn set_time_enabled(enabled: bool) {
    TIME_ENABLED.store(enabled, Ordering::Relaxed);
}

#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level as u8 <= log_level() as u8
}

#[inline]
pub fn elapsed_ns() -> u64 {
    let start = START_TIME.get_or_init(Instant::now);
    start.elapsed().as_nanos() as u64
}

thread_local! {
    static WORKER_ID: std::cell::Cell<Option<u32>> = const { std::cell::Cell::new(None) };
    static FIBER_ID: std::cell::Cell<Option<u32>> = const { std::cell::Cell::new(None) };
}

/// Set the worker id tagged onto log lines from this thread.
pub fn set_worker_id(id: u32) {
    WORKER_ID.with(|w| w.set(Some(id)));
}

pub fn clear_worker_id() {
    WORKER_ID.with(|w| w.set(None));
}

/// Set the fiber id tagged onto log lines, updated by the scheduler on
/// every context switch.
pub fn set_fiber_id(id: u32) {
    FIBER_ID.with(|g| g.set(Some(id)));
}

pub fn clear_fiber_id() {
    FIBER_ID.with(|g| g.set(None));
}

#[inline]
pub fn get_worker_id() -> Option<u32> {
    WORKER_ID.with(|w| w.get())
}

#[inline]
pub fn get_fiber_id() -> Option<u32> {
    FIBER_ID.with(|g| g.get())
}

fn format_context() -> String {
    let worker = match get_worker_id() {
        Some(id) => format!("w{}", id),
        None => "w--".to_string(),
    };
    let fiber = match get_fiber_id() {
        Some(id) => format!("f{}", id),
        None => "f--".to_string(),
    };
    format!("[{}:{}]", worker, fiber)
}

#[doc(hidden)]
pub fn _raw_print(args: std::fmt::Arguments<'_>) {
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = handle.write_fmt(args);
    if flush_enabled() {
        let _ = handle.flush();
    }
}

#[doc(hidden)]
pub fn _raw_println(args: std::fmt::Arguments<'_>) {
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = handle.write_fmt(args);
    let _ = handle.write_all(b"\n");
    if flush_enabled() {
        let _ = handle.flush();
    }
}

#[doc(hidden)]
pub fn _log_impl(level: LogLevel, args: std::fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }

    let stderr = std::io::stderr();
    let mut handle = stderr.lock();

    let _ = write!(handle, "{} ", level.prefix());
    if time_enabled() {
        let _ = write!(handle, "[{}] ", elapsed_ns());
    }
    let _ = write!(handle, "{} ", format_context());
    let _ = handle.write_fmt(args);
    let _ = handle.write_all(b"\n");

    if flush_enabled() {
        let _ = handle.flush();
    }
}

/// Raw write to stderr, no newline, no context tag.
#[macro_export]
macro_rules! diag_print {
    ($($arg:tt)*) => {{
        $crate::diag::_raw_print(format_args!($($arg)*));
    }};
}

/// Raw write to stderr with a trailing newline, no context tag.
#[macro_export]
macro_rules! diag_println {
    () => {{
        $crate::diag::_raw_println(format_args!(""));
    }};
    ($($arg:tt)*) => {{
        $crate::diag::_raw_println(format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        $crate::diag::_log_impl($crate::diag::LogLevel::Error, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        $crate::diag::_log_impl($crate::diag::LogLevel::Warn, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        $crate::diag::_log_impl($crate::diag::LogLevel::Info, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        $crate::diag::_log_impl($crate::diag::LogLevel::Debug, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {{
        $crate::diag::_log_impl($crate::diag::LogLevel::Trace, format_args!($($arg)*));
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_order() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Trace);
    }

    #[test]
    fn level_from_u8() {
        assert_eq!(LogLevel::from_u8(0), LogLevel::Off);
        assert_eq!(LogLevel::from_u8(1), LogLevel::Error);
        assert_eq!(LogLevel::from_u8(4), LogLevel::Debug);
        assert_eq!(LogLevel::from_u8(99), LogLevel::Trace);
    }

    #[test]
    fn context_roundtrip() {
        assert_eq!(get_worker_id(), None);
        assert_eq!(get_fiber_id(), None);

        set_worker_id(5);
        assert_eq!(get_worker_id(), Some(5));

        set_fiber_id(42);
        assert_eq!(get_fiber_id(), Some(42));

        clear_worker_id();
        clear_fiber_id();
        assert_eq!(get_worker_id(), None);
        assert_eq!(get_fiber_id(), None);
    }

    #[test]
    fn elapsed_ns_advances() {
        let t1 = elapsed_ns();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let t2 = elapsed_ns();
        assert!(t2 > t1);
    }

    #[test]
    fn macros_compile() {
        set_log_level(LogLevel::Off);
        diag_print!("test");
        diag_println!("test {}", 42);
        log_error!("error {}", "msg");
        log_warn!("warn");
        log_info!("info");
        log_debug!("debug");
        log_trace!("trace");
    }
}

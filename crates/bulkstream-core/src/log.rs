//! Leveled stderr logging
//!
//! Thread-safe, optionally-flushing log lines. Every line is written under
//! the stderr lock so concurrent reactor and caller threads don't interleave.
//!
//! # Environment Variables
//!
//! - `BULKSTREAM_LOG_LEVEL=<level>` - off|error|warn|info|debug|trace or 0-5
//! - `BULKSTREAM_LOG_FLUSH=1` - Flush stderr after each line
//!
//! # Usage
//!
//! ```ignore
//! use bulkstream_core::{log_debug, log_error};
//!
//! log_debug!("init transfer @{},{}", stream_id, transfer_id);
//! log_error!("{}", record);
//! ```

use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Once;

use crate::env::{env_get_bool, env_get_raw};

/// Log levels, most severe first. `Off` silences everything.
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

/// Index = level as u8
const LEVELS: [(LogLevel, &str); 6] = [
    (LogLevel::Off, "off"),
    (LogLevel::Error, "error"),
    (LogLevel::Warn, "warn"),
    (LogLevel::Info, "info"),
    (LogLevel::Debug, "debug"),
    (LogLevel::Trace, "trace"),
];

impl LogLevel {
    /// Out-of-range values saturate to `Trace`.
    pub fn from_u8(v: u8) -> Self {
        LEVELS[usize::from(v).min(LEVELS.len() - 1)].0
    }

    /// Level name or number, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Ok(n) = s.parse::<u8>() {
            return LEVELS.get(usize::from(n)).map(|(level, _)| *level);
        }
        LEVELS
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(s))
            .map(|(level, _)| *level)
    }

    pub fn name(self) -> &'static str {
        LEVELS[self as usize].1
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

static ENV_ONCE: Once = Once::new();
static LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static FLUSH: AtomicBool = AtomicBool::new(false);

/// Apply `BULKSTREAM_LOG_LEVEL` and `BULKSTREAM_LOG_FLUSH`. Runs at most once;
/// the first log line calls it implicitly.
pub fn init() {
    ENV_ONCE.call_once(|| {
        FLUSH.store(env_get_bool("BULKSTREAM_LOG_FLUSH", false), Ordering::Relaxed);
        let level = env_get_raw("BULKSTREAM_LOG_LEVEL");
        if let Some(level) = level.as_deref().and_then(LogLevel::parse) {
            LEVEL.store(level as u8, Ordering::Relaxed);
        }
    });
}

pub fn log_level() -> LogLevel {
    init();
    LogLevel::from_u8(LEVEL.load(Ordering::Relaxed))
}

/// Overrides the environment, including a later implicit `init`.
pub fn set_log_level(level: LogLevel) {
    init();
    LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn set_flush_enabled(enabled: bool) {
    init();
    FLUSH.store(enabled, Ordering::Relaxed);
}

#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level != LogLevel::Off && level <= log_level()
}

#[doc(hidden)]
pub fn _log_impl(level: LogLevel, args: fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }
    let mut err = std::io::stderr().lock();
    let _ = writeln!(err, "bulkstream {:>5}: {}", level.name().to_uppercase(), args);
    if FLUSH.load(Ordering::Relaxed) {
        let _ = err.flush();
    }
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        $crate::log::_log_impl($crate::log::LogLevel::Error, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        $crate::log::_log_impl($crate::log::LogLevel::Warn, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        $crate::log::_log_impl($crate::log::LogLevel::Info, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        $crate::log::_log_impl($crate::log::LogLevel::Debug, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {{
        $crate::log::_log_impl($crate::log::LogLevel::Trace, format_args!($($arg)*));
    }};
}

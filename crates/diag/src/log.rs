use core::{
    fmt,
    sync::atomic::{AtomicU8, Ordering},
};

use reloco_error::Location;
use spin::RwLock;

use crate::style::{Color, WithFg};

/// Emits a record at the given level, tagged with the caller location.
#[macro_export]
macro_rules! log {
    ($level:expr, $($arg:tt)*) => {
        $crate::log::log($level, format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {
        $crate::log!($crate::log::LogLevel::Trace, $($arg)*)
    };
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {
        $crate::log!($crate::log::LogLevel::Debug, $($arg)*)
    };
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        $crate::log!($crate::log::LogLevel::Info, $($arg)*)
    };
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {
        $crate::log!($crate::log::LogLevel::Warn, $($arg)*)
    };
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {
        $crate::log!($crate::log::LogLevel::Error, $($arg)*)
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    const fn from_u8(level: u8) -> Self {
        match level {
            0 => Self::Trace,
            1 => Self::Debug,
            2 => Self::Info,
            3 => Self::Warn,
            _ => Self::Error,
        }
    }
}

/// Destination of log records.
pub type LogSink = fn(LogLevel, Location, fmt::Arguments<'_>);

static MAX_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Warn as u8);
static SINK: RwLock<LogSink> = RwLock::new(default_sink);

/// Sets the least severe level that reaches the sink.
pub fn set_max_level(level: LogLevel) {
    MAX_LEVEL.store(level as u8, Ordering::Relaxed);
}

#[must_use]
pub fn max_level() -> LogLevel {
    LogLevel::from_u8(MAX_LEVEL.load(Ordering::Relaxed))
}

#[must_use]
pub fn enabled(level: LogLevel) -> bool {
    level >= max_level()
}

/// Installs a new sink and returns the previous one.
pub fn set_logger(sink: LogSink) -> LogSink {
    core::mem::replace(&mut *SINK.write(), sink)
}

#[track_caller]
pub fn log(level: LogLevel, message: fmt::Arguments<'_>) {
    log_at(level, Location::caller(), message);
}

/// Emits a record attributed to an explicit location.
pub fn log_at(level: LogLevel, location: Location, message: fmt::Arguments<'_>) {
    if !enabled(level) {
        return;
    }
    let sink = *SINK.read();
    sink(level, location, message);
}

#[cfg(feature = "std")]
fn default_sink(level: LogLevel, location: Location, message: fmt::Arguments<'_>) {
    std::eprintln!(
        "{} {} {}",
        LevelFormat(level),
        message,
        WithFg::new(Color::DarkGray, location)
    );
}

#[cfg(not(feature = "std"))]
fn default_sink(_level: LogLevel, _location: Location, _message: fmt::Arguments<'_>) {}

/// Colored, fixed-width rendering of a [`LogLevel`].
pub struct LevelFormat(pub LogLevel);

impl fmt::Display for LevelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let color = match self.0 {
            LogLevel::Trace => Color::Magenta,
            LogLevel::Debug => Color::Blue,
            LogLevel::Info => Color::Green,
            LogLevel::Warn => Color::Yellow,
            LogLevel::Error => Color::Red,
        };
        let msg = match self.0 {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => " INFO",
            LogLevel::Warn => " WARN",
            LogLevel::Error => "ERROR",
        };
        write!(f, "{}", WithFg::new(color, msg))
    }
}

use core::fmt;

use reloco_error::Location;
use spin::RwLock;

/// Traps unless the condition holds.
///
/// The installed trap handler observes the stringified condition, the call
/// site and the optional message before the process goes down.
///
/// # Examples
///
/// ```should_panic
/// let index = 3;
/// reloco_diag::check!(index < 2, "index {index} out of bounds");
/// ```
#[macro_export]
macro_rules! check {
    ($cond:expr $(,)?) => {
        if !$cond {
            $crate::trap(::core::stringify!($cond), ::core::format_args!(""))
        }
    };
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::trap(::core::stringify!($cond), ::core::format_args!($($arg)+))
        }
    };
}

/// Traps unconditionally.
#[macro_export]
macro_rules! trap {
    ($($arg:tt)+) => {
        $crate::trap("", ::core::format_args!($($arg)+))
    };
}

/// Handler run before a trap takes the process down.
pub type TrapHandler = fn(expression: &str, location: Location, message: fmt::Arguments<'_>);

static HANDLER: RwLock<TrapHandler> = RwLock::new(default_handler);

/// Installs a trap handler and returns the previous one.
pub fn set_trap_handler(handler: TrapHandler) -> TrapHandler {
    core::mem::replace(&mut *HANDLER.write(), handler)
}

fn default_handler(expression: &str, location: Location, message: fmt::Arguments<'_>) {
    if expression.is_empty() {
        crate::log::log_at(crate::LogLevel::Error, location, format_args!("trap: {message}"));
    } else {
        crate::log::log_at(
            crate::LogLevel::Error,
            location,
            format_args!("check `{expression}` failed: {message}"),
        );
    }
}

/// Runs the trap handler, then aborts the current thread of control.
///
/// With `panic = "abort"` this terminates the process.
#[cold]
#[track_caller]
pub fn trap(expression: &str, message: fmt::Arguments<'_>) -> ! {
    let location = Location::caller();
    #[cfg(feature = "trap-handler")]
    {
        let handler = *HANDLER.read();
        handler(expression, location, message);
    }
    panic!("trap at {location}: {expression} {message}");
}

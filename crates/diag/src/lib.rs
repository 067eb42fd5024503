//! Diagnostics shared by the reloco crates: leveled logging and the trap
//! facility behind every checked accessor.

#![no_std]

#[cfg(any(test, feature = "std"))]
extern crate std;

pub use self::{
    log::{LogLevel, LogSink, max_level, set_logger, set_max_level},
    trap::{TrapHandler, set_trap_handler, trap},
};

pub mod log;
pub mod style;
mod trap;

//! Error codes shared by every fallible operation of the reloco crates.
//!
//! [`ErrorKind`] is the closed set of failure causes. [`Error`] pairs a kind
//! with the [`Location`] that produced it; its context selectors
//! (`AllocationFailedSnafu`, `OutOfBoundsSnafu`, ...) are meant to be used
//! with [`snafu::ensure!`], [`snafu::OptionExt::context`] and
//! [`IntoError`](snafu::IntoError)-style `.fail()` calls.
//!
//! # Examples
//!
//! ```
//! use reloco_error::{ContainerEmptySnafu, ErrorCategory, ErrorKind, Result};
//! use snafu::OptionExt as _;
//!
//! fn first(values: &[u32]) -> Result<u32> {
//!     values.first().copied().context(ContainerEmptySnafu)
//! }
//!
//! let err = first(&[]).unwrap_err();
//! assert_eq!(err.kind(), ErrorKind::ContainerEmpty);
//! assert_eq!(err.kind().category(), ErrorCategory::State);
//! ```

#![no_std]

#[cfg(test)]
extern crate std;

use snafu::Snafu;

pub use self::location::Location;

mod location;

/// Result type used throughout the reloco crates.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Broad family an [`ErrorKind`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display, derive_more::IsVariant)]
pub enum ErrorCategory {
    #[display("allocation")]
    Allocation,
    #[display("bounds or state")]
    State,
    #[display("policy")]
    Policy,
    #[display("concurrency or ownership")]
    Concurrency,
}

macro_rules! define_errors {
    (
        $(
            $(#[$attrs:meta])*
            $variant:ident => ($category:ident, $message:literal),
        )*
    ) => {
        /// The closed enumeration of failure causes.
        ///
        /// Every fallible operation maps its failure to exactly one of these.
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash,
            derive_more::Display, derive_more::IsVariant,
        )]
        pub enum ErrorKind {
            $(
                $(#[$attrs])*
                #[display($message)]
                $variant,
            )*
        }

        impl ErrorKind {
            /// Returns the family this kind belongs to.
            #[must_use]
            pub const fn category(self) -> ErrorCategory {
                match self {
                    $(Self::$variant => ErrorCategory::$category,)*
                }
            }
        }

        /// An [`ErrorKind`] together with the location where it was raised.
        #[derive(Debug, Snafu)]
        #[snafu(visibility(pub))]
        pub enum Error {
            $(
                $(#[$attrs])*
                #[snafu(display($message))]
                $variant {
                    #[snafu(implicit)]
                    location: Location,
                },
            )*
        }

        impl Error {
            /// Creates an error of the given kind located at the caller.
            #[must_use]
            #[track_caller]
            pub fn new(kind: ErrorKind) -> Self {
                let location = Location::caller();
                match kind {
                    $(ErrorKind::$variant => Self::$variant { location },)*
                }
            }

            /// Returns the kind of this error.
            #[must_use]
            pub fn kind(&self) -> ErrorKind {
                match self {
                    $(Self::$variant { .. } => ErrorKind::$variant,)*
                }
            }

            /// Returns the location where this error was created.
            #[must_use]
            pub fn location(&self) -> Location {
                match self {
                    $(Self::$variant { location } => *location,)*
                }
            }
        }
    };
}

define_errors! {
    /// The allocator could not provide the requested memory.
    AllocationFailed => (Allocation, "allocation failed"),
    /// The allocator could not grow a block without moving it.
    InPlaceGrowthFailed => (Allocation, "in-place growth failed"),
    /// A size computation overflowed.
    IntegerOverflow => (Allocation, "integer overflow"),
    /// The backend or type does not support the requested operation.
    UnsupportedOperation => (Policy, "unsupported operation"),
    /// A value lies outside its permitted range.
    OutOfRange => (State, "out of range"),
    /// An index lies outside the bounds of a sequence.
    OutOfBounds => (State, "out of bounds"),
    InvalidArgument => (Policy, "invalid argument"),
    AlreadyExists => (Policy, "already exists"),
    /// A handle that owns nothing was dereferenced.
    EmptyPointer => (State, "empty pointer"),
    /// A weak handle outlived the value it observed.
    PointerExpired => (State, "pointer expired"),
    /// An intrusive value was not allocated through a reference-counted factory.
    NoOwner => (Concurrency, "no owner"),
    Deadlock => (Concurrency, "deadlock"),
    InvalidOwner => (Concurrency, "invalid owner"),
    /// A lock could not be taken because it is held.
    StillLocked => (Concurrency, "still locked"),
    /// A lock was released while not held.
    NotLocked => (Concurrency, "not locked"),
    TimedOut => (Concurrency, "timed out"),
    TryAgain => (Concurrency, "try again"),
    /// A two-phase wrapper was accessed before initialization.
    NotInitialized => (State, "not initialized"),
    /// An element was requested from an empty container.
    ContainerEmpty => (State, "container empty"),
    NotFound => (Policy, "not found"),
}

impl From<ErrorKind> for Error {
    #[track_caller]
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl PartialEq<ErrorKind> for Error {
    fn eq(&self, other: &ErrorKind) -> bool {
        self.kind() == *other
    }
}

//! Explicit-failure ownership primitives.
//!
//! Every operation that can fail returns [`Result`]; nothing unwinds. The
//! crate is layered as follows:
//!
//! - [`FallibleAllocator`] backends (re-exported from `reloco-allocator`)
//!   hand out raw memory.
//! - [`Relocate`] states whether a type may be moved by copying its bytes,
//!   which lets [`FallibleVec`] pick the cheapest growth path.
//! - The [`two_phase`] wrappers reserve storage first and run a fallible
//!   initializer second, rolling back cleanly on failure.
//! - The [`construct`] dispatcher initializes memory through the strategy a
//!   type declares: in place, allocator-aware factory, default factory or
//!   plain conversion.
//! - [`UniquePtr`], [`SharedPtr`]/[`WeakPtr`] and [`IntrusivePtr`] own values
//!   placed in allocator memory; [`AllocHelper`] does the same for raw
//!   objects and arrays.
//! - [`FallibleSingleton`] and [`AtomicFallibleSingleton`] build lazily
//!   initialized globals from the two-phase protocol.
//!
//! Accessors without a `try_` prefix check their preconditions with the
//! [`reloco_diag`] trap facility instead of returning errors.
//!
//! # Examples
//!
//! ```
//! use reloco::{SharedPtr, construct::{Construct, Plain}};
//!
//! struct Node {
//!     value: u32,
//! }
//!
//! impl From<u32> for Node {
//!     fn from(value: u32) -> Self {
//!         Self { value }
//!     }
//! }
//!
//! impl Construct<u32> for Node {
//!     type Strategy = Plain;
//! }
//!
//! let node = SharedPtr::<Node>::try_construct_combined(42_u32).unwrap();
//! assert_eq!(node.use_count(), 1);
//! assert_eq!(node.value, 42);
//!
//! let weak = node.downgrade();
//! drop(node);
//! assert!(weak.lock().is_err());
//! ```

#![no_std]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub use reloco_allocator::{
    FallibleAllocator, FreeListAllocator, MemBlock, StackAllocator, SystemAllocator, UsageHint,
};
#[cfg(unix)]
pub use reloco_allocator::PageAllocator;
pub use reloco_error::{Error, ErrorKind, Location, Result};

pub use self::{
    helper::{AllocHelper, FallibleArray},
    intrusive::{Intrusive, IntrusivePtr, RefCount},
    relocate::Relocate,
    shared::{SharedFromThis, SharedPtr, WeakPtr, WeakThis},
    singleton::{
        AtomicFallibleSingleton, FallibleSingleton, LockPolicy, RawSpinLock, SpinLockPolicy,
        SpinMutexPolicy,
    },
    two_phase::{
        ConstructionToken, FallibleAllocated, FallibleConstructed, FallibleInit,
        StaticFallibleConstructed,
    },
    unique::UniquePtr,
    vec::FallibleVec,
};

pub mod construct;
mod helper;
mod intrusive;
mod relocate;
pub mod shared;
pub mod singleton;
pub mod two_phase;
mod unique;
mod vec;

#[cfg(test)]
mod test_util;

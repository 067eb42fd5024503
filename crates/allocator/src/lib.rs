//! Fallible memory allocators.
//!
//! Every allocator in this crate implements [`FallibleAllocator`], an
//! interface whose operations report failure through
//! [`Result`](reloco_error::Result) instead of aborting:
//!
//! | operation | moves memory | may fail |
//! |-----------|--------------|----------|
//! | [`allocate`](FallibleAllocator::allocate) | - | yes |
//! | [`expand_in_place`](FallibleAllocator::expand_in_place) | never | yes |
//! | [`reallocate`](FallibleAllocator::reallocate) | maybe | yes |
//! | [`deallocate`](FallibleAllocator::deallocate) | - | no |
//! | [`advise`](FallibleAllocator::advise) | never | no (best effort) |
//!
//! Separating `expand_in_place` from `reallocate` lets a growable container
//! try zero-copy growth before falling back to moving its elements.
//!
//! # Available Allocators
//!
//! | Allocator | Thread safety | `expand_in_place` |
//! |-----------|---------------|-------------------|
//! | [`SystemAllocator`] | `Sync` | unsupported |
//! | [`StackAllocator`] | single-threaded | most recent block only |
//! | [`FreeListAllocator`] | `Sync` (spin lock) | absorbs adjacent free block |
//! | [`PageAllocator`] (unix) | `Sync` | `mremap` on Linux |
//!
//! # Examples
//!
//! ```rust
//! use core::alloc::Layout;
//!
//! use reloco_allocator::{FallibleAllocator as _, StackAllocator};
//!
//! let mut buf = [0u8; 256];
//! let arena = StackAllocator::new(&mut buf);
//!
//! let layout = Layout::from_size_align(64, 1).unwrap();
//! let block = arena.allocate(layout).unwrap();
//! let grown = unsafe { arena.expand_in_place(block.ptr, layout, 128) }.unwrap();
//! assert_eq!(grown, 128);
//! ```

#![no_std]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub use self::{
    block::{MemBlock, UsageHint},
    free_list::FreeListAllocator,
    stack::StackAllocator,
    system::SystemAllocator,
    traits::{FallibleAllocator, reallocate_by_copy},
};
#[cfg(unix)]
pub use self::page::PageAllocator;

mod block;
mod free_list;
#[cfg(unix)]
mod page;
mod stack;
mod system;
mod traits;

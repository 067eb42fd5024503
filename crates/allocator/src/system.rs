use core::{alloc::Layout, ptr::NonNull};

use reloco_diag::trace;
use reloco_error::{AllocationFailedSnafu, IntegerOverflowSnafu, Result};
use snafu::OptionExt as _;

use crate::{FallibleAllocator, MemBlock};

/// Allocator backed by the global heap.
///
/// This is the default allocator of every owning handle. It has no state and
/// is safe to share between threads. The global heap offers no way to grow a
/// block without moving it, so [`expand_in_place`] reports
/// `UnsupportedOperation` for growing requests.
///
/// [`expand_in_place`]: FallibleAllocator::expand_in_place
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SystemAllocator;

impl FallibleAllocator for SystemAllocator {
    fn allocate(&self, layout: Layout) -> Result<MemBlock> {
        if layout.size() == 0 {
            return Ok(MemBlock::dangling_for(layout));
        }
        let ptr = unsafe { alloc::alloc::alloc(layout) };
        let Some(ptr) = NonNull::new(ptr) else {
            trace!("system allocation of {layout:?} failed");
            return AllocationFailedSnafu.fail();
        };
        Ok(MemBlock::new(ptr, layout.size()))
    }

    fn allocate_zeroed(&self, layout: Layout) -> Result<MemBlock> {
        if layout.size() == 0 {
            return Ok(MemBlock::dangling_for(layout));
        }
        let ptr = unsafe { alloc::alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).context(AllocationFailedSnafu)?;
        Ok(MemBlock::new(ptr, layout.size()))
    }

    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_size: usize,
    ) -> Result<MemBlock> {
        if new_size <= old_layout.size() {
            return Ok(MemBlock::new(ptr, old_layout.size()));
        }
        let new_layout = Layout::from_size_align(new_size, old_layout.align())
            .ok()
            .context(IntegerOverflowSnafu)?;
        if old_layout.size() == 0 {
            return self.allocate(new_layout);
        }

        let new_ptr = unsafe { alloc::alloc::realloc(ptr.as_ptr(), old_layout, new_size) };
        let Some(new_ptr) = NonNull::new(new_ptr) else {
            trace!("system reallocation to {new_size} bytes failed");
            return AllocationFailedSnafu.fail();
        };
        Ok(MemBlock::new(new_ptr, new_size))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() != 0 {
            unsafe { alloc::alloc::dealloc(ptr.as_ptr(), layout) }
        }
    }
}

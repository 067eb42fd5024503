use core::{alloc::Layout, ptr::NonNull};

use reloco_error::{IntegerOverflowSnafu, Result, UnsupportedOperationSnafu};
use snafu::OptionExt as _;

use crate::{MemBlock, UsageHint};

/// An allocator whose every fallible operation reports failure as an error.
///
/// Implementations use interior mutability so that a single allocator can
/// be shared by reference between the handles it serves. Whether that
/// sharing may cross threads follows from the implementation's `Sync`.
pub trait FallibleAllocator {
    /// Allocates a block satisfying `layout`.
    ///
    /// Zero-sized layouts succeed with [`MemBlock::dangling_for`].
    fn allocate(&self, layout: Layout) -> Result<MemBlock>;

    /// Allocates a block satisfying `layout` whose contents are zeroed.
    fn allocate_zeroed(&self, layout: Layout) -> Result<MemBlock> {
        let block = self.allocate(layout)?;
        unsafe {
            block.as_ptr().write_bytes(0, block.size);
        }
        Ok(block)
    }

    /// Grows a block without moving it.
    ///
    /// Returns the new size of the block. Requests that do not grow the block
    /// succeed with the current size. The block is left untouched on failure.
    ///
    /// # Safety
    ///
    /// `ptr` must denote a block currently allocated by this allocator and
    /// `old_layout` must fit it.
    unsafe fn expand_in_place(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_size: usize,
    ) -> Result<usize> {
        let _ = ptr;
        if new_size <= old_layout.size() {
            return Ok(old_layout.size());
        }
        UnsupportedOperationSnafu.fail()
    }

    /// Resizes a block, moving it if needed.
    ///
    /// The first `min(old_layout.size(), new_size)` bytes are preserved and
    /// the alignment of `old_layout` is kept. Shrinking requests return the
    /// block unchanged. On failure the original block is still valid.
    ///
    /// # Safety
    ///
    /// `ptr` must denote a block currently allocated by this allocator and
    /// `old_layout` must fit it. On success the old pointer must no longer be
    /// used.
    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_size: usize,
    ) -> Result<MemBlock> {
        unsafe { reallocate_by_copy(self, ptr, old_layout, new_size) }
    }

    /// Returns a block to the allocator.
    ///
    /// # Safety
    ///
    /// `ptr` must denote a block currently allocated by this allocator and
    /// `layout` must fit it.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);

    /// Tells the allocator how a range is going to be used.
    ///
    /// This is a best-effort hint; the default does nothing.
    ///
    /// # Safety
    ///
    /// `ptr..ptr + bytes` must lie within a block allocated by this allocator.
    unsafe fn advise(&self, ptr: NonNull<u8>, bytes: usize, hint: UsageHint) {
        let _ = (ptr, bytes, hint);
    }
}

/// Generic resize: in-place growth, else allocate, copy and free.
///
/// # Safety
///
/// Same contract as [`FallibleAllocator::reallocate`].
pub unsafe fn reallocate_by_copy<A>(
    alloc: &A,
    ptr: NonNull<u8>,
    old_layout: Layout,
    new_size: usize,
) -> Result<MemBlock>
where
    A: FallibleAllocator + ?Sized,
{
    if new_size <= old_layout.size() {
        return Ok(MemBlock::new(ptr, old_layout.size()));
    }
    if let Ok(size) = unsafe { alloc.expand_in_place(ptr, old_layout, new_size) } {
        return Ok(MemBlock::new(ptr, size));
    }

    let new_layout = Layout::from_size_align(new_size, old_layout.align())
        .ok()
        .context(IntegerOverflowSnafu)?;
    let block = alloc.allocate(new_layout)?;
    unsafe {
        ptr.copy_to_nonoverlapping(block.ptr, old_layout.size());
        alloc.deallocate(ptr, old_layout);
    }
    Ok(block)
}

/// Rounds `size` up to the allocator granule, reporting overflow.
pub(crate) fn round_up(size: usize, granule: usize) -> Result<usize> {
    size.checked_next_multiple_of(granule)
        .context(IntegerOverflowSnafu)
}

impl<A> FallibleAllocator for &A
where
    A: FallibleAllocator + ?Sized,
{
    fn allocate(&self, layout: Layout) -> Result<MemBlock> {
        (**self).allocate(layout)
    }

    fn allocate_zeroed(&self, layout: Layout) -> Result<MemBlock> {
        (**self).allocate_zeroed(layout)
    }

    unsafe fn expand_in_place(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_size: usize,
    ) -> Result<usize> {
        unsafe { (**self).expand_in_place(ptr, old_layout, new_size) }
    }

    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_size: usize,
    ) -> Result<MemBlock> {
        unsafe { (**self).reallocate(ptr, old_layout, new_size) }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { (**self).deallocate(ptr, layout) }
    }

    unsafe fn advise(&self, ptr: NonNull<u8>, bytes: usize, hint: UsageHint) {
        unsafe { (**self).advise(ptr, bytes, hint) }
    }
}

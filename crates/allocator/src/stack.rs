use core::{alloc::Layout, cell::Cell, marker::PhantomData, ptr::NonNull};

use reloco_diag::trace;
use reloco_error::{AllocationFailedSnafu, InPlaceGrowthFailedSnafu, Result};
use snafu::OptionExt as _;

use crate::{FallibleAllocator, MemBlock};

/// Bump allocator over a borrowed buffer.
///
/// Allocation advances a single offset and never searches. Only the most
/// recent allocation can be grown in place or given back; freeing any other
/// block is a no-op until [`reset`](Self::reset).
///
/// The allocator is not `Sync`: the bump offset is not synchronized.
pub struct StackAllocator<'buf> {
    base: NonNull<u8>,
    capacity: usize,
    offset: Cell<usize>,
    last: Cell<Option<usize>>,
    _buf: PhantomData<&'buf mut [u8]>,
}

unsafe impl Send for StackAllocator<'_> {}

impl<'buf> StackAllocator<'buf> {
    /// Creates an allocator handing out memory from `buf`.
    #[must_use]
    pub fn new(buf: &'buf mut [u8]) -> Self {
        let capacity = buf.len();
        Self {
            base: NonNull::from(buf).cast(),
            capacity,
            offset: Cell::new(0),
            last: Cell::new(None),
            _buf: PhantomData,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of bytes consumed, including alignment padding.
    #[must_use]
    pub fn used(&self) -> usize {
        self.offset.get()
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity - self.offset.get()
    }

    /// Forgets every allocation.
    ///
    /// Taking `&mut self` guarantees no handle still borrows the allocator.
    pub fn reset(&mut self) {
        self.offset.set(0);
        self.last.set(None);
    }

    fn offset_of(&self, ptr: NonNull<u8>) -> usize {
        ptr.addr().get() - self.base.addr().get()
    }

    fn is_last(&self, ptr: NonNull<u8>, size: usize) -> bool {
        let start = self.offset_of(ptr);
        self.last.get() == Some(start) && start + size == self.offset.get()
    }
}

impl FallibleAllocator for StackAllocator<'_> {
    fn allocate(&self, layout: Layout) -> Result<MemBlock> {
        if layout.size() == 0 {
            return Ok(MemBlock::dangling_for(layout));
        }

        let top = self.base.as_ptr().wrapping_add(self.offset.get());
        let padding = top.align_offset(layout.align());
        let start = self
            .offset
            .get()
            .checked_add(padding)
            .context(AllocationFailedSnafu)?;
        let end = start
            .checked_add(layout.size())
            .context(AllocationFailedSnafu)?;
        if end > self.capacity {
            trace!(
                "stack allocator exhausted: need {} bytes, {} remaining",
                end - self.offset.get(),
                self.remaining()
            );
            return AllocationFailedSnafu.fail();
        }

        self.offset.set(end);
        self.last.set(Some(start));
        let ptr = unsafe { self.base.add(start) };
        Ok(MemBlock::new(ptr, layout.size()))
    }

    unsafe fn expand_in_place(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_size: usize,
    ) -> Result<usize> {
        if new_size <= old_layout.size() {
            return Ok(old_layout.size());
        }
        if !self.is_last(ptr, old_layout.size()) {
            return InPlaceGrowthFailedSnafu.fail();
        }
        let start = self.offset_of(ptr);
        let end = start
            .checked_add(new_size)
            .context(InPlaceGrowthFailedSnafu)?;
        if end > self.capacity {
            return InPlaceGrowthFailedSnafu.fail();
        }
        self.offset.set(end);
        Ok(new_size)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() != 0 && self.is_last(ptr, layout.size()) {
            self.offset.set(self.offset_of(ptr));
            self.last.set(None);
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use reloco_error::ErrorKind;

    use super::*;

    #[repr(align(64))]
    struct Arena<const N: usize>([u8; N]);

    fn with_stack_allocator<const N: usize, F>(test_fn: F)
    where
        F: FnOnce(&StackAllocator<'_>),
    {
        let mut arena = Arena([0x11; N]);
        let allocator = StackAllocator::new(&mut arena.0);
        test_fn(&allocator);
    }

    fn layout(size: usize, align: usize) -> Layout {
        Layout::from_size_align(size, align).unwrap()
    }

    #[test]
    fn test_exhaustion() {
        with_stack_allocator::<1024, _>(|allocator| {
            let block = allocator.allocate(layout(1024, 1)).unwrap();
            assert_eq!(block.size, 1024);
            assert_eq!(allocator.remaining(), 0);
            let err = allocator.allocate(layout(1, 1)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::AllocationFailed);
        });
    }

    #[test]
    fn test_alignment_padding() {
        with_stack_allocator::<1024, _>(|allocator| {
            let a = allocator.allocate(layout(3, 1)).unwrap();
            let b = allocator.allocate(layout(8, 64)).unwrap();
            assert_eq!(b.as_ptr().addr() % 64, 0);
            assert_eq!(b.as_ptr().addr() - a.as_ptr().addr(), 64);
            assert_eq!(allocator.used(), 72);
        });
    }

    #[test]
    fn test_expand_last_block() {
        with_stack_allocator::<1024, _>(|allocator| unsafe {
            let block = allocator.allocate(layout(100, 1)).unwrap();
            let size = allocator
                .expand_in_place(block.ptr, layout(100, 1), 200)
                .unwrap();
            assert_eq!(size, 200);

            let next = allocator.allocate(layout(1, 1)).unwrap();
            assert_eq!(next.as_ptr(), block.as_ptr().add(200));
        });
    }

    #[test]
    fn test_expand_older_block_fails() {
        with_stack_allocator::<1024, _>(|allocator| unsafe {
            let first = allocator.allocate(layout(16, 1)).unwrap();
            let _second = allocator.allocate(layout(16, 1)).unwrap();
            let err = allocator
                .expand_in_place(first.ptr, layout(16, 1), 32)
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InPlaceGrowthFailed);
        });
    }

    #[test]
    fn test_expand_beyond_capacity_fails() {
        with_stack_allocator::<128, _>(|allocator| unsafe {
            let block = allocator.allocate(layout(100, 1)).unwrap();
            let err = allocator
                .expand_in_place(block.ptr, layout(100, 1), 129)
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InPlaceGrowthFailed);
            assert_eq!(allocator.used(), 100);
        });
    }

    #[test]
    fn test_lifo_deallocation_reuses_memory() {
        with_stack_allocator::<256, _>(|allocator| unsafe {
            let a = allocator.allocate(layout(32, 8)).unwrap();
            let b = allocator.allocate(layout(32, 8)).unwrap();
            allocator.deallocate(a.ptr, layout(32, 8));
            assert_eq!(allocator.used(), 64);

            allocator.deallocate(b.ptr, layout(32, 8));
            assert_eq!(allocator.used(), 32);
            let c = allocator.allocate(layout(32, 8)).unwrap();
            assert_eq!(c.ptr, b.ptr);
        });
    }

    #[test]
    fn test_reallocate_moves_when_not_last() {
        with_stack_allocator::<512, _>(|allocator| unsafe {
            let a = allocator.allocate(layout(16, 1)).unwrap();
            a.as_ptr().write_bytes(0xab, 16);
            let _b = allocator.allocate(layout(16, 1)).unwrap();

            let moved = allocator.reallocate(a.ptr, layout(16, 1), 64).unwrap();
            assert_ne!(moved.ptr, a.ptr);
            assert_eq!(moved.size, 64);
            for i in 0..16 {
                assert_eq!(moved.as_ptr().add(i).read(), 0xab);
            }

            let grown = allocator.reallocate(moved.ptr, layout(64, 1), 96).unwrap();
            assert_eq!(grown.ptr, moved.ptr);
        });
    }

    #[test]
    fn test_reset() {
        let mut arena = Arena([0; 64]);
        let mut allocator = StackAllocator::new(&mut arena.0);
        allocator.allocate(layout(64, 1)).unwrap();
        assert!(allocator.allocate(layout(1, 1)).is_err());
        allocator.reset();
        assert_eq!(allocator.remaining(), 64);
        assert!(allocator.allocate(layout(64, 1)).is_ok());
    }
}

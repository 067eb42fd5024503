use core::{alloc::Layout, ptr::NonNull};

/// A region of memory owned by an allocator.
///
/// `size` is the number of bytes the allocator believes it handed out. It may
/// exceed the requested size (for example after page rounding) and must be
/// used, or any size between the request and it, when the block is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemBlock {
    pub ptr: NonNull<u8>,
    pub size: usize,
}

impl MemBlock {
    #[must_use]
    pub const fn new(ptr: NonNull<u8>, size: usize) -> Self {
        Self { ptr, size }
    }

    /// Returns an empty block whose pointer is aligned to `align` but does
    /// not point to any allocation.
    #[must_use]
    pub fn dangling(align: usize) -> Self {
        debug_assert!(align.is_power_of_two());
        // SAFETY: alignments are never zero.
        let ptr = unsafe { NonNull::new_unchecked(core::ptr::without_provenance_mut(align)) };
        Self { ptr, size: 0 }
    }

    /// Returns the empty block matching `layout`.
    #[must_use]
    pub fn dangling_for(layout: Layout) -> Self {
        Self::dangling(layout.align())
    }

    #[must_use]
    pub const fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[must_use]
    pub const fn cast<T>(&self) -> NonNull<T> {
        self.ptr.cast()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// Expected access pattern of a memory range, passed to
/// [`advise`](crate::FallibleAllocator::advise).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UsageHint {
    #[default]
    Normal,
    Sequential,
    Random,
    /// The range will be accessed soon; prefetch it.
    WillNeed,
    /// The contents are no longer needed; the backing pages may be released.
    DontNeed,
    /// The range will rarely be accessed.
    Cold,
    /// Back the range with huge pages when possible.
    HugePages,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dangling_is_aligned_and_empty() {
        for align in [1, 8, 64, 4096] {
            let block = MemBlock::dangling(align);
            assert!(block.is_empty());
            assert_eq!(block.as_ptr().addr() % align, 0);
        }
        let layout = Layout::new::<u64>();
        assert!(MemBlock::dangling_for(layout).cast::<u64>().is_aligned());
    }
}

//! First-fit allocator over caller-provided regions.
//!
//! Free memory is kept in a singly-linked list ordered by address. Each free
//! range starts with a [`FreeNode`] header recording its size and the next
//! free range, so the list costs no memory beyond the free ranges themselves.
//!
//! ```text
//! ┌──────────────────────────────────┬───────────────────────┐
//! │ FreeNode (16 bytes)              │ rest of the free range│
//! │ ┌─────────────┬─────────────────┐│                       │
//! │ │ size: usize │ next: Option<_> ││                       │
//! │ └─────────────┴─────────────────┘│                       │
//! └──────────────────────────────────┴───────────────────────┘
//! ```
//!
//! - **Allocation** walks the list from the lowest address and carves the
//!   request out of the first range that can hold it, keeping any leading
//!   alignment gap and trailing remainder on the list.
//! - **Deallocation** reinserts the range in address order and merges it with
//!   both neighbours when they touch.
//! - **In-place growth** absorbs the free range that starts exactly where the
//!   block ends.
//!
//! Sizes and alignments are rounded up to the header size, so every range on
//! the list can hold a header.

use core::{alloc::Layout, ptr::NonNull};

use reloco_diag::{debug, trace};
use reloco_error::{AllocationFailedSnafu, InPlaceGrowthFailedSnafu, Result};
use spin::Mutex;

use crate::{FallibleAllocator, MemBlock, traits::round_up};

#[repr(align(16))]
#[derive(Debug)]
struct FreeNode {
    size: usize,
    next: Option<NonNull<Self>>,
}
const _: () = assert!(size_of::<FreeNode>() == align_of::<FreeNode>());

const GRANULE: usize = size_of::<FreeNode>();

impl FreeNode {
    /// Writes a header at `start` describing a free range of `size` bytes.
    ///
    /// # Safety
    ///
    /// `start..start + size` must be unused memory owned by the list, `start`
    /// must be aligned to [`GRANULE`] and `size` a non-zero multiple of it.
    unsafe fn write(start: NonNull<u8>, size: usize, next: Option<NonNull<Self>>) -> NonNull<Self> {
        debug_assert!(size >= GRANULE && size.is_multiple_of(GRANULE));
        let node = start.cast::<Self>();
        debug_assert!(node.is_aligned());
        unsafe { node.write(Self { size, next }) };
        node
    }

    fn start(node: NonNull<Self>) -> usize {
        node.addr().get()
    }

    unsafe fn end(node: NonNull<Self>) -> usize {
        Self::start(node) + unsafe { node.as_ref().size }
    }
}

#[derive(Debug)]
struct FreeList {
    head: Option<NonNull<FreeNode>>,
    free_bytes: usize,
}

unsafe impl Send for FreeList {}

impl FreeList {
    const fn new() -> Self {
        Self {
            head: None,
            free_bytes: 0,
        }
    }

    /// Points the link that currently leads to a node (the head or
    /// `prev.next`) at `next`.
    unsafe fn relink(&mut self, prev: Option<NonNull<FreeNode>>, next: Option<NonNull<FreeNode>>) {
        match prev {
            Some(mut prev) => unsafe { prev.as_mut().next = next },
            None => self.head = next,
        }
    }

    /// Carves `size` bytes aligned to `align` out of the first range that
    /// can hold them.
    unsafe fn allocate(&mut self, size: usize, align: usize) -> Option<NonNull<u8>> {
        let mut prev: Option<NonNull<FreeNode>> = None;
        let mut cursor = self.head;
        while let Some(mut node) = cursor {
            let (node_start, node_end, next) = unsafe {
                (FreeNode::start(node), FreeNode::end(node), node.as_ref().next)
            };
            let Some(alloc_start) = node_start.checked_next_multiple_of(align) else {
                return None;
            };
            let alloc_end = alloc_start.checked_add(size)?;
            if alloc_end > node_end {
                prev = Some(node);
                cursor = next;
                continue;
            }

            let base = node.cast::<u8>();
            let tail = if alloc_end < node_end {
                let tail_start = unsafe { base.add(alloc_end - node_start) };
                Some(unsafe { FreeNode::write(tail_start, node_end - alloc_end, next) })
            } else {
                next
            };

            if alloc_start > node_start {
                // keep the alignment gap as a shorter range
                unsafe {
                    let node = node.as_mut();
                    node.size = alloc_start - node_start;
                    node.next = tail;
                }
            } else {
                unsafe { self.relink(prev, tail) };
            }

            self.free_bytes -= size;
            return Some(unsafe { base.add(alloc_start - node_start) });
        }
        None
    }

    /// Returns `start..start + size` to the list, merging with neighbours.
    unsafe fn insert(&mut self, start: NonNull<u8>, size: usize) {
        let addr = start.addr().get();
        let mut prev: Option<NonNull<FreeNode>> = None;
        let mut cursor = self.head;
        while let Some(node) = cursor {
            if FreeNode::start(node) > addr {
                break;
            }
            prev = Some(node);
            cursor = unsafe { node.as_ref().next };
        }
        let next = cursor;
        debug_assert!(next.is_none_or(|next| addr + size <= FreeNode::start(next)));
        debug_assert!(prev.is_none_or(|prev| unsafe { FreeNode::end(prev) } <= addr));

        let mut node = match prev {
            Some(mut prev) if unsafe { FreeNode::end(prev) } == addr => {
                unsafe { prev.as_mut().size += size };
                prev
            }
            _ => {
                let node = unsafe { FreeNode::write(start, size, next) };
                unsafe { self.relink(prev, Some(node)) };
                node
            }
        };

        if let Some(next) = next
            && unsafe { FreeNode::end(node) } == FreeNode::start(next)
        {
            unsafe {
                let next = next.as_ref();
                let node = node.as_mut();
                node.size += next.size;
                node.next = next.next;
            }
        }

        self.free_bytes += size;
    }

    /// Grows the block `start..start + old_size` to `new_size` bytes by
    /// taking memory from the free range right after it.
    unsafe fn grow(&mut self, start: NonNull<u8>, old_size: usize, new_size: usize) -> bool {
        let block_end = start.addr().get() + old_size;
        let extra = new_size - old_size;

        let mut prev: Option<NonNull<FreeNode>> = None;
        let mut cursor = self.head;
        while let Some(node) = cursor {
            let node_start = FreeNode::start(node);
            if node_start > block_end {
                return false;
            }
            let (size, next) = unsafe { (node.as_ref().size, node.as_ref().next) };
            if node_start == block_end {
                if size < extra {
                    return false;
                }
                let rest = if size > extra {
                    let rest_start = unsafe { node.cast::<u8>().add(extra) };
                    Some(unsafe { FreeNode::write(rest_start, size - extra, next) })
                } else {
                    next
                };
                unsafe { self.relink(prev, rest) };
                self.free_bytes -= extra;
                return true;
            }
            prev = Some(node);
            cursor = next;
        }
        false
    }
}

/// Thread-safe first-fit allocator over memory regions handed to it with
/// [`add_region`](Self::add_region).
///
/// The returned [`MemBlock`]s record the rounded size the allocator reserved.
pub struct FreeListAllocator {
    list: Mutex<FreeList>,
}

impl Default for FreeListAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl FreeListAllocator {
    /// Creates an allocator without any memory.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            list: Mutex::new(FreeList::new()),
        }
    }

    /// Hands the region `start..start + size` to the allocator.
    ///
    /// The region is shrunk to [`GRANULE`] boundaries; regions too small to
    /// hold a single granule are ignored.
    ///
    /// # Safety
    ///
    /// The region must be valid for reads and writes, unused by anything else,
    /// and outlive every block allocated from it.
    pub unsafe fn add_region(&self, start: NonNull<u8>, size: usize) {
        let offset = start.align_offset(GRANULE);
        let size = size.saturating_sub(offset) / GRANULE * GRANULE;
        if size == 0 {
            return;
        }
        debug!("free list: adding region of {size} bytes");
        let start = unsafe { start.add(offset) };
        unsafe { self.list.lock().insert(start, size) };
    }

    /// Total number of free bytes, including fragmentation.
    #[must_use]
    pub fn free_bytes(&self) -> usize {
        self.list.lock().free_bytes
    }

    fn granule_size(size: usize) -> Result<usize> {
        round_up(size, GRANULE)
    }
}

impl FallibleAllocator for FreeListAllocator {
    fn allocate(&self, layout: Layout) -> Result<MemBlock> {
        if layout.size() == 0 {
            return Ok(MemBlock::dangling_for(layout));
        }
        let size = Self::granule_size(layout.size())?;
        let align = layout.align().max(GRANULE);
        let Some(ptr) = (unsafe { self.list.lock().allocate(size, align) }) else {
            trace!("free list: no range for {layout:?}");
            return AllocationFailedSnafu.fail();
        };
        Ok(MemBlock::new(ptr, size))
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
        let old_size = Self::granule_size(old_layout.size())?;
        let new_size = Self::granule_size(new_size)?;
        if new_size <= old_size {
            return Ok(old_size);
        }
        if unsafe { self.list.lock().grow(ptr, old_size, new_size) } {
            Ok(new_size)
        } else {
            InPlaceGrowthFailedSnafu.fail()
        }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        // sizes that rounded successfully at allocation cannot overflow here
        let size = layout.size().next_multiple_of(GRANULE);
        unsafe { self.list.lock().insert(ptr, size) };
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::vec::Vec;

    use reloco_error::ErrorKind;

    use super::*;

    struct TestAllocator {
        allocator: FreeListAllocator,
    }

    impl TestAllocator {
        fn allocate(&self, layout: Layout) -> Result<MemBlock> {
            let block = self.allocator.allocate(layout)?;
            unsafe { block.as_ptr().write_bytes(0x33, layout.size()) };
            Ok(block)
        }

        unsafe fn deallocate(&self, block: MemBlock, layout: Layout) {
            unsafe {
                for i in 0..layout.size() {
                    assert_eq!(block.as_ptr().add(i).read(), 0x33);
                }
                block.as_ptr().write_bytes(0x55, layout.size());
                self.allocator.deallocate(block.ptr, layout);
            }
        }
    }

    fn with_test_allocator<F>(size: usize, test_fn: F)
    where
        F: FnOnce(&TestAllocator),
    {
        let layout = Layout::from_size_align(size, GRANULE).unwrap();
        unsafe {
            let heap = NonNull::new(alloc::alloc::alloc(layout)).unwrap();
            heap.write_bytes(0x11, size);
            let allocator = FreeListAllocator::new();
            allocator.add_region(heap, size);
            test_fn(&TestAllocator { allocator });
            alloc::alloc::dealloc(heap.as_ptr(), layout);
        }
    }

    fn layout(size: usize, align: usize) -> Layout {
        Layout::from_size_align(size, align).unwrap()
    }

    #[test]
    fn test_basic_allocation() {
        with_test_allocator(1024, |allocator| unsafe {
            let block = allocator.allocate(layout(64, 1)).unwrap();
            assert_eq!(block.size, 64);
            assert_eq!(allocator.allocator.free_bytes(), 1024 - 64);
            allocator.deallocate(block, layout(64, 1));
            assert_eq!(allocator.allocator.free_bytes(), 1024);
        });
    }

    #[test]
    fn test_size_rounded_to_granule() {
        with_test_allocator(1024, |allocator| unsafe {
            let block = allocator.allocate(layout(5, 1)).unwrap();
            assert_eq!(block.size, GRANULE);
            allocator.deallocate(block, layout(5, 1));
        });
    }

    #[test]
    fn test_alignment() {
        with_test_allocator(4096, |allocator| unsafe {
            let small = allocator.allocate(layout(16, 1)).unwrap();
            let aligned = allocator.allocate(layout(64, 256)).unwrap();
            assert_eq!(aligned.as_ptr().addr() % 256, 0);
            allocator.deallocate(small, layout(16, 1));
            allocator.deallocate(aligned, layout(64, 256));
            assert_eq!(allocator.allocator.free_bytes(), 4096);

            let whole = allocator.allocate(layout(4096, 16)).unwrap();
            allocator.deallocate(whole, layout(4096, 16));
        });
    }

    #[test]
    fn test_fragmentation_and_coalescing() {
        with_test_allocator(1024, |allocator| unsafe {
            let l = layout(128, 16);
            let blocks: Vec<_> = (0..8).map(|_| allocator.allocate(l).unwrap()).collect();
            assert!(allocator.allocate(layout(16, 1)).is_err());

            for block in blocks.iter().step_by(2) {
                allocator.deallocate(*block, l);
            }
            assert_eq!(allocator.allocator.free_bytes(), 512);
            assert!(allocator.allocate(layout(256, 16)).is_err());

            for block in blocks.iter().skip(1).step_by(2) {
                allocator.deallocate(*block, l);
            }
            let whole = allocator.allocate(layout(1024, 16)).unwrap();
            allocator.deallocate(whole, layout(1024, 16));
        });
    }

    #[test]
    fn test_out_of_memory() {
        with_test_allocator(256, |allocator| {
            let err = allocator.allocate(layout(512, 16)).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::AllocationFailed);
        });
    }

    #[test]
    fn test_expand_in_place_absorbs_neighbour() {
        with_test_allocator(1024, |allocator| unsafe {
            let block = allocator.allocate(layout(64, 16)).unwrap();
            let size = allocator
                .allocator
                .expand_in_place(block.ptr, layout(64, 16), 200)
                .unwrap();
            assert_eq!(size, 208);
            assert_eq!(allocator.allocator.free_bytes(), 1024 - 208);

            let next = allocator.allocate(layout(16, 16)).unwrap();
            assert_eq!(next.as_ptr(), block.as_ptr().add(208));
        });
    }

    #[test]
    fn test_expand_in_place_blocked() {
        with_test_allocator(1024, |allocator| unsafe {
            let first = allocator.allocate(layout(64, 16)).unwrap();
            let _second = allocator.allocate(layout(64, 16)).unwrap();
            let err = allocator
                .allocator
                .expand_in_place(first.ptr, layout(64, 16), 128)
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InPlaceGrowthFailed);
        });
    }

    #[test]
    fn test_reallocate_moves_and_preserves() {
        with_test_allocator(1024, |allocator| unsafe {
            let first = allocator.allocate(layout(64, 16)).unwrap();
            let _second = allocator.allocate(layout(64, 16)).unwrap();
            let moved = allocator
                .allocator
                .reallocate(first.ptr, layout(64, 16), 256)
                .unwrap();
            assert_ne!(moved.ptr, first.ptr);
            for i in 0..64 {
                assert_eq!(moved.as_ptr().add(i).read(), 0x33);
            }
        });
    }

    #[test]
    fn test_multiple_regions() {
        let l = layout(256, GRANULE);
        unsafe {
            let a = NonNull::new(alloc::alloc::alloc(l)).unwrap();
            let b = NonNull::new(alloc::alloc::alloc(l)).unwrap();
            let allocator = FreeListAllocator::new();
            allocator.add_region(a, 256);
            allocator.add_region(b, 256);
            assert_eq!(allocator.free_bytes(), 512);

            let x = allocator.allocate(layout(256, 16)).unwrap();
            let y = allocator.allocate(layout(256, 16)).unwrap();
            assert_ne!(x.ptr, y.ptr);
            assert!(allocator.allocate(layout(16, 16)).is_err());

            allocator.deallocate(x.ptr, layout(256, 16));
            allocator.deallocate(y.ptr, layout(256, 16));
            alloc::alloc::dealloc(a.as_ptr(), l);
            alloc::alloc::dealloc(b.as_ptr(), l);
        }
    }
}

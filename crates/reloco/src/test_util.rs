use core::{
    alloc::Layout,
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

use reloco_allocator::{FallibleAllocator, MemBlock, SystemAllocator, UsageHint};
use reloco_error::{AllocationFailedSnafu, Result};
use snafu::ensure;

/// Heap allocator that tracks outstanding blocks and can be told to fail.
pub(crate) struct CountingAllocator {
    live_blocks: AtomicUsize,
    live_bytes: AtomicUsize,
    total: AtomicUsize,
    fail_after: usize,
    advised: AtomicUsize,
}

impl CountingAllocator {
    pub(crate) fn new() -> Self {
        Self::failing_after(usize::MAX)
    }

    /// Lets `successes` allocations through, then fails every later one.
    pub(crate) fn failing_after(successes: usize) -> Self {
        Self {
            live_blocks: AtomicUsize::new(0),
            live_bytes: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
            fail_after: successes,
            advised: AtomicUsize::new(0),
        }
    }

    pub(crate) fn live_blocks(&self) -> usize {
        self.live_blocks.load(Ordering::Relaxed)
    }

    pub(crate) fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Relaxed)
    }

    pub(crate) fn total_allocations(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    pub(crate) fn advised(&self) -> usize {
        self.advised.load(Ordering::Relaxed)
    }
}

impl FallibleAllocator for CountingAllocator {
    fn allocate(&self, layout: Layout) -> Result<MemBlock> {
        let attempt = self.total.fetch_add(1, Ordering::Relaxed);
        ensure!(attempt < self.fail_after, AllocationFailedSnafu);
        let block = SystemAllocator.allocate(layout)?;
        self.live_blocks.fetch_add(1, Ordering::Relaxed);
        self.live_bytes.fetch_add(layout.size(), Ordering::Relaxed);
        Ok(block)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.live_blocks.fetch_sub(1, Ordering::Relaxed);
        self.live_bytes.fetch_sub(layout.size(), Ordering::Relaxed);
        unsafe { SystemAllocator.deallocate(ptr, layout) };
    }

    unsafe fn advise(&self, ptr: NonNull<u8>, bytes: usize, hint: UsageHint) {
        let _ = (ptr, bytes, hint);
        self.advised.fetch_add(1, Ordering::Relaxed);
    }
}

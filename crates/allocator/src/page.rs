use core::{
    alloc::Layout,
    ptr::{self, NonNull},
    sync::atomic::{AtomicUsize, Ordering},
};

use reloco_diag::trace;
use reloco_error::{AllocationFailedSnafu, Result, UnsupportedOperationSnafu};
use snafu::{OptionExt as _, ensure};

use crate::{FallibleAllocator, MemBlock, UsageHint, traits::round_up};

/// Allocator mapping anonymous pages directly from the operating system.
///
/// Every block occupies whole pages and its [`MemBlock::size`] is the
/// page-rounded size. Alignments above the page size are not supported.
/// On Linux, blocks grow in place and move with `mremap`; [`advise`] maps
/// every [`UsageHint`] onto `madvise`.
///
/// [`advise`]: FallibleAllocator::advise
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PageAllocator;

impl PageAllocator {
    /// Returns the size of a page, as reported by `sysconf`.
    #[must_use]
    pub fn page_size() -> usize {
        static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

        let cached = PAGE_SIZE.load(Ordering::Relaxed);
        if cached != 0 {
            return cached;
        }
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        let size = usize::try_from(size).unwrap_or(4096);
        PAGE_SIZE.store(size, Ordering::Relaxed);
        size
    }

    fn mapped_size(size: usize) -> Result<usize> {
        round_up(size, Self::page_size())
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        const MADV_COLD: Option<libc::c_int> = Some(20);
        const MADV_HUGEPAGE: Option<libc::c_int> = Some(libc::MADV_HUGEPAGE);

        /// Grows a mapping without letting the kernel move it.
        unsafe fn remap_in_place(ptr: NonNull<u8>, old_size: usize, new_size: usize) -> Result<usize> {
            let res = unsafe { libc::mremap(ptr.as_ptr().cast(), old_size, new_size, 0) };
            if res == libc::MAP_FAILED {
                return reloco_error::InPlaceGrowthFailedSnafu.fail();
            }
            debug_assert_eq!(res.cast::<u8>(), ptr.as_ptr());
            Ok(new_size)
        }
    } else {
        const MADV_COLD: Option<libc::c_int> = None;
        const MADV_HUGEPAGE: Option<libc::c_int> = None;

        unsafe fn remap_in_place(_ptr: NonNull<u8>, _old_size: usize, _new_size: usize) -> Result<usize> {
            UnsupportedOperationSnafu.fail()
        }
    }
}

fn hint_flag(hint: UsageHint) -> Option<libc::c_int> {
    match hint {
        UsageHint::Normal => Some(libc::MADV_NORMAL),
        UsageHint::Sequential => Some(libc::MADV_SEQUENTIAL),
        UsageHint::Random => Some(libc::MADV_RANDOM),
        UsageHint::WillNeed => Some(libc::MADV_WILLNEED),
        UsageHint::DontNeed => Some(libc::MADV_DONTNEED),
        UsageHint::Cold => MADV_COLD,
        UsageHint::HugePages => MADV_HUGEPAGE,
    }
}

impl FallibleAllocator for PageAllocator {
    fn allocate(&self, layout: Layout) -> Result<MemBlock> {
        if layout.size() == 0 {
            return Ok(MemBlock::dangling_for(layout));
        }
        ensure!(layout.align() <= Self::page_size(), UnsupportedOperationSnafu);
        let size = Self::mapped_size(layout.size())?;

        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            trace!("mmap of {size} bytes failed");
            return AllocationFailedSnafu.fail();
        }
        let ptr = NonNull::new(ptr.cast::<u8>()).context(AllocationFailedSnafu)?;
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
        let old_size = Self::mapped_size(old_layout.size())?;
        let new_size = Self::mapped_size(new_size)?;
        if new_size <= old_size {
            return Ok(old_size);
        }
        unsafe { remap_in_place(ptr, old_size, new_size) }
    }

    #[cfg(target_os = "linux")]
    unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        old_layout: Layout,
        new_size: usize,
    ) -> Result<MemBlock> {
        if new_size <= old_layout.size() {
            return Ok(MemBlock::new(ptr, old_layout.size()));
        }
        if old_layout.size() == 0 {
            let new_layout = Layout::from_size_align(new_size, old_layout.align())
                .ok()
                .context(reloco_error::IntegerOverflowSnafu)?;
            return self.allocate(new_layout);
        }
        let old_size = Self::mapped_size(old_layout.size())?;
        let new_size = Self::mapped_size(new_size)?;
        if new_size <= old_size {
            return Ok(MemBlock::new(ptr, old_size));
        }

        let res = unsafe {
            libc::mremap(
                ptr.as_ptr().cast(),
                old_size,
                new_size,
                libc::MREMAP_MAYMOVE,
            )
        };
        if res == libc::MAP_FAILED {
            trace!("mremap from {old_size} to {new_size} bytes failed");
            return AllocationFailedSnafu.fail();
        }
        let ptr = NonNull::new(res.cast::<u8>()).context(AllocationFailedSnafu)?;
        Ok(MemBlock::new(ptr, new_size))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() == 0 {
            return;
        }
        let size = layout.size().next_multiple_of(Self::page_size());
        let res = unsafe { libc::munmap(ptr.as_ptr().cast(), size) };
        debug_assert_eq!(res, 0, "munmap failed");
    }

    unsafe fn advise(&self, ptr: NonNull<u8>, bytes: usize, hint: UsageHint) {
        let Some(flag) = hint_flag(hint) else {
            return;
        };
        // madvise needs a page-aligned start
        let page = Self::page_size();
        let start = ptr.as_ptr().addr();
        let aligned = start & !(page - 1);
        let len = bytes + (start - aligned);
        unsafe {
            libc::madvise(ptr.as_ptr().with_addr(aligned).cast(), len, flag);
        }
    }
}

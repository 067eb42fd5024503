//! Control blocks behind [`SharedPtr`](super::SharedPtr) and
//! [`WeakPtr`](super::WeakPtr).
//!
//! Every block starts with a [`Header`] holding both counts and the two
//! type-erased routines needed once the counts reach zero. Shared handles
//! collectively hold one weak reference, released after the value is
//! destroyed, so the block outlives the value as long as any weak handle
//! remains.

use core::{
    alloc::Layout,
    mem::{ManuallyDrop, MaybeUninit},
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

use reloco_allocator::FallibleAllocator;
use reloco_diag::check;
use reloco_error::Result;

const MAX_REFCOUNT: usize = isize::MAX.unsigned_abs();

#[repr(C)]
pub(super) struct Header {
    shared: AtomicUsize,
    weak: AtomicUsize,
    drop_value: unsafe fn(NonNull<Header>),
    free: unsafe fn(NonNull<Header>),
}

impl Header {
    fn new(drop_value: unsafe fn(NonNull<Self>), free: unsafe fn(NonNull<Self>)) -> Self {
        Self {
            shared: AtomicUsize::new(1),
            weak: AtomicUsize::new(1),
            drop_value,
            free,
        }
    }

    pub(super) fn shared_count(&self) -> usize {
        self.shared.load(Ordering::Acquire)
    }

    /// Number of weak handles, not counting the one held by the shared
    /// handles.
    pub(super) fn weak_count(&self) -> usize {
        let weak = self.weak.load(Ordering::Acquire);
        if self.shared_count() > 0 {
            weak.saturating_sub(1)
        } else {
            weak
        }
    }

    #[track_caller]
    pub(super) fn acquire_shared(&self) {
        let old = self.shared.fetch_add(1, Ordering::Relaxed);
        check!(old < MAX_REFCOUNT, "shared count overflow");
    }

    #[track_caller]
    pub(super) fn acquire_weak(&self) {
        let old = self.weak.fetch_add(1, Ordering::Relaxed);
        check!(old < MAX_REFCOUNT, "weak count overflow");
    }

    /// Takes a shared reference unless the value is already gone.
    pub(super) fn try_upgrade(&self) -> bool {
        let mut current = self.shared.load(Ordering::Relaxed);
        loop {
            if current == 0 {
                return false;
            }
            check!(current < MAX_REFCOUNT, "shared count overflow");
            match self.shared.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Drops one shared reference, destroying the value with the last one.
    ///
    /// # Safety
    ///
    /// `this` must be a live block and the caller must own a shared
    /// reference to it.
    pub(super) unsafe fn release_shared(this: NonNull<Self>) {
        let header = unsafe { this.as_ref() };
        if header.shared.fetch_sub(1, Ordering::AcqRel) == 1 {
            unsafe {
                (header.drop_value)(this);
                Self::release_weak(this);
            }
        }
    }

    /// Drops one weak reference, freeing the block with the last one.
    ///
    /// # Safety
    ///
    /// `this` must be a live block and the caller must own a weak reference
    /// to it.
    pub(super) unsafe fn release_weak(this: NonNull<Self>) {
        let header = unsafe { this.as_ref() };
        if header.weak.fetch_sub(1, Ordering::AcqRel) == 1 {
            unsafe { (header.free)(this) };
        }
    }
}

/// Block referring to a value allocated on its own.
#[repr(C)]
struct SeparateBlock<T, A> {
    header: Header,
    alloc: ManuallyDrop<A>,
    value: NonNull<T>,
}

impl<T, A: FallibleAllocator> SeparateBlock<T, A> {
    unsafe fn drop_value(this: NonNull<Header>) {
        let block = unsafe { this.cast::<Self>().as_ref() };
        unsafe {
            block.value.drop_in_place();
            block
                .alloc
                .deallocate(block.value.cast(), Layout::new::<T>());
        }
    }

    unsafe fn free(this: NonNull<Header>) {
        let block = this.cast::<Self>();
        let alloc = unsafe { ManuallyDrop::take(&mut (*block.as_ptr()).alloc) };
        unsafe { alloc.deallocate(block.cast(), Layout::new::<Self>()) };
    }
}

/// Block storing the value inline after the header.
#[repr(C)]
struct CombinedBlock<T, A> {
    header: Header,
    alloc: ManuallyDrop<A>,
    value: MaybeUninit<T>,
}

impl<T, A: FallibleAllocator> CombinedBlock<T, A> {
    unsafe fn drop_value(this: NonNull<Header>) {
        let block = this.cast::<Self>();
        unsafe { (*block.as_ptr()).value.assume_init_drop() };
    }

    unsafe fn free(this: NonNull<Header>) {
        let block = this.cast::<Self>();
        let alloc = unsafe { ManuallyDrop::take(&mut (*block.as_ptr()).alloc) };
        unsafe { alloc.deallocate(block.cast(), Layout::new::<Self>()) };
    }
}

/// Allocates the value and its control block separately.
///
/// Whatever was allocated is released again if any step fails.
pub(super) fn separate<T, A>(
    alloc: A,
    init: impl FnOnce(&A, &mut MaybeUninit<T>) -> Result<()>,
) -> Result<(NonNull<Header>, NonNull<T>)>
where
    A: FallibleAllocator,
{
    let value_layout = Layout::new::<T>();
    let value = alloc.allocate(value_layout)?.cast::<MaybeUninit<T>>();
    if let Err(err) = init(&alloc, unsafe { &mut *value.as_ptr() }) {
        unsafe { alloc.deallocate(value.cast(), value_layout) };
        return Err(err);
    }
    let value = value.cast::<T>();

    let block = match alloc.allocate(Layout::new::<SeparateBlock<T, A>>()) {
        Ok(block) => block.cast::<SeparateBlock<T, A>>(),
        Err(err) => {
            unsafe {
                value.drop_in_place();
                alloc.deallocate(value.cast(), value_layout);
            }
            return Err(err);
        }
    };
    unsafe {
        block.write(SeparateBlock {
            header: Header::new(
                SeparateBlock::<T, A>::drop_value,
                SeparateBlock::<T, A>::free,
            ),
            alloc: ManuallyDrop::new(alloc),
            value,
        });
    }
    Ok((block.cast(), value))
}

/// Allocates one block holding both the counts and the value.
///
/// The block is released again if initialization fails.
pub(super) fn combined<T, A>(
    alloc: A,
    init: impl FnOnce(&A, &mut MaybeUninit<T>) -> Result<()>,
) -> Result<(NonNull<Header>, NonNull<T>)>
where
    A: FallibleAllocator,
{
    let layout = Layout::new::<CombinedBlock<T, A>>();
    let block = alloc.allocate(layout)?.cast::<CombinedBlock<T, A>>();
    let slot = unsafe { &mut *(&raw mut (*block.as_ptr()).value) };
    if let Err(err) = init(&alloc, slot) {
        unsafe { alloc.deallocate(block.cast(), layout) };
        return Err(err);
    }
    unsafe {
        (&raw mut (*block.as_ptr()).header).write(Header::new(
            CombinedBlock::<T, A>::drop_value,
            CombinedBlock::<T, A>::free,
        ));
        (&raw mut (*block.as_ptr()).alloc).write(ManuallyDrop::new(alloc));
    }
    let value = unsafe { NonNull::new_unchecked(&raw mut (*block.as_ptr()).value) };
    Ok((block.cast(), value.cast()))
}

#[cfg(test)]
mod tests {
    use reloco_error::{ErrorKind, TryAgainSnafu};

    use super::*;
    use crate::test_util::CountingAllocator;

    fn write<T>(value: T) -> impl FnOnce(&&CountingAllocator, &mut MaybeUninit<T>) -> Result<()> {
        move |_, slot| {
            slot.write(value);
            Ok(())
        }
    }

    #[test]
    fn test_combined_uses_one_allocation() {
        let alloc = CountingAllocator::new();
        let (header, value) = combined(&alloc, write(5_u64)).unwrap();
        assert_eq!(alloc.live_blocks(), 1);
        assert_eq!(unsafe { *value.as_ref() }, 5);
        unsafe { Header::release_shared(header) };
        assert_eq!(alloc.live_blocks(), 0);
    }

    #[test]
    fn test_separate_uses_two_allocations() {
        let alloc = CountingAllocator::new();
        let (header, _) = separate(&alloc, write(5_u64)).unwrap();
        assert_eq!(alloc.live_blocks(), 2);
        unsafe { Header::release_shared(header) };
        assert_eq!(alloc.live_blocks(), 0);
    }

    #[test]
    fn test_separate_rolls_back_value_when_block_fails() {
        let alloc = CountingAllocator::failing_after(1);
        let err = separate(&alloc, write(5_u64)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AllocationFailed);
        assert_eq!(alloc.live_blocks(), 0);
    }

    #[test]
    fn test_failed_init_releases_block() {
        let alloc = CountingAllocator::new();
        let fail = |_: &&CountingAllocator, _: &mut MaybeUninit<u32>| TryAgainSnafu.fail();
        assert!(combined(&alloc, fail).is_err());
        assert!(separate(&alloc, fail).is_err());
        assert_eq!(alloc.live_blocks(), 0);
        assert_eq!(alloc.total_allocations(), 2);
    }

    #[test]
    fn test_weak_keeps_block_alive() {
        let alloc = CountingAllocator::new();
        let (header, _) = combined(&alloc, write(1_u8)).unwrap();
        let counts = unsafe { header.as_ref() };
        counts.acquire_weak();
        assert_eq!(counts.weak_count(), 1);
        unsafe { Header::release_shared(header) };
        assert_eq!(alloc.live_blocks(), 1);
        let counts = unsafe { header.as_ref() };
        assert_eq!(counts.shared_count(), 0);
        assert!(!counts.try_upgrade());
        unsafe { Header::release_weak(header) };
        assert_eq!(alloc.live_blocks(), 0);
    }
}

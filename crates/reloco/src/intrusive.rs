use core::{
    alloc::Layout,
    cell::UnsafeCell,
    fmt,
    marker::PhantomData,
    mem::MaybeUninit,
    ops::Deref,
    ptr::NonNull,
    sync::atomic::{AtomicUsize, Ordering},
};

use reloco_allocator::{FallibleAllocator, SystemAllocator};
use reloco_diag::check;
use reloco_error::{IntegerOverflowSnafu, NoOwnerSnafu, Result};
use snafu::OptionExt as _;

use crate::{Relocate, construct::ConstructWith};

const MAX_REFCOUNT: usize = isize::MAX.unsigned_abs();

struct Owner<A> {
    alloc: A,
    layout: Layout,
}

/// Reference count embedded in a value managed by [`IntrusivePtr`].
///
/// Besides the count it records the allocator and the layout the value was
/// allocated with, so the last handle can free it. A fresh or cloned
/// `RefCount` has no owner.
pub struct RefCount<A = SystemAllocator> {
    count: AtomicUsize,
    owner: UnsafeCell<Option<Owner<A>>>,
}

// The owner is written before the value is shared and taken after the last
// handle is gone.
unsafe impl<A: Send> Sync for RefCount<A> {}

impl<A> RefCount<A> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
            owner: UnsafeCell::new(None),
        }
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn has_owner(&self) -> bool {
        unsafe { (*self.owner.get()).is_some() }
    }

    /// Layout of the allocation holding the value, if it has an owner.
    #[must_use]
    pub fn layout(&self) -> Option<Layout> {
        unsafe { (*self.owner.get()).as_ref().map(|owner| owner.layout) }
    }

    #[track_caller]
    fn acquire(&self) {
        let old = self.count.fetch_add(1, Ordering::Relaxed);
        check!(old < MAX_REFCOUNT, "intrusive count overflow");
    }
}

impl<A> Default for RefCount<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> Clone for RefCount<A> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<A> fmt::Debug for RefCount<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefCount")
            .field("count", &self.count())
            .field("layout", &self.layout())
            .finish()
    }
}

/// Types carrying their own [`RefCount`].
///
/// # Safety
///
/// `ref_count` must always return the same counter, embedded in `self`.
pub unsafe trait Intrusive {
    type Alloc: FallibleAllocator;

    fn ref_count(&self) -> &RefCount<Self::Alloc>;
}

/// Shared handle to a `T` whose count lives inside the value itself.
///
/// # Examples
///
/// ```
/// use reloco::{Intrusive, IntrusivePtr, RefCount, SystemAllocator};
///
/// #[derive(Default)]
/// struct Packet {
///     refs: RefCount,
///     len: usize,
/// }
///
/// unsafe impl Intrusive for Packet {
///     type Alloc = SystemAllocator;
///
///     fn ref_count(&self) -> &RefCount {
///         &self.refs
///     }
/// }
///
/// let packet = Packet { len: 4, ..Packet::default() };
/// let packet = IntrusivePtr::try_new_dynamic_in(packet, SystemAllocator, 256).unwrap();
/// assert!(packet.trailing_bytes().len() >= 256 - size_of::<Packet>());
///
/// let again = unsafe { IntrusivePtr::from_ref(&*packet) }.unwrap();
/// assert_eq!(again.use_count(), 2);
/// assert_eq!(again.len, 4);
/// ```
pub struct IntrusivePtr<T: Intrusive> {
    ptr: NonNull<T>,
    _owns: PhantomData<T>,
}

unsafe impl<T: Intrusive + Send + Sync> Send for IntrusivePtr<T> {}
unsafe impl<T: Intrusive + Send + Sync> Sync for IntrusivePtr<T> {}

unsafe impl<T: Intrusive> Relocate for IntrusivePtr<T> {}

impl<T: Intrusive> IntrusivePtr<T> {
    /// Moves `value` into memory from `alloc`.
    pub fn try_new_in(value: T, alloc: T::Alloc) -> Result<Self> {
        Self::try_new_dynamic_in(value, alloc, 0)
    }

    /// Moves `value` into a block of at least `total_bytes` from `alloc`.
    ///
    /// The bytes following the value are available through
    /// [`trailing_bytes`](Self::trailing_bytes).
    pub fn try_new_dynamic_in(value: T, alloc: T::Alloc, total_bytes: usize) -> Result<Self> {
        let layout = Layout::from_size_align(size_of::<T>().max(total_bytes), align_of::<T>())
            .ok()
            .context(IntegerOverflowSnafu)?;
        let ptr = alloc.allocate(layout)?.cast::<T>();
        unsafe { ptr.write(value) };
        Ok(unsafe { Self::adopt(ptr, alloc, layout) })
    }

    /// Builds a `T` from `args` directly in memory from `alloc`.
    pub fn try_construct_in<Args>(alloc: T::Alloc, args: Args) -> Result<Self>
    where
        T: ConstructWith<T::Alloc, Args>,
    {
        let layout = Layout::new::<T>();
        let block = alloc.allocate(layout)?;
        let slot = unsafe { block.cast::<MaybeUninit<T>>().as_mut() };
        if let Err(err) = T::try_construct_at_with(&alloc, slot, args) {
            unsafe { alloc.deallocate(block.ptr, layout) };
            return Err(err);
        }
        Ok(unsafe { Self::adopt(block.cast(), alloc, layout) })
    }

    /// Records the owner of a freshly placed value and takes the first
    /// reference.
    unsafe fn adopt(ptr: NonNull<T>, alloc: T::Alloc, layout: Layout) -> Self {
        let refs = unsafe { ptr.as_ref() }.ref_count();
        unsafe { *refs.owner.get() = Some(Owner { alloc, layout }) };
        refs.count.store(1, Ordering::Release);
        Self {
            ptr,
            _owns: PhantomData,
        }
    }

    /// Takes a new reference to a value already owned by intrusive handles.
    ///
    /// Fails with `NoOwner` when the value was not placed by one of the
    /// factories of this type.
    ///
    /// # Safety
    ///
    /// If `value` has an owner it must be the value placed by that factory,
    /// not a bitwise copy of it, and at least one handle must be alive.
    pub unsafe fn from_ref(value: &T) -> Result<Self> {
        let refs = value.ref_count();
        if !refs.has_owner() {
            return NoOwnerSnafu.fail();
        }
        refs.acquire();
        Ok(Self {
            ptr: NonNull::from(value),
            _owns: PhantomData,
        })
    }

    /// Memory after the value in its allocation.
    #[must_use]
    pub fn trailing_bytes(&self) -> NonNull<[u8]> {
        let total = self.ref_count().layout().map_or(0, |layout| layout.size());
        let len = total.saturating_sub(size_of::<T>());
        let start = unsafe { self.ptr.cast::<u8>().add(size_of::<T>()) };
        NonNull::slice_from_raw_parts(start, len)
    }

    #[must_use]
    pub fn use_count(&self) -> usize {
        self.ref_count().count()
    }

    #[must_use]
    pub fn as_ptr(&self) -> NonNull<T> {
        self.ptr
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }
}

impl<T: Intrusive> Clone for IntrusivePtr<T> {
    #[track_caller]
    fn clone(&self) -> Self {
        self.ref_count().acquire();
        Self {
            ptr: self.ptr,
            _owns: PhantomData,
        }
    }
}

impl<T: Intrusive> Drop for IntrusivePtr<T> {
    fn drop(&mut self) {
        let refs = self.ref_count();
        if refs.count.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let owner = unsafe { (*refs.owner.get()).take() };
        unsafe { self.ptr.drop_in_place() };
        if let Some(Owner { alloc, layout }) = owner {
            unsafe { alloc.deallocate(self.ptr.cast(), layout) };
        }
    }
}

impl<T: Intrusive> Deref for IntrusivePtr<T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }
}

impl<T: Intrusive + fmt::Debug> fmt::Debug for IntrusivePtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

use core::{
    alloc::Layout,
    fmt,
    marker::PhantomData,
    mem::MaybeUninit,
    ops::{Index, IndexMut},
    ptr::NonNull,
    slice,
};

use reloco_allocator::{FallibleAllocator, SystemAllocator};
use reloco_diag::check;
use reloco_error::{IntegerOverflowSnafu, InvalidArgumentSnafu, OutOfBoundsSnafu, Result};
use snafu::{OptionExt as _, ensure};

use crate::construct::{self, CloneWith, ConstructWith};

/// Places single objects and arrays in memory from an allocator.
///
/// # Examples
///
/// ```
/// use reloco::{AllocHelper, ErrorKind, StackAllocator};
///
/// let mut arena = [0_u8; 64];
/// let stack = StackAllocator::new(&mut arena);
/// let helper = AllocHelper::new(&stack);
///
/// let lanes = helper.allocate_array::<u8, _>(4, 7_u8).unwrap();
/// assert_eq!(lanes.as_slice(), &[7, 7, 7, 7]);
/// assert_eq!(lanes.at(4).unwrap_err().kind(), ErrorKind::OutOfBounds);
///
/// let err = helper.allocate_array::<u8, _>(0, 7_u8).unwrap_err();
/// assert_eq!(err.kind(), ErrorKind::InvalidArgument);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct AllocHelper<A = SystemAllocator> {
    alloc: A,
}

impl<A: FallibleAllocator> AllocHelper<A> {
    #[must_use]
    pub const fn new(alloc: A) -> Self {
        Self { alloc }
    }

    #[must_use]
    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    /// Allocates and builds a `T` from `args`.
    ///
    /// The memory is released again if construction fails.
    pub fn try_allocate<T, Args>(&self, args: Args) -> Result<NonNull<T>>
    where
        T: ConstructWith<A, Args>,
    {
        let layout = Layout::new::<T>();
        let block = self.alloc.allocate(layout)?;
        let slot = unsafe { block.cast::<MaybeUninit<T>>().as_mut() };
        if let Err(err) = construct::try_construct_at(&self.alloc, slot, args) {
            unsafe { self.alloc.deallocate(block.ptr, layout) };
            return Err(err);
        }
        Ok(block.cast())
    }

    /// Allocates a deep copy of `source`.
    pub fn try_clone<T>(&self, source: &T) -> Result<NonNull<T>>
    where
        T: CloneWith<A>,
    {
        let layout = Layout::new::<T>();
        let block = self.alloc.allocate(layout)?;
        let slot = unsafe { block.cast::<MaybeUninit<T>>().as_mut() };
        if let Err(err) = construct::try_clone_at(&self.alloc, slot, source) {
            unsafe { self.alloc.deallocate(block.ptr, layout) };
            return Err(err);
        }
        Ok(block.cast())
    }

    /// Destroys a `T` and frees its memory.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`try_allocate`](Self::try_allocate) or
    /// [`try_clone`](Self::try_clone) on a helper over the same allocator,
    /// and must not be used afterwards.
    pub unsafe fn deallocate<T>(&self, ptr: NonNull<T>) {
        unsafe {
            ptr.drop_in_place();
            self.alloc.deallocate(ptr.cast(), Layout::new::<T>());
        }
    }

    /// Allocates `count` elements, each built from a clone of `args`.
    ///
    /// Fails with `InvalidArgument` for an empty array and `IntegerOverflow`
    /// when the array size overflows. If an element fails to build, the
    /// elements built so far are dropped in reverse order and the memory is
    /// released.
    pub fn allocate_array<T, Args>(&self, count: usize, args: Args) -> Result<FallibleArray<T, A>>
    where
        T: ConstructWith<A, Args>,
        Args: Clone,
        A: Clone,
    {
        ensure!(count > 0, InvalidArgumentSnafu);
        let layout = Layout::array::<T>(count)
            .ok()
            .context(IntegerOverflowSnafu)?;
        let base = self.alloc.allocate(layout)?.cast::<MaybeUninit<T>>();

        for built in 0..count {
            let slot = unsafe { &mut *base.as_ptr().add(built) };
            if let Err(err) = construct::try_construct_at(&self.alloc, slot, args.clone()) {
                unsafe {
                    drop_reverse(base.cast::<T>(), built);
                    self.alloc.deallocate(base.cast(), layout);
                }
                return Err(err);
            }
        }

        Ok(FallibleArray {
            ptr: base.cast(),
            len: count,
            alloc: self.alloc.clone(),
            _owns: PhantomData,
        })
    }
}

/// Drops `len` elements starting at `ptr`, last first.
unsafe fn drop_reverse<T>(ptr: NonNull<T>, len: usize) {
    for index in (0..len).rev() {
        unsafe { ptr.add(index).drop_in_place() };
    }
}

/// Fixed-length array built by [`AllocHelper::allocate_array`].
pub struct FallibleArray<T, A: FallibleAllocator = SystemAllocator> {
    ptr: NonNull<T>,
    len: usize,
    alloc: A,
    _owns: PhantomData<T>,
}

unsafe impl<T: Send, A: FallibleAllocator + Send> Send for FallibleArray<T, A> {}
unsafe impl<T: Sync, A: FallibleAllocator + Sync> Sync for FallibleArray<T, A> {}

impl<T, A: FallibleAllocator> FallibleArray<T, A> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    pub fn iter(&self) -> slice::Iter<'_, T> {
        self.as_slice().iter()
    }

    pub fn at(&self, index: usize) -> Result<&T> {
        self.as_slice().get(index).context(OutOfBoundsSnafu)
    }

    pub fn at_mut(&mut self, index: usize) -> Result<&mut T> {
        self.as_mut_slice().get_mut(index).context(OutOfBoundsSnafu)
    }

    /// # Safety
    ///
    /// `index` must be less than [`len`](Self::len).
    #[must_use]
    pub unsafe fn get_unchecked(&self, index: usize) -> &T {
        unsafe { self.as_slice().get_unchecked(index) }
    }

    /// Releases the elements without dropping them.
    ///
    /// The caller becomes responsible for dropping the elements and for
    /// freeing the memory with `Layout::array::<T>(len)`.
    #[must_use]
    pub fn into_raw_parts(self) -> (NonNull<[T]>, A) {
        let this = core::mem::ManuallyDrop::new(self);
        let alloc = unsafe { core::ptr::read(&this.alloc) };
        (NonNull::slice_from_raw_parts(this.ptr, this.len), alloc)
    }
}

impl<T, A: FallibleAllocator> Drop for FallibleArray<T, A> {
    fn drop(&mut self) {
        unsafe {
            drop_reverse(self.ptr, self.len);
            if let Ok(layout) = Layout::array::<T>(self.len) {
                self.alloc.deallocate(self.ptr.cast(), layout);
            }
        }
    }
}

impl<T, A: FallibleAllocator> Index<usize> for FallibleArray<T, A> {
    type Output = T;

    #[track_caller]
    fn index(&self, index: usize) -> &T {
        check!(
            index < self.len,
            "index {index} out of bounds for array of length {}",
            self.len
        );
        unsafe { self.get_unchecked(index) }
    }
}

impl<T, A: FallibleAllocator> IndexMut<usize> for FallibleArray<T, A> {
    #[track_caller]
    fn index_mut(&mut self, index: usize) -> &mut T {
        check!(
            index < self.len,
            "index {index} out of bounds for array of length {}",
            self.len
        );
        unsafe { self.as_mut_slice().get_unchecked_mut(index) }
    }
}

impl<'a, T, A: FallibleAllocator> IntoIterator for &'a FallibleArray<T, A> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: fmt::Debug, A: FallibleAllocator> fmt::Debug for FallibleArray<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

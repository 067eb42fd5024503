use core::{
    alloc::Layout,
    fmt,
    marker::PhantomData,
    mem::MaybeUninit,
    ops::{Deref, DerefMut, Index, IndexMut},
    ptr::{self, NonNull},
    slice,
};

use reloco_allocator::{FallibleAllocator, MemBlock, SystemAllocator, UsageHint};
use reloco_diag::{check, trace};
use reloco_error::{
    ContainerEmptySnafu, IntegerOverflowSnafu, OutOfBoundsSnafu, OutOfRangeSnafu, Result,
};
use snafu::{OptionExt as _, ensure};

use crate::{
    Relocate,
    construct::{self, CloneSelf, CloneWith, ConstructWith, FallibleClone, TryClone},
};

/// Buffers at least this large are handed back to the allocator with
/// [`UsageHint::DontNeed`] when cleared.
const DISCARD_THRESHOLD: usize = 64 * 1024;

const INITIAL_CAPACITY: usize = 8;

/// Growable array whose every allocating operation is fallible.
///
/// Growth picks the cheapest move the element type allows: the buffer is
/// first grown in place, then, for [`Relocate::BITWISE`] types, handed to
/// [`FallibleAllocator::reallocate`], and otherwise copied into a new buffer
/// element by element through [`Relocate::relocate`].
///
/// # Examples
///
/// ```
/// use reloco::{ErrorKind, FallibleVec};
///
/// let mut values = FallibleVec::<u32>::new();
/// for value in 0..10 {
///     values.try_push(value).unwrap();
/// }
/// assert_eq!(values.capacity(), 16);
/// assert_eq!(values.iter().sum::<u32>(), 45);
/// assert_eq!(values.at(10).unwrap_err().kind(), ErrorKind::OutOfBounds);
///
/// values.clear();
/// assert_eq!(values.try_pop().unwrap_err().kind(), ErrorKind::ContainerEmpty);
/// ```
pub struct FallibleVec<T: Relocate, A: FallibleAllocator = SystemAllocator> {
    ptr: NonNull<T>,
    cap: usize,
    len: usize,
    alloc: A,
    _owns: PhantomData<T>,
}

unsafe impl<T: Relocate + Send, A: FallibleAllocator + Send> Send for FallibleVec<T, A> {}
unsafe impl<T: Relocate + Sync, A: FallibleAllocator + Sync> Sync for FallibleVec<T, A> {}

unsafe impl<T: Relocate, A: FallibleAllocator + Relocate> Relocate for FallibleVec<T, A> {}

impl<T: Relocate> FallibleVec<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self::new_in(SystemAllocator)
    }
}

impl<T: Relocate> Default for FallibleVec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Relocate, A: FallibleAllocator> FallibleVec<T, A> {
    /// Creates an empty vector drawing memory from `alloc`. Does not
    /// allocate.
    #[must_use]
    pub const fn new_in(alloc: A) -> Self {
        Self {
            ptr: NonNull::dangling(),
            cap: if size_of::<T>() == 0 { usize::MAX } else { 0 },
            len: 0,
            alloc,
            _owns: PhantomData,
        }
    }

    pub fn try_with_capacity_in(capacity: usize, alloc: A) -> Result<Self> {
        let mut vec = Self::new_in(alloc);
        vec.try_reserve(capacity)?;
        Ok(vec)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.cap
    }

    #[must_use]
    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[must_use]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    fn buffer_layout(&self) -> Option<Layout> {
        if size_of::<T>() == 0 || self.cap == 0 {
            return None;
        }
        Layout::array::<T>(self.cap).ok()
    }

    fn adopt(&mut self, block: MemBlock) {
        self.ptr = block.cast();
        self.cap = block.size / size_of::<T>();
    }

    /// Makes room for at least `capacity` elements in total.
    ///
    /// Does nothing if the vector can already hold that many. On failure the
    /// vector is unchanged.
    pub fn try_reserve(&mut self, capacity: usize) -> Result<()> {
        if capacity <= self.cap {
            return Ok(());
        }
        let new_layout = Layout::array::<T>(capacity)
            .ok()
            .context(IntegerOverflowSnafu)?;
        let Some(old_layout) = self.buffer_layout() else {
            let block = self.alloc.allocate(new_layout)?;
            self.adopt(block);
            return Ok(());
        };
        let old = self.ptr.cast::<u8>();

        if let Ok(size) = unsafe {
            self.alloc
                .expand_in_place(old, old_layout, new_layout.size())
        } {
            trace!("grew buffer in place to {size} bytes");
            self.cap = size / size_of::<T>();
            return Ok(());
        }

        if T::BITWISE {
            let block = unsafe { self.alloc.reallocate(old, old_layout, new_layout.size())? };
            trace!("reallocated buffer to {} bytes", block.size);
            self.adopt(block);
            return Ok(());
        }

        let block = self.alloc.allocate(new_layout)?;
        let dst = block.cast::<T>();
        for index in 0..self.len {
            unsafe { T::relocate(self.ptr.as_ptr().add(index), dst.as_ptr().add(index)) };
        }
        unsafe { self.alloc.deallocate(old, old_layout) };
        trace!("relocated {} elements into {} bytes", self.len, block.size);
        self.adopt(block);
        Ok(())
    }

    /// Makes room for at least `additional` more elements.
    pub fn try_reserve_additional(&mut self, additional: usize) -> Result<()> {
        let capacity = self
            .len
            .checked_add(additional)
            .context(IntegerOverflowSnafu)?;
        self.try_reserve(capacity)
    }

    fn grow_for_one(&mut self) -> Result<()> {
        if self.len < self.cap {
            return Ok(());
        }
        let capacity = if self.cap == 0 {
            INITIAL_CAPACITY
        } else {
            self.cap.checked_mul(2).context(IntegerOverflowSnafu)?
        };
        self.try_reserve(capacity)
    }

    /// Appends `value`, growing the buffer if needed.
    ///
    /// On failure `value` is dropped and the vector is unchanged.
    pub fn try_push(&mut self, value: T) -> Result<()> {
        self.grow_for_one()?;
        unsafe { self.ptr.as_ptr().add(self.len).write(value) };
        self.len += 1;
        Ok(())
    }

    /// Appends an element built from `args` directly in the buffer.
    pub fn try_emplace<Args>(&mut self, args: Args) -> Result<&mut T>
    where
        T: ConstructWith<A, Args>,
    {
        self.grow_for_one()?;
        let slot = unsafe { &mut *self.ptr.as_ptr().add(self.len).cast::<MaybeUninit<T>>() };
        construct::try_construct_at(&self.alloc, slot, args)?;
        self.len += 1;
        Ok(unsafe { &mut *self.ptr.as_ptr().add(self.len - 1) })
    }

    /// Inserts `value` at `index`, shifting later elements up.
    ///
    /// Fails with `OutOfRange` if `index > len`.
    pub fn try_insert(&mut self, index: usize, value: T) -> Result<()> {
        ensure!(index <= self.len, OutOfRangeSnafu);
        self.grow_for_one()?;
        let base = self.ptr.as_ptr();
        unsafe {
            if T::BITWISE {
                ptr::copy(base.add(index), base.add(index + 1), self.len - index);
            } else {
                for i in (index..self.len).rev() {
                    T::relocate(base.add(i), base.add(i + 1));
                }
            }
            base.add(index).write(value);
        }
        self.len += 1;
        Ok(())
    }

    /// Removes and returns the element at `index`, shifting later elements
    /// down.
    ///
    /// Fails with `OutOfRange` if `index >= len`.
    pub fn try_remove(&mut self, index: usize) -> Result<T> {
        ensure!(index < self.len, OutOfRangeSnafu);
        let base = self.ptr.as_ptr();
        let value = unsafe { base.add(index).read() };
        unsafe {
            if T::BITWISE {
                ptr::copy(base.add(index + 1), base.add(index), self.len - index - 1);
            } else {
                for i in index + 1..self.len {
                    T::relocate(base.add(i), base.add(i - 1));
                }
            }
        }
        self.len -= 1;
        Ok(value)
    }

    pub fn pop(&mut self) -> Option<T> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        Some(unsafe { self.ptr.as_ptr().add(self.len).read() })
    }

    /// Like [`pop`](Self::pop), failing with `ContainerEmpty`.
    pub fn try_pop(&mut self) -> Result<T> {
        self.pop().context(ContainerEmptySnafu)
    }

    pub fn at(&self, index: usize) -> Result<&T> {
        self.as_slice().get(index).context(OutOfBoundsSnafu)
    }

    pub fn at_mut(&mut self, index: usize) -> Result<&mut T> {
        self.as_mut_slice().get_mut(index).context(OutOfBoundsSnafu)
    }

    /// Drops every element, keeping the buffer.
    ///
    /// Large buffers are reported to the allocator as unused.
    pub fn clear(&mut self) {
        let elements = ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len);
        self.len = 0;
        unsafe { ptr::drop_in_place(elements) };

        if let Some(layout) = self.buffer_layout()
            && layout.size() >= DISCARD_THRESHOLD
        {
            unsafe {
                self.alloc
                    .advise(self.ptr.cast(), layout.size(), UsageHint::DontNeed);
            }
        }
    }
}

impl<T: Relocate, A: FallibleAllocator> Drop for FallibleVec<T, A> {
    fn drop(&mut self) {
        unsafe { ptr::drop_in_place(self.as_mut_slice()) };
        if let Some(layout) = self.buffer_layout() {
            unsafe { self.alloc.deallocate(self.ptr.cast(), layout) };
        }
    }
}

impl<T: Relocate, A: FallibleAllocator> Deref for FallibleVec<T, A> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T: Relocate, A: FallibleAllocator> DerefMut for FallibleVec<T, A> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.as_mut_slice()
    }
}

impl<T: Relocate, A: FallibleAllocator> Index<usize> for FallibleVec<T, A> {
    type Output = T;

    #[track_caller]
    fn index(&self, index: usize) -> &T {
        check!(
            index < self.len,
            "index {index} out of bounds for vector of length {}",
            self.len
        );
        unsafe { &*self.ptr.as_ptr().add(index) }
    }
}

impl<T: Relocate, A: FallibleAllocator> IndexMut<usize> for FallibleVec<T, A> {
    #[track_caller]
    fn index_mut(&mut self, index: usize) -> &mut T {
        check!(
            index < self.len,
            "index {index} out of bounds for vector of length {}",
            self.len
        );
        unsafe { &mut *self.ptr.as_ptr().add(index) }
    }
}

impl<'a, T: Relocate, A: FallibleAllocator> IntoIterator for &'a FallibleVec<T, A> {
    type Item = &'a T;
    type IntoIter = slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T: Relocate + fmt::Debug, A: FallibleAllocator> fmt::Debug for FallibleVec<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T, A> TryClone for FallibleVec<T, A>
where
    T: Relocate + CloneWith<A>,
    A: FallibleAllocator + Clone,
{
    /// Deep-copies every element into a new buffer from the same allocator.
    fn try_clone(&self) -> Result<Self> {
        let mut copy = Self::try_with_capacity_in(self.len, self.alloc.clone())?;
        for value in self {
            let slot =
                unsafe { &mut *copy.ptr.as_ptr().add(copy.len).cast::<MaybeUninit<T>>() };
            construct::try_clone_at(&copy.alloc, slot, value)?;
            copy.len += 1;
        }
        Ok(copy)
    }
}

impl<T: Relocate, A: FallibleAllocator> FallibleClone for FallibleVec<T, A> {
    type Strategy = CloneSelf;
}

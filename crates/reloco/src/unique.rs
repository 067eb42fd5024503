use core::{
    alloc::Layout,
    fmt,
    marker::PhantomData,
    mem::{ManuallyDrop, MaybeUninit},
    ops::{Deref, DerefMut},
    ptr::{self, NonNull},
};

use reloco_allocator::{FallibleAllocator, SystemAllocator};
use reloco_error::Result;

use crate::{
    Relocate,
    construct::{self, CloneIn, CloneWith, ConstructWith, FallibleClone, TryClone, TryCloneIn},
};

/// Single owner of a `T` placed in memory from `A`.
///
/// A `UniquePtr` always holds a value; moving it transfers ownership and
/// dropping it destroys the value and returns the memory to the allocator it
/// came from.
///
/// # Examples
///
/// ```
/// use reloco::{StackAllocator, UniquePtr};
///
/// let mut arena = [0_u8; 256];
/// let stack = StackAllocator::new(&mut arena);
///
/// let mut value = UniquePtr::try_new_in(41_u8, &stack).unwrap();
/// *value += 1;
/// assert_eq!(*value, 42);
/// assert_eq!(UniquePtr::into_inner(value), 42);
/// assert_eq!(stack.used(), 0);
/// ```
pub struct UniquePtr<T, A: FallibleAllocator = SystemAllocator> {
    ptr: NonNull<T>,
    alloc: A,
    _owns: PhantomData<T>,
}

unsafe impl<T: Send, A: FallibleAllocator + Send> Send for UniquePtr<T, A> {}
unsafe impl<T: Sync, A: FallibleAllocator + Sync> Sync for UniquePtr<T, A> {}

unsafe impl<T, A: FallibleAllocator + Relocate> Relocate for UniquePtr<T, A> {}

impl<T> UniquePtr<T> {
    /// Moves `value` to the global heap.
    pub fn try_new(value: T) -> Result<Self> {
        Self::try_new_in(value, SystemAllocator)
    }

    /// Builds a `T` from `args` on the global heap.
    pub fn try_construct<Args>(args: Args) -> Result<Self>
    where
        T: ConstructWith<SystemAllocator, Args>,
    {
        Self::try_construct_in(SystemAllocator, args)
    }
}

impl<T, A: FallibleAllocator> UniquePtr<T, A> {
    /// Moves `value` into memory from `alloc`.
    pub fn try_new_in(value: T, alloc: A) -> Result<Self> {
        let block = alloc.allocate(Layout::new::<T>())?;
        let ptr = block.cast::<T>();
        unsafe { ptr.write(value) };
        Ok(Self {
            ptr,
            alloc,
            _owns: PhantomData,
        })
    }

    /// Builds a `T` from `args` directly in memory from `alloc`.
    ///
    /// The memory is released again if construction fails.
    pub fn try_construct_in<Args>(alloc: A, args: Args) -> Result<Self>
    where
        T: ConstructWith<A, Args>,
    {
        let layout = Layout::new::<T>();
        let block = alloc.allocate(layout)?;
        let slot = unsafe { block.cast::<MaybeUninit<T>>().as_mut() };
        if let Err(err) = construct::try_construct_at(&alloc, slot, args) {
            unsafe { alloc.deallocate(block.ptr, layout) };
            return Err(err);
        }
        Ok(Self {
            ptr: block.cast(),
            alloc,
            _owns: PhantomData,
        })
    }

    /// Takes ownership of a value previously released by
    /// [`into_raw_parts`](Self::into_raw_parts).
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live `T` in a block of `Layout::new::<T>()`
    /// allocated by `alloc`, and nothing else may own it.
    pub unsafe fn from_raw_parts(ptr: NonNull<T>, alloc: A) -> Self {
        Self {
            ptr,
            alloc,
            _owns: PhantomData,
        }
    }

    /// Releases the value without destroying it.
    #[must_use]
    pub fn into_raw_parts(this: Self) -> (NonNull<T>, A) {
        let this = ManuallyDrop::new(this);
        (this.ptr, unsafe { ptr::read(&this.alloc) })
    }

    /// Moves the value out and frees its memory.
    pub fn into_inner(this: Self) -> T {
        let (ptr, alloc) = Self::into_raw_parts(this);
        let value = unsafe { ptr.read() };
        unsafe { alloc.deallocate(ptr.cast(), Layout::new::<T>()) };
        value
    }

    /// Gives up ownership, leaking the value and its allocator.
    #[must_use]
    pub fn leak<'a>(this: Self) -> &'a mut T
    where
        A: 'a,
    {
        let (mut ptr, alloc) = Self::into_raw_parts(this);
        core::mem::forget(alloc);
        unsafe { ptr.as_mut() }
    }

    #[must_use]
    pub fn as_ptr(this: &Self) -> NonNull<T> {
        this.ptr
    }

    #[must_use]
    pub fn allocator(this: &Self) -> &A {
        &this.alloc
    }
}

impl<T, A: FallibleAllocator> Drop for UniquePtr<T, A> {
    fn drop(&mut self) {
        unsafe {
            self.ptr.drop_in_place();
            self.alloc.deallocate(self.ptr.cast(), Layout::new::<T>());
        }
    }
}

impl<T, A: FallibleAllocator> Deref for UniquePtr<T, A> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { self.ptr.as_ref() }
    }
}

impl<T, A: FallibleAllocator> DerefMut for UniquePtr<T, A> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { self.ptr.as_mut() }
    }
}

impl<T: fmt::Debug, A: FallibleAllocator> fmt::Debug for UniquePtr<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<T, A> TryCloneIn<A> for UniquePtr<T, A>
where
    T: CloneWith<A>,
    A: FallibleAllocator + Clone,
{
    /// Deep-copies the value into memory from `alloc`.
    fn try_clone_in(&self, alloc: &A) -> Result<Self> {
        let alloc = alloc.clone();
        let layout = Layout::new::<T>();
        let block = alloc.allocate(layout)?;
        let slot = unsafe { block.cast::<MaybeUninit<T>>().as_mut() };
        if let Err(err) = construct::try_clone_at(&alloc, slot, &**self) {
            unsafe { alloc.deallocate(block.ptr, layout) };
            return Err(err);
        }
        Ok(Self {
            ptr: block.cast(),
            alloc,
            _owns: PhantomData,
        })
    }
}

impl<T, A> TryClone for UniquePtr<T, A>
where
    T: CloneWith<A>,
    A: FallibleAllocator + Clone,
{
    fn try_clone(&self) -> Result<Self> {
        self.try_clone_in(&self.alloc)
    }
}

impl<T, A: FallibleAllocator> FallibleClone for UniquePtr<T, A> {
    type Strategy = CloneIn;
}

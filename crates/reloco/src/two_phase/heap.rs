use core::{
    alloc::Layout,
    fmt,
    marker::PhantomData,
    mem::MaybeUninit,
    ops::{Deref, DerefMut},
    ptr::NonNull,
};

use reloco_allocator::{FallibleAllocator, SystemAllocator};
use reloco_diag::check;
use reloco_error::{NotInitializedSnafu, Result};
use snafu::OptionExt as _;

use super::{FallibleInit, init_in_place};
use crate::Relocate;

/// Allocator-backed storage for a two-phase constructed `T`.
///
/// Memory is only requested by [`try_init`](Self::try_init). If the value
/// fails to initialize, its memory is returned to the allocator right away.
pub struct FallibleAllocated<T: FallibleInit, A: FallibleAllocator = SystemAllocator> {
    alloc: A,
    ptr: Option<NonNull<T>>,
    _owns: PhantomData<T>,
}

unsafe impl<T, A> Send for FallibleAllocated<T, A>
where
    T: FallibleInit + Send,
    A: FallibleAllocator + Send,
{
}

unsafe impl<T, A> Sync for FallibleAllocated<T, A>
where
    T: FallibleInit + Sync,
    A: FallibleAllocator + Sync,
{
}

impl<T: FallibleInit> Default for FallibleAllocated<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: FallibleInit> FallibleAllocated<T> {
    /// Creates an uninitialized wrapper using the global heap.
    #[must_use]
    pub const fn new() -> Self {
        Self::new_in(SystemAllocator)
    }
}

impl<T, A> FallibleAllocated<T, A>
where
    T: FallibleInit,
    A: FallibleAllocator,
{
    /// Creates an uninitialized wrapper drawing memory from `alloc`.
    #[must_use]
    pub const fn new_in(alloc: A) -> Self {
        Self {
            alloc,
            ptr: None,
            _owns: PhantomData,
        }
    }

    /// Allocates, builds and initializes the value unless it already is.
    pub fn try_init(&mut self) -> Result<()> {
        if self.ptr.is_some() {
            return Ok(());
        }
        let layout = Layout::new::<T>();
        let block = self.alloc.allocate(layout)?;
        let slot = unsafe { block.cast::<MaybeUninit<T>>().as_mut() };
        if let Err(err) = init_in_place(slot) {
            unsafe { self.alloc.deallocate(block.ptr, layout) };
            return Err(err);
        }
        self.ptr = Some(block.cast());
        Ok(())
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.ptr.is_some()
    }

    #[must_use]
    pub fn allocator(&self) -> &A {
        &self.alloc
    }

    /// Returns the value, trapping if the wrapper is uninitialized.
    #[track_caller]
    #[must_use]
    pub fn get(&self) -> &T {
        let Some(ptr) = self.ptr else {
            reloco_diag::trap!("accessing FallibleAllocated before try_init");
        };
        unsafe { ptr.as_ref() }
    }

    /// Returns the value, trapping if the wrapper is uninitialized.
    #[track_caller]
    #[must_use]
    pub fn get_mut(&mut self) -> &mut T {
        check!(
            self.ptr.is_some(),
            "accessing FallibleAllocated before try_init"
        );
        unsafe { self.get_unchecked_mut() }
    }

    pub fn try_get(&self) -> Result<&T> {
        let ptr = self.ptr.context(NotInitializedSnafu)?;
        Ok(unsafe { ptr.as_ref() })
    }

    pub fn try_get_mut(&mut self) -> Result<&mut T> {
        let mut ptr = self.ptr.context(NotInitializedSnafu)?;
        Ok(unsafe { ptr.as_mut() })
    }

    /// # Safety
    ///
    /// The wrapper must be initialized.
    #[must_use]
    pub unsafe fn get_unchecked(&self) -> &T {
        unsafe { self.ptr.unwrap_unchecked().as_ref() }
    }

    /// # Safety
    ///
    /// The wrapper must be initialized.
    #[must_use]
    pub unsafe fn get_unchecked_mut(&mut self) -> &mut T {
        unsafe { self.ptr.unwrap_unchecked().as_mut() }
    }

    /// Drops the value and returns its memory, if any.
    pub fn clear(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            unsafe {
                ptr.drop_in_place();
                self.alloc.deallocate(ptr.cast(), Layout::new::<T>());
            }
        }
    }
}

impl<T, A> Drop for FallibleAllocated<T, A>
where
    T: FallibleInit,
    A: FallibleAllocator,
{
    fn drop(&mut self) {
        self.clear();
    }
}

impl<T, A> Deref for FallibleAllocated<T, A>
where
    T: FallibleInit,
    A: FallibleAllocator,
{
    type Target = T;

    #[track_caller]
    fn deref(&self) -> &Self::Target {
        self.get()
    }
}

impl<T, A> DerefMut for FallibleAllocated<T, A>
where
    T: FallibleInit,
    A: FallibleAllocator,
{
    #[track_caller]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.get_mut()
    }
}

impl<T, A> fmt::Debug for FallibleAllocated<T, A>
where
    T: FallibleInit + fmt::Debug,
    A: FallibleAllocator,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_tuple("FallibleAllocated");
        match self.try_get() {
            Ok(value) => d.field(value),
            Err(_) => d.field(&format_args!("<uninitialized>")),
        };
        d.finish()
    }
}

unsafe impl<T, A> Relocate for FallibleAllocated<T, A>
where
    T: FallibleInit,
    A: FallibleAllocator + Relocate,
{
    const BITWISE: bool = A::BITWISE;
}

//! Reference-counted shared ownership.
//!
//! A [`SharedPtr`] and the [`WeakPtr`]s derived from it share one control
//! block holding two atomic counters. Values are placed either next to the
//! control block in one allocation ([`SharedPtr::try_new_combined_in`]) or in
//! an allocation of their own ([`SharedPtr::try_new_in`]).
//!
//! Handles may be empty. Checked dereferencing of an empty handle traps;
//! [`SharedPtr::try_get`] reports [`ErrorKind::EmptyPointer`] instead.
//!
//! A handle can present a different view of the value it keeps alive, such
//! as one of its fields or a trait object, with [`SharedPtr::map`]; the
//! view shares the control block of the original.
//!
//! [`ErrorKind::EmptyPointer`]: crate::ErrorKind::EmptyPointer
//!
//! # Examples
//!
//! ```
//! use core::any::Any;
//!
//! use reloco::SharedPtr;
//!
//! let pair = SharedPtr::try_new_combined((1_u32, String::from("one"))).unwrap();
//! let name = pair.map(|(_, name)| name.as_str());
//! drop(pair);
//! assert_eq!(&*name, "one");
//! assert_eq!(name.use_count(), 1);
//!
//! let any = SharedPtr::try_new(7_i64).unwrap().map(|v| v as &(dyn Any + Send + Sync));
//! assert_eq!(*any.downcast::<i64>(), 7);
//! assert!(any.downcast::<u8>().is_empty());
//! ```

use core::{any::Any, cmp::Ordering, fmt, marker::PhantomData, ops::Deref, ptr::NonNull};

use reloco_allocator::{FallibleAllocator, SystemAllocator};
use reloco_error::{EmptyPointerSnafu, Result};
use snafu::OptionExt as _;

pub use self::{
    this::{SharedFromThis, WeakThis},
    weak::WeakPtr,
};
use self::block::Header;
use crate::{Relocate, construct::ConstructWith};

mod block;
mod this;
mod weak;

/// Control block and view pointer of a non-empty handle.
struct Handle<T: ?Sized> {
    block: NonNull<Header>,
    ptr: NonNull<T>,
}

impl<T: ?Sized> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for Handle<T> {}

impl<T: ?Sized> Handle<T> {
    fn header(&self) -> &Header {
        unsafe { self.block.as_ref() }
    }
}

/// Owns a share of a reference-counted `T` allocated from `A`.
pub struct SharedPtr<T: ?Sized, A = SystemAllocator> {
    handle: Option<Handle<T>>,
    _owns: PhantomData<T>,
    _alloc: PhantomData<A>,
}

unsafe impl<T, A> Send for SharedPtr<T, A>
where
    T: ?Sized + Send + Sync,
    A: Send + Sync,
{
}

unsafe impl<T, A> Sync for SharedPtr<T, A>
where
    T: ?Sized + Send + Sync,
    A: Send + Sync,
{
}

unsafe impl<T: ?Sized, A> Relocate for SharedPtr<T, A> {}

impl<T> SharedPtr<T> {
    /// Moves `value` to the global heap, apart from its control block.
    pub fn try_new(value: T) -> Result<Self> {
        Self::try_new_in(value, SystemAllocator)
    }

    /// Moves `value` to the global heap, next to its control block.
    pub fn try_new_combined(value: T) -> Result<Self> {
        Self::try_new_combined_in(value, SystemAllocator)
    }

    /// Builds a `T` from `args` on the global heap, apart from its control
    /// block.
    pub fn try_construct<Args>(args: Args) -> Result<Self>
    where
        T: ConstructWith<SystemAllocator, Args>,
    {
        Self::try_construct_in(SystemAllocator, args)
    }

    /// Builds a `T` from `args` on the global heap, next to its control
    /// block.
    pub fn try_construct_combined<Args>(args: Args) -> Result<Self>
    where
        T: ConstructWith<SystemAllocator, Args>,
    {
        Self::try_construct_combined_in(SystemAllocator, args)
    }
}

impl<T, A: FallibleAllocator> SharedPtr<T, A> {
    /// Moves `value` into memory from `alloc`, apart from its control block.
    pub fn try_new_in(value: T, alloc: A) -> Result<Self> {
        let parts = block::separate(alloc, |_, slot| {
            slot.write(value);
            Ok(())
        })?;
        Ok(Self::from_parts(parts))
    }

    /// Moves `value` into memory from `alloc`, next to its control block.
    pub fn try_new_combined_in(value: T, alloc: A) -> Result<Self> {
        let parts = block::combined(alloc, |_, slot| {
            slot.write(value);
            Ok(())
        })?;
        Ok(Self::from_parts(parts))
    }

    /// Builds a `T` from `args` in memory from `alloc`, apart from its
    /// control block.
    ///
    /// Suits types built by factories: the factory's result is moved into
    /// the value allocation, and the control block is allocated last.
    pub fn try_construct_in<Args>(alloc: A, args: Args) -> Result<Self>
    where
        T: ConstructWith<A, Args>,
    {
        let parts = block::separate(alloc, |alloc, slot| {
            T::try_construct_at_with(alloc, slot, args).map(|_| ())
        })?;
        Ok(Self::from_parts(parts))
    }

    /// Builds a `T` from `args` directly inside a combined block from
    /// `alloc`.
    pub fn try_construct_combined_in<Args>(alloc: A, args: Args) -> Result<Self>
    where
        T: ConstructWith<A, Args>,
    {
        let parts = block::combined(alloc, |alloc, slot| {
            T::try_construct_at_with(alloc, slot, args).map(|_| ())
        })?;
        Ok(Self::from_parts(parts))
    }

    fn from_parts((block, ptr): (NonNull<Header>, NonNull<T>)) -> Self {
        Self {
            handle: Some(Handle { block, ptr }),
            _owns: PhantomData,
            _alloc: PhantomData,
        }
    }
}

impl<T: ?Sized, A> SharedPtr<T, A> {
    /// Returns an empty handle.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            handle: None,
            _owns: PhantomData,
            _alloc: PhantomData,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handle.is_none()
    }

    #[must_use]
    pub fn get(&self) -> Option<&T> {
        self.handle.map(|handle| unsafe { handle.ptr.as_ref() })
    }

    pub fn try_get(&self) -> Result<&T> {
        self.get().context(EmptyPointerSnafu)
    }

    #[must_use]
    pub fn as_ptr(&self) -> Option<NonNull<T>> {
        self.handle.map(|handle| handle.ptr)
    }

    /// Number of shared handles to the value, or 0 for an empty handle.
    #[must_use]
    pub fn use_count(&self) -> usize {
        self.handle
            .map_or(0, |handle| handle.header().shared_count())
    }

    /// Number of weak handles to the value, or 0 for an empty handle.
    #[must_use]
    pub fn weak_count(&self) -> usize {
        self.handle.map_or(0, |handle| handle.header().weak_count())
    }

    /// Gives up this share, leaving the handle empty.
    pub fn reset(&mut self) {
        if let Some(handle) = self.handle.take() {
            unsafe { Header::release_shared(handle.block) };
        }
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakPtr<T, A> {
        match self.handle {
            Some(handle) => {
                handle.header().acquire_weak();
                WeakPtr::from_handle(handle)
            }
            None => WeakPtr::empty(),
        }
    }

    /// Whether both handles view the same address.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self.handle, other.handle) {
            (Some(a), Some(b)) => core::ptr::addr_eq(a.ptr.as_ptr(), b.ptr.as_ptr()),
            (None, None) => true,
            _ => false,
        }
    }

    /// Orders handles by the control block they share, ignoring views.
    ///
    /// Empty handles come first.
    #[must_use]
    pub fn owner_before<U: ?Sized>(&self, other: &SharedPtr<U, A>) -> bool {
        self.owner_addr() < other.owner_addr()
    }

    /// Compares the control blocks of a shared and a weak handle.
    #[must_use]
    pub fn owner_cmp<U: ?Sized>(&self, other: &WeakPtr<U, A>) -> Ordering {
        self.owner_addr().cmp(&other.owner_addr())
    }

    fn owner_addr(&self) -> usize {
        self.handle.map_or(0, |handle| handle.block.addr().get())
    }

    /// Returns a handle viewing part of the value, keeping the whole value
    /// alive.
    ///
    /// An empty handle maps to an empty handle.
    #[must_use]
    pub fn map<U: ?Sized>(&self, f: impl FnOnce(&T) -> &U) -> SharedPtr<U, A> {
        self.filter_map(|value| Some(f(value)))
    }

    /// Like [`map`](Self::map), but produces an empty handle when `f`
    /// returns `None`.
    #[must_use]
    pub fn filter_map<U: ?Sized>(&self, f: impl FnOnce(&T) -> Option<&U>) -> SharedPtr<U, A> {
        let Some(handle) = self.handle else {
            return SharedPtr::empty();
        };
        let Some(view) = f(unsafe { handle.ptr.as_ref() }) else {
            return SharedPtr::empty();
        };
        handle.header().acquire_shared();
        SharedPtr {
            handle: Some(Handle {
                block: handle.block,
                ptr: NonNull::from(view),
            }),
            _owns: PhantomData,
            _alloc: PhantomData,
        }
    }

    fn from_handle(handle: Handle<T>) -> Self {
        Self {
            handle: Some(handle),
            _owns: PhantomData,
            _alloc: PhantomData,
        }
    }
}

macro_rules! impl_downcast {
    ($($any:ty),* $(,)?) => {
        $(
            impl<A> SharedPtr<$any, A> {
                /// Returns a handle to the concrete value if it is a `U`, or an
                /// empty handle otherwise.
                #[must_use]
                pub fn downcast<U: Any>(&self) -> SharedPtr<U, A> {
                    self.filter_map(|value| value.downcast_ref::<U>())
                }
            }
        )*
    };
}

impl_downcast!(dyn Any, dyn Any + Send, dyn Any + Send + Sync);

impl<T: ?Sized, A> Default for SharedPtr<T, A> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: ?Sized, A> Clone for SharedPtr<T, A> {
    #[track_caller]
    fn clone(&self) -> Self {
        if let Some(handle) = self.handle {
            handle.header().acquire_shared();
        }
        Self {
            handle: self.handle,
            _owns: PhantomData,
            _alloc: PhantomData,
        }
    }
}

impl<T: ?Sized, A> Drop for SharedPtr<T, A> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: ?Sized, A> Deref for SharedPtr<T, A> {
    type Target = T;

    #[track_caller]
    fn deref(&self) -> &T {
        let Some(handle) = self.handle else {
            reloco_diag::trap!("dereferencing an empty SharedPtr");
        };
        unsafe { handle.ptr.as_ref() }
    }
}

impl<T: ?Sized + fmt::Debug, A> fmt::Debug for SharedPtr<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => fmt::Debug::fmt(value, f),
            None => f.write_str("SharedPtr(empty)"),
        }
    }
}

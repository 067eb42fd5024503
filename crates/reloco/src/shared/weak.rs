use core::{cmp::Ordering, fmt, marker::PhantomData};

use reloco_error::{EmptyPointerSnafu, PointerExpiredSnafu, Result};
use snafu::{OptionExt as _, ensure};

use super::{Handle, SharedPtr, block::Header};
use crate::Relocate;

/// Non-owning reference to a value managed by [`SharedPtr`].
///
/// A weak handle keeps the control block alive but not the value. Use
/// [`lock`](Self::lock) to obtain a shared handle while the value exists.
pub struct WeakPtr<T: ?Sized, A = reloco_allocator::SystemAllocator> {
    handle: Option<Handle<T>>,
    _alloc: PhantomData<A>,
}

unsafe impl<T, A> Send for WeakPtr<T, A>
where
    T: ?Sized + Send + Sync,
    A: Send + Sync,
{
}

unsafe impl<T, A> Sync for WeakPtr<T, A>
where
    T: ?Sized + Send + Sync,
    A: Send + Sync,
{
}

unsafe impl<T: ?Sized, A> Relocate for WeakPtr<T, A> {}

impl<T: ?Sized, A> WeakPtr<T, A> {
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            handle: None,
            _alloc: PhantomData,
        }
    }

    /// Wraps a handle whose weak reference the caller already took.
    pub(super) fn from_handle(handle: Handle<T>) -> Self {
        Self {
            handle: Some(handle),
            _alloc: PhantomData,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handle.is_none()
    }

    /// Returns a shared handle to the value.
    ///
    /// Fails with `EmptyPointer` for an empty handle and `PointerExpired`
    /// once the last shared handle is gone.
    pub fn lock(&self) -> Result<SharedPtr<T, A>> {
        let handle = self.handle.context(EmptyPointerSnafu)?;
        ensure!(handle.header().try_upgrade(), PointerExpiredSnafu);
        Ok(SharedPtr::from_handle(handle))
    }

    /// Whether the value has been destroyed. Empty handles are expired.
    #[must_use]
    pub fn expired(&self) -> bool {
        self.use_count() == 0
    }

    #[must_use]
    pub fn use_count(&self) -> usize {
        self.handle
            .map_or(0, |handle| handle.header().shared_count())
    }

    #[must_use]
    pub fn weak_count(&self) -> usize {
        self.handle.map_or(0, |handle| handle.header().weak_count())
    }

    pub fn reset(&mut self) {
        if let Some(handle) = self.handle.take() {
            unsafe { Header::release_weak(handle.block) };
        }
    }

    /// Compares the control blocks of two weak handles.
    #[must_use]
    pub fn owner_cmp<U: ?Sized>(&self, other: &WeakPtr<U, A>) -> Ordering {
        self.owner_addr().cmp(&other.owner_addr())
    }

    pub(super) fn owner_addr(&self) -> usize {
        self.handle.map_or(0, |handle| handle.block.addr().get())
    }
}

impl<T: ?Sized, A> Default for WeakPtr<T, A> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: ?Sized, A> Clone for WeakPtr<T, A> {
    #[track_caller]
    fn clone(&self) -> Self {
        if let Some(handle) = self.handle {
            handle.header().acquire_weak();
        }
        Self {
            handle: self.handle,
            _alloc: PhantomData,
        }
    }
}

impl<T: ?Sized, A> Drop for WeakPtr<T, A> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: ?Sized, A> fmt::Debug for WeakPtr<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakPtr")
            .field("use_count", &self.use_count())
            .finish_non_exhaustive()
    }
}

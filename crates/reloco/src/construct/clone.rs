use core::mem::MaybeUninit;

use reloco_error::Result;

use super::{TryAllocate, TryCreate};

/// Deep copy drawing nested resources from the caller's allocator.
pub trait TryCloneIn<A: ?Sized>: Sized {
    fn try_clone_in(&self, alloc: &A) -> Result<Self>;
}

/// Self-contained deep copy.
pub trait TryClone: Sized {
    fn try_clone(&self) -> Result<Self>;
}

/// Deep copy written straight into uninitialized storage.
///
/// # Safety
///
/// An `Ok` return must be the reference obtained by initializing `slot`.
/// Callers treat `slot` as initialized on `Ok` and uninitialized on `Err`.
///
/// Implementing the trait without `unsafe` is rejected:
///
/// ```compile_fail,E0200
/// use core::mem::MaybeUninit;
///
/// use reloco::{Result, construct::TryCloneAt};
///
/// struct Name(String);
///
/// impl<A: ?Sized> TryCloneAt<A> for Name {
///     fn try_clone_at<'a>(&self, _: &A, _: &'a mut MaybeUninit<Self>) -> Result<&'a mut Self> {
///         Ok(Box::leak(Box::new(Name(self.0.clone()))))
///     }
/// }
/// ```
pub unsafe trait TryCloneAt<A: ?Sized>: Sized {
    /// Clones `self` into `slot`, leaving it uninitialized on failure.
    fn try_clone_at<'a>(&self, alloc: &A, slot: &'a mut MaybeUninit<Self>)
    -> Result<&'a mut Self>;
}

/// Selects how `Self` is cloned.
pub trait FallibleClone: Sized {
    /// One of [`CloneIn`], [`CloneSelf`], [`CloneAt`], [`AllocateFrom`],
    /// [`CreateFrom`] or [`CopyClone`].
    type Strategy;
}

/// Strategy: [`TryCloneIn`].
#[derive(Debug, Clone, Copy)]
pub enum CloneIn {}

/// Strategy: [`TryClone`].
#[derive(Debug, Clone, Copy)]
pub enum CloneSelf {}

/// Strategy: [`TryCloneAt`].
#[derive(Debug, Clone, Copy)]
pub enum CloneAt {}

/// Strategy: [`TryAllocate`] taking the source by reference.
#[derive(Debug, Clone, Copy)]
pub enum AllocateFrom {}

/// Strategy: [`TryCreate`] taking the source by reference.
#[derive(Debug, Clone, Copy)]
pub enum CreateFrom {}

/// Strategy: [`Clone`], for types whose copy cannot fail.
#[derive(Debug, Clone, Copy)]
pub enum CopyClone {}

/// Implementation of a clone strategy for `T`.
///
/// # Safety
///
/// An `Ok` from [`clone_at`](Self::clone_at) must be the reference obtained
/// by initializing `slot`.
pub unsafe trait CloneStrategy<T, A: ?Sized> {
    fn clone_value(alloc: &A, source: &T) -> Result<T>;

    fn clone_at<'a>(alloc: &A, slot: &'a mut MaybeUninit<T>, source: &T) -> Result<&'a mut T> {
        let value = Self::clone_value(alloc, source)?;
        Ok(slot.write(value))
    }
}

unsafe impl<T, A> CloneStrategy<T, A> for CloneIn
where
    T: TryCloneIn<A>,
    A: ?Sized,
{
    fn clone_value(alloc: &A, source: &T) -> Result<T> {
        source.try_clone_in(alloc)
    }
}

unsafe impl<T, A> CloneStrategy<T, A> for CloneSelf
where
    T: TryClone,
    A: ?Sized,
{
    fn clone_value(_alloc: &A, source: &T) -> Result<T> {
        source.try_clone()
    }
}

unsafe impl<T, A> CloneStrategy<T, A> for CloneAt
where
    T: TryCloneAt<A>,
    A: ?Sized,
{
    fn clone_value(alloc: &A, source: &T) -> Result<T> {
        let mut slot = MaybeUninit::uninit();
        source.try_clone_at(alloc, &mut slot)?;
        Ok(unsafe { slot.assume_init() })
    }

    fn clone_at<'a>(alloc: &A, slot: &'a mut MaybeUninit<T>, source: &T) -> Result<&'a mut T> {
        source.try_clone_at(alloc, slot)
    }
}

unsafe impl<T, A> CloneStrategy<T, A> for AllocateFrom
where
    T: for<'s> TryAllocate<A, &'s T>,
    A: ?Sized,
{
    fn clone_value(alloc: &A, source: &T) -> Result<T> {
        T::try_allocate(alloc, source)
    }
}

unsafe impl<T, A> CloneStrategy<T, A> for CreateFrom
where
    T: for<'s> TryCreate<&'s T>,
    A: ?Sized,
{
    fn clone_value(_alloc: &A, source: &T) -> Result<T> {
        T::try_create(source)
    }
}

unsafe impl<T, A> CloneStrategy<T, A> for CopyClone
where
    T: Clone,
    A: ?Sized,
{
    fn clone_value(_alloc: &A, source: &T) -> Result<T> {
        Ok(source.clone())
    }
}

/// Types clonable with allocator `A` through their declared strategy.
///
/// Implemented automatically; use it as a bound.
///
/// # Safety
///
/// An `Ok` from [`try_clone_at_with`](Self::try_clone_at_with) must be the
/// reference obtained by initializing `slot`.
pub unsafe trait CloneWith<A: ?Sized>: Sized {
    fn try_clone_with(&self, alloc: &A) -> Result<Self>;

    fn try_clone_at_with<'a>(
        &self,
        alloc: &A,
        slot: &'a mut MaybeUninit<Self>,
    ) -> Result<&'a mut Self>;
}

unsafe impl<T, A> CloneWith<A> for T
where
    T: FallibleClone,
    T::Strategy: CloneStrategy<T, A>,
    A: ?Sized,
{
    fn try_clone_with(&self, alloc: &A) -> Result<Self> {
        T::Strategy::clone_value(alloc, self)
    }

    fn try_clone_at_with<'a>(
        &self,
        alloc: &A,
        slot: &'a mut MaybeUninit<Self>,
    ) -> Result<&'a mut Self> {
        T::Strategy::clone_at(alloc, slot, self)
    }
}

/// Returns a deep copy of `source`.
pub fn try_clone<T, A>(alloc: &A, source: &T) -> Result<T>
where
    T: CloneWith<A>,
    A: ?Sized,
{
    source.try_clone_with(alloc)
}

/// Writes a deep copy of `source` into `slot`.
///
/// On failure `slot` is left uninitialized.
pub fn try_clone_at<'a, T, A>(
    alloc: &A,
    slot: &'a mut MaybeUninit<T>,
    source: &T,
) -> Result<&'a mut T>
where
    T: CloneWith<A>,
    A: ?Sized,
{
    source.try_clone_at_with(alloc, slot)
}

#[cfg(test)]
mod tests {
    use core::{
        alloc::Layout,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use reloco_allocator::{FallibleAllocator, SystemAllocator};
    use reloco_error::{ErrorKind, TryAgainSnafu};

    use super::*;
    use crate::test_util::CountingAllocator;

    struct Buffer {
        len: usize,
    }

    impl<A: FallibleAllocator + ?Sized> TryCloneIn<A> for Buffer {
        fn try_clone_in(&self, alloc: &A) -> Result<Self> {
            let layout = Layout::array::<u8>(self.len.max(1)).unwrap();
            let block = alloc.allocate(layout)?;
            unsafe { alloc.deallocate(block.ptr, layout) };
            Ok(Self { len: self.len })
        }
    }

    impl FallibleClone for Buffer {
        type Strategy = CloneIn;
    }

    struct Flaky {
        attempts: AtomicUsize,
    }

    impl TryClone for Flaky {
        fn try_clone(&self) -> Result<Self> {
            if self.attempts.fetch_add(1, Ordering::Relaxed) == 0 {
                return TryAgainSnafu.fail();
            }
            Ok(Self {
                attempts: AtomicUsize::new(0),
            })
        }
    }

    impl FallibleClone for Flaky {
        type Strategy = CloneSelf;
    }

    struct Placed {
        id: u32,
    }

    static PLACED_DIRECT: AtomicUsize = AtomicUsize::new(0);

    unsafe impl<A: ?Sized> TryCloneAt<A> for Placed {
        fn try_clone_at<'a>(
            &self,
            _alloc: &A,
            slot: &'a mut MaybeUninit<Self>,
        ) -> Result<&'a mut Self> {
            PLACED_DIRECT.fetch_add(1, Ordering::Relaxed);
            Ok(slot.write(Self { id: self.id + 1 }))
        }
    }

    impl FallibleClone for Placed {
        type Strategy = CloneAt;
    }

    struct Mirror {
        id: u32,
    }

    impl<A: ?Sized> TryAllocate<A, &Mirror> for Mirror {
        fn try_allocate(_alloc: &A, source: &Mirror) -> Result<Self> {
            Ok(Self { id: source.id * 2 })
        }
    }

    impl FallibleClone for Mirror {
        type Strategy = AllocateFrom;
    }

    struct Echo {
        id: u32,
    }

    impl TryCreate<&Echo> for Echo {
        fn try_create(source: &Echo) -> Result<Self> {
            Ok(Self { id: source.id + 100 })
        }
    }

    impl FallibleClone for Echo {
        type Strategy = CreateFrom;
    }

    #[test]
    fn test_clone_in_uses_callers_allocator() {
        let alloc = CountingAllocator::new();
        let copy = try_clone(&alloc, &Buffer { len: 32 }).unwrap();
        assert_eq!(copy.len, 32);
        assert_eq!(alloc.total_allocations(), 1);

        let failing = CountingAllocator::failing_after(0);
        let err = try_clone(&failing, &Buffer { len: 32 }).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::AllocationFailed);
    }

    #[test]
    fn test_clone_self_propagates_failure() {
        let source = Flaky {
            attempts: AtomicUsize::new(0),
        };
        let mut slot = MaybeUninit::uninit();
        let err = try_clone_at(&SystemAllocator, &mut slot, &source)
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::TryAgain);
        assert!(try_clone_at(&SystemAllocator, &mut slot, &source).is_ok());
    }

    #[test]
    fn test_clone_at_writes_directly() {
        let before = PLACED_DIRECT.load(Ordering::Relaxed);
        let mut slot = MaybeUninit::uninit();
        let placed = try_clone_at(&SystemAllocator, &mut slot, &Placed { id: 1 }).unwrap();
        assert_eq!(placed.id, 2);

        let value = try_clone(&SystemAllocator, &Placed { id: 5 }).unwrap();
        assert_eq!(value.id, 6);
        assert_eq!(PLACED_DIRECT.load(Ordering::Relaxed), before + 2);
    }

    #[test]
    fn test_factory_clones() {
        let mirror = try_clone(&SystemAllocator, &Mirror { id: 4 }).unwrap();
        assert_eq!(mirror.id, 8);
        let echo = try_clone(&SystemAllocator, &Echo { id: 4 }).unwrap();
        assert_eq!(echo.id, 104);
    }

    #[test]
    fn test_copy_clone_for_primitives() {
        assert_eq!(try_clone(&SystemAllocator, &7_u32).unwrap(), 7);
        let mut slot = MaybeUninit::uninit();
        assert!(*try_clone_at(&SystemAllocator, &mut slot, &true).unwrap());
    }
}

use core::{
    fmt,
    mem::MaybeUninit,
    ops::{Deref, DerefMut},
};

use reloco_diag::check;
use reloco_error::{NotInitializedSnafu, Result};
use snafu::ensure;

use super::{FallibleInit, init_in_place};
use crate::Relocate;

/// Inline storage for a two-phase constructed `T`.
///
/// The value lives inside the wrapper; dropping an initialized wrapper drops
/// the value.
pub struct FallibleConstructed<T: FallibleInit> {
    storage: MaybeUninit<T>,
    initialized: bool,
}

impl<T: FallibleInit> Default for FallibleConstructed<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: FallibleInit> FallibleConstructed<T> {
    /// Creates an uninitialized wrapper.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            storage: MaybeUninit::uninit(),
            initialized: false,
        }
    }

    /// Builds and initializes the value unless it already is.
    ///
    /// On failure the partially built value is dropped and the wrapper stays
    /// uninitialized, so the call may be retried.
    pub fn try_init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        init_in_place(&mut self.storage)?;
        self.initialized = true;
        Ok(())
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Returns the value, trapping if the wrapper is uninitialized.
    #[track_caller]
    #[must_use]
    pub fn get(&self) -> &T {
        check!(
            self.initialized,
            "accessing FallibleConstructed before try_init"
        );
        unsafe { self.storage.assume_init_ref() }
    }

    /// Returns the value, trapping if the wrapper is uninitialized.
    #[track_caller]
    #[must_use]
    pub fn get_mut(&mut self) -> &mut T {
        check!(
            self.initialized,
            "accessing FallibleConstructed before try_init"
        );
        unsafe { self.storage.assume_init_mut() }
    }

    pub fn try_get(&self) -> Result<&T> {
        ensure!(self.initialized, NotInitializedSnafu);
        Ok(unsafe { self.storage.assume_init_ref() })
    }

    pub fn try_get_mut(&mut self) -> Result<&mut T> {
        ensure!(self.initialized, NotInitializedSnafu);
        Ok(unsafe { self.storage.assume_init_mut() })
    }

    /// Returns the value without checking initialization.
    ///
    /// # Safety
    ///
    /// The wrapper must be initialized.
    #[must_use]
    pub unsafe fn get_unchecked(&self) -> &T {
        debug_assert!(self.initialized);
        unsafe { self.storage.assume_init_ref() }
    }

    /// Returns the value without checking initialization.
    ///
    /// # Safety
    ///
    /// The wrapper must be initialized.
    #[must_use]
    pub unsafe fn get_unchecked_mut(&mut self) -> &mut T {
        debug_assert!(self.initialized);
        unsafe { self.storage.assume_init_mut() }
    }

    /// Moves the value out, leaving the wrapper uninitialized.
    pub fn take(&mut self) -> Option<T> {
        if !self.initialized {
            return None;
        }
        self.initialized = false;
        Some(unsafe { self.storage.assume_init_read() })
    }

    /// Moves the value out of `source` into `self`, dropping any value
    /// `self` held. An uninitialized `source` leaves `self` uninitialized.
    pub fn take_from(&mut self, source: &mut Self) {
        self.clear();
        if let Some(value) = source.take() {
            self.storage.write(value);
            self.initialized = true;
        }
    }

    /// Drops the value, if any.
    pub fn clear(&mut self) {
        if self.initialized {
            self.initialized = false;
            unsafe { self.storage.assume_init_drop() };
        }
    }
}

impl<T: FallibleInit> Drop for FallibleConstructed<T> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<T: FallibleInit> Deref for FallibleConstructed<T> {
    type Target = T;

    #[track_caller]
    fn deref(&self) -> &Self::Target {
        self.get()
    }
}

impl<T: FallibleInit> DerefMut for FallibleConstructed<T> {
    #[track_caller]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.get_mut()
    }
}

impl<T: FallibleInit + fmt::Debug> fmt::Debug for FallibleConstructed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_tuple("FallibleConstructed");
        match self.try_get() {
            Ok(value) => d.field(value),
            Err(_) => d.field(&format_args!("<uninitialized>")),
        };
        d.finish()
    }
}

unsafe impl<T: FallibleInit + Relocate> Relocate for FallibleConstructed<T> {
    const BITWISE: bool = T::BITWISE;

    unsafe fn relocate(src: *mut Self, dst: *mut Self) {
        unsafe {
            let initialized = (*src).initialized;
            dst.write(Self::new());
            if initialized {
                T::relocate((*src).storage.as_mut_ptr(), (*dst).storage.as_mut_ptr());
                (*dst).initialized = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicUsize, Ordering};
    use std::panic;

    use reloco_error::{AllocationFailedSnafu, ErrorKind};

    use super::*;
    use crate::two_phase::ConstructionToken;

    macro_rules! counted_type {
        ($name:ident, fail = $fail:expr) => {
            #[derive(Debug)]
            struct $name {
                value: u32,
            }

            impl $name {
                fn constructions() -> &'static AtomicUsize {
                    static CONSTRUCTIONS: AtomicUsize = AtomicUsize::new(0);
                    &CONSTRUCTIONS
                }

                fn drops() -> &'static AtomicUsize {
                    static DROPS: AtomicUsize = AtomicUsize::new(0);
                    &DROPS
                }
            }

            impl Drop for $name {
                fn drop(&mut self) {
                    Self::drops().fetch_add(1, Ordering::Relaxed);
                }
            }

            impl FallibleInit for $name {
                fn construct(_token: ConstructionToken<Self>) -> Self {
                    Self::constructions().fetch_add(1, Ordering::Relaxed);
                    Self { value: 0 }
                }

                fn try_init(&mut self, _token: ConstructionToken<Self>) -> Result<()> {
                    if $fail {
                        return AllocationFailedSnafu.fail();
                    }
                    self.value = 42;
                    Ok(())
                }
            }
        };
    }

    #[test]
    fn test_try_init_is_idempotent() {
        counted_type!(Good, fail = false);

        let mut wrapper = FallibleConstructed::<Good>::new();
        assert!(!wrapper.is_initialized());
        wrapper.try_init().unwrap();
        wrapper.try_init().unwrap();
        assert_eq!(Good::constructions().load(Ordering::Relaxed), 1);
        assert_eq!(wrapper.value, 42);

        drop(wrapper);
        assert_eq!(Good::drops().load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_failed_init_leaves_wrapper_uninitialized() {
        counted_type!(Bad, fail = true);

        let mut wrapper = FallibleConstructed::<Bad>::new();
        let err = wrapper.try_init().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AllocationFailed);
        assert!(!wrapper.is_initialized());
        assert_eq!(Bad::drops().load(Ordering::Relaxed), 1);
        assert_eq!(
            wrapper.try_get().unwrap_err().kind(),
            ErrorKind::NotInitialized
        );

        drop(wrapper);
        assert_eq!(Bad::drops().load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_checked_access_traps_after_failed_init() {
        counted_type!(Broken, fail = true);

        let mut wrapper = FallibleConstructed::<Broken>::new();
        assert!(wrapper.try_init().is_err());
        let result = panic::catch_unwind(panic::AssertUnwindSafe(|| wrapper.get().value));
        assert!(result.is_err());
    }

    #[test]
    #[should_panic = "before try_init"]
    fn test_deref_uninitialized_traps() {
        counted_type!(Lazy, fail = false);

        let wrapper = FallibleConstructed::<Lazy>::new();
        let value = wrapper.value;
        assert_eq!(value, 42);
    }

    #[test]
    fn test_take_moves_value_out() {
        counted_type!(Movable, fail = false);

        let mut source = FallibleConstructed::<Movable>::new();
        source.try_init().unwrap();
        let mut dest = FallibleConstructed::<Movable>::new();
        dest.take_from(&mut source);
        assert!(!source.is_initialized());
        assert_eq!(dest.value, 42);

        // the moved-from wrapper can be initialized again
        source.try_init().unwrap();
        assert_eq!(Movable::constructions().load(Ordering::Relaxed), 2);

        let value = dest.take().unwrap();
        assert_eq!(value.value, 42);
        assert!(dest.take().is_none());
        drop(value);
        drop(source);
        assert_eq!(Movable::drops().load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_unchecked_access() {
        counted_type!(Fast, fail = false);

        let mut wrapper = FallibleConstructed::<Fast>::new();
        wrapper.try_init().unwrap();
        unsafe {
            wrapper.get_unchecked_mut().value += 1;
            assert_eq!(wrapper.get_unchecked().value, 43);
        }
    }
}

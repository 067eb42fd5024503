//! Lazily initialized globals built with the two-phase protocol.
//!
//! [`FallibleSingleton`] is meant for single-threaded start-up code.
//! [`AtomicFallibleSingleton`] may be reached from any number of threads:
//! once initialized it is read without locking, and until then callers
//! serialize on a lock supplied through a [`LockPolicy`].
//!
//! A failed initialization leaves either singleton uninitialized, so a
//! later call retries. Neither ever drops its value.

use core::cell::UnsafeCell;

use reloco_error::Result;

pub use self::{
    atomic::AtomicFallibleSingleton,
    lock::{LockPolicy, RawSpinLock, RawSpinLockGuard, SpinLockPolicy, SpinMutexPolicy},
};
use crate::{FallibleInit, StaticFallibleConstructed};

mod atomic;
mod lock;

/// Global initialized on first use, without synchronization.
///
/// # Examples
///
/// ```
/// use reloco::{ConstructionToken, FallibleInit, FallibleSingleton, Result};
///
/// struct Clock {
///     ticks_per_second: u64,
/// }
///
/// impl FallibleInit for Clock {
///     fn construct(_token: ConstructionToken<Self>) -> Self {
///         Self { ticks_per_second: 0 }
///     }
///
///     fn try_init(&mut self, _token: ConstructionToken<Self>) -> Result<()> {
///         self.ticks_per_second = 1_000_000;
///         Ok(())
///     }
/// }
///
/// static CLOCK: FallibleSingleton<Clock> = FallibleSingleton::new();
///
/// // Only this thread touches CLOCK.
/// let clock = unsafe { CLOCK.instance() }.unwrap();
/// assert_eq!(clock.ticks_per_second, 1_000_000);
/// ```
pub struct FallibleSingleton<T: FallibleInit> {
    cell: UnsafeCell<StaticFallibleConstructed<T>>,
}

unsafe impl<T: FallibleInit + Send + Sync> Sync for FallibleSingleton<T> {}

impl<T: FallibleInit> Default for FallibleSingleton<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: FallibleInit> FallibleSingleton<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cell: UnsafeCell::new(StaticFallibleConstructed::new()),
        }
    }

    /// Returns the value, initializing it first if needed.
    ///
    /// # Safety
    ///
    /// No other thread may call this method until one call has returned
    /// `Ok`.
    pub unsafe fn instance(&self) -> Result<&T> {
        if !self.is_initialized() {
            unsafe { (*self.cell.get()).try_init()? };
        }
        Ok(unsafe { (*self.cell.get()).get_unchecked() })
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        unsafe { (*self.cell.get()).is_initialized() }
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicUsize, Ordering};

    use reloco_error::{ErrorKind, NotInitializedSnafu};

    use super::*;
    use crate::ConstructionToken;

    #[test]
    fn test_first_instance_initializes_once() {
        static INITS: AtomicUsize = AtomicUsize::new(0);

        struct Table {
            rows: usize,
        }

        impl FallibleInit for Table {
            fn construct(_token: ConstructionToken<Self>) -> Self {
                Self { rows: 0 }
            }

            fn try_init(&mut self, _token: ConstructionToken<Self>) -> Result<()> {
                INITS.fetch_add(1, Ordering::Relaxed);
                self.rows = 3;
                Ok(())
            }
        }

        let table = FallibleSingleton::<Table>::new();
        assert!(!table.is_initialized());
        let first = unsafe { table.instance() }.unwrap();
        let second = unsafe { table.instance() }.unwrap();
        assert!(core::ptr::eq(first, second));
        assert_eq!(second.rows, 3);
        assert_eq!(INITS.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_failed_instance_retries() {
        static ATTEMPTS: AtomicUsize = AtomicUsize::new(0);

        struct Device;

        impl FallibleInit for Device {
            fn construct(_token: ConstructionToken<Self>) -> Self {
                Self
            }

            fn try_init(&mut self, _token: ConstructionToken<Self>) -> Result<()> {
                if ATTEMPTS.fetch_add(1, Ordering::Relaxed) == 0 {
                    return NotInitializedSnafu.fail();
                }
                Ok(())
            }
        }

        let device = FallibleSingleton::<Device>::new();
        let err = unsafe { device.instance() }.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotInitialized);
        assert!(!device.is_initialized());
        assert!(unsafe { device.instance() }.is_ok());
        assert_eq!(ATTEMPTS.load(Ordering::Relaxed), 2);
    }
}

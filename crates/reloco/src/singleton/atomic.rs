use core::{
    cell::UnsafeCell,
    sync::atomic::{AtomicU8, Ordering},
};

use reloco_diag::warn;
use reloco_error::Result;

use super::{LockPolicy, SpinLockPolicy};
use crate::{FallibleInit, StaticFallibleConstructed};

const UNINITIALIZED: u8 = 0;
const READY: u8 = 1;

/// Global initialized on first use from any thread, with double-checked
/// locking.
///
/// The lock is supplied when the singleton is created, so that several
/// singletons may share one and this type stays independent of the lock
/// implementation. Every initialization attempt serializes on that lock.
///
/// # Examples
///
/// ```
/// use reloco::{
///     AtomicFallibleSingleton, ConstructionToken, FallibleInit, RawSpinLock, Result,
/// };
///
/// struct Registry {
///     slots: usize,
/// }
///
/// impl FallibleInit for Registry {
///     fn construct(_token: ConstructionToken<Self>) -> Self {
///         Self { slots: 0 }
///     }
///
///     fn try_init(&mut self, _token: ConstructionToken<Self>) -> Result<()> {
///         self.slots = 64;
///         Ok(())
///     }
/// }
///
/// static INIT_LOCK: RawSpinLock = RawSpinLock::new();
/// static REGISTRY: AtomicFallibleSingleton<'static, Registry> =
///     AtomicFallibleSingleton::new(&INIT_LOCK);
///
/// assert_eq!(REGISTRY.instance().unwrap().slots, 64);
/// assert!(REGISTRY.is_ready());
/// ```
pub struct AtomicFallibleSingleton<'l, T: FallibleInit, P: LockPolicy = SpinLockPolicy> {
    state: AtomicU8,
    lock: &'l P::Lock,
    cell: UnsafeCell<StaticFallibleConstructed<T>>,
}

unsafe impl<T, P> Sync for AtomicFallibleSingleton<'_, T, P>
where
    T: FallibleInit + Send + Sync,
    P: LockPolicy,
    P::Lock: Sync,
{
}

impl<'l, T: FallibleInit, P: LockPolicy> AtomicFallibleSingleton<'l, T, P> {
    /// Creates an uninitialized singleton serializing its initialization on
    /// `lock`.
    #[must_use]
    pub const fn new(lock: &'l P::Lock) -> Self {
        Self {
            state: AtomicU8::new(UNINITIALIZED),
            lock,
            cell: UnsafeCell::new(StaticFallibleConstructed::new()),
        }
    }

    /// Returns the value, initializing it under the singleton's lock first if
    /// needed.
    ///
    /// Once the value is ready this never touches the lock. An
    /// initialization failure is returned to the caller that attempted it;
    /// the next caller tries again.
    pub fn instance(&self) -> Result<&T> {
        if let Some(value) = self.get() {
            return Ok(value);
        }

        let _guard = PolicyGuard::<P>::acquire(self.lock);
        if self.state.load(Ordering::Relaxed) != READY {
            let cell = unsafe { &mut *self.cell.get() };
            if let Err(err) = cell.try_init() {
                warn!("singleton initialization failed: {err}");
                return Err(err);
            }
            self.state.store(READY, Ordering::Release);
        }
        Ok(unsafe { (*self.cell.get()).get_unchecked() })
    }

    /// Returns the value if it has been initialized.
    #[must_use]
    pub fn get(&self) -> Option<&T> {
        self.is_ready()
            .then(|| unsafe { (*self.cell.get()).get_unchecked() })
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state.load(Ordering::Acquire) == READY
    }

    /// The lock initialization serializes on.
    #[must_use]
    pub const fn lock(&self) -> &'l P::Lock {
        self.lock
    }
}

struct PolicyGuard<'a, P: LockPolicy> {
    lock: &'a P::Lock,
}

impl<'a, P: LockPolicy> PolicyGuard<'a, P> {
    fn acquire(lock: &'a P::Lock) -> Self {
        P::lock(lock);
        Self { lock }
    }
}

impl<P: LockPolicy> Drop for PolicyGuard<'_, P> {
    fn drop(&mut self) {
        unsafe { P::unlock(self.lock) };
    }
}

#[cfg(test)]
mod tests {
    use core::{ptr, sync::atomic::AtomicUsize, time::Duration};
    use std::{sync::Barrier, thread};

    use reloco_error::{ErrorKind, TryAgainSnafu};

    use super::*;
    use crate::{ConstructionToken, SpinMutexPolicy, singleton::RawSpinLock};

    #[test]
    fn test_failure_is_retried() {
        static ATTEMPTS: AtomicUsize = AtomicUsize::new(0);

        struct Link;

        impl FallibleInit for Link {
            fn construct(_token: ConstructionToken<Self>) -> Self {
                Self
            }

            fn try_init(&mut self, _token: ConstructionToken<Self>) -> Result<()> {
                if ATTEMPTS.fetch_add(1, Ordering::Relaxed) < 2 {
                    return TryAgainSnafu.fail();
                }
                Ok(())
            }
        }

        let lock = RawSpinLock::new();
        let link = AtomicFallibleSingleton::<Link>::new(&lock);
        for _ in 0..2 {
            let err = link.instance().err().unwrap();
            assert_eq!(err.kind(), ErrorKind::TryAgain);
            assert!(!link.is_ready());
            assert!(!lock.is_locked());
        }
        assert!(link.instance().is_ok());
        assert!(link.get().is_some());
        assert_eq!(ATTEMPTS.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_ready_path_skips_lock() {
        struct Config;

        impl FallibleInit for Config {
            fn construct(_token: ConstructionToken<Self>) -> Self {
                Self
            }

            fn try_init(&mut self, _token: ConstructionToken<Self>) -> Result<()> {
                Ok(())
            }
        }

        let lock = spin::Mutex::new(());
        let config = AtomicFallibleSingleton::<Config, SpinMutexPolicy>::new(&lock);
        assert!(config.get().is_none());
        config.instance().unwrap();

        let held = lock.lock();
        assert!(config.instance().is_ok());
        drop(held);
    }

    #[test]
    fn test_concurrent_first_calls_initialize_once() {
        static BUILDS: AtomicUsize = AtomicUsize::new(0);

        struct Slow;

        impl FallibleInit for Slow {
            fn construct(_token: ConstructionToken<Self>) -> Self {
                Self
            }

            fn try_init(&mut self, _token: ConstructionToken<Self>) -> Result<()> {
                BUILDS.fetch_add(1, Ordering::Relaxed);
                thread::sleep(Duration::from_millis(50));
                Ok(())
            }
        }

        let lock = RawSpinLock::new();
        let slow = AtomicFallibleSingleton::<Slow>::new(&lock);
        let barrier = Barrier::new(2);
        thread::scope(|s| {
            for _ in 0..2 {
                s.spawn(|| {
                    barrier.wait();
                    slow.instance().unwrap();
                });
            }
        });
        assert_eq!(BUILDS.load(Ordering::Relaxed), 1);
        assert!(ptr::eq(slow.lock(), &lock));
    }

    #[test]
    fn test_singletons_share_one_lock() {
        struct Left;
        struct Right;

        impl FallibleInit for Left {
            fn construct(_token: ConstructionToken<Self>) -> Self {
                Self
            }

            fn try_init(&mut self, _token: ConstructionToken<Self>) -> Result<()> {
                Ok(())
            }
        }

        impl FallibleInit for Right {
            fn construct(_token: ConstructionToken<Self>) -> Self {
                Self
            }

            fn try_init(&mut self, _token: ConstructionToken<Self>) -> Result<()> {
                Ok(())
            }
        }

        let lock = RawSpinLock::new();
        let left = AtomicFallibleSingleton::<Left>::new(&lock);
        let right = AtomicFallibleSingleton::<Right>::new(&lock);
        left.instance().unwrap();

        lock.lock();
        assert!(left.instance().is_ok());
        assert!(!right.is_ready());
        lock.unlock();
        right.instance().unwrap();
        assert!(!lock.is_locked());
    }
}

use core::{
    fmt, hint, panic,
    ptr::{self, null_mut},
    sync::atomic::{AtomicBool, AtomicPtr, Ordering},
};

use reloco_diag::check;
use reloco_error::{Location, NotLockedSnafu, Result, StillLockedSnafu};
use snafu::ensure;

/// Mutual exclusion used by [`AtomicFallibleSingleton`] on its slow path.
///
/// [`AtomicFallibleSingleton`]: super::AtomicFallibleSingleton
pub trait LockPolicy {
    type Lock;

    /// Blocks until `lock` is held by the caller.
    fn lock(lock: &Self::Lock);

    /// Releases `lock`.
    ///
    /// # Safety
    ///
    /// The caller must hold `lock`, acquired through [`lock`](Self::lock).
    unsafe fn unlock(lock: &Self::Lock);
}

/// Test-and-set spin lock without protected data.
///
/// Records the source location of the most recent acquisition to help
/// diagnosing deadlocks.
pub struct RawSpinLock {
    locked: AtomicBool,
    locked_at: AtomicPtr<panic::Location<'static>>,
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RawSpinLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawSpinLock")
            .field("locked", &self.is_locked())
            .field("locked_at", &self.locked_at())
            .finish()
    }
}

impl RawSpinLock {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            locked_at: AtomicPtr::new(null_mut()),
        }
    }

    #[track_caller]
    pub fn lock(&self) {
        while self.locked.swap(true, Ordering::Acquire) {
            hint::spin_loop();
        }
        self.remember_caller();
    }

    /// Takes the lock if it is free, failing with `StillLocked` otherwise.
    #[track_caller]
    pub fn try_lock(&self) -> Result<()> {
        ensure!(!self.locked.swap(true, Ordering::Acquire), StillLockedSnafu);
        self.remember_caller();
        Ok(())
    }

    /// Releases the lock, trapping if it is not held.
    #[track_caller]
    pub fn unlock(&self) {
        let was_locked = self.locked.swap(false, Ordering::Release);
        check!(was_locked, "unlocking a RawSpinLock that is not locked");
    }

    /// Releases the lock, failing with `NotLocked` if it is not held.
    pub fn try_unlock(&self) -> Result<()> {
        ensure!(self.locked.swap(false, Ordering::Release), NotLockedSnafu);
        Ok(())
    }

    /// Takes the lock and releases it when the guard is dropped.
    #[track_caller]
    pub fn guard(&self) -> RawSpinLockGuard<'_> {
        self.lock();
        RawSpinLockGuard { lock: self }
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    /// Where the lock was last acquired, if ever.
    #[must_use]
    pub fn locked_at(&self) -> Option<Location> {
        let ptr = self.locked_at.load(Ordering::Relaxed);
        unsafe { ptr.as_ref() }.map(Location::from)
    }

    #[track_caller]
    fn remember_caller(&self) {
        let caller = ptr::from_ref(panic::Location::caller()).cast_mut();
        self.locked_at.store(caller, Ordering::Relaxed);
    }
}

pub struct RawSpinLockGuard<'a> {
    lock: &'a RawSpinLock,
}

impl Drop for RawSpinLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

/// [`LockPolicy`] over [`RawSpinLock`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SpinLockPolicy;

impl LockPolicy for SpinLockPolicy {
    type Lock = RawSpinLock;

    fn lock(lock: &RawSpinLock) {
        lock.lock();
    }

    unsafe fn unlock(lock: &RawSpinLock) {
        lock.unlock();
    }
}

/// [`LockPolicy`] over [`spin::Mutex`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SpinMutexPolicy;

impl LockPolicy for SpinMutexPolicy {
    type Lock = spin::Mutex<()>;

    fn lock(lock: &spin::Mutex<()>) {
        core::mem::forget(lock.lock());
    }

    unsafe fn unlock(lock: &spin::Mutex<()>) {
        unsafe { lock.force_unlock() };
    }
}

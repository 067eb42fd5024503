use core::{fmt, mem::MaybeUninit, ops::Deref};

use reloco_diag::check;
use reloco_error::{NotInitializedSnafu, Result};
use snafu::ensure;

use super::{FallibleInit, init_in_place};

/// Two-phase storage meant for values that live until process exit.
///
/// Construction is `const`, so the wrapper can sit in a `static`. Once
/// initialized, the value is never dropped: dropping the wrapper leaks it.
/// Only a failed initialization destroys the shell it had built.
pub struct StaticFallibleConstructed<T: FallibleInit> {
    storage: MaybeUninit<T>,
    initialized: bool,
}

impl<T: FallibleInit> Default for StaticFallibleConstructed<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: FallibleInit> StaticFallibleConstructed<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            storage: MaybeUninit::uninit(),
            initialized: false,
        }
    }

    pub fn try_init(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        init_in_place(&mut self.storage)?;
        self.initialized = true;
        Ok(())
    }

    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    #[track_caller]
    #[must_use]
    pub fn get(&self) -> &T {
        check!(
            self.initialized,
            "accessing StaticFallibleConstructed before try_init"
        );
        unsafe { self.storage.assume_init_ref() }
    }

    pub fn try_get(&self) -> Result<&T> {
        ensure!(self.initialized, NotInitializedSnafu);
        Ok(unsafe { self.storage.assume_init_ref() })
    }

    /// # Safety
    ///
    /// The wrapper must be initialized.
    #[must_use]
    pub unsafe fn get_unchecked(&self) -> &T {
        unsafe { self.storage.assume_init_ref() }
    }

    /// # Safety
    ///
    /// The wrapper must be initialized.
    #[must_use]
    pub unsafe fn get_unchecked_mut(&mut self) -> &mut T {
        unsafe { self.storage.assume_init_mut() }
    }
}

impl<T: FallibleInit> Deref for StaticFallibleConstructed<T> {
    type Target = T;

    #[track_caller]
    fn deref(&self) -> &Self::Target {
        self.get()
    }
}

impl<T: FallibleInit + fmt::Debug> fmt::Debug for StaticFallibleConstructed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_tuple("StaticFallibleConstructed");
        match self.try_get() {
            Ok(value) => d.field(value),
            Err(_) => d.field(&format_args!("<uninitialized>")),
        };
        d.finish()
    }
}

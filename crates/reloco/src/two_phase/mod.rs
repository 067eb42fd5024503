//! Two-phase fallible construction.
//!
//! A type opts in by implementing [`FallibleInit`]: a cheap, infallible
//! constructor producing a shell, and a fallible initializer completing it.
//! Both take a [`ConstructionToken`], which only the wrappers of this module
//! can create, so the type cannot be built any other way.
//!
//! | wrapper | storage | destroys on drop |
//! |---------|---------|------------------|
//! | [`FallibleConstructed`] | inline | yes |
//! | [`FallibleAllocated`] | allocator | yes |
//! | [`StaticFallibleConstructed`] | inline, `const` constructible | no |
//!
//! All wrappers share the same state machine: `try_init` on an
//! uninitialized wrapper builds the shell and runs the initializer; if the
//! initializer fails the shell is dropped and the wrapper stays
//! uninitialized. `try_init` on an initialized wrapper does nothing.

use core::{marker::PhantomData, mem::MaybeUninit};

use reloco_error::Result;

pub use self::{
    heap::FallibleAllocated, inline::FallibleConstructed, statik::StaticFallibleConstructed,
};

mod heap;
mod inline;
mod statik;

/// Capability to construct a `T` through the two-phase protocol.
///
/// Tokens cannot be created, cloned or copied outside this module.
pub struct ConstructionToken<T: ?Sized>(PhantomData<fn() -> T>);

impl<T: ?Sized> ConstructionToken<T> {
    const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T: ?Sized> core::fmt::Debug for ConstructionToken<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("ConstructionToken")
    }
}

/// Types built by the two-phase protocol.
///
/// # Examples
///
/// ```
/// use reloco::{ConstructionToken, ErrorKind, FallibleConstructed, FallibleInit, Result};
///
/// #[derive(Debug)]
/// struct Config {
///     entries: usize,
/// }
///
/// impl FallibleInit for Config {
///     fn construct(_token: ConstructionToken<Self>) -> Self {
///         Self { entries: 0 }
///     }
///
///     fn try_init(&mut self, _token: ConstructionToken<Self>) -> Result<()> {
///         self.entries = 16;
///         Ok(())
///     }
/// }
///
/// let mut config = FallibleConstructed::<Config>::new();
/// assert_eq!(config.try_get().unwrap_err().kind(), ErrorKind::NotInitialized);
/// config.try_init().unwrap();
/// assert_eq!(config.entries, 16);
/// ```
pub trait FallibleInit: Sized {
    /// Builds the uninitialized shell. Must not fail.
    fn construct(token: ConstructionToken<Self>) -> Self;

    /// Completes initialization of a shell built by
    /// [`construct`](Self::construct).
    fn try_init(&mut self, token: ConstructionToken<Self>) -> Result<()>;
}

/// Builds `T` inside `slot`, dropping the shell if initialization fails.
fn init_in_place<T: FallibleInit>(slot: &mut MaybeUninit<T>) -> Result<&mut T> {
    slot.write(T::construct(ConstructionToken::new()));
    let res = unsafe { slot.assume_init_mut() }.try_init(ConstructionToken::new());
    match res {
        Ok(()) => Ok(unsafe { slot.assume_init_mut() }),
        Err(err) => {
            unsafe { slot.assume_init_drop() };
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicUsize, Ordering};

    use reloco_error::{AlreadyExistsSnafu, ErrorKind};

    use super::*;

    #[test]
    fn test_token_is_zero_sized() {
        assert_eq!(size_of::<ConstructionToken<u32>>(), 0);
    }

    #[test]
    fn test_init_in_place_rolls_back() {
        static DROPS: AtomicUsize = AtomicUsize::new(0);

        #[derive(Debug)]
        struct Failing;

        impl Drop for Failing {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::Relaxed);
            }
        }

        impl FallibleInit for Failing {
            fn construct(_token: ConstructionToken<Self>) -> Self {
                Self
            }

            fn try_init(&mut self, _token: ConstructionToken<Self>) -> Result<()> {
                AlreadyExistsSnafu.fail()
            }
        }

        let mut slot = MaybeUninit::<Failing>::uninit();
        let err = init_in_place(&mut slot).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(DROPS.load(Ordering::Relaxed), 1);
    }
}

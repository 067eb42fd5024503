//! Strategy-driven construction and cloning.
//!
//! A type declares how it is built from a given argument type by
//! implementing [`Construct`] and naming one of four strategies:
//!
//! | strategy | requires | behaviour |
//! |----------|----------|-----------|
//! | [`InPlace`] | [`TryConstruct`] + [`Default`] | default shell at the destination, then `try_construct`; the shell is dropped on failure |
//! | [`WithAllocator`] | [`TryAllocate`] | factory receiving the caller's allocator |
//! | [`Factory`] | [`TryCreate`] | factory using its own default allocator |
//! | [`Plain`] | [`From`] | infallible conversion |
//!
//! [`try_construct_at`] initializes caller-provided storage, [`try_produce`]
//! returns the value. Both pick the declared strategy at compile time.
//!
//! Cloning works the same way through [`FallibleClone`]; see [`try_clone`]
//! and [`try_clone_at`].
//!
//! # Examples
//!
//! ```
//! use core::mem::MaybeUninit;
//!
//! use reloco::{
//!     ErrorKind, Result, SystemAllocator,
//!     construct::{self, Construct, InPlace, TryConstruct},
//! };
//!
//! #[derive(Debug, Default)]
//! struct Port {
//!     number: u16,
//! }
//!
//! impl TryConstruct<u32> for Port {
//!     fn try_construct(&mut self, number: u32) -> Result<()> {
//!         self.number = u16::try_from(number).map_err(|_| ErrorKind::OutOfRange)?;
//!         Ok(())
//!     }
//! }
//!
//! impl Construct<u32> for Port {
//!     type Strategy = InPlace;
//! }
//!
//! let mut slot = MaybeUninit::<Port>::uninit();
//! let port = construct::try_construct_at(&SystemAllocator, &mut slot, 8080_u32).unwrap();
//! assert_eq!(port.number, 8080);
//! # unsafe { slot.assume_init_drop() };
//!
//! let err = construct::try_produce::<Port, _, _>(&SystemAllocator, 70000_u32).unwrap_err();
//! assert_eq!(err.kind(), ErrorKind::OutOfRange);
//! ```

use core::mem::MaybeUninit;

use reloco_error::Result;

pub use self::clone::{
    AllocateFrom, CloneAt, CloneIn, CloneSelf, CloneStrategy, CloneWith, CopyClone, CreateFrom,
    FallibleClone, TryClone, TryCloneAt, TryCloneIn, try_clone, try_clone_at,
};

mod clone;

/// In-place fallible initialization of a default-constructed shell.
pub trait TryConstruct<Args>: Default {
    fn try_construct(&mut self, args: Args) -> Result<()>;
}

/// Fallible factory taking the allocator the value should draw from.
pub trait TryAllocate<A: ?Sized, Args>: Sized {
    fn try_allocate(alloc: &A, args: Args) -> Result<Self>;
}

/// Fallible factory using the type's own default allocator.
pub trait TryCreate<Args>: Sized {
    fn try_create(args: Args) -> Result<Self>;
}

/// Selects how `Self` is built from `Args`.
pub trait Construct<Args>: Sized {
    /// One of [`InPlace`], [`WithAllocator`], [`Factory`] or [`Plain`].
    type Strategy;
}

/// Strategy: [`TryConstruct`] on a default shell.
#[derive(Debug, Clone, Copy)]
pub enum InPlace {}

/// Strategy: [`TryAllocate`] with the caller's allocator.
#[derive(Debug, Clone, Copy)]
pub enum WithAllocator {}

/// Strategy: [`TryCreate`].
#[derive(Debug, Clone, Copy)]
pub enum Factory {}

/// Strategy: [`From`].
#[derive(Debug, Clone, Copy)]
pub enum Plain {}

/// Implementation of a construction strategy for `T`.
///
/// # Safety
///
/// An `Ok` from [`construct_at`](Self::construct_at) must be the reference
/// obtained by initializing `slot`, and an `Err` must leave `slot`
/// uninitialized. Callers take ownership of the value in `slot` on `Ok`.
///
/// ```compile_fail,E0200
/// use reloco::{Result, construct::ConstructStrategy};
///
/// enum Leaky {}
///
/// impl<T: Default, A: ?Sized> ConstructStrategy<T, A, ()> for Leaky {
///     fn produce(_: &A, (): ()) -> Result<T> {
///         Ok(T::default())
///     }
/// }
/// ```
pub unsafe trait ConstructStrategy<T, A: ?Sized, Args> {
    fn produce(alloc: &A, args: Args) -> Result<T>;

    fn construct_at<'a>(
        alloc: &A,
        slot: &'a mut MaybeUninit<T>,
        args: Args,
    ) -> Result<&'a mut T> {
        let value = Self::produce(alloc, args)?;
        Ok(slot.write(value))
    }
}

unsafe impl<T, A, Args> ConstructStrategy<T, A, Args> for InPlace
where
    T: TryConstruct<Args>,
    A: ?Sized,
{
    fn produce(_alloc: &A, args: Args) -> Result<T> {
        let mut value = T::default();
        value.try_construct(args)?;
        Ok(value)
    }

    fn construct_at<'a>(
        _alloc: &A,
        slot: &'a mut MaybeUninit<T>,
        args: Args,
    ) -> Result<&'a mut T> {
        slot.write(T::default());
        let res = unsafe { slot.assume_init_mut() }.try_construct(args);
        match res {
            Ok(()) => Ok(unsafe { slot.assume_init_mut() }),
            Err(err) => {
                unsafe { slot.assume_init_drop() };
                Err(err)
            }
        }
    }
}

unsafe impl<T, A, Args> ConstructStrategy<T, A, Args> for WithAllocator
where
    T: TryAllocate<A, Args>,
    A: ?Sized,
{
    fn produce(alloc: &A, args: Args) -> Result<T> {
        T::try_allocate(alloc, args)
    }
}

unsafe impl<T, A, Args> ConstructStrategy<T, A, Args> for Factory
where
    T: TryCreate<Args>,
    A: ?Sized,
{
    fn produce(_alloc: &A, args: Args) -> Result<T> {
        T::try_create(args)
    }
}

unsafe impl<T, A, Args> ConstructStrategy<T, A, Args> for Plain
where
    T: From<Args>,
    A: ?Sized,
{
    fn produce(_alloc: &A, args: Args) -> Result<T> {
        Ok(T::from(args))
    }
}

/// Types buildable from `Args` with allocator `A` through their declared
/// strategy.
///
/// Implemented automatically; use it as a bound.
///
/// # Safety
///
/// An `Ok` from [`try_construct_at_with`](Self::try_construct_at_with)
/// must be the reference obtained by initializing `slot`.
pub unsafe trait ConstructWith<A: ?Sized, Args>: Sized {
    fn try_produce_with(alloc: &A, args: Args) -> Result<Self>;

    fn try_construct_at_with<'a>(
        alloc: &A,
        slot: &'a mut MaybeUninit<Self>,
        args: Args,
    ) -> Result<&'a mut Self>;
}

unsafe impl<T, A, Args> ConstructWith<A, Args> for T
where
    T: Construct<Args>,
    T::Strategy: ConstructStrategy<T, A, Args>,
    A: ?Sized,
{
    fn try_produce_with(alloc: &A, args: Args) -> Result<Self> {
        T::Strategy::produce(alloc, args)
    }

    fn try_construct_at_with<'a>(
        alloc: &A,
        slot: &'a mut MaybeUninit<Self>,
        args: Args,
    ) -> Result<&'a mut Self> {
        T::Strategy::construct_at(alloc, slot, args)
    }
}

/// Initializes `slot` from `args`.
///
/// On failure `slot` is left uninitialized.
pub fn try_construct_at<'a, T, A, Args>(
    alloc: &A,
    slot: &'a mut MaybeUninit<T>,
    args: Args,
) -> Result<&'a mut T>
where
    T: ConstructWith<A, Args>,
    A: ?Sized,
{
    T::try_construct_at_with(alloc, slot, args)
}

/// Builds a `T` from `args`.
pub fn try_produce<T, A, Args>(alloc: &A, args: Args) -> Result<T>
where
    T: ConstructWith<A, Args>,
    A: ?Sized,
{
    T::try_produce_with(alloc, args)
}

macro_rules! impl_plain {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Construct<$ty> for $ty {
                type Strategy = Plain;
            }

            impl FallibleClone for $ty {
                type Strategy = CopyClone;
            }
        )*
    };
}

impl_plain!(
    (), bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64,
    &'static str,
);

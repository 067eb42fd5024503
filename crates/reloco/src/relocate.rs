use alloc::{boxed::Box, string::String, vec::Vec};
use core::{cell::Cell, marker::PhantomData, ptr::NonNull};

/// Types that containers may move to a new address.
///
/// When [`BITWISE`](Self::BITWISE) is `true` (the default) a value is moved
/// by copying its bytes and abandoning the source, and containers may hand
/// the whole buffer to [`FallibleAllocator::reallocate`]. Types whose
/// invariants depend on their own address set it to `false` and override
/// [`relocate`](Self::relocate); containers then move such elements one at a
/// time through it.
///
/// # Safety
///
/// With `BITWISE == true`, a bitwise copy of a live value must be a valid
/// value, and the source must need no further cleanup. An overridden
/// `relocate` must leave `dst` holding the value and `src` logically
/// uninitialized.
///
/// [`FallibleAllocator::reallocate`]: crate::FallibleAllocator::reallocate
///
/// # Examples
///
/// ```
/// use core::ptr;
///
/// use reloco::Relocate;
///
/// /// Keeps a pointer to its own `value` field.
/// struct SelfRef {
///     value: u32,
///     this: *const u32,
/// }
///
/// unsafe impl Relocate for SelfRef {
///     const BITWISE: bool = false;
///
///     unsafe fn relocate(src: *mut Self, dst: *mut Self) {
///         unsafe {
///             let value = ptr::read(src).value;
///             dst.write(SelfRef { value, this: ptr::addr_of!((*dst).value) });
///         }
///     }
/// }
/// ```
pub unsafe trait Relocate: Sized {
    const BITWISE: bool = true;

    /// Moves the value at `src` into the uninitialized slot `dst`.
    ///
    /// # Safety
    ///
    /// `src` must point to a live value and `dst` to writable storage for
    /// `Self` that does not overlap it. Afterwards `src` must be treated as
    /// uninitialized.
    unsafe fn relocate(src: *mut Self, dst: *mut Self) {
        unsafe { core::ptr::copy_nonoverlapping(src, dst, 1) }
    }
}

macro_rules! impl_bitwise {
    ($($ty:ty),* $(,)?) => {
        $(unsafe impl Relocate for $ty {})*
    };
}

impl_bitwise!(
    (), bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64,
    String,
);

unsafe impl<T: ?Sized> Relocate for &T {}
unsafe impl<T: ?Sized> Relocate for &mut T {}
unsafe impl<T: ?Sized> Relocate for *const T {}
unsafe impl<T: ?Sized> Relocate for *mut T {}
unsafe impl<T: ?Sized> Relocate for NonNull<T> {}
unsafe impl<T: ?Sized> Relocate for PhantomData<T> {}
unsafe impl<T: ?Sized> Relocate for Box<T> {}
unsafe impl<T> Relocate for Vec<T> {}
unsafe impl<T: Relocate> Relocate for Cell<T> {
    const BITWISE: bool = T::BITWISE;

    unsafe fn relocate(src: *mut Self, dst: *mut Self) {
        unsafe { T::relocate(src.cast::<T>(), dst.cast::<T>()) }
    }
}

unsafe impl<T: Relocate> Relocate for Option<T> {
    const BITWISE: bool = T::BITWISE;

    unsafe fn relocate(src: *mut Self, dst: *mut Self) {
        unsafe {
            core::ptr::copy_nonoverlapping(src, dst, 1);
            if T::BITWISE {
                return;
            }
            // let the payload overwrite its own byte copy at the new address
            if let (Some(src), Some(dst)) = (&mut *src, &mut *dst) {
                T::relocate(src, dst);
            }
        }
    }
}

unsafe impl<T: Relocate, const N: usize> Relocate for [T; N] {
    const BITWISE: bool = T::BITWISE;

    unsafe fn relocate(src: *mut Self, dst: *mut Self) {
        unsafe {
            if T::BITWISE {
                core::ptr::copy_nonoverlapping(src, dst, 1);
                return;
            }
            let src = src.cast::<T>();
            let dst = dst.cast::<T>();
            for i in 0..N {
                T::relocate(src.add(i), dst.add(i));
            }
        }
    }
}

// Allocators only hold pointers to memory they do not live in.
unsafe impl Relocate for reloco_allocator::SystemAllocator {}
unsafe impl Relocate for reloco_allocator::FreeListAllocator {}
unsafe impl Relocate for reloco_allocator::StackAllocator<'_> {}
#[cfg(unix)]
unsafe impl Relocate for reloco_allocator::PageAllocator {}

#[cfg(test)]
mod tests {
    use core::{mem::MaybeUninit, ptr};

    use super::*;

    struct Anchored {
        value: u32,
        this: *const Self,
    }

    unsafe impl Relocate for Anchored {
        const BITWISE: bool = false;

        unsafe fn relocate(src: *mut Self, dst: *mut Self) {
            unsafe {
                let value = ptr::read(src).value;
                dst.write(Self { value, this: dst });
            }
        }
    }

    fn anchored(slot: &mut MaybeUninit<Anchored>, value: u32) -> &mut Anchored {
        let this = slot.as_ptr();
        slot.write(Anchored { value, this })
    }

    #[test]
    fn test_flags() {
        const {
            assert!(u32::BITWISE);
            assert!(<Option<Box<u8>>>::BITWISE);
            assert!(<[u64; 4]>::BITWISE);
            assert!(!Anchored::BITWISE);
            assert!(!<Option<Anchored>>::BITWISE);
            assert!(!<[Anchored; 2]>::BITWISE);
        }
    }

    #[test]
    fn test_custom_relocation_fixes_address() {
        let mut src = MaybeUninit::uninit();
        anchored(&mut src, 7);
        let mut dst = MaybeUninit::<Anchored>::uninit();
        unsafe {
            Anchored::relocate(src.as_mut_ptr(), dst.as_mut_ptr());
            let moved = dst.assume_init_ref();
            assert_eq!(moved.value, 7);
            assert!(ptr::eq(moved.this, dst.as_ptr()));
        }
    }

    #[test]
    fn test_option_and_array_relocate_payloads() {
        let mut src = MaybeUninit::<Option<Anchored>>::uninit();
        let mut dst = MaybeUninit::<Option<Anchored>>::uninit();
        unsafe {
            let slot = src.as_mut_ptr();
            slot.write(Some(Anchored { value: 3, this: ptr::null() }));
            if let Some(inner) = &mut *slot {
                inner.this = ptr::from_ref(inner);
            }
            Option::relocate(src.as_mut_ptr(), dst.as_mut_ptr());
            let moved = dst.assume_init_ref().as_ref().unwrap();
            assert_eq!(moved.value, 3);
            assert!(ptr::eq(moved.this, moved));
        }

        let mut src = MaybeUninit::<[Anchored; 2]>::uninit();
        let mut dst = MaybeUninit::<[Anchored; 2]>::uninit();
        unsafe {
            let base = src.as_mut_ptr().cast::<Anchored>();
            for i in 0..2 {
                let p = base.add(i);
                p.write(Anchored { value: u32::try_from(i).unwrap(), this: p });
            }
            <[Anchored; 2]>::relocate(src.as_mut_ptr(), dst.as_mut_ptr());
            for (i, item) in dst.assume_init_ref().iter().enumerate() {
                assert_eq!(item.value, u32::try_from(i).unwrap());
                assert!(ptr::eq(item.this, item));
            }
        }
    }

    #[test]
    fn test_cell_forwards_to_payload() {
        const {
            assert!(!<Cell<Anchored>>::BITWISE);
        }
        let mut src = MaybeUninit::<Cell<Anchored>>::uninit();
        let mut dst = MaybeUninit::<Cell<Anchored>>::uninit();
        unsafe {
            let inner = src.as_mut_ptr().cast::<Anchored>();
            inner.write(Anchored { value: 9, this: inner });
            Cell::relocate(src.as_mut_ptr(), dst.as_mut_ptr());
            let moved = &*dst.as_ptr().cast::<Anchored>();
            assert_eq!(moved.value, 9);
            assert!(ptr::eq(moved.this, moved));
        }
    }
}

use core::fmt;

use reloco_allocator::{FallibleAllocator, SystemAllocator};
use reloco_error::{EmptyPointerSnafu, Result};
use snafu::OptionExt as _;
use spin::Once;

use super::{SharedPtr, WeakPtr};
use crate::construct::ConstructWith;

/// Slot through which a value finds the shared handle owning it.
///
/// Embed one in a type implementing [`SharedFromThis`]. The slot is filled
/// by the `*_linked*` factories of [`SharedPtr`] once the value has reached
/// its final address. Cloning produces an unlinked slot.
pub struct WeakThis<T, A = SystemAllocator> {
    weak: Once<WeakPtr<T, A>>,
}

impl<T, A> WeakThis<T, A> {
    #[must_use]
    pub const fn new() -> Self {
        Self { weak: Once::new() }
    }

    #[must_use]
    pub fn is_linked(&self) -> bool {
        self.weak.is_completed()
    }

    /// Returns a shared handle to the owning value.
    ///
    /// Fails with `EmptyPointer` when the value was never placed under
    /// shared ownership.
    pub fn lock(&self) -> Result<SharedPtr<T, A>> {
        self.weak.get().context(EmptyPointerSnafu)?.lock()
    }

    /// Returns a weak handle to the owning value, empty when unlinked.
    #[must_use]
    pub fn weak(&self) -> WeakPtr<T, A> {
        self.weak.get().cloned().unwrap_or_default()
    }

    /// Records `weak` unless a handle is already recorded.
    fn link(&self, weak: WeakPtr<T, A>) {
        self.weak.call_once(|| weak);
    }
}

impl<T, A> Default for WeakThis<T, A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, A> Clone for WeakThis<T, A> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T, A> fmt::Debug for WeakThis<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakThis")
            .field("linked", &self.is_linked())
            .finish()
    }
}

/// Values able to produce the shared handle that owns them.
///
/// # Examples
///
/// ```
/// use reloco::{ErrorKind, SharedFromThis, SharedPtr, WeakThis};
///
/// #[derive(Debug, Default)]
/// struct Session {
///     this: WeakThis<Session>,
/// }
///
/// impl SharedFromThis for Session {
///     fn weak_this(&self) -> &WeakThis<Self> {
///         &self.this
///     }
/// }
///
/// let session = SharedPtr::try_new_linked(Session::default()).unwrap();
/// let again = session.shared_from_this().unwrap();
/// assert!(again.ptr_eq(&session));
///
/// let detached = Session::default();
/// assert_eq!(detached.shared_from_this().unwrap_err().kind(), ErrorKind::EmptyPointer);
/// ```
pub trait SharedFromThis<A = SystemAllocator>: Sized {
    fn weak_this(&self) -> &WeakThis<Self, A>;

    fn shared_from_this(&self) -> Result<SharedPtr<Self, A>> {
        self.weak_this().lock()
    }

    fn weak_from_this(&self) -> WeakPtr<Self, A> {
        self.weak_this().weak()
    }
}

impl<T: SharedFromThis> SharedPtr<T> {
    /// Like [`try_new_combined`](Self::try_new_combined), then links the
    /// value's [`WeakThis`] to the new handle.
    pub fn try_new_linked(value: T) -> Result<Self> {
        Self::try_new_linked_in(value, SystemAllocator)
    }
}

impl<T, A> SharedPtr<T, A>
where
    T: SharedFromThis<A>,
    A: FallibleAllocator,
{
    /// Like [`try_new_combined_in`](Self::try_new_combined_in), then links
    /// the value's [`WeakThis`] to the new handle.
    pub fn try_new_linked_in(value: T, alloc: A) -> Result<Self> {
        let this = Self::try_new_combined_in(value, alloc)?;
        this.link_self();
        Ok(this)
    }

    /// Like [`try_construct_combined_in`](Self::try_construct_combined_in),
    /// then links the value's [`WeakThis`] to the new handle.
    pub fn try_construct_linked_in<Args>(alloc: A, args: Args) -> Result<Self>
    where
        T: ConstructWith<A, Args>,
    {
        let this = Self::try_construct_combined_in(alloc, args)?;
        this.link_self();
        Ok(this)
    }

    /// Like [`try_new_in`](Self::try_new_in), then links the value's
    /// [`WeakThis`] to the new handle.
    pub fn try_new_linked_separate_in(value: T, alloc: A) -> Result<Self> {
        let this = Self::try_new_in(value, alloc)?;
        this.link_self();
        Ok(this)
    }

    /// Like [`try_construct_in`](Self::try_construct_in), then links the
    /// value's [`WeakThis`] to the new handle.
    pub fn try_construct_linked_separate_in<Args>(alloc: A, args: Args) -> Result<Self>
    where
        T: ConstructWith<A, Args>,
    {
        let this = Self::try_construct_in(alloc, args)?;
        this.link_self();
        Ok(this)
    }

    fn link_self(&self) {
        if let Some(value) = self.get() {
            value.weak_this().link(self.downgrade());
        }
    }
}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicUsize, Ordering};

    use reloco_error::ErrorKind;

    use super::*;
    use crate::{
        construct::{Construct, Plain},
        test_util::CountingAllocator,
    };

    #[derive(Debug)]
    struct Node<'a> {
        id: u32,
        this: WeakThis<Node<'a>, &'a CountingAllocator>,
    }

    impl<'a> SharedFromThis<&'a CountingAllocator> for Node<'a> {
        fn weak_this(&self) -> &WeakThis<Self, &'a CountingAllocator> {
            &self.this
        }
    }

    impl From<u32> for Node<'_> {
        fn from(id: u32) -> Self {
            Self {
                id,
                this: WeakThis::new(),
            }
        }
    }

    impl Construct<u32> for Node<'_> {
        type Strategy = Plain;
    }

    #[test]
    fn test_linked_value_finds_its_owner() {
        let alloc = CountingAllocator::new();
        let node = SharedPtr::<Node<'_>, _>::try_construct_linked_in(&alloc, 9_u32).unwrap();
        assert!(node.this.is_linked());
        assert_eq!(node.weak_count(), 1);

        let again = node.shared_from_this().unwrap();
        assert!(again.ptr_eq(&node));
        assert_eq!(again.id, 9);
        assert_eq!(node.use_count(), 2);
        assert_eq!(node.weak_from_this().use_count(), 2);

        drop(again);
        drop(node);
        assert_eq!(alloc.live_blocks(), 0);
    }

    #[test]
    fn test_separate_allocation_links_too() {
        let alloc = CountingAllocator::new();
        let node =
            SharedPtr::<Node<'_>, _>::try_construct_linked_separate_in(&alloc, 4_u32).unwrap();
        assert_eq!(alloc.live_blocks(), 2);
        assert!(node.this.is_linked());
        let again = node.shared_from_this().unwrap();
        assert!(again.ptr_eq(&node));
        assert_eq!(again.id, 4);
        assert_eq!(node.use_count(), 2);
        drop(again);

        let moved = SharedPtr::try_new_linked_separate_in(Node::from(5), &alloc).unwrap();
        assert_eq!(alloc.live_blocks(), 4);
        let again = moved.shared_from_this().unwrap();
        assert!(again.ptr_eq(&moved));
        assert_eq!(again.id, 5);

        drop((again, moved, node));
        assert_eq!(alloc.live_blocks(), 0);
    }

    #[test]
    fn test_unlinked_value_reports_empty() {
        let alloc = CountingAllocator::new();
        let node = Node::from(1);
        assert_eq!(
            node.shared_from_this().unwrap_err().kind(),
            ErrorKind::EmptyPointer
        );
        assert!(node.weak_from_this().is_empty());

        let shared = SharedPtr::try_new_combined_in(Node::from(2), &alloc).unwrap();
        assert!(shared.shared_from_this().is_err());
    }

    #[test]
    fn test_clone_of_slot_is_unlinked() {
        let node = SharedPtr::try_new_linked(Linked::default()).unwrap();
        let copy = node.this.clone();
        assert!(!copy.is_linked());
        assert_eq!(node.this.lock().unwrap().value.load(Ordering::Relaxed), 0);
    }

    #[derive(Debug, Default)]
    struct Linked {
        value: AtomicUsize,
        this: WeakThis<Linked>,
    }

    impl SharedFromThis for Linked {
        fn weak_this(&self) -> &WeakThis<Self> {
            &self.this
        }
    }
}

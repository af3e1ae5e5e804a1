use std::{fmt, marker::PhantomData, mem, ptr::NonNull};

use crate::{block::BlockRef, shared::Shared};

/// `Weak` is a non-owning observer of an object managed by [`Shared`].
///
/// It keeps the control block allocated, so its counts stay readable, but it does not keep
/// the object alive. Once the last `Shared` is gone the object is destroyed and every
/// `Weak` reports [`Weak::expired`]; the block itself is freed when the last `Weak` goes
/// away as well.
///
/// A `Weak` cannot reach the object directly and must be promoted back to a `Shared`,
/// either leniently with [`Weak::lock`] or strictly with [`Shared::from_weak`].
///
/// One use case is a tree: parents own their children through `Shared`, and children
/// point back to their parents through `Weak`, so the two never keep each other alive.
///
/// A `Weak` has the element type of the `Shared` it came from. To observe a part of an
/// object, or the object as another type, project the `Shared` first with
/// [`Shared::alias`] or [`Shared::map`] and downgrade the result.
///
/// To prevent name clashes, `Weak<T>`'s functions are associated.
///
/// ```
/// use rcblock::{Shared, Weak};
///
/// let shared = Shared::new(100);
/// let weak = Shared::downgrade(&shared);
/// assert_eq!(*Weak::lock(&weak), 100);
///
/// drop(shared);
/// assert!(Weak::expired(&weak));
/// assert!(Shared::is_empty(&Weak::lock(&weak)));
/// ```
pub struct Weak<T: ?Sized> {
    block: Option<BlockRef>,
    ptr: Option<NonNull<T>>,
    primary: bool,
    __type: PhantomData<T>,
}

impl<T: ?Sized> Weak<T> {
    /// A `Weak` that observes nothing and is always expired.
    #[inline]
    pub const fn new() -> Self {
        Self {
            block: None,
            ptr: None,
            primary: false,
            __type: PhantomData,
        }
    }

    /// # Safety
    ///
    /// If `block` is `Some`, the caller transfers exactly one weak count on it. `primary`
    /// carries over from the [`Shared`] this handle observes.
    #[inline]
    pub(crate) unsafe fn from_parts(
        block: Option<BlockRef>,
        ptr: Option<NonNull<T>>,
        primary: bool,
    ) -> Self {
        Self {
            block,
            ptr,
            primary,
            __type: PhantomData,
        }
    }

    #[inline]
    pub(crate) fn parts(this: &Self) -> (Option<BlockRef>, Option<NonNull<T>>, bool) {
        (this.block, this.ptr, this.primary)
    }

    /// `true` once the observed object has been destroyed, or if there never was one.
    #[inline]
    pub fn expired(this: &Self) -> bool {
        this.block.map_or(true, |block| block.strong() == 0)
    }

    /// Promotes to a [`Shared`], or returns an empty one if the object is gone.
    /// ```
    /// use rcblock::{Shared, Weak};
    ///
    /// let shared = Shared::new(1);
    /// let weak = Shared::downgrade(&shared);
    /// let locked = Weak::lock(&weak);
    /// assert_eq!(Shared::use_count(&locked), 2);
    /// assert!(locked == shared);
    /// ```
    #[inline]
    pub fn lock(this: &Self) -> Shared<T> {
        Shared::from_weak(this).unwrap_or_default()
    }

    /// The number of [`Shared`] handles keeping the object alive.
    #[inline]
    pub fn use_count(this: &Self) -> usize {
        this.block.map_or(0, |block| block.strong())
    }

    /// The number of `Weak` handles observing the same control block.
    /// ```
    /// use rcblock::{Shared, Weak};
    ///
    /// let shared = Shared::new(100);
    /// let weak1 = Shared::downgrade(&shared);
    /// let weak2 = weak1.clone();
    /// assert_eq!(Weak::weak_count(&weak2), 2);
    /// ```
    #[inline]
    pub fn weak_count(this: &Self) -> usize {
        this.block.map_or(0, |block| block.weak())
    }

    /// The address this handle was created with. It may dangle once the handle expired.
    #[inline]
    pub fn as_ptr(this: &Self) -> Option<NonNull<T>> {
        this.ptr
    }

    /// Whether two handles observe the same control block.
    #[inline]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.block == other.block
    }

    /// Stops observing, leaving an empty handle. Frees the control block if this was the
    /// last reference of either kind.
    #[inline]
    pub fn reset(this: &mut Self) {
        drop(Self::take(this));
    }

    /// Moves the observation out, leaving an empty handle behind. No count changes.
    #[inline]
    pub fn take(this: &mut Self) -> Self {
        mem::take(this)
    }

    /// Exchanges the contents of two handles. No count changes.
    #[inline]
    pub fn swap(this: &mut Self, other: &mut Self) {
        mem::swap(this, other);
    }
}

impl<T: ?Sized> Clone for Weak<T> {
    /// Shares the control block and increments its weak count.
    #[inline]
    fn clone(&self) -> Self {
        if let Some(block) = self.block {
            block.inc_weak();
        }
        unsafe { Self::from_parts(self.block, self.ptr, self.primary) }
    }

    #[inline]
    fn clone_from(&mut self, source: &Self) {
        if self.block == source.block {
            self.ptr = source.ptr;
            self.primary = source.primary;
            return;
        }
        *self = source.clone();
    }
}

impl<T: ?Sized> Drop for Weak<T> {
    #[inline]
    fn drop(&mut self) {
        if let Some(block) = self.block.take() {
            unsafe { block.release_weak() };
        }
    }
}

impl<T: ?Sized> Default for Weak<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> From<&Shared<T>> for Weak<T> {
    /// Equivalent to [`Shared::downgrade`].
    fn from(shared: &Shared<T>) -> Self {
        Shared::downgrade(shared)
    }
}

impl<T: ?Sized> fmt::Debug for Weak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(Weak)")
    }
}

use std::{
    fmt::{self, Debug, Display, Pointer},
    hash::{Hash, Hasher},
    marker::PhantomData,
    mem,
    ops::Deref,
    ptr::NonNull,
};

use crate::{
    block::{BlockRef, EmplaceBlock, PointerBlock},
    error::ExpiredError,
    this::{SelfSlot, SharedFromSelf},
    weak::Weak,
};

/// `Shared` is an owning, reference-counted handle to a heap-allocated object.
///
/// Every non-empty `Shared` holds one strong count on a control block. The block decides
/// when the object dies (the last strong count goes away) and, separately, when the
/// block's own memory is handed back (the last strong *and* the last weak count are gone).
/// See [`Weak`] for the observer side.
///
/// ## Construction
/// * [`Shared::new`] moves the value into the control block: one allocation in total.
/// * [`Shared::from_box`] adopts an existing box and allocates a block beside it. The box
///   may hold an unsized value such as a trait object.
/// * [`Shared::new_with_self`] and [`Shared::from_box_with_self`] build objects that
///   implement [`SharedFromSelf`]. They hand the object its [`SelfSlot`] and fill it in, and
///   they are the only way to get hold of a slot, so such an object is never managed
///   without being linked.
///
/// ## Aliasing
/// A `Shared` caches the address it dereferences to. [`Shared::alias`] and
/// [`Shared::map`] hand out handles that keep the whole object alive while pointing at a
/// part of it (or at the same object seen as another type, e.g. `dyn Trait`). Destruction
/// always goes through the control block, never through the cached address.
///
/// Only a handle that still points at the block's own object, as its own type, can be
/// borrowed mutably through [`Shared::get_mut`]. Aliases never can.
///
/// ## Equality
/// Two handles that own a block are equal when they point at the same address, whatever
/// their element types. Two empty handles are equal to each other, and an empty handle is
/// never equal to one that owns a block, even if that one points at nothing.
///
/// Zero-sized objects have no address of their own: two separately boxed `()` compare
/// equal. Use [`Shared::owner_eq`] to tell such handles apart.
///
/// To prevent name clashes with the pointee's methods, `Shared<T>`'s functions are
/// associated.
///
/// ```
/// use rcblock::Shared;
///
/// let first = Shared::new(42);
/// let second = first.clone();
/// assert_eq!(Shared::use_count(&first), 2);
/// assert_eq!(*second, 42);
///
/// drop(first);
/// assert_eq!(Shared::use_count(&second), 1);
/// ```
pub struct Shared<T: ?Sized> {
    block: Option<BlockRef>,
    ptr: Option<NonNull<T>>,
    // `ptr` is the object the block was built around, seen as its own type.
    primary: bool,
    __type: PhantomData<T>,
}

impl<T> Shared<T> {
    /// Moves `value` into a freshly allocated control block.
    ///
    /// The object and its counts share a single allocation.
    /// ```
    /// use rcblock::Shared;
    ///
    /// let shared = Shared::new(100);
    /// assert_eq!(*shared, 100);
    /// assert_eq!(Shared::use_count(&shared), 1);
    /// ```
    #[inline]
    pub fn new(value: T) -> Self {
        let (block, ptr) = EmplaceBlock::allocate(value);
        unsafe { Self::from_parts(Some(block), Some(ptr), true) }
    }

    /// Builds a [`SharedFromSelf`] object with `build`, moves it into a control block as
    /// [`Shared::new`] does, and links the object's slot to the new handle.
    /// ```
    /// use rcblock::{SelfSlot, Shared, SharedFromSelf};
    ///
    /// struct Task {
    ///     this: SelfSlot<Task>,
    /// }
    ///
    /// impl SharedFromSelf for Task {
    ///     fn self_slot(&self) -> &SelfSlot<Self> {
    ///         &self.this
    ///     }
    /// }
    ///
    /// let task = Shared::new_with_self(|this| Task { this });
    /// assert!(task.this.is_linked());
    /// assert!(task.shared_from_self() == task);
    /// ```
    #[inline]
    pub fn new_with_self<F>(build: F) -> Self
    where
        T: SharedFromSelf,
        F: FnOnce(SelfSlot<T>) -> T,
    {
        let this = Self::new(build(SelfSlot::new()));
        Self::link_self(&this);
        this
    }
}

impl<T: ?Sized> Shared<T> {
    /// A handle that owns nothing.
    /// ```
    /// use rcblock::Shared;
    ///
    /// let shared = Shared::<i32>::empty();
    /// assert!(Shared::is_empty(&shared));
    /// assert_eq!(Shared::use_count(&shared), 0);
    /// ```
    #[inline]
    pub const fn empty() -> Self {
        Self {
            block: None,
            ptr: None,
            primary: false,
            __type: PhantomData,
        }
    }

    /// Takes ownership of a boxed object, allocating a separate control block for it.
    /// ```
    /// use std::fmt::Display;
    /// use rcblock::Shared;
    ///
    /// let shared: Shared<dyn Display> = Shared::from_box(Box::new(7));
    /// assert_eq!(shared.to_string(), "7");
    /// ```
    #[inline]
    pub fn from_box(object: Box<T>) -> Self {
        let (block, ptr) = PointerBlock::allocate(object);
        unsafe { Self::from_parts(Some(block), Some(ptr), true) }
    }

    /// Builds a boxed [`SharedFromSelf`] object with `build`, adopts the box as
    /// [`Shared::from_box`] does, and links the object's slot to the new handle.
    #[inline]
    pub fn from_box_with_self<F>(build: F) -> Self
    where
        T: SharedFromSelf,
        F: FnOnce(SelfSlot<T>) -> Box<T>,
    {
        let this = Self::from_box(build(SelfSlot::new()));
        Self::link_self(&this);
        this
    }

    /// Promotes a [`Weak`], failing if the object it observes has been destroyed.
    ///
    /// Use [`Weak::lock`] to get an empty handle instead of an error.
    /// ```
    /// use rcblock::{ExpiredError, Shared};
    ///
    /// let shared = Shared::new(5);
    /// let weak = Shared::downgrade(&shared);
    /// let promoted = Shared::from_weak(&weak).unwrap();
    /// assert_eq!(Shared::use_count(&promoted), 2);
    ///
    /// drop(shared);
    /// drop(promoted);
    /// assert_eq!(Shared::from_weak(&weak).unwrap_err(), ExpiredError);
    /// ```
    pub fn from_weak(weak: &Weak<T>) -> Result<Self, ExpiredError> {
        let (block, ptr, primary) = Weak::parts(weak);
        match block {
            Some(block) if block.try_inc_strong() => {
                Ok(unsafe { Self::from_parts(Some(block), ptr, primary) })
            }
            _ => Err(ExpiredError),
        }
    }

    /// Builds a handle around a block whose strong count the caller already took.
    ///
    /// # Safety
    ///
    /// If `block` is `Some`, the caller transfers exactly one strong count on it, and `ptr`
    /// must stay valid for as long as that block's object is alive. `primary` may only be
    /// set when `ptr` is that object itself.
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

    fn link_self(this: &Self)
    where
        T: SharedFromSelf,
    {
        if let Some(object) = Self::get(this) {
            object.self_slot().link(Self::downgrade(this));
        }
    }

    /// Hands out a handle to something reachable from this object, sharing its lifetime.
    ///
    /// The new handle increments the strong count, so the whole object stays alive while
    /// the alias does, even if every other handle is reset. This also converts between
    /// element types, for instance to a trait object.
    /// ```
    /// use rcblock::Shared;
    ///
    /// struct Pair { left: i32, right: i32 }
    ///
    /// let pair = Shared::new(Pair { left: 1, right: 2 });
    /// let right = Shared::alias(&pair, |p| &p.right);
    /// drop(pair);
    /// assert_eq!(*right, 2);
    /// ```
    pub fn alias<U: ?Sized, F>(this: &Self, project: F) -> Shared<U>
    where
        F: for<'a> FnOnce(&'a T) -> &'a U,
    {
        match Self::get(this) {
            Some(object) => {
                let ptr = NonNull::from(project(object));
                if let Some(block) = this.block {
                    block.inc_strong();
                }
                unsafe { Shared::from_parts(this.block, Some(ptr), false) }
            }
            None => Shared::empty(),
        }
    }

    /// Hands out a handle that shares this one's control block but points at `ptr`.
    ///
    /// The strong count is incremented if this handle owns a block. `ptr` may be null, in
    /// which case the alias owns a count but dereferences to nothing.
    ///
    /// # Safety
    ///
    /// `ptr` must be either null or valid for reads for as long as this handle's object
    /// is alive (for an empty handle: for as long as the alias is used).
    pub unsafe fn alias_raw<U: ?Sized>(this: &Self, ptr: *const U) -> Shared<U> {
        if let Some(block) = this.block {
            block.inc_strong();
        }
        Shared::from_parts(this.block, NonNull::new(ptr as *mut U), false)
    }

    /// The moving counterpart of [`Shared::alias`]: the count is handed over, not copied.
    /// ```
    /// use std::fmt::Debug;
    /// use rcblock::Shared;
    ///
    /// let numbers = Shared::new(vec![1, 2, 3]);
    /// let debug: Shared<dyn Debug> = Shared::map(numbers, |v| v as &(dyn Debug + 'static));
    /// assert_eq!(format!("{:?}", debug), "[1, 2, 3]");
    /// assert_eq!(Shared::use_count(&debug), 1);
    /// ```
    pub fn map<U: ?Sized, F>(this: Self, project: F) -> Shared<U>
    where
        F: for<'a> FnOnce(&'a T) -> &'a U,
    {
        let ptr = Self::get(&this).map(|object| NonNull::from(project(object)));
        let this = mem::ManuallyDrop::new(this);
        unsafe { Shared::from_parts(this.block, ptr, false) }
    }

    /// Creates a [`Weak`] observing the same object. This increments the weak count.
    /// ```
    /// use rcblock::Shared;
    ///
    /// let shared = Shared::new(100);
    /// let weak = Shared::downgrade(&shared);
    /// assert_eq!(Shared::weak_count(&shared), 1);
    /// ```
    #[inline]
    pub fn downgrade(this: &Self) -> Weak<T> {
        if let Some(block) = this.block {
            block.inc_weak();
        }
        unsafe { Weak::from_parts(this.block, this.ptr, this.primary) }
    }

    /// Releases this handle's ownership, leaving it empty.
    ///
    /// If it was the last strong owner, the object is destroyed; if no weak handle is left
    /// either, the control block is freed too.
    #[inline]
    pub fn reset(this: &mut Self) {
        drop(Self::take(this));
    }

    /// Releases this handle's ownership and adopts `object` instead, as [`Shared::from_box`]
    /// would.
    #[inline]
    pub fn reset_to(this: &mut Self, object: Box<T>) {
        *this = Self::from_box(object);
    }

    /// Moves the ownership out, leaving an empty handle behind. No count changes.
    #[inline]
    pub fn take(this: &mut Self) -> Self {
        mem::take(this)
    }

    /// Exchanges the contents of two handles. No count changes.
    #[inline]
    pub fn swap(this: &mut Self, other: &mut Self) {
        mem::swap(this, other);
    }

    /// A reference to the object, or `None` for an empty handle.
    #[inline]
    pub fn get(this: &Self) -> Option<&T> {
        // A non-null address is valid while this handle holds its strong count.
        this.ptr.map(|ptr| unsafe { &*ptr.as_ptr() })
    }

    /// The cached object address.
    #[inline]
    pub fn as_ptr(this: &Self) -> Option<NonNull<T>> {
        this.ptr
    }

    /// A mutable reference to the object if no other `Shared` or [`Weak`] shares its block.
    ///
    /// Handles made by [`Shared::alias`], [`Shared::alias_raw`] or [`Shared::map`] point at
    /// something the block does not necessarily own, and always get `None`.
    /// ```
    /// use rcblock::Shared;
    ///
    /// let mut shared = Shared::new(1);
    /// *Shared::get_mut(&mut shared).unwrap() = 2;
    /// assert_eq!(*shared, 2);
    ///
    /// let weak = Shared::downgrade(&shared);
    /// assert!(Shared::get_mut(&mut shared).is_none());
    /// # drop(weak);
    /// ```
    #[inline]
    pub fn get_mut(this: &mut Self) -> Option<&mut T> {
        let block = this.block?;
        if !this.primary || block.strong() != 1 || block.weak() != 0 {
            return None;
        }
        this.ptr.map(|ptr| unsafe { &mut *ptr.as_ptr() })
    }

    /// The number of `Shared` handles sharing this handle's control block, or 0 when empty.
    #[inline]
    pub fn use_count(this: &Self) -> usize {
        this.block.map_or(0, |block| block.strong())
    }

    /// The number of [`Weak`] handles observing this handle's control block, or 0 when
    /// empty. Objects linked by [`Shared::new_with_self`] keep one of these themselves.
    #[inline]
    pub fn weak_count(this: &Self) -> usize {
        this.block.map_or(0, |block| block.weak())
    }

    /// `true` when the handle owns no control block.
    #[inline]
    pub fn is_empty(this: &Self) -> bool {
        this.block.is_none()
    }

    /// Whether two handles share the same control block, whatever they point at.
    /// ```
    /// use rcblock::Shared;
    ///
    /// #[repr(C)]
    /// struct Pair { left: u32, right: u32 }
    ///
    /// let pair = Shared::new(Pair { left: 1, right: 2 });
    /// let right = Shared::alias(&pair, |p| &p.right);
    /// assert!(Shared::owner_eq(&pair, &right));
    /// assert!(pair != right);
    /// # assert_eq!(pair.left, 1);
    /// ```
    #[inline]
    pub fn owner_eq<U: ?Sized>(this: &Self, other: &Shared<U>) -> bool {
        this.block == other.block
    }

    #[inline]
    fn address(&self) -> Option<NonNull<()>> {
        self.ptr.map(NonNull::cast)
    }
}

impl<T: ?Sized> Clone for Shared<T> {
    /// Shares the control block and increments its strong count.
    #[inline]
    fn clone(&self) -> Self {
        if let Some(block) = self.block {
            block.inc_strong();
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

impl<T: ?Sized> Drop for Shared<T> {
    #[inline]
    fn drop(&mut self) {
        if let Some(block) = self.block.take() {
            unsafe { block.release_strong() };
        }
    }
}

impl<T: ?Sized> Deref for Shared<T> {
    type Target = T;

    /// Dereferences the cached address.
    ///
    /// # Panics
    ///
    /// Panics if the handle does not point at anything.
    #[inline]
    fn deref(&self) -> &T {
        match Self::get(self) {
            Some(object) => object,
            None => null_deref(),
        }
    }
}

#[cold]
#[inline(never)]
fn null_deref() -> ! {
    panic!("dereferenced an empty `Shared`")
}

impl<T: ?Sized> Default for Shared<T> {
    #[inline]
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: ?Sized> AsRef<T> for Shared<T> {
    fn as_ref(&self) -> &T {
        self
    }
}

impl<T: ?Sized, U: ?Sized> PartialEq<Shared<U>> for Shared<T> {
    /// Address comparison between owning handles. Empty handles only equal each other.
    #[inline]
    fn eq(&self, other: &Shared<U>) -> bool {
        match (self.block, other.block) {
            (None, None) => true,
            (Some(_), Some(_)) => self.address() == other.address(),
            _ => false,
        }
    }
}

impl<T: ?Sized> Eq for Shared<T> {}

impl<T: ?Sized> Hash for Shared<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.block.is_some().hash(state);
        self.address().hash(state);
    }
}

impl<T: ?Sized + Display> Display for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Self::get(self) {
            Some(object) => Display::fmt(object, f),
            None => f.write_str("null"),
        }
    }
}

impl<T: ?Sized + Debug> Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Self::get(self) {
            Some(object) => Debug::fmt(object, f),
            None => f.write_str("null"),
        }
    }
}

impl<T: ?Sized> Pointer for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let address = self.address().map_or(std::ptr::null(), |ptr| ptr.as_ptr() as *const ());
        Pointer::fmt(&address, f)
    }
}

impl<T> From<T> for Shared<T> {
    /// Equivalent to [`Shared::new`].
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: ?Sized> From<Box<T>> for Shared<T> {
    /// Equivalent to [`Shared::from_box`].
    fn from(object: Box<T>) -> Self {
        Self::from_box(object)
    }
}

impl<T: ?Sized> TryFrom<&Weak<T>> for Shared<T> {
    type Error = ExpiredError;

    /// Equivalent to [`Shared::from_weak`].
    fn try_from(weak: &Weak<T>) -> Result<Self, Self::Error> {
        Self::from_weak(weak)
    }
}

#[cfg(feature = "serde")]
impl<T: ?Sized + serde::Serialize> serde::Serialize for Shared<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serde::Serialize::serialize(&Self::get(self), serializer)
    }
}

#[cfg(feature = "serde")]
impl<'de, T: serde::Deserialize<'de>> serde::Deserialize<'de> for Shared<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = <Option<T> as serde::Deserialize>::deserialize(deserializer)?;
        Ok(value.map(Self::new).unwrap_or_default())
    }
}

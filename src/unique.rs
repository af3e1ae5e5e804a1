//! The exclusive-ownership handle.
//!
//! [`Unique`] pairs an address with a [`Deleter`]. It shares nothing with the
//! [`Shared`](crate::Shared)/[`Weak`](crate::Weak) machinery. A deleter without state is a
//! zero-sized type, so `Unique<T>` with the [`DefaultDeleter`] is exactly one pointer wide.

use std::{
    fmt::{self, Debug, Display, Pointer},
    marker::PhantomData,
    mem,
    ops::{Deref, DerefMut},
    ptr::NonNull,
};

/// Decides how a [`Unique`] gets rid of the object it owns.
///
/// Any `FnMut(NonNull<T>)` closure is a deleter.
pub trait Deleter<T: ?Sized> {
    /// Destroys the object at `ptr` and releases its memory.
    ///
    /// # Safety
    ///
    /// `ptr` must be an object this deleter is able to dispose of, and must not be used
    /// afterwards.
    unsafe fn delete(&mut self, ptr: NonNull<T>);
}

/// Frees objects that were allocated with [`Box`]. Works for slices and trait objects too.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DefaultDeleter;

impl<T: ?Sized> Deleter<T> for DefaultDeleter {
    #[inline]
    unsafe fn delete(&mut self, ptr: NonNull<T>) {
        drop(Box::from_raw(ptr.as_ptr()));
    }
}

impl<T: ?Sized, F: FnMut(NonNull<T>)> Deleter<T> for F {
    #[inline]
    unsafe fn delete(&mut self, ptr: NonNull<T>) {
        self(ptr)
    }
}

/// `Unique` is a move-only owning handle: exactly one deletion happens for every object it
/// takes over, on drop, on [`Unique::reset`], or when it is overwritten.
///
/// To prevent name clashes with the pointee's methods, `Unique`'s functions are associated.
///
/// ```
/// use rcblock::Unique;
///
/// let mut unique = Unique::new(String::from("owned"));
/// unique.push('!');
/// assert_eq!(*unique, "owned!");
///
/// let boxed = Unique::into_box(unique).unwrap();
/// assert_eq!(*boxed, "owned!");
/// ```
pub struct Unique<T: ?Sized, D: Deleter<T> = DefaultDeleter> {
    ptr: Option<NonNull<T>>,
    deleter: D,
    __type: PhantomData<T>,
}

impl<T> Unique<T> {
    /// Boxes `value` and takes ownership of it.
    #[inline]
    pub fn new(value: T) -> Self {
        Self::from_box(Box::new(value))
    }
}

impl<T: ?Sized> Unique<T> {
    /// Takes ownership of a boxed object.
    /// ```
    /// use rcblock::Unique;
    ///
    /// let numbers: Unique<[u8]> = Unique::from_box(vec![1, 2, 3].into_boxed_slice());
    /// assert_eq!(numbers.len(), 3);
    /// ```
    #[inline]
    pub fn from_box(object: Box<T>) -> Self {
        Self {
            ptr: Some(NonNull::from(Box::leak(object))),
            deleter: DefaultDeleter,
            __type: PhantomData,
        }
    }

    /// Deletes the current object, if any, and takes ownership of `object`.
    #[inline]
    pub fn reset_to(this: &mut Self, object: Box<T>) {
        *this = Self::from_box(object);
    }

    /// Gives the object back as a box, leaving nothing to delete.
    #[inline]
    pub fn into_box(mut this: Self) -> Option<Box<T>> {
        Self::release(&mut this).map(|ptr| unsafe { Box::from_raw(ptr.as_ptr()) })
    }
}

impl<T: ?Sized, D: Deleter<T>> Unique<T, D> {
    /// Takes ownership of `ptr`, to be disposed of by `deleter`. A null `ptr` gives an
    /// empty handle.
    ///
    /// # Safety
    ///
    /// A non-null `ptr` must be valid for reads and writes until `deleter` runs, and
    /// `deleter` must be able to dispose of it.
    /// ```
    /// use std::ptr::NonNull;
    /// use rcblock::Unique;
    ///
    /// let raw = Box::into_raw(Box::new(5));
    /// let unique = unsafe {
    ///     Unique::from_raw_parts(raw, |ptr: NonNull<i32>| drop(Box::from_raw(ptr.as_ptr())))
    /// };
    /// assert_eq!(*unique, 5);
    /// ```
    #[inline]
    pub unsafe fn from_raw_parts(ptr: *mut T, deleter: D) -> Self {
        Self {
            ptr: NonNull::new(ptr),
            deleter,
            __type: PhantomData,
        }
    }

    /// An empty handle with the given deleter.
    #[inline]
    pub fn null(deleter: D) -> Self {
        Self {
            ptr: None,
            deleter,
            __type: PhantomData,
        }
    }

    /// Gives up ownership without deleting anything and returns the address.
    #[inline]
    pub fn release(this: &mut Self) -> Option<NonNull<T>> {
        this.ptr.take()
    }

    /// Deletes the current object, if any, leaving the handle empty.
    #[inline]
    pub fn reset(this: &mut Self) {
        if let Some(ptr) = this.ptr.take() {
            unsafe { this.deleter.delete(ptr) };
        }
    }

    /// Deletes the current object, if any, and takes ownership of `ptr`.
    ///
    /// # Safety
    ///
    /// Same contract as [`Unique::from_raw_parts`] for `ptr` and this handle's deleter.
    #[inline]
    pub unsafe fn reset_raw(this: &mut Self, ptr: *mut T) {
        let old = mem::replace(&mut this.ptr, NonNull::new(ptr));
        if let Some(old) = old {
            this.deleter.delete(old);
        }
    }

    /// Exchanges objects and deleters with `other`.
    #[inline]
    pub fn swap(this: &mut Self, other: &mut Self) {
        mem::swap(this, other);
    }

    #[inline]
    pub fn get(this: &Self) -> Option<&T> {
        this.ptr.map(|ptr| unsafe { &*ptr.as_ptr() })
    }

    #[inline]
    pub fn get_mut(this: &mut Self) -> Option<&mut T> {
        this.ptr.map(|ptr| unsafe { &mut *ptr.as_ptr() })
    }

    #[inline]
    pub fn as_ptr(this: &Self) -> Option<NonNull<T>> {
        this.ptr
    }

    #[inline]
    pub fn is_null(this: &Self) -> bool {
        this.ptr.is_none()
    }

    #[inline]
    pub fn deleter(this: &Self) -> &D {
        &this.deleter
    }

    #[inline]
    pub fn deleter_mut(this: &mut Self) -> &mut D {
        &mut this.deleter
    }
}

impl<T: ?Sized, D: Deleter<T>> Drop for Unique<T, D> {
    #[inline]
    fn drop(&mut self) {
        Self::reset(self);
    }
}

impl<T: ?Sized, D: Deleter<T>> Deref for Unique<T, D> {
    type Target = T;

    /// # Panics
    ///
    /// Panics if the handle is empty.
    #[inline]
    fn deref(&self) -> &T {
        match Self::get(self) {
            Some(object) => object,
            None => null_deref(),
        }
    }
}

impl<T: ?Sized, D: Deleter<T>> DerefMut for Unique<T, D> {
    /// # Panics
    ///
    /// Panics if the handle is empty.
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        match Self::get_mut(self) {
            Some(object) => object,
            None => null_deref(),
        }
    }
}

#[cold]
#[inline(never)]
fn null_deref() -> ! {
    panic!("dereferenced an empty `Unique`")
}

impl<T: ?Sized, D: Deleter<T> + Default> Default for Unique<T, D> {
    #[inline]
    fn default() -> Self {
        Self::null(D::default())
    }
}

impl<T: ?Sized, D: Deleter<T>> AsRef<T> for Unique<T, D> {
    fn as_ref(&self) -> &T {
        self
    }
}

impl<T: ?Sized, D: Deleter<T>> AsMut<T> for Unique<T, D> {
    fn as_mut(&mut self) -> &mut T {
        self
    }
}

impl<T: ?Sized> From<Box<T>> for Unique<T> {
    fn from(object: Box<T>) -> Self {
        Self::from_box(object)
    }
}

impl<T: ?Sized + Display, D: Deleter<T>> Display for Unique<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Self::get(self) {
            Some(object) => Display::fmt(object, f),
            None => f.write_str("null"),
        }
    }
}

impl<T: ?Sized + Debug, D: Deleter<T>> Debug for Unique<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Self::get(self) {
            Some(object) => Debug::fmt(object, f),
            None => f.write_str("null"),
        }
    }
}

impl<T: ?Sized, D: Deleter<T>> Pointer for Unique<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let address = self.ptr.map_or(std::ptr::null(), |ptr| ptr.as_ptr() as *const ());
        Pointer::fmt(&address, f)
    }
}

//! Letting a managed object hand out handles to itself.
//!
//! A type opts in by embedding a [`SelfSlot`] and implementing [`SharedFromSelf`]. Slots
//! are only handed out by [`Shared::new_with_self`] and [`Shared::from_box_with_self`],
//! which fill them in once the object is in place. From then on the object can produce
//! new [`Shared`] and [`Weak`] handles from a plain `&self`.

use std::{cell::OnceCell, fmt, ptr::NonNull};

use crate::{shared::Shared, weak::Weak};

/// Where a [`SharedFromSelf`] object remembers the control block that manages it.
///
/// The slot is written once, right after the object is wrapped. It holds a weak reference,
/// so it never keeps its own object alive. A slot cannot be created or cloned outside the
/// `*_with_self` constructors of [`Shared`].
pub struct SelfSlot<T: ?Sized> {
    weak: OnceCell<Weak<T>>,
}

impl<T: ?Sized> SelfSlot<T> {
    #[inline]
    pub(crate) const fn new() -> Self {
        Self {
            weak: OnceCell::new(),
        }
    }

    /// Whether a [`Shared`] constructor has recorded itself here.
    #[inline]
    pub fn is_linked(&self) -> bool {
        self.weak.get().is_some()
    }

    pub(crate) fn link(&self, weak: Weak<T>) {
        // Only the first wrapping counts.
        let _ = self.weak.set(weak);
    }
}

impl<T: ?Sized> fmt::Debug for SelfSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelfSlot")
            .field("linked", &self.is_linked())
            .finish()
    }
}

/// Implemented by types that want to produce handles to themselves.
///
/// ```
/// use rcblock::{SelfSlot, Shared, SharedFromSelf};
///
/// struct Node {
///     name: String,
///     this: SelfSlot<Node>,
/// }
///
/// impl SharedFromSelf for Node {
///     fn self_slot(&self) -> &SelfSlot<Self> {
///         &self.this
///     }
/// }
///
/// let node = Shared::new_with_self(|this| Node { name: "root".into(), this });
/// let again = node.shared_from_self();
/// assert_eq!(Shared::use_count(&again), 2);
/// assert!(again == node);
/// assert_eq!(again.name, "root");
/// ```
pub trait SharedFromSelf {
    /// The slot embedded in this object.
    fn self_slot(&self) -> &SelfSlot<Self>;

    /// A new strong handle to this object.
    ///
    /// # Panics
    ///
    /// Panics if the slot this object exposes was not filled in for this very object, or
    /// if the object is being destroyed.
    fn shared_from_self(&self) -> Shared<Self> {
        match Shared::from_weak(linked_weak(self)) {
            Ok(shared) => shared,
            Err(_) => panic!("`shared_from_self` called while the object is being destroyed"),
        }
    }

    /// A new weak handle to this object.
    ///
    /// # Panics
    ///
    /// Panics if the slot this object exposes was not filled in for this very object.
    fn weak_from_self(&self) -> Weak<Self> {
        linked_weak(self).clone()
    }
}

fn linked_weak<T: SharedFromSelf + ?Sized>(object: &T) -> &Weak<T> {
    let own_address = NonNull::from(object).cast::<()>();
    match object.self_slot().weak.get() {
        // The recorded address must be this very object.
        Some(weak) if Weak::as_ptr(weak).map(NonNull::cast) == Some(own_address) => weak,
        _ => panic!("the object is not managed by a `Shared` yet"),
    }
}

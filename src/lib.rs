//! `rcblock` provides three owning handles over heap-allocated values, all single-threaded:
//!
//! * [`Shared<T>`] shares ownership of an object through a reference-counted control block.
//! * [`Weak<T>`] observes an object owned by `Shared` handles without keeping it alive.
//! * [`Unique<T, D>`] owns an object exclusively and disposes of it through a [`Deleter`].
//!
//! The control block tracks two lifetimes. The object lives as long as there are `Shared`
//! handles; the block (and with it the counts that `Weak` handles read) lives as long as
//! there are handles of either kind. When the last `Shared` goes away the object is
//! destroyed immediately, even if `Weak` handles keep the block around.
//!
//! `Shared::new` places the object inside the control block, so object and counts come
//! from a single allocation. `Shared::from_box` adopts an existing box instead, which also
//! makes room for unsized objects such as trait objects.
//!
//! A cycle between `Shared` handles is never freed, because the strong counts never reach
//! zero. Break cycles with `Weak` for back-references. Objects that need to hand out
//! handles to themselves implement [`SharedFromSelf`].
//!
//! ```
//! use rcblock::{Shared, Weak};
//!
//! let shared = Shared::new(String::from("value"));
//! let copy = shared.clone();
//! let weak = Shared::downgrade(&shared);
//! assert_eq!(Shared::use_count(&shared), 2);
//!
//! drop(shared);
//! drop(copy);
//! assert!(Weak::expired(&weak));
//! ```
//!
//! None of the handles are `Send` or `Sync`: the counts are plain integers.

mod block;
pub mod error;
pub mod shared;
pub mod this;
pub mod unique;
pub mod weak;

pub use crate::error::ExpiredError;
pub use crate::shared::Shared;
pub use crate::this::{SelfSlot, SharedFromSelf};
pub use crate::unique::{DefaultDeleter, Deleter, Unique};
pub use crate::weak::Weak;

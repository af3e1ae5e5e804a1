use thiserror::Error;

/// Returned when a [`Weak`](crate::Weak) is promoted strictly but the object it observed
/// is gone.
///
/// [`Weak::lock`](crate::Weak::lock) is the non-failing alternative: it hands back an
/// empty [`Shared`](crate::Shared) instead.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("the referenced object has already been destroyed")]
pub struct ExpiredError;

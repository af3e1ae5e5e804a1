//! Control blocks: the only place that knows how to destroy a managed object and how to
//! give back the memory that tracked it.
//!
//! Every block starts with a [`BlockHeader`] holding the strong and weak counts. The two
//! concrete shapes differ only in where the object lives:
//!
//! * [`PointerBlock`] points at an object that was boxed separately (two allocations).
//! * [`EmplaceBlock`] stores the object inline, right after the header (one allocation).
//!
//! Handles never see the concrete type. They hold a [`BlockRef`], which reaches the
//! object's destructor and the block's deallocation through the function pointers the
//! concrete block left in its header.

use std::{
    cell::Cell,
    fmt,
    mem::ManuallyDrop,
    ptr::{addr_of_mut, NonNull},
};

const MAX_REFCOUNT: usize = (isize::MAX) as usize;

/// The shared prefix of every control block.
#[repr(C)]
pub(crate) struct BlockHeader {
    strong: Cell<usize>,
    weak: Cell<usize>,
    destroyed: Cell<bool>,
    drop_object: unsafe fn(NonNull<BlockHeader>),
    free: unsafe fn(NonNull<BlockHeader>),
}

impl BlockHeader {
    /// A header for a freshly built block of type `B`: one strong owner, no weak ones.
    fn new<B: ControlBlock>() -> Self {
        Self {
            strong: Cell::new(1),
            weak: Cell::new(0),
            destroyed: Cell::new(false),
            drop_object: drop_object_erased::<B>,
            free: free_erased::<B>,
        }
    }
}

/// A concrete control block layout.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]` with a [`BlockHeader`] as their first field, and must
/// be allocated through `Box` so that [`free_erased`] can hand the memory back.
pub(crate) unsafe trait ControlBlock: Sized {
    /// Runs the managed object's destructor. Called at most once per block.
    ///
    /// # Safety
    ///
    /// `this` must point at a live block whose object has not been destroyed yet.
    unsafe fn drop_object(this: NonNull<Self>);
}

unsafe fn drop_object_erased<B: ControlBlock>(header: NonNull<BlockHeader>) {
    B::drop_object(header.cast());
}

unsafe fn free_erased<B: ControlBlock>(header: NonNull<BlockHeader>) {
    drop(Box::from_raw(header.cast::<B>().as_ptr()));
}

/// A block whose object was allocated on its own.
#[repr(C)]
pub(crate) struct PointerBlock<T: ?Sized> {
    header: BlockHeader,
    object: NonNull<T>,
}

impl<T: ?Sized> PointerBlock<T> {
    /// Takes ownership of `object` and allocates a block to track it.
    pub(crate) fn allocate(object: Box<T>) -> (BlockRef, NonNull<T>) {
        let object = NonNull::from(Box::leak(object));
        let block = Box::new(PointerBlock {
            header: BlockHeader::new::<Self>(),
            object,
        });
        let block = NonNull::from(Box::leak(block));

        (BlockRef { ptr: block.cast() }, object)
    }
}

unsafe impl<T: ?Sized> ControlBlock for PointerBlock<T> {
    unsafe fn drop_object(this: NonNull<Self>) {
        let object = (*this.as_ptr()).object;
        drop(Box::from_raw(object.as_ptr()));
    }
}

/// A block that carries its object inline.
#[repr(C)]
pub(crate) struct EmplaceBlock<T> {
    header: BlockHeader,
    object: ManuallyDrop<T>,
}

impl<T> EmplaceBlock<T> {
    /// Moves `value` into a new block. The block and the object share one allocation.
    pub(crate) fn allocate(value: T) -> (BlockRef, NonNull<T>) {
        let block = Box::new(EmplaceBlock {
            header: BlockHeader::new::<Self>(),
            object: ManuallyDrop::new(value),
        });
        let block = NonNull::from(Box::leak(block));

        // `ManuallyDrop<T>` is `repr(transparent)`, so the field address is the object's.
        let object = unsafe { NonNull::new_unchecked(addr_of_mut!((*block.as_ptr()).object)) };

        (BlockRef { ptr: block.cast() }, object.cast())
    }
}

unsafe impl<T> ControlBlock for EmplaceBlock<T> {
    unsafe fn drop_object(this: NonNull<Self>) {
        // The storage stays put; it goes away together with the block.
        ManuallyDrop::drop(&mut *addr_of_mut!((*this.as_ptr()).object));
    }
}

/// An uncounted reference to a control block of any shape.
///
/// Copying a `BlockRef` never touches the counts. The handles decide when a count is
/// owned and release it through [`BlockRef::release_strong`] or
/// [`BlockRef::release_weak`].
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockRef {
    ptr: NonNull<BlockHeader>,
}

impl BlockRef {
    #[inline]
    fn header(&self) -> &BlockHeader {
        // A `BlockRef` is only reachable through a handle that owns a strong or weak count,
        // and either count keeps the block allocated.
        unsafe { self.ptr.as_ref() }
    }

    #[inline]
    pub(crate) fn strong(&self) -> usize {
        self.header().strong.get()
    }

    #[inline]
    pub(crate) fn weak(&self) -> usize {
        self.header().weak.get()
    }

    #[inline]
    pub(crate) fn inc_strong(&self) {
        let strong = &self.header().strong;
        let prev = strong.get();
        if prev >= MAX_REFCOUNT {
            panic!("Overflow of maximum strong reference count.");
        }
        strong.set(prev + 1);
    }

    /// Takes a strong count only if the object is still alive.
    #[inline]
    pub(crate) fn try_inc_strong(&self) -> bool {
        if self.strong() == 0 {
            return false;
        }
        self.inc_strong();
        true
    }

    #[inline]
    fn dec_strong(&self) -> usize {
        let strong = &self.header().strong;
        let count = strong.get() - 1;
        strong.set(count);
        count
    }

    #[inline]
    pub(crate) fn inc_weak(&self) {
        let weak = &self.header().weak;
        let prev = weak.get();
        if prev >= MAX_REFCOUNT {
            panic!("Overflow of maximum weak reference count.");
        }
        weak.set(prev + 1);
    }

    #[inline]
    fn dec_weak(&self) -> usize {
        let weak = &self.header().weak;
        let count = weak.get() - 1;
        weak.set(count);
        count
    }

    /// Destroys the managed object unless that already happened.
    ///
    /// # Safety
    ///
    /// The block must still be allocated.
    unsafe fn destroy_object(self) {
        let header = self.header();
        if header.destroyed.replace(true) {
            return;
        }
        let drop_object = header.drop_object;

        log::trace!("destroying object of control block {:p}", self.ptr);
        drop_object(self.ptr);
    }

    /// Gives the block's memory back, destroying the object first if nobody did.
    ///
    /// # Safety
    ///
    /// Both counts must be zero and no reference into the block may outlive this call.
    unsafe fn free(self) {
        self.destroy_object();
        let free = self.header().free;

        log::trace!("freeing control block {:p}", self.ptr);
        free(self.ptr);
    }

    /// Drops one strong count.
    ///
    /// # Safety
    ///
    /// The caller must own the strong count it gives up, and must not use this block again
    /// unless it owns another count.
    #[inline]
    pub(crate) unsafe fn release_strong(self) {
        if self.dec_strong() != 0 {
            return;
        }

        // The object's destructor may drop weak handles to this very block, so hold one
        // weak count across it.
        self.inc_weak();
        self.destroy_object();
        self.release_weak();
    }

    /// Drops one weak count.
    ///
    /// # Safety
    ///
    /// The caller must own the weak count it gives up, and must not use this block again
    /// unless it owns another count.
    #[inline]
    pub(crate) unsafe fn release_weak(self) {
        if self.dec_weak() != 0 || self.strong() != 0 {
            return;
        }
        self.free();
    }
}

impl fmt::Debug for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockRef")
            .field("ptr", &self.ptr)
            .field("strong", &self.strong())
            .field("weak", &self.weak())
            .finish()
    }
}

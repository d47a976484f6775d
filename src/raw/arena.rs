use core::fmt;
use core::num::NonZero;

#[cfg(test)]
type RawHandle = u16;
#[cfg(not(test))]
type RawHandle = u32;

/// A non-owning reference to a slot in an [`Arena`].
///
/// Handles are how parents refer to their children and how a leaf refers to the
/// next leaf in key order. Only the arena owns the nodes; dropping a handle
/// never frees anything.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
#[repr(transparent)]
pub(crate) struct Handle(NonZero<RawHandle>);

impl Handle {
    pub(crate) const MAX: usize = (RawHandle::MAX - 1) as usize;

    #[inline]
    fn from_index(index: usize) -> Self {
        let raw = RawHandle::try_from(index + 1).ok().and_then(NonZero::new);
        Self(raw.expect("`Handle::from_index()` - `index` > `Handle::MAX`!"))
    }

    #[inline]
    fn index(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.index())
    }
}

/// Slot storage that owns every node of a tree.
///
/// Released slots go on a free list and are reused by later allocations, so a
/// handle must never be used after [`Arena::take`] released it.
#[derive(Clone)]
pub(crate) struct Arena<T> {
    slots: Vec<Option<T>>,
    free: Vec<Handle>,
}

impl<T> Arena<T> {
    pub(crate) const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Number of occupied slots.
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub(crate) fn alloc(&mut self, element: T) -> Handle {
        if let Some(handle) = self.free.pop() {
            let slot = &mut self.slots[handle.index()];
            debug_assert!(slot.is_none(), "free list handed out an occupied slot");
            *slot = Some(element);
            return handle;
        }

        assert!(
            self.slots.len() <= Handle::MAX,
            "`Arena::alloc()` - arena is at maximum capacity ({})",
            Handle::MAX + 1
        );
        let handle = Handle::from_index(self.slots.len());
        self.slots.push(Some(element));
        handle
    }

    #[inline]
    pub(crate) fn get(&self, handle: Handle) -> &T {
        self.slots[handle.index()]
            .as_ref()
            .expect("`Arena::get()` - `handle` refers to a released slot!")
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, handle: Handle) -> &mut T {
        self.slots[handle.index()]
            .as_mut()
            .expect("`Arena::get_mut()` - `handle` refers to a released slot!")
    }

    /// Moves the element out and releases its slot.
    pub(crate) fn take(&mut self, handle: Handle) -> T {
        let element = self.slots[handle.index()]
            .take()
            .expect("`Arena::take()` - `handle` refers to a released slot!");
        self.free.push(handle);
        element
    }

    pub(crate) fn free(&mut self, handle: Handle) {
        drop(self.take(handle));
    }

    pub(crate) fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }
}

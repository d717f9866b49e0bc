#![forbid(unsafe_code)]

//! Collection-wide reentrant lock.
//!
//! The pipeline is single-threaded, so the lock does not block. It records
//! scoped ownership: every public mutation holds a [`LockGuard`] for its full
//! duration and the guard releases on every exit path, including `?`
//! returns and panics. Nested collections (see the flatten decorator) hand
//! their lock off to the parent so both report the same holder.
//!
//! # Invariants
//!
//! 1. Depth returns to its prior value when a guard drops.
//! 2. Clones of a lock share depth; [`CollectionLock::same_lock`] is pointer
//!    identity.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

#[derive(Default)]
struct LockInner {
    depth: Cell<u32>,
    acquisitions: Cell<u64>,
}

/// Shared reentrant lock handle.
#[derive(Clone, Default)]
pub struct CollectionLock {
    inner: Rc<LockInner>,
}

impl fmt::Debug for CollectionLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionLock")
            .field("depth", &self.inner.depth.get())
            .field("acquisitions", &self.inner.acquisitions.get())
            .finish()
    }
}

impl CollectionLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the lock; released when the guard drops.
    #[must_use = "the lock is released as soon as the guard is dropped"]
    pub fn acquire(&self) -> LockGuard {
        let inner = &self.inner;
        inner.depth.set(inner.depth.get() + 1);
        inner.acquisitions.set(inner.acquisitions.get() + 1);
        LockGuard {
            inner: Rc::clone(inner),
        }
    }

    /// Whether any guard is alive.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.inner.depth.get() > 0
    }

    /// Current nesting depth.
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.inner.depth.get()
    }

    /// Total acquisitions since creation.
    #[must_use]
    pub fn acquisitions(&self) -> u64 {
        self.inner.acquisitions.get()
    }

    /// Whether both handles refer to the same lock.
    #[must_use]
    pub fn same_lock(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

/// RAII guard returned by [`CollectionLock::acquire`].
pub struct LockGuard {
    inner: Rc<LockInner>,
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("depth", &self.inner.depth.get())
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let depth = self.inner.depth.get();
        self.inner.depth.set(depth.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_nest_and_release() {
        let lock = CollectionLock::new();
        assert!(!lock.is_held());
        {
            let _outer = lock.acquire();
            let _inner = lock.acquire();
            assert_eq!(lock.depth(), 2);
        }
        assert!(!lock.is_held());
        assert_eq!(lock.acquisitions(), 2);
    }

    #[test]
    fn clones_share_state() {
        let lock = CollectionLock::new();
        let shared = lock.clone();
        let _guard = shared.acquire();
        assert!(lock.is_held());
        assert!(lock.same_lock(&shared));
        assert!(!lock.same_lock(&CollectionLock::new()));
    }

    #[test]
    fn released_on_early_return() {
        fn fails(lock: &CollectionLock) -> Result<(), ()> {
            let _guard = lock.acquire();
            Err(())
        }
        let lock = CollectionLock::new();
        assert!(fails(&lock).is_err());
        assert_eq!(lock.depth(), 0);
    }
}

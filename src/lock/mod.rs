//! Lock primitives: spinlocks, sleeplocks, and sleepable spinlocks.
//!
//! Grounded on the teacher's `lock/mod.rs`: a single generic `Lock<L,
//! T>` wrapping any `RawLock` implementation plus the protected data,
//! with a matching `Guard` providing `Deref`/`DerefMut`. This crate
//! keeps that shape but drops the teacher's `OwnedLock`/GAT layer,
//! since spec.md's single-build, single-architecture scope does not
//! need the pinned, pointer-stable guards that layer buys (see
//! DESIGN.md).

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

pub mod sleepablelock;
pub mod sleeplock;
pub mod spinlock;

pub use sleepablelock::Sleepablelock;
pub use sleeplock::Sleeplock;
pub use spinlock::Spinlock;

/// Behavior shared by every lock primitive in the kernel.
pub trait RawLock {
    /// Acquires the lock, blocking (by spinning or by sleeping,
    /// depending on the implementation) until it is held.
    fn acquire(&self);

    /// Releases the lock.
    fn release(&self);

    /// Reports whether the calling context currently holds the lock.
    fn holding(&self) -> bool;
}

/// A lock that owns both a `RawLock` and the data it protects.
pub struct Lock<L: RawLock, T> {
    lock: L,
    data: UnsafeCell<T>,
}

// SAFETY: a `Lock` only exposes `T` through a `Guard` obtained while
// holding the inner `RawLock`, so concurrent access is serialized.
unsafe impl<L: RawLock + Send, T: Send> Sync for Lock<L, T> {}

impl<L: RawLock, T> Lock<L, T> {
    /// Builds a lock from an already-constructed raw lock and payload.
    /// Each primitive (`Spinlock`, `Sleeplock`, `Sleepablelock`) wraps
    /// this in its own `const fn new` so callers never name `L`.
    pub const fn new_raw(lock: L, data: T) -> Self {
        Self {
            lock,
            data: UnsafeCell::new(data),
        }
    }

    /// Acquires the lock and returns a guard granting access to `T`.
    pub fn lock(&self) -> Guard<'_, L, T> {
        self.lock.acquire();
        Guard { lock: self }
    }

    /// Returns a raw pointer to the protected data, bypassing the lock.
    ///
    /// # Safety
    /// The caller must already hold the lock (or otherwise guarantee
    /// exclusive access), e.g. while holding a [`Guard`] obtained via
    /// [`Self::lock`] and wanting a second, reborrowed access.
    pub unsafe fn get_mut_raw(&self) -> *mut T {
        self.data.get()
    }

    /// Releases the lock without running a `Guard`'s `Drop`.
    ///
    /// # Safety
    /// Use this only to balance a lock acquired through [`Self::lock`]
    /// whose `Guard` was leaked with `mem::forget`.
    pub unsafe fn unlock(&self) {
        self.lock.release();
    }

    /// Reports whether the calling context holds the lock.
    pub fn holding(&self) -> bool {
        self.lock.holding()
    }

    /// Consumes the lock, returning the protected data.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

/// A held lock granting access to `T`. Releases the lock on drop.
pub struct Guard<'s, L: RawLock, T> {
    lock: &'s Lock<L, T>,
}

impl<L: RawLock, T> Deref for Guard<'_, L, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: holding the `Guard` means the lock is held.
        unsafe { &*self.lock.data.get() }
    }
}

impl<L: RawLock, T> DerefMut for Guard<'_, L, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: holding the `Guard` means the lock is held, and
        // `&mut self` guarantees exclusivity among guards.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<L: RawLock, T> Drop for Guard<'_, L, T> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

impl<'s, L: RawLock, T> Guard<'s, L, T> {
    /// Temporarily releases the lock for the duration of `f`, then
    /// re-acquires it. Used by sleep paths that must drop a lock before
    /// yielding and retake it on the way back out.
    ///
    /// # Safety
    /// `self` must not be accessed (besides re-locking) while released.
    pub unsafe fn reacquire_after<R>(&mut self, f: impl FnOnce() -> R) -> R {
        self.lock.lock.release();
        let r = f();
        self.lock.lock.acquire();
        r
    }
}

//! Minimal spinlock with a single-context fast path.
//!
//! While only the boot CPU runs, acquisition and release are plain stores
//! guarded by assertions. Tests of the reservation instruction pair
//! (`lwarx`/`stwcx.`) under migration must not see unrelated reservations
//! taken by console or firmware locks, so the atomic sequence is only used
//! once secondary CPUs are running.

use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicU32, Ordering},
};

use crate::smp;

const FREE: u32 = 0;
const HELD: u32 = 1;

/// A spinlock word: 0 = free, 1 = held.
///
/// There is no owner tracking, no timeout and no deadlock detection.
pub struct RawSpinLock {
    v: AtomicU32,
    #[cfg(test)]
    atomic_acquires: core::sync::atomic::AtomicUsize,
}

impl RawSpinLock {
    /// Create a free lock.
    pub const fn new() -> Self {
        Self {
            v: AtomicU32::new(FREE),
            #[cfg(test)]
            atomic_acquires: core::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Acquire the lock, choosing the path from the machine's threading mode.
    pub fn lock(&self) {
        self.lock_with(smp::multithreaded());
    }

    /// Release the lock, choosing the path from the machine's threading mode.
    pub fn unlock(&self) {
        self.unlock_with(smp::multithreaded());
    }

    /// Acquire the lock using the single-context or the atomic path.
    pub fn lock_with(&self, multithreaded: bool) {
        if !multithreaded {
            assert!(self.v.load(Ordering::Relaxed) == FREE, "spinlock already held");
            self.v.store(HELD, Ordering::Relaxed);
        } else {
            #[cfg(test)]
            self.atomic_acquires.fetch_add(1, Ordering::Relaxed);
            while self.v.swap(HELD, Ordering::Acquire) != FREE {
                core::hint::spin_loop();
            }
        }
    }

    /// Release the lock using the single-context or the atomic path.
    pub fn unlock_with(&self, multithreaded: bool) {
        assert!(self.v.load(Ordering::Relaxed) == HELD, "spinlock not held");
        if !multithreaded {
            self.v.store(FREE, Ordering::Relaxed);
        } else {
            self.v.store(FREE, Ordering::Release);
        }
    }

    /// Returns whether the lock is currently held.
    pub fn is_locked(&self) -> bool {
        self.v.load(Ordering::Relaxed) == HELD
    }
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Data protected by a [`RawSpinLock`].
pub struct SpinMutex<T> {
    lock: RawSpinLock,
    data: UnsafeCell<T>,
}

// Safety: access to `data` only happens through a guard, which holds the lock.
unsafe impl<T: Send> Send for SpinMutex<T> {}
unsafe impl<T: Send> Sync for SpinMutex<T> {}

impl<T> SpinMutex<T> {
    /// Create a new unlocked mutex protecting the given data.
    pub const fn new(data: T) -> Self {
        Self {
            lock: RawSpinLock::new(),
            data: UnsafeCell::new(data),
        }
    }

    /// Acquire the lock, spinning if another CPU holds it.
    pub fn lock(&self) -> SpinMutexGuard<'_, T> {
        self.lock_with(smp::multithreaded())
    }

    /// Acquire the lock with an explicit threading mode.
    ///
    /// The guard releases with the same mode it was acquired with.
    pub fn lock_with(&self, multithreaded: bool) -> SpinMutexGuard<'_, T> {
        self.lock.lock_with(multithreaded);
        SpinMutexGuard {
            mutex: self,
            multithreaded,
        }
    }
}

/// RAII guard that releases the spinlock when dropped.
pub struct SpinMutexGuard<'a, T> {
    mutex: &'a SpinMutex<T>,
    multithreaded: bool,
}

impl<T> Deref for SpinMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // Safety: We hold the lock, so we have exclusive access.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for SpinMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // Safety: We hold the lock, so we have exclusive access.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for SpinMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.lock.unlock_with(self.multithreaded);
    }
}

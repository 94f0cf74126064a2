//! Synchronization primitives for the bring-up core.
//!
//! - [`RawSpinLock`]: one-word lock with a single-context fast path
//! - [`SpinMutex<T>`]: data guarded by a [`RawSpinLock`]
//!
//! The allocator state is guarded by `spin::Mutex` instead; only code that
//! may run next to reservation tests uses these locks.

mod spinlock;

pub use spinlock::{RawSpinLock, SpinMutex, SpinMutexGuard};

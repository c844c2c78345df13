//! A spinlock-based blocking mutex.
//!
//! The wait lists of [`AsyncMutex`](crate::AsyncMutex) and
//! [`CancelSignal`](crate::CancelSignal) are only ever locked for a handful of
//! pointer updates, and the crate must work without an operating system, so
//! they are protected by a spinlock rather than an OS mutex. When running
//! `loom` tests, `crate::loom::sync::blocking` swaps this for a `loom` mutex.
use crate::{
    loom::{
        cell::{MutPtr, UnsafeCell},
        sync::atomic::{AtomicBool, Ordering::*},
    },
    util::fmt,
};
use core::ops::{Deref, DerefMut};

/// A blocking mutual exclusion lock that waits by spinning.
///
/// This is *not* a fair mutex.
pub(crate) struct Mutex<T> {
    lock: Spinlock,
    data: UnsafeCell<T>,
}

/// An RAII guard for a locked [`Mutex`]. Dropping it unlocks the mutex.
#[must_use = "if unused, the `Mutex` will immediately unlock"]
pub(crate) struct MutexGuard<'a, T> {
    ptr: MutPtr<T>,
    lock: &'a Spinlock,
}

#[derive(Debug)]
struct Spinlock {
    locked: AtomicBool,
}

/// An [exponential backoff] for spin loops.
///
/// [exponential backoff]: https://en.wikipedia.org/wiki/Exponential_backoff
#[derive(Debug, Copy, Clone)]
struct Backoff {
    exp: u8,
}

// === impl Mutex ===

impl<T> Mutex<T> {
    loom_const_fn! {
        pub(crate) fn new(data: T) -> Self {
            Self {
                lock: Spinlock::new(),
                data: UnsafeCell::new(data),
            }
        }
    }

    #[cfg_attr(test, track_caller)]
    pub(crate) fn lock(&self) -> MutexGuard<'_, T> {
        self.lock.lock();
        MutexGuard {
            ptr: self.data.get_mut(),
            lock: &self.lock,
        }
    }

    #[cfg_attr(test, track_caller)]
    pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        if self.lock.try_lock() {
            Some(MutexGuard {
                ptr: self.data.get_mut(),
                lock: &self.lock,
            })
        } else {
            None
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Mutex");
        match self.try_lock() {
            Some(guard) => s.field("data", &*guard),
            None => s.field("data", &format_args!("<locked>")),
        };
        s.finish()
    }
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

// === impl MutexGuard ===

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        unsafe {
            // safety: we are holding the lock
            &*self.ptr.deref()
        }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe {
            // safety: we are holding the lock
            self.ptr.deref()
        }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

impl<T: fmt::Debug> fmt::Debug for MutexGuard<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.deref().fmt(f)
    }
}

// === impl Spinlock ===

impl Spinlock {
    loom_const_fn! {
        fn new() -> Self {
            Self { locked: AtomicBool::new(false) }
        }
    }

    #[cfg_attr(test, track_caller)]
    fn lock(&self) {
        let mut boff = Backoff::new();
        while test_dbg!(self
            .locked
            .compare_exchange(false, true, Acquire, Acquire)
            .is_err())
        {
            while test_dbg!(self.locked.load(Relaxed)) {
                boff.spin();
            }
        }
    }

    #[inline]
    fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Acquire, Acquire)
            .is_ok()
    }

    #[inline]
    fn unlock(&self) {
        self.locked.store(false, Release);
    }
}

// === impl Backoff ===

impl Backoff {
    const MAX_EXPONENT: u8 = 8;

    const fn new() -> Self {
        Self { exp: 0 }
    }

    /// Issues `2^exp` spin loop hints, then bumps the exponent (up to
    /// [`Backoff::MAX_EXPONENT`]).
    #[inline(always)]
    fn spin(&mut self) {
        #[cfg_attr(loom, allow(unused_variables))]
        let spins = 1u32 << self.exp;

        #[cfg(not(loom))]
        for _ in 0..spins {
            crate::loom::hint::spin_loop();
        }

        #[cfg(loom)]
        {
            test_debug!("would back off for {spins} spins");
            loom::thread::yield_now();
        }

        if self.exp < Self::MAX_EXPONENT {
            self.exp += 1
        }
    }
}

#[allow(unused_imports)]
pub(crate) use self::inner::*;

#[cfg(loom)]
mod inner {
    #![allow(dead_code)]
    #![allow(unused_imports)]

    #[cfg(test)]
    pub(crate) use loom::future;
    pub(crate) use loom::{cell, hint, model, thread};

    pub(crate) mod sync {
        pub(crate) use loom::sync::*;

        pub(crate) mod blocking {
            use core::{
                fmt,
                ops::{Deref, DerefMut},
            };

            /// Stand-in for the crate's spinlock-based mutex, backed by
            /// `loom::sync::Mutex` so that loom can explore its interleavings.
            /// Real spin loops never terminate under loom's scheduler.
            pub(crate) struct Mutex<T>(loom::sync::Mutex<T>);

            pub(crate) struct MutexGuard<'a, T>(loom::sync::MutexGuard<'a, T>);

            impl<T> Mutex<T> {
                #[track_caller]
                pub(crate) fn new(data: T) -> Self {
                    Self(loom::sync::Mutex::new(data))
                }

                #[track_caller]
                pub(crate) fn lock(&self) -> MutexGuard<'_, T> {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(location = %core::panic::Location::caller(), "Mutex::lock");

                    MutexGuard(self.0.lock().expect("loom mutex will never poison"))
                }

                #[track_caller]
                pub(crate) fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
                    self.0.try_lock().ok().map(MutexGuard)
                }
            }

            impl<T: fmt::Debug> fmt::Debug for Mutex<T> {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    self.0.fmt(f)
                }
            }

            impl<T> Deref for MutexGuard<'_, T> {
                type Target = T;
                #[inline]
                fn deref(&self) -> &Self::Target {
                    self.0.deref()
                }
            }

            impl<T> DerefMut for MutexGuard<'_, T> {
                #[inline]
                fn deref_mut(&mut self) -> &mut Self::Target {
                    self.0.deref_mut()
                }
            }
        }
    }
}

#[cfg(not(loom))]
mod inner {
    #![allow(dead_code, unused_imports)]

    pub(crate) mod sync {
        #[cfg(any(feature = "alloc", test))]
        pub(crate) use alloc::sync::Arc;

        pub(crate) use crate::spin as blocking;

        pub(crate) mod atomic {
            pub(crate) use portable_atomic::*;
        }
    }

    pub(crate) use portable_atomic::hint;


    /// Without loom, a "model" is simply run once, on real threads.
    #[cfg(test)]
    pub(crate) fn model(f: impl FnOnce()) {
        let _trace = crate::util::test::trace_init();
        let _span = tracing::info_span!(
            "test",
            message = std::thread::current().name().unwrap_or("<unnamed>")
        )
        .entered();
        tracing::info!("started test...");
        f();
        tracing::info!("test completed successfully!");
    }


    pub(crate) mod cell {
        #[derive(Debug)]
        pub(crate) struct UnsafeCell<T: ?Sized>(core::cell::UnsafeCell<T>);

        impl<T> UnsafeCell<T> {
            pub(crate) const fn new(data: T) -> UnsafeCell<T> {
                UnsafeCell(core::cell::UnsafeCell::new(data))
            }
        }

        impl<T: ?Sized> UnsafeCell<T> {
            #[inline(always)]
            pub(crate) fn with_mut<F, R>(&self, f: F) -> R
            where
                F: FnOnce(*mut T) -> R,
            {
                f(self.0.get())
            }

            #[inline(always)]
            pub(crate) fn get_mut(&self) -> MutPtr<T> {
                MutPtr(self.0.get())
            }
        }

        #[derive(Debug)]
        pub(crate) struct MutPtr<T: ?Sized>(*mut T);

        impl<T: ?Sized> MutPtr<T> {
            // this type simulates loom's checked raw pointer, so handing out a
            // `&mut` from `&self` is the point.
            #[allow(clippy::mut_from_ref)]
            #[inline(always)]
            pub(crate) unsafe fn deref(&self) -> &mut T {
                &mut *self.0
            }
        }
    }
}

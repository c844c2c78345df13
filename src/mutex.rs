//! An asynchronous [mutual exclusion lock] whose ownership is a token.
//!
//! See the documentation on the [`AsyncMutex`] type for details.
//!
//! [mutual exclusion lock]: https://en.wikipedia.org/wiki/Mutual_exclusion
use crate::{
    cancel::{CancelSignal, Cancellable},
    loom::sync::{
        atomic::{AtomicUsize, Ordering::*},
        blocking::{Mutex, MutexGuard},
    },
    util::{fmt, WakeBatch},
    wait_list::{WaitList, Waiter},
    Cancelled,
};
use core::{
    future::Future,
    pin::Pin,
    task::{ready, Context, Poll},
};
use pin_project::{pin_project, pinned_drop};


/// An asynchronous [mutual exclusion lock][mutex] for serializing access to a
/// shared resource.
///
/// Unlike [`maitake_sync::Mutex`] or [`tokio::sync::Mutex`], an `AsyncMutex`
/// does not own the data it protects. Instead, acquiring it returns a
/// [`ReleaseToken`], and holding that token *is* holding the lock. Dropping the
/// token releases the lock, so it is released exactly once on every exit path,
/// including early returns, `?`, and unwinding.
///
/// When the lock is held, [`acquire`] waits by causing the current [task] to
/// yield until the lock is handed to it. Waiting never blocks the thread, and
/// never allocates: each waiting future owns a node in an intrusive wait list.
///
/// # Fairness
///
/// The lock is acquired in strict first-in, first-out order. Releasing the
/// lock while tasks are waiting hands it *directly* to the task that has been
/// waiting the longest, without ever marking it free, so a task that calls
/// [`acquire`] or [`try_acquire`] in the meantime cannot cut in line.
///
/// # Cancellation
///
/// Dropping an [`Acquire`] future at any point is always safe. If it was
/// still waiting, it simply leaves the queue; if the lock had already been
/// handed to it, the lock is passed on to the next waiter. The
/// [`acquire_or_cancel`] method combines this with a [`CancelSignal`], so that
/// a wait can be abandoned from elsewhere (for example, by a timer).
///
/// # Examples
///
/// ```
/// use asynclock::AsyncMutex;
///
/// static LOCK: AsyncMutex = AsyncMutex::new();
///
/// async fn critical_section() {
///     let _token = LOCK.acquire().await;
///     // ... only one task at a time gets here ...
///     assert!(LOCK.is_locked());
/// } // the lock is released here
///
/// # futures::executor::block_on(critical_section());
/// assert!(!LOCK.is_locked());
/// ```
///
/// This mutex is not reentrant: acquiring it again while holding its token
/// waits forever.
///
/// [mutex]: https://en.wikipedia.org/wiki/Mutual_exclusion
/// [`maitake_sync::Mutex`]: https://docs.rs/maitake-sync/latest/maitake_sync/struct.Mutex.html
/// [`tokio::sync::Mutex`]: https://docs.rs/tokio/latest/tokio/sync/struct.Mutex.html
/// [`acquire`]: Self::acquire
/// [`try_acquire`]: Self::try_acquire
/// [`acquire_or_cancel`]: Self::acquire_or_cancel
/// [task]: core::task
pub struct AsyncMutex {
    /// Either [`UNLOCKED`] or [`LOCKED`]. While the wait list is non-empty,
    /// this is always `LOCKED`.
    state: AtomicUsize,
    waiters: Mutex<WaitList>,
}

/// Proof that an [`AsyncMutex`] is held. Dropping this token releases it.
///
/// Releasing hands the lock to the oldest waiting task, if there is one, and
/// otherwise marks the mutex as free.
///
/// This structure is created by the [`acquire`] and [`try_acquire`] methods
/// on [`AsyncMutex`], or by [`ReleaseToken::empty`], which returns a token
/// that releases nothing.
///
/// [`acquire`]: AsyncMutex::acquire
/// [`try_acquire`]: AsyncMutex::try_acquire
#[derive(Debug, Default)]
#[must_use = "if unused, the `AsyncMutex` will immediately be released"]
pub struct ReleaseToken<'lock> {
    mutex: Option<&'lock AsyncMutex>,
}

/// A [future] that completes once an [`AsyncMutex`] has been acquired.
///
/// This future is returned by [`AsyncMutex::acquire`].
///
/// [future]: core::future::Future
#[derive(Debug)]
#[pin_project(PinnedDrop)]
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Acquire<'lock> {
    mutex: &'lock AsyncMutex,
    queued: bool,
    done: bool,
    #[pin]
    waiter: Waiter,
}

const UNLOCKED: usize = 0;
const LOCKED: usize = 1;

// === impl AsyncMutex ===

impl AsyncMutex {
    loom_const_fn! {
        /// Returns a new, unlocked `AsyncMutex`.
        ///
        /// This is a `const fn`, so an `AsyncMutex` may be stored in a
        /// `static`.
        #[must_use]
        pub fn new() -> Self {
            Self {
                state: AtomicUsize::new(UNLOCKED),
                waiters: Mutex::new(WaitList::new()),
            }
        }
    }

    /// Acquires this mutex, waiting until it is available.
    ///
    /// Equivalent to:
    ///
    /// ```ignore
    /// async fn acquire(&self) -> ReleaseToken<'_>;
    /// ```
    ///
    /// If the mutex is free, the returned future completes on its first poll.
    /// Otherwise, it waits its turn behind every task that started waiting
    /// before it.
    ///
    /// # Examples
    ///
    /// ```
    /// use asynclock::AsyncMutex;
    ///
    /// # futures::executor::block_on(async {
    /// let mutex = AsyncMutex::new();
    ///
    /// let token = mutex.acquire().await;
    /// assert!(mutex.is_locked());
    ///
    /// drop(token);
    /// assert!(!mutex.is_locked());
    /// # });
    /// ```
    pub fn acquire(&self) -> Acquire<'_> {
        Acquire {
            mutex: self,
            queued: false,
            done: false,
            waiter: Waiter::new(),
        }
    }

    /// Acquires this mutex, unless `signal` fires first.
    ///
    /// Equivalent to:
    ///
    /// ```ignore
    /// async fn acquire_or_cancel(&self, signal: &CancelSignal) -> Result<ReleaseToken<'_>, Cancelled>;
    /// ```
    ///
    /// # Returns
    ///
    /// - `Ok(`[`ReleaseToken`]`)` once the mutex has been acquired
    /// - `Err(`[`Cancelled`]`)` if `signal` had already fired before the
    ///   first poll, or fired while this task was still waiting. In that
    ///   case, the mutex is left exactly as if this task had never tried to
    ///   acquire it.
    ///
    /// If the signal fires while this task is waiting, releasing the mutex
    /// skips this task and hands the lock to the next waiter, even if this
    /// task has not been polled since. Once the lock has been handed to this
    /// task, a signal fired later has no effect and the token is returned.
    ///
    /// # Examples
    ///
    /// Acquiring with a timeout, using `tokio`'s timer to fire the signal:
    ///
    /// ```
    /// use asynclock::{AsyncMutex, CancelSignal};
    /// use std::{sync::Arc, time::Duration};
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let mutex = AsyncMutex::new();
    /// let _held = mutex.acquire().await;
    ///
    /// let timeout = Arc::new(CancelSignal::new());
    /// tokio::spawn({
    ///     let timeout = timeout.clone();
    ///     async move {
    ///         tokio::time::sleep(Duration::from_millis(10)).await;
    ///         timeout.cancel();
    ///     }
    /// });
    ///
    /// assert!(mutex.acquire_or_cancel(&timeout).await.is_err());
    /// assert_eq!(mutex.waiters(), 0);
    /// # }
    /// ```
    ///
    /// [`Cancelled`]: crate::Cancelled
    pub fn acquire_or_cancel<'a>(
        &'a self,
        signal: &'a CancelSignal,
    ) -> Cancellable<'a, Acquire<'a>> {
        let acquire = Acquire {
            mutex: self,
            queued: false,
            done: false,
            waiter: unsafe {
                // safety: the `Cancellable` borrows `signal` for as long as it
                // owns this future, and never hands the future out.
                Waiter::with_signal(signal)
            },
        };
        signal.run_until_cancelled(acquire)
    }

    /// Attempts to acquire this mutex without waiting.
    ///
    /// # Returns
    ///
    /// - `Some(`[`ReleaseToken`]`)` if the mutex was free
    /// - `None` if the mutex is held, or tasks are waiting for it
    ///
    /// # Examples
    ///
    /// ```
    /// use asynclock::AsyncMutex;
    ///
    /// let mutex = AsyncMutex::new();
    ///
    /// let token = mutex.try_acquire().expect("mutex is free");
    /// assert!(mutex.try_acquire().is_none());
    ///
    /// drop(token);
    /// assert!(mutex.try_acquire().is_some());
    /// ```
    pub fn try_acquire(&self) -> Option<ReleaseToken<'_>> {
        if self.try_lock() {
            Some(ReleaseToken { mutex: Some(self) })
        } else {
            None
        }
    }

    /// Returns `true` if this mutex is currently held.
    ///
    /// This is only a snapshot: by the time the caller looks at the result,
    /// another task may already have acquired or released the mutex. It
    /// should not be used to decide whether acquiring would wait.
    #[inline]
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.state.load(Acquire) == LOCKED
    }

    /// Returns the number of tasks currently waiting to acquire this mutex.
    ///
    /// Like [`is_locked`](Self::is_locked), this is only a snapshot, intended
    /// for diagnostics.
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.waiters.lock().len()
    }

    fn try_lock(&self) -> bool {
        test_dbg!(self
            .state
            .compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed)
            .is_ok())
    }

    fn poll_acquire(
        &self,
        waiter: Pin<&mut Waiter>,
        queued: &mut bool,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), Cancelled>> {
        if *queued {
            // the notifier never touches the waiter again after marking it, so
            // the outcome can be observed without taking the lock.
            if let Poll::Ready(res) = Self::poll_popped(&waiter, queued) {
                return Poll::Ready(res);
            }

            let mut waiters = self.waiters.lock();
            if let Poll::Ready(res) = Self::poll_popped(&waiter, queued) {
                return Poll::Ready(res);
            }
            waiters.register(waiter, cx.waker());
            return Poll::Pending;
        }

        if self.try_lock() {
            trace!("AsyncMutex::poll_acquire -> fast path");
            return Poll::Ready(Ok(()));
        }

        let mut waiters = self.waiters.lock();
        // the holder may have released the lock before we locked the list.
        if self.try_lock() {
            trace!("AsyncMutex::poll_acquire -> acquired after locking waiters");
            return Poll::Ready(Ok(()));
        }

        waiters.register(waiter, cx.waker());
        *queued = true;
        Poll::Pending
    }

    /// Checks whether a queued waiter has been popped from the wait list.
    fn poll_popped(waiter: &Waiter, queued: &mut bool) -> Poll<Result<(), Cancelled>> {
        if waiter.is_notified() {
            trace!(waiter = ?fmt::ptr(waiter), "AsyncMutex::poll_acquire -> handed off");
            *queued = false;
            return Poll::Ready(Ok(()));
        }

        if waiter.is_cancelled() {
            trace!(waiter = ?fmt::ptr(waiter), "AsyncMutex::poll_acquire -> skipped; cancelled");
            *queued = false;
            return Poll::Ready(Err(Cancelled::new()));
        }

        Poll::Pending
    }

    fn drop_acquire(&self, waiter: Pin<&mut Waiter>, queued: bool) {
        // if the future never waited, or already completed, there is no node
        // in the wait list, so we can skip acquiring the lock.
        if !queued {
            return;
        }

        let mut waiters = self.waiters.lock();
        if waiters.remove(waiter) {
            // the lock was handed to this waiter, but it will never be polled
            // again to claim it. pass it on.
            trace!("AsyncMutex::drop_acquire -> releasing unclaimed hand-off");
            self.release_locked(waiters);
        }
    }

    fn release(&self) {
        self.release_locked(self.waiters.lock());
    }

    fn release_locked(&self, mut waiters: MutexGuard<'_, WaitList>) {
        debug_assert!(self.is_locked(), "released an `AsyncMutex` that was not held");

        let mut batch = WakeBatch::new();
        if waiters.notify_one(&mut batch) {
            trace!(waiters = waiters.len(), "AsyncMutex::release -> handed off");
        } else {
            // nobody is waiting, and nobody can start waiting without locking
            // the list, so it is safe to mark the mutex free.
            trace!("AsyncMutex::release -> unlocked");
            self.state.store(UNLOCKED, Release);
        }

        drop(waiters);
        batch.wake_all();
    }
}

impl Default for AsyncMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AsyncMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncMutex")
            .field("locked", &self.is_locked())
            .field("waiters", &self.waiters)
            .finish()
    }
}

// === impl Acquire ===

impl<'lock> Future for Acquire<'lock> {
    type Output = ReleaseToken<'lock>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        assert!(!*this.done, "`Acquire` polled after completion");
        match ready!(this.mutex.poll_acquire(this.waiter, this.queued, cx)) {
            Ok(()) => {
                *this.done = true;
                Poll::Ready(ReleaseToken {
                    mutex: Some(*this.mutex),
                })
            }
            // only waits started by `acquire_or_cancel` are ever skipped, and
            // the enclosing `Cancellable` observes the fired signal in this
            // same poll.
            Err(_) => Poll::Pending,
        }
    }
}

#[pinned_drop]
impl PinnedDrop for Acquire<'_> {
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();
        this.mutex.drop_acquire(this.waiter, *this.queued)
    }
}

// safety: the `Waiter`'s `UnsafeCell` is only accessed through `&mut self`
// (when polling or dropping) or while the mutex's wait list is locked.
unsafe impl Sync for Acquire<'_> {}

// === impl ReleaseToken ===

impl<'lock> ReleaseToken<'lock> {
    /// Returns a token that is not associated with any mutex. Dropping it
    /// does nothing.
    ///
    /// This is useful as a placeholder, such as when a lock is only
    /// conditionally required.
    ///
    /// # Examples
    ///
    /// ```
    /// use asynclock::{AsyncMutex, ReleaseToken};
    ///
    /// let mutex = AsyncMutex::new();
    /// let exclusive = false;
    ///
    /// let token = if exclusive {
    ///     mutex.try_acquire().expect("mutex is free")
    /// } else {
    ///     ReleaseToken::empty()
    /// };
    /// assert!(token.is_empty());
    /// assert!(!mutex.is_locked());
    /// ```
    pub const fn empty() -> Self {
        Self { mutex: None }
    }

    /// Returns `true` if this token does not hold a mutex.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mutex.is_none()
    }

    /// Releases the mutex held by this token.
    ///
    /// This is the same as dropping the token, but reads better at call sites
    /// that release the lock before the end of a scope.
    pub fn release(self) {
        drop(self)
    }
}

impl Drop for ReleaseToken<'_> {
    fn drop(&mut self) {
        if let Some(mutex) = self.mutex.take() {
            mutex.release();
        }
    }
}

feature! {
    #![feature = "alloc"]

    use alloc::sync::Arc;

    /// Proof that an [`AsyncMutex`] is held, which keeps the mutex alive.
    ///
    /// This type is similar to [`ReleaseToken`], but it is only returned by
    /// an [`AsyncMutex`] that is wrapped in an [`Arc`]. Instead of borrowing
    /// the mutex, this token holds an [`Arc`] clone of it, so it is valid for
    /// the `'static` lifetime and can be moved into spawned tasks.
    ///
    /// This structure is created by the [`acquire_owned`] and
    /// [`try_acquire_owned`] methods on [`AsyncMutex`].
    ///
    /// [`acquire_owned`]: AsyncMutex::acquire_owned
    /// [`try_acquire_owned`]: AsyncMutex::try_acquire_owned
    #[derive(Debug)]
    #[must_use = "if unused, the `AsyncMutex` will immediately be released"]
    pub struct OwnedReleaseToken {
        mutex: Option<Arc<AsyncMutex>>,
    }

    /// A [future] that completes once an [`Arc`]-wrapped [`AsyncMutex`] has
    /// been acquired.
    ///
    /// This future is returned by [`AsyncMutex::acquire_owned`].
    ///
    /// [future]: core::future::Future
    #[derive(Debug)]
    #[pin_project(PinnedDrop)]
    #[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
    pub struct AcquireOwned {
        mutex: Arc<AsyncMutex>,
        queued: bool,
        done: bool,
        #[pin]
        waiter: Waiter,
    }

    impl AsyncMutex {
        /// Acquires this mutex, returning an [`OwnedReleaseToken`].
        ///
        /// This method is similar to [`AsyncMutex::acquire`], except that
        /// the returned token owns an [`Arc`] clone of the mutex rather than
        /// borrowing it.
        ///
        /// # Examples
        ///
        /// ```
        /// use asynclock::AsyncMutex;
        /// use std::sync::Arc;
        ///
        /// # futures::executor::block_on(async {
        /// let mutex = Arc::new(AsyncMutex::new());
        ///
        /// let token = mutex.clone().acquire_owned().await;
        /// let task = async move {
        ///     // the token may outlive the scope that acquired it.
        ///     drop(token);
        /// };
        /// task.await;
        /// assert!(!mutex.is_locked());
        /// # });
        /// ```
        pub fn acquire_owned(self: Arc<Self>) -> AcquireOwned {
            AcquireOwned {
                mutex: self,
                queued: false,
                done: false,
                waiter: Waiter::new(),
            }
        }

        /// Acquires this mutex, returning an [`OwnedReleaseToken`], unless
        /// `signal` fires first.
        ///
        /// This method is similar to [`AsyncMutex::acquire_or_cancel`],
        /// except that the returned token owns an [`Arc`] clone of the mutex
        /// rather than borrowing it.
        pub fn acquire_owned_or_cancel(
            self: Arc<Self>,
            signal: &CancelSignal,
        ) -> Cancellable<'_, AcquireOwned> {
            let acquire = AcquireOwned {
                mutex: self,
                queued: false,
                done: false,
                waiter: unsafe {
                    // safety: see `AsyncMutex::acquire_or_cancel`.
                    Waiter::with_signal(signal)
                },
            };
            signal.run_until_cancelled(acquire)
        }

        /// Attempts to acquire this mutex without waiting, returning an
        /// [`OwnedReleaseToken`].
        ///
        /// # Returns
        ///
        /// - `Ok(`[`OwnedReleaseToken`]`)` if the mutex was free
        /// - `Err(Arc<AsyncMutex>)` if the mutex is held. The [`Arc`] is
        ///   handed back so that it may be reused without touching the
        ///   reference count again.
        pub fn try_acquire_owned(self: Arc<Self>) -> Result<OwnedReleaseToken, Arc<Self>> {
            if self.try_lock() {
                Ok(OwnedReleaseToken { mutex: Some(self) })
            } else {
                Err(self)
            }
        }
    }

    // === impl AcquireOwned ===

    impl Future for AcquireOwned {
        type Output = OwnedReleaseToken;

        fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
            let this = self.project();
            assert!(!*this.done, "`AcquireOwned` polled after completion");
            match ready!(this.mutex.poll_acquire(this.waiter, this.queued, cx)) {
                Ok(()) => {
                    *this.done = true;
                    Poll::Ready(OwnedReleaseToken {
                        mutex: Some(this.mutex.clone()),
                    })
                }
                // see `Acquire::poll`.
                Err(_) => Poll::Pending,
            }
        }
    }

    #[pinned_drop]
    impl PinnedDrop for AcquireOwned {
        fn drop(self: Pin<&mut Self>) {
            let this = self.project();
            this.mutex.drop_acquire(this.waiter, *this.queued)
        }
    }

    // safety: see the `Sync` impl for `Acquire`.
    unsafe impl Sync for AcquireOwned {}

    // === impl OwnedReleaseToken ===

    impl OwnedReleaseToken {
        /// Releases the mutex held by this token.
        ///
        /// This is the same as dropping the token.
        pub fn release(self) {
            drop(self)
        }
    }

    impl Drop for OwnedReleaseToken {
        fn drop(&mut self) {
            if let Some(mutex) = self.mutex.take() {
                mutex.release();
            }
        }
    }
}

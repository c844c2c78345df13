//! A cooperative cancellation signal.
//!
//! A [`CancelSignal`] is fired once, from any thread, to ask every task
//! waiting under it to give up. See the [`CancelSignal`] type's documentation
//! for details.
use crate::{
    loom::sync::{
        atomic::{AtomicBool, Ordering::*},
        blocking::Mutex,
    },
    util::WakeBatch,
    wait_list::{WaitList, Waiter},
    Cancelled,
};
use core::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};
use pin_project::{pin_project, pinned_drop};

#[cfg(test)]
mod tests;

/// A one-shot signal asking pending waits to be abandoned.
///
/// Any number of tasks may wait for the signal to fire, either directly with
/// [`wait`], or by running some other future with [`run_until_cancelled`],
/// which completes with [`Err`]`(`[`Cancelled`]`)` if the signal fires first.
/// [`AsyncMutex::acquire_or_cancel`] is built on the latter.
///
/// Firing the signal with [`cancel`] is permanent; a fired signal stays fired.
/// A timeout is simply a signal fired by a timer.
///
/// # Examples
///
/// ```
/// use asynclock::{AsyncMutex, CancelSignal, Cancelled};
///
/// # futures::executor::block_on(async {
/// let mutex = AsyncMutex::new();
/// let signal = CancelSignal::new();
///
/// let held = mutex.acquire().await;
///
/// // the mutex is held, so this would wait forever...
/// signal.cancel();
/// // ...but the signal has already fired, so it fails instead.
/// let res = mutex.acquire_or_cancel(&signal).await;
/// assert!(matches!(res, Err(Cancelled { .. })));
///
/// drop(held);
/// assert!(!mutex.is_locked());
/// # });
/// ```
///
/// [`wait`]: Self::wait
/// [`run_until_cancelled`]: Self::run_until_cancelled
/// [`cancel`]: Self::cancel
/// [`AsyncMutex::acquire_or_cancel`]: crate::AsyncMutex::acquire_or_cancel
pub struct CancelSignal {
    cancelled: AtomicBool,
    waiters: Mutex<WaitList>,
}

/// A [future] that completes once a [`CancelSignal`] has fired.
///
/// This future is returned by [`CancelSignal::wait`].
///
/// [future]: core::future::Future
#[derive(Debug)]
#[pin_project(PinnedDrop)]
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct WaitForCancel<'sig> {
    signal: &'sig CancelSignal,
    queued: bool,
    #[pin]
    waiter: Waiter,
}

/// A [future] that runs another future until it completes or a
/// [`CancelSignal`] fires, whichever happens first.
///
/// This future is returned by [`CancelSignal::run_until_cancelled`] and
/// [`AsyncMutex::acquire_or_cancel`](crate::AsyncMutex::acquire_or_cancel).
///
/// # Notes
///
/// If the signal has already fired when this future is first polled, it
/// completes with [`Err`]`(`[`Cancelled`]`)` without polling the inner future
/// at all. After that, the inner future is always polled first, so an inner
/// future that is ready wins over a signal that fires concurrently.
///
/// When the signal wins, the inner future is dropped before this future
/// returns.
///
/// [future]: core::future::Future
#[derive(Debug)]
#[pin_project]
#[must_use = "futures do nothing unless `.await`ed or `poll`ed"]
pub struct Cancellable<'sig, F> {
    #[pin]
    future: Option<F>,
    #[pin]
    cancelled: WaitForCancel<'sig>,
    polled: bool,
}

// === impl CancelSignal ===

impl CancelSignal {
    loom_const_fn! {
        /// Returns a new `CancelSignal` that has not fired.
        ///
        /// # Examples
        ///
        /// ```
        /// use asynclock::CancelSignal;
        ///
        /// static SHUTDOWN: CancelSignal = CancelSignal::new();
        /// assert!(!SHUTDOWN.is_cancelled());
        /// ```
        #[must_use]
        pub fn new() -> Self {
            Self {
                cancelled: AtomicBool::new(false),
                waiters: Mutex::new(WaitList::new()),
            }
        }
    }

    /// Fires the signal, waking every task currently waiting on it.
    ///
    /// This may be called from any thread, at any time, including before
    /// anyone has started waiting.
    ///
    /// # Returns
    ///
    /// - `true` if this call fired the signal
    /// - `false` if the signal had already fired
    pub fn cancel(&self) -> bool {
        let mut waiters = self.waiters.lock();
        // the flag is set while the list is locked, so that a task registering
        // concurrently either sees it, or is drained below.
        if test_dbg!(self.cancelled.swap(true, AcqRel)) {
            return false;
        }

        trace!(waiters = waiters.len(), "CancelSignal::cancel");
        let mut batch = WakeBatch::new();
        loop {
            let more = waiters.notify_batch(&mut batch);
            drop(waiters);
            batch.wake_all();
            if !more {
                return true;
            }
            waiters = self.waiters.lock();
        }
    }

    /// Returns `true` if the signal has fired.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Acquire)
    }

    /// Waits for the signal to fire.
    ///
    /// Equivalent to:
    ///
    /// ```ignore
    /// async fn wait(&self);
    /// ```
    ///
    /// If the signal has already fired, the returned future completes
    /// immediately.
    pub fn wait(&self) -> WaitForCancel<'_> {
        WaitForCancel {
            signal: self,
            queued: false,
            waiter: Waiter::new(),
        }
    }

    /// Runs `future` until it completes, or until this signal fires.
    ///
    /// # Returns
    ///
    /// - `Ok(output)` if `future` completed first
    /// - `Err(`[`Cancelled`]`)` if the signal fired first (or had already
    ///   fired before the first poll)
    ///
    /// # Examples
    ///
    /// ```
    /// use asynclock::CancelSignal;
    /// use core::future;
    ///
    /// # futures::executor::block_on(async {
    /// let signal = CancelSignal::new();
    /// assert_eq!(signal.run_until_cancelled(future::ready(1)).await, Ok(1));
    ///
    /// signal.cancel();
    /// assert!(signal.run_until_cancelled(future::ready(2)).await.is_err());
    /// # });
    /// ```
    pub fn run_until_cancelled<F: Future>(&self, future: F) -> Cancellable<'_, F> {
        Cancellable {
            future: Some(future),
            cancelled: self.wait(),
            polled: false,
        }
    }

    fn poll_wait(
        &self,
        waiter: Pin<&mut Waiter>,
        queued: &mut bool,
        cx: &mut Context<'_>,
    ) -> Poll<()> {
        if self.is_cancelled() {
            return Poll::Ready(());
        }

        let mut waiters = self.waiters.lock();
        if self.is_cancelled() {
            return Poll::Ready(());
        }

        waiters.register(waiter, cx.waker());
        *queued = true;
        Poll::Pending
    }

    fn drop_wait(&self, waiter: Pin<&mut Waiter>, queued: bool) {
        if !queued {
            return;
        }

        // the waiter may still be linked if the signal fired while it was
        // queued but it is being dropped before `cancel` got to it.
        self.waiters.lock().remove(waiter);
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CancelSignal")
            .field("cancelled", &self.is_cancelled())
            .field("waiters", &self.waiters)
            .finish()
    }
}

// === impl WaitForCancel ===

impl Future for WaitForCancel<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        this.signal.poll_wait(this.waiter, this.queued, cx)
    }
}

#[pinned_drop]
impl PinnedDrop for WaitForCancel<'_> {
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();
        this.signal.drop_wait(this.waiter, *this.queued);
    }
}

// safety: the `Waiter`'s `UnsafeCell` is only accessed through `&mut self`
// (when polling or dropping) or while the signal's wait list is locked.
unsafe impl Sync for WaitForCancel<'_> {}

// === impl Cancellable ===

impl<F: Future> Future for Cancellable<'_, F> {
    type Output = Result<F::Output, Cancelled>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();

        // a signal that fired before we started wins outright.
        if !*this.polled {
            *this.polled = true;
            if this.cancelled.signal.is_cancelled() {
                trace!("Cancellable::poll -> cancelled before first poll");
                this.future.set(None);
                return Poll::Ready(Err(Cancelled::new()));
            }
        }

        let Some(future) = this.future.as_mut().as_pin_mut() else {
            panic!("`Cancellable` polled after completion");
        };

        if let Poll::Ready(output) = future.poll(cx) {
            this.future.set(None);
            return Poll::Ready(Ok(output));
        }

        if this.cancelled.poll(cx).is_ready() {
            trace!("Cancellable::poll -> cancelled");
            this.future.set(None);
            return Poll::Ready(Err(Cancelled::new()));
        }

        Poll::Pending
    }
}

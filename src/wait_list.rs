//! An intrusive first-in, first-out list of tasks waiting to be notified.
//!
//! Both [`AsyncMutex`](crate::AsyncMutex) and
//! [`CancelSignal`](crate::CancelSignal) keep their pending futures in a
//! [`WaitList`]. Each future owns a pinned [`Waiter`] node, which is linked
//! into the list while the future is pending, so waiting never allocates.
//!
//! # Safety
//!
//! A `WaitList` is always stored inside a blocking mutex, and every method
//! takes `&mut self`, so holding a `&mut WaitList` means holding that lock.
//! A [`Waiter`] that may be linked into a list is only mutated while the
//! list's lock is held. The one exception is the waiter's `state` word: once a
//! waiter has been marked [`NOTIFIED`] or [`CANCELLED`], the notifier never
//! touches it again, so its owner may observe the outcome without taking the
//! lock.
use crate::{
    cancel::CancelSignal,
    loom::{
        cell::UnsafeCell,
        sync::atomic::{AtomicUsize, Ordering::*},
    },
    util::WakeBatch,
};
use cordyceps::{
    list::{self, List},
    Linked,
};
use core::{
    marker::PhantomPinned,
    pin::Pin,
    ptr::{self, NonNull},
    task::Waker,
};

#[derive(Debug)]
pub(crate) struct WaitList {
    queue: List<Waiter>,
}

/// A node in a [`WaitList`], pinned inside the future that is waiting.
#[derive(Debug)]
pub(crate) struct Waiter {
    node: UnsafeCell<Node>,

    /// One of [`IDLE`], [`QUEUED`], [`NOTIFIED`] or [`CANCELLED`].
    state: AtomicUsize,

    /// If set, a notification skips this waiter once the signal has fired.
    ///
    /// The future that owns the waiter borrows the signal for at least as
    /// long as the waiter may be linked, so the pointer is only dereferenced
    /// while the waiter is in a list.
    signal: Option<NonNull<CancelSignal>>,
}

#[derive(Debug)]
struct Node {
    links: list::Links<Waiter>,
    waker: Option<Waker>,

    // This type is !Unpin due to the heuristic from:
    // <https://github.com/rust-lang/rust/pull/82834>
    _pin: PhantomPinned,
}

/// The waiter is not linked into a list.
const IDLE: usize = 0;
/// The waiter is linked into a list and has not been notified.
const QUEUED: usize = 1;
/// The waiter was popped from the list by a notification.
const NOTIFIED: usize = 2;
/// The waiter was popped from the list, but its signal had already fired, so
/// the notification went to the next waiter instead.
const CANCELLED: usize = 3;

// === impl WaitList ===

impl WaitList {
    #[must_use]
    pub(crate) const fn new() -> Self {
        Self { queue: List::new() }
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    /// Links `waiter` at the back of the list if it is not already queued, and
    /// stores `waker` to be woken when it is notified.
    ///
    /// The waiter must not have been notified already.
    pub(crate) fn register(&mut self, waiter: Pin<&mut Waiter>, waker: &Waker) {
        let state = waiter.state.load(Acquire);
        debug_assert!(
            state == IDLE || state == QUEUED,
            "registered a waiter that was already popped (state {state})"
        );

        let ptr = unsafe {
            // safety: the node is only moved out of the pin by pointer, and
            // `Linked` never moves it.
            NonNull::from(Pin::into_inner_unchecked(waiter))
        };
        Waiter::with_node(ptr, &mut self.queue, |node| {
            let will_wake = node
                .waker
                .as_ref()
                .map_or(false, |current| current.will_wake(waker));
            if !will_wake {
                node.waker = Some(waker.clone());
            }
        });

        if state == IDLE {
            unsafe { ptr.as_ref() }.state.store(QUEUED, Release);
            // the oldest waiter lives at the back of the list.
            self.queue.push_front(ptr);
            trace!(waiter = ?ptr, len = self.queue.len(), "WaitList::register -> enqueued");
        }
    }

    /// Notifies the waiter that has been waiting the longest, if there is one,
    /// adding its waker to `batch`.
    ///
    /// Waiters whose signal has already fired are popped and marked
    /// [`CANCELLED`] instead, without being woken: the signal wakes their
    /// tasks itself.
    ///
    /// Returns `false` if no waiter was notified.
    pub(crate) fn notify_one(&mut self, batch: &mut WakeBatch) -> bool {
        while let Some(ptr) = self.queue.pop_back() {
            let waker = Waiter::with_node(ptr, &mut self.queue, |node| node.waker.take());
            let waiter = unsafe {
                // safety: the waiter was linked until just now, and only the
                // notifier may touch it until it is marked.
                ptr.as_ref()
            };

            if waiter.is_abandoned() {
                trace!(waiter = ?ptr, "WaitList::notify_one -> skipped cancelled waiter");
                // as below, this is the last access to the waiter.
                waiter.state.store(CANCELLED, Release);
                continue;
            }

            if let Some(waker) = waker {
                batch.add_waker(waker);
            }

            trace!(waiter = ?ptr, "WaitList::notify_one");
            // this must be the last access to the waiter: as soon as its owner
            // observes `NOTIFIED`, it may complete and free the node.
            waiter.state.store(NOTIFIED, Release);
            return true;
        }

        false
    }

    /// Notifies waiters until either the list is empty or `batch` is full.
    ///
    /// Returns `true` if waiters remain in the list; in that case, the caller
    /// should release the lock, wake the batch, and call this method again.
    pub(crate) fn notify_batch(&mut self, batch: &mut WakeBatch) -> bool {
        while batch.can_add_waker() {
            if !self.notify_one(batch) {
                return false;
            }
        }
        !self.queue.is_empty()
    }

    /// Unlinks `waiter` if it is still queued.
    ///
    /// Returns `true` if the waiter had already been notified, in which case
    /// whatever the notification carried now belongs to the caller.
    pub(crate) fn remove(&mut self, waiter: Pin<&mut Waiter>) -> bool {
        match test_dbg!(waiter.state.load(Acquire)) {
            QUEUED => {
                let ptr = unsafe { NonNull::from(Pin::into_inner_unchecked(waiter)) };
                unsafe {
                    // safety: the waiter is `QUEUED`, so it is linked into
                    // this list, and we hold the list's lock.
                    self.queue.remove(ptr);
                    ptr.as_ref().state.store(IDLE, Release);
                }
                trace!(waiter = ?ptr, "WaitList::remove -> unlinked");
                false
            }
            NOTIFIED => true,
            // `IDLE` or `CANCELLED`: not linked, and owns nothing.
            _ => false,
        }
    }
}

// === impl Waiter ===

impl Waiter {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            node: UnsafeCell::new(Node {
                links: list::Links::new(),
                waker: None,
                _pin: PhantomPinned,
            }),
            state: AtomicUsize::new(IDLE),
            signal: None,
        }
    }

    /// Returns a waiter that notifications skip once `signal` has fired.
    ///
    /// # Safety
    ///
    /// `signal` must outlive every period during which the waiter is linked
    /// into a list.
    #[must_use]
    pub(crate) unsafe fn with_signal(signal: &CancelSignal) -> Self {
        Self {
            signal: Some(NonNull::from(signal)),
            ..Self::new()
        }
    }

    /// Returns `true` if this waiter was popped from its list by a
    /// notification. Does not require the list's lock.
    #[inline]
    pub(crate) fn is_notified(&self) -> bool {
        self.state.load(Acquire) == NOTIFIED
    }

    /// Returns `true` if a notification skipped this waiter because its
    /// signal had fired. Does not require the list's lock.
    #[inline]
    pub(crate) fn is_cancelled(&self) -> bool {
        self.state.load(Acquire) == CANCELLED
    }

    /// Must only be called while the waiter is linked into a locked list.
    fn is_abandoned(&self) -> bool {
        self.signal.map_or(false, |signal| {
            unsafe {
                // safety: see the docs on the `signal` field.
                signal.as_ref()
            }
            .is_cancelled()
        })
    }

    /// # Safety
    ///
    /// This is only safe to call while the list is locked. The dummy `_list`
    /// parameter ensures this method is only called while holding the lock,
    /// though nothing checks that it is the list `this` belongs to.
    #[inline(always)]
    #[cfg_attr(loom, track_caller)]
    fn with_node<T>(
        mut this: NonNull<Self>,
        _list: &mut List<Self>,
        f: impl FnOnce(&mut Node) -> T,
    ) -> T {
        unsafe {
            // safety: this is only called while holding the lock on the list,
            // so it's safe to mutate the waiter.
            this.as_mut().node.with_mut(|node| f(&mut *node))
        }
    }
}

// safety: the only field that is not `Send` is the `signal` pointer, which is
// only ever dereferenced as a shared reference, and `CancelSignal` is `Sync`.
unsafe impl Send for Waiter {}

unsafe impl Linked<list::Links<Waiter>> for Waiter {
    type Handle = NonNull<Waiter>;

    fn into_ptr(r: Self::Handle) -> NonNull<Self> {
        r
    }

    unsafe fn from_ptr(ptr: NonNull<Self>) -> Self::Handle {
        ptr
    }

    unsafe fn links(target: NonNull<Self>) -> NonNull<list::Links<Waiter>> {
        // Safety: using `ptr::addr_of!` avoids creating a temporary
        // reference, which stacked borrows dislikes.
        let node = ptr::addr_of!((*target.as_ptr()).node);
        (*node).with_mut(|node| {
            let links = ptr::addr_of_mut!((*node).links);
            // Safety: `target` is non-null, so pointers to its fields are too.
            NonNull::new_unchecked(links)
        })
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use core::pin::pin;
    use futures::task::noop_waker;

    #[test]
    fn notifies_in_fifo_order() {
        let _trace = crate::util::test::trace_init();
        let waker = noop_waker();
        let mut list = WaitList::new();
        let mut first = pin!(Waiter::new());
        let mut second = pin!(Waiter::new());

        list.register(first.as_mut(), &waker);
        list.register(second.as_mut(), &waker);
        // registering again only refreshes the waker.
        list.register(first.as_mut(), &waker);
        assert_eq!(list.len(), 2);

        let mut batch = WakeBatch::new();
        assert!(list.notify_one(&mut batch));
        assert!(first.is_notified());
        assert!(!second.is_notified());

        assert!(list.notify_one(&mut batch));
        assert!(second.is_notified());
        assert!(!list.notify_one(&mut batch));
        batch.wake_all();
    }

    #[test]
    fn remove_reports_notification() {
        let _trace = crate::util::test::trace_init();
        let waker = noop_waker();
        let mut list = WaitList::new();
        let mut queued = pin!(Waiter::new());
        let mut notified = pin!(Waiter::new());

        list.register(notified.as_mut(), &waker);
        list.register(queued.as_mut(), &waker);

        let mut batch = WakeBatch::new();
        assert!(list.notify_one(&mut batch));

        assert!(!list.remove(queued.as_mut()));
        assert_eq!(list.len(), 0);
        // removing twice is harmless.
        assert!(!list.remove(queued.as_mut()));
        assert!(list.remove(notified.as_mut()));
    }

    #[test]
    fn skips_waiters_whose_signal_fired() {
        let _trace = crate::util::test::trace_init();
        let waker = noop_waker();
        let signal = CancelSignal::new();
        let mut list = WaitList::new();
        let mut abandoned = pin!(unsafe { Waiter::with_signal(&signal) });
        let mut next = pin!(Waiter::new());

        list.register(abandoned.as_mut(), &waker);
        list.register(next.as_mut(), &waker);
        signal.cancel();

        let mut batch = WakeBatch::new();
        assert!(list.notify_one(&mut batch));
        assert!(abandoned.is_cancelled());
        assert!(!abandoned.is_notified());
        assert!(next.is_notified());

        // a skipped waiter is no longer linked, and owns nothing.
        assert!(!list.remove(abandoned.as_mut()));
        assert!(!list.notify_one(&mut batch));
    }
}

use core::task::Waker;

/// A fixed-capacity batch of [`Waker`]s, collected while a wait list is
/// locked and woken once the lock has been released.
///
/// A waker must never be woken while its wait list is locked: some executors
/// poll the woken task inline, and it will try to lock the same list.
pub(crate) struct WakeBatch {
    len: usize,
    wakers: [Option<Waker>; MAX_WAKERS],
}

// when running loom tests, keep the batch tiny so that the models exercise
// the case where the wait list is locked more than once.
const MAX_WAKERS: usize = if cfg!(loom) { 2 } else { 16 };

impl WakeBatch {
    #[must_use]
    pub(crate) const fn new() -> Self {
        const EMPTY: Option<Waker> = None;
        Self {
            len: 0,
            wakers: [EMPTY; MAX_WAKERS],
        }
    }

    /// Returns `true` if there is room for another [`Waker`] in the batch.
    #[inline]
    pub(crate) fn can_add_waker(&self) -> bool {
        self.len < MAX_WAKERS
    }

    /// Adds a [`Waker`] to the batch.
    ///
    /// The caller must check [`WakeBatch::can_add_waker`] first.
    pub(crate) fn add_waker(&mut self, waker: Waker) {
        debug_assert!(self.can_add_waker(), "wake batch is full");
        self.wakers[self.len] = Some(waker);
        self.len += 1;
    }

    /// Wakes every task in the batch, leaving it empty.
    pub(crate) fn wake_all(&mut self) {
        let len = core::mem::replace(&mut self.len, 0);
        for waker in self.wakers[..len].iter_mut().filter_map(Option::take) {
            waker.wake();
        }
    }
}

impl core::fmt::Debug for WakeBatch {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WakeBatch").field("len", &self.len).finish()
    }
}

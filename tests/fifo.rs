#![cfg(not(loom))]
//! Property tests checking that the lock is always granted in the order tasks
//! started waiting, no matter which of them give up along the way.
use asynclock::{AsyncMutex, CancelSignal};
use proptest::{collection::vec, prelude::*};
use tokio_test::{assert_pending, assert_ready_err, assert_ready_ok, task};

mod util;

#[derive(Copy, Clone, Debug)]
enum Fate {
    /// Waits until it is handed the lock.
    Acquire,
    /// Gives up by firing its cancel signal, and notices right away.
    Cancel,
    /// Fires its cancel signal, but is not polled again until the lock has
    /// been handed past it.
    CancelWhileQueued,
    /// Gives up by being dropped.
    Drop,
}

fn fate() -> impl Strategy<Value = Fate> {
    prop_oneof![
        2 => Just(Fate::Acquire),
        1 => Just(Fate::Cancel),
        1 => Just(Fate::CancelWhileQueued),
        1 => Just(Fate::Drop),
    ]
}

proptest! {
    #[test]
    fn granted_in_fifo_order(fates in vec(fate(), 1..32)) {
        util::trace_init();
        let _span = tracing::info_span!("fifo").entered();
        tracing::info!(?fates);
        run_fifo(&fates);
    }
}

fn run_fifo(fates: &[Fate]) {
    let mutex = AsyncMutex::new();
    let signals = fates.iter().map(|_| CancelSignal::new()).collect::<Vec<_>>();

    let mut holder = mutex.try_acquire().expect("mutex is free");
    let mut waiters = signals
        .iter()
        .map(|signal| Some(task::spawn(mutex.acquire_or_cancel(signal))))
        .collect::<Vec<_>>();
    for waiter in waiters.iter_mut().flatten() {
        assert_pending!(waiter.poll());
    }
    assert_eq!(mutex.waiters(), fates.len());

    for (i, fate) in fates.iter().enumerate() {
        match fate {
            Fate::Acquire => {}
            Fate::Cancel => {
                signals[i].cancel();
                let mut waiter = waiters[i].take().expect("waiter is present");
                assert_ready_err!(waiter.poll());
            }
            Fate::CancelWhileQueued => {
                signals[i].cancel();
            }
            Fate::Drop => drop(waiters[i].take()),
        }
    }

    let remaining = fates
        .iter()
        .filter(|fate| matches!(fate, Fate::Acquire | Fate::CancelWhileQueued))
        .count();
    assert_eq!(mutex.waiters(), remaining);

    for i in 0..waiters.len() {
        if !matches!(fates[i], Fate::Acquire) {
            continue;
        }
        let Some(mut waiter) = waiters[i].take() else {
            continue;
        };

        drop(holder);
        assert!(waiter.is_woken(), "waiter {i} should be next in line");
        for (j, later) in waiters.iter().enumerate().skip(i + 1) {
            if let (Some(later), Fate::Acquire) = (later, fates[j]) {
                assert!(!later.is_woken(), "waiter {j} was woken before waiter {i}");
            }
        }

        holder = assert_ready_ok!(waiter.poll());
        assert!(mutex.is_locked());
    }

    drop(holder);
    assert!(!mutex.is_locked());
    assert_eq!(mutex.waiters(), 0);

    // waiters whose signal fired while they were queued were skipped, and
    // were woken by their signal rather than by the lock.
    for (i, waiter) in waiters.iter_mut().enumerate() {
        if let Some(waiter) = waiter {
            assert!(waiter.is_woken(), "cancelled waiter {i} was never woken");
            assert_ready_err!(waiter.poll());
        }
    }
    assert!(!mutex.is_locked());
}

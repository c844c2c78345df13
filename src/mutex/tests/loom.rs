use super::*;
use crate::loom::{
    self, future,
    sync::{
        atomic::{AtomicUsize, Ordering::SeqCst},
        Arc,
    },
    thread,
};
use futures::FutureExt;

#[test]
fn basically_works() {
    const TASKS: usize = 2;

    async fn task((ref mutex, ref count): &(AsyncMutex, AtomicUsize)) {
        let token = mutex.acquire().await;
        let actual = count.fetch_add(1, SeqCst);
        assert_eq!(actual, 0, "two tasks held the lock at once");

        let actual = count.fetch_sub(1, SeqCst);
        assert_eq!(actual, 1);
        drop(token);
    }

    loom::model(|| {
        let shared = Arc::new((AsyncMutex::new(), AtomicUsize::new(0)));
        let threads = (0..TASKS)
            .map(|_| {
                let shared = shared.clone();
                thread::spawn(move || {
                    future::block_on(task(&shared));
                })
            })
            .collect::<Vec<_>>();

        future::block_on(task(&shared));

        for t in threads {
            t.join().unwrap();
        }

        assert!(!shared.0.is_locked());
    })
}

#[test]
fn release_on_drop() {
    loom::model(|| {
        let mutex = Arc::new(AsyncMutex::new());

        let thread = thread::spawn({
            let mutex = mutex.clone();
            move || {
                let _token = future::block_on(mutex.acquire());
            }
        });

        let token = future::block_on(mutex.acquire());
        drop(token);
        thread.join().unwrap();

        assert!(mutex.try_acquire().is_some());
    })
}

#[test]
fn cancel_races_release() {
    loom::model(|| {
        let shared = Arc::new((AsyncMutex::new(), CancelSignal::new()));

        let holder = thread::spawn({
            let shared = shared.clone();
            move || {
                let _token = future::block_on(shared.0.acquire());
            }
        });

        let canceller = thread::spawn({
            let shared = shared.clone();
            move || {
                shared.1.cancel();
            }
        });

        let (ref mutex, ref signal) = *shared;
        match future::block_on(mutex.acquire_or_cancel(signal)) {
            Ok(token) => {
                assert!(mutex.is_locked());
                drop(token);
            }
            Err(_) => assert!(signal.is_cancelled()),
        }

        holder.join().unwrap();
        canceller.join().unwrap();

        assert!(!mutex.is_locked());
        assert_eq!(mutex.waiters(), 0);
        assert!(mutex.try_acquire().is_some());
    })
}

#[test]
fn dropped_waiter_races_release() {
    loom::model(|| {
        let mutex = Arc::new(AsyncMutex::new());
        let token = mutex.try_acquire().expect("mutex is free");

        let thread = thread::spawn({
            let mutex = mutex.clone();
            move || {
                // poll the waiter once, then drop it, whether or not it was
                // handed the lock in between.
                if let Some(token) = mutex.acquire().now_or_never() {
                    drop(token);
                }
            }
        });

        drop(token);
        thread.join().unwrap();

        assert!(!mutex.is_locked());
        assert_eq!(mutex.waiters(), 0);
    })
}

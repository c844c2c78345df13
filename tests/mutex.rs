#![cfg(not(loom))]
use asynclock::{AsyncMutex, CancelSignal};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering::SeqCst},
        Arc,
    },
    time::Duration,
};
use tokio::sync::oneshot;

mod util;

#[test]
fn try_acquire() {
    let mutex = AsyncMutex::new();

    let token1 = mutex.try_acquire();
    assert!(token1.is_some());

    let token2 = mutex.try_acquire();
    assert!(token2.is_none());
    drop(token1);

    let token3 = mutex.try_acquire();
    assert!(token3.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mutual_exclusion() {
    const TASKS: usize = 8;
    const ITERS: usize = 100;
    util::trace_init();

    let mutex = Arc::new(AsyncMutex::new());
    let in_critical_section = Arc::new(AtomicBool::new(false));

    let tasks = (0..TASKS)
        .map(|_| {
            let mutex = mutex.clone();
            let in_critical_section = in_critical_section.clone();
            tokio::spawn(async move {
                for _ in 0..ITERS {
                    let _token = mutex.acquire().await;
                    assert!(
                        !in_critical_section.swap(true, SeqCst),
                        "two tasks entered the critical section"
                    );
                    tokio::task::yield_now().await;
                    assert!(in_critical_section.swap(false, SeqCst));
                }
            })
        })
        .collect::<Vec<_>>();

    for task in tasks {
        task.await.expect("task should not panic");
    }
    assert!(!mutex.is_locked());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn no_lost_wakeups() {
    const TASKS: usize = 100;
    util::trace_init();

    let mutex = Arc::new(AsyncMutex::new());
    let completed = Arc::new(AtomicUsize::new(0));

    // hold the lock until every task is spawned, so most of them must wait.
    let holder = mutex.clone().try_acquire_owned().expect("mutex is free");
    let tasks = (0..TASKS)
        .map(|_| {
            let mutex = mutex.clone();
            let completed = completed.clone();
            tokio::spawn(async move {
                let token = mutex.acquire_owned().await;
                completed.fetch_add(1, SeqCst);
                drop(token);
            })
        })
        .collect::<Vec<_>>();
    holder.release();

    futures_util::future::try_join_all(tasks)
        .await
        .expect("no task should panic");
    assert_eq!(completed.load(SeqCst), TASKS);
    assert!(!mutex.is_locked());
    assert_eq!(mutex.waiters(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_races_release() {
    const TRIALS: usize = 10_000;
    util::trace_init();

    let mut acquired = 0;
    for _ in 0..TRIALS {
        let mutex = Arc::new(AsyncMutex::new());
        let signal = Arc::new(CancelSignal::new());
        let holder = mutex.clone().try_acquire_owned().expect("mutex is free");

        let release = tokio::spawn(async move {
            tokio::task::yield_now().await;
            holder.release();
        });
        let cancel = tokio::spawn({
            let signal = signal.clone();
            async move {
                tokio::task::yield_now().await;
                signal.cancel();
            }
        });

        if let Ok(token) = mutex.clone().acquire_owned_or_cancel(&signal).await {
            acquired += 1;
            drop(token);
        }

        release.await.expect("release task should not panic");
        cancel.await.expect("cancel task should not panic");

        assert!(!mutex.is_locked());
        assert_eq!(mutex.waiters(), 0);
        assert!(mutex.try_acquire().is_some());
    }
    tracing::info!(acquired, cancelled = TRIALS - acquired, "done");
}

#[tokio::test]
async fn timeout() {
    util::trace_init();
    let mutex = AsyncMutex::new();
    let _held = mutex.acquire().await;

    let timeout = Arc::new(CancelSignal::new());
    let timer = tokio::spawn({
        let timeout = timeout.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            timeout.cancel();
        }
    });

    assert!(mutex.acquire_or_cancel(&timeout).await.is_err());
    assert_eq!(mutex.waiters(), 0);
    assert!(mutex.is_locked());
    timer.await.expect("timer task should not panic");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hand_off_between_tasks() {
    util::trace_init();
    let mutex = Arc::new(AsyncMutex::new());

    // task A holds the lock...
    let a = mutex.clone().acquire_owned().await;

    // ...so task B has to wait for it.
    let (acquired_tx, acquired_rx) = oneshot::channel();
    let (release_tx, release_rx) = oneshot::channel::<()>();
    let b = tokio::spawn({
        let mutex = mutex.clone();
        async move {
            let token = mutex.acquire().await;
            acquired_tx.send(()).expect("test is still running");
            release_rx.await.expect("test is still running");
            drop(token);
        }
    });

    while mutex.waiters() == 0 {
        tokio::task::yield_now().await;
    }

    drop(a);
    acquired_rx.await.expect("B should acquire the lock");
    assert!(mutex.is_locked());
    assert!(mutex.try_acquire().is_none());

    release_tx.send(()).expect("B is still running");
    b.await.expect("B should not panic");
    assert!(!mutex.is_locked());
}

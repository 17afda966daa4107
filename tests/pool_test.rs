//! Integration tests for the bounded worker pool.

use orderq::Error;
use orderq::pool::WorkerPool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn degree_one_runs_in_acceptance_order() {
    let seen: Arc<Mutex<Vec<u64>>> = Arc::default();
    let pool = {
        let seen = Arc::clone(&seen);
        WorkerPool::spawn("serial", 1, None, move |ms: u64| {
            let seen = Arc::clone(&seen);
            async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                seen.lock().unwrap().push(ms);
            }
        })
    };

    for ms in [30, 1, 20, 2] {
        assert!(pool.accept(ms).await);
    }
    pool.signal_complete();
    pool.completion().await.unwrap();

    assert_eq!(*seen.lock().unwrap(), [30, 1, 20, 2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_never_exceeds_degree() {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let pool = {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        WorkerPool::spawn("bounded", 3, None, move |_: u32| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }
        })
    };

    for n in 0..20 {
        assert!(pool.accept(n).await);
    }
    pool.signal_complete();
    pool.completion().await.unwrap();

    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert_eq!(running.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn try_slot_times_out_when_saturated() {
    let gate = Arc::new(Semaphore::new(0));
    let pool = {
        let gate = Arc::clone(&gate);
        WorkerPool::spawn("tight", 1, Some(1), move |_: u32| {
            let gate = Arc::clone(&gate);
            async move {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }
        })
    };

    // First item runs and blocks; the second fills the only buffer slot.
    assert!(pool.accept(1).await);
    let started = tokio::time::timeout(Duration::from_secs(5), async {
        while pool.queue_depth() != 0 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(started.is_ok());
    assert!(pool.accept(2).await);
    assert_eq!(pool.queue_depth(), 1);

    assert!(pool.try_slot(Duration::from_millis(20)).await.is_none());

    gate.add_permits(1);
    let slot = pool
        .try_slot(Duration::from_secs(5))
        .await
        .expect("capacity frees up once the first item finishes");
    slot.send(3);

    gate.add_permits(2);
    pool.signal_complete();
    pool.completion().await.unwrap();
    assert_eq!(pool.queue_depth(), 0);
}

#[tokio::test]
async fn closed_pool_refuses_work() {
    let pool = WorkerPool::spawn("closed", 2, None, |_: u32| async {});
    assert_eq!(pool.name(), "closed");
    assert!(pool.is_accepting());

    pool.signal_complete();
    pool.signal_complete();
    assert!(!pool.is_accepting());

    assert!(!pool.accept(1).await);
    assert!(pool.try_slot(Duration::from_millis(5)).await.is_none());
    pool.completion().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_handler_faults_the_pool() {
    let pool = WorkerPool::spawn("faulty", 2, None, |n: u32| async move {
        if n == 2 {
            panic!("handler blew up");
        }
    });

    for n in 0..4 {
        assert!(pool.accept(n).await);
    }
    pool.signal_complete();

    let result = pool.completion().await;
    assert!(matches!(result, Err(Error::Pool(_))));
}

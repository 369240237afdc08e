//! Tests for WorkerPool
//!
//! These tests verify:
//! - Result handles and panic capture
//! - Shutdown drains every queued task
//! - Submission after shutdown fails
//! - FIFO dispatch and parallel execution
//! - Shutdown from inside a worker

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use crossbeam::channel;
use netpool::{NetError, WorkerPool};

// =============================================================================
// Basic Submission Tests
// =============================================================================

#[test]
fn test_submit_returns_result() {
    let pool = WorkerPool::new(2).unwrap();

    let handle = pool.submit(|| 6 * 7).unwrap();

    assert_eq!(handle.join().unwrap(), 42);
}

#[test]
fn test_submit_captures_inputs() {
    let pool = WorkerPool::new(2).unwrap();
    let (a, b) = (1, 2);

    let handle = pool.submit(move || a + b).unwrap();

    assert_eq!(handle.join().unwrap(), 3);
}

#[test]
fn test_zero_threads_clamped_to_one() {
    let pool = WorkerPool::new(0).unwrap();
    assert_eq!(pool.size(), 1);
    assert_eq!(pool.submit(|| "ran").unwrap().join().unwrap(), "ran");
}

#[test]
fn test_default_size_matches_parallelism() {
    let pool = WorkerPool::with_default_size().unwrap();
    let expected = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    assert_eq!(pool.size(), expected);
}

#[test]
fn test_execute_runs_without_handle() {
    let pool = WorkerPool::new(2).unwrap();
    let (tx, rx) = channel::bounded(1);

    pool.execute(move || tx.send("done").unwrap()).unwrap();

    assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "done");
}

// =============================================================================
// Panic Handling Tests
// =============================================================================

#[test]
fn test_panicking_task_reports_error_and_worker_survives() {
    let pool = WorkerPool::new(1).unwrap();

    let bad = pool.submit(|| -> u32 { panic!("boom") }).unwrap();
    match bad.join() {
        Err(NetError::TaskPanicked(msg)) => assert!(msg.contains("boom")),
        other => panic!("expected TaskPanicked, got {:?}", other.map(|_| ())),
    }

    // The single worker must still be alive.
    let good = pool.submit(|| 1).unwrap();
    assert_eq!(good.join().unwrap(), 1);
}

#[test]
fn test_panicking_execute_does_not_kill_worker() {
    let pool = WorkerPool::new(1).unwrap();

    pool.execute(|| panic!("fire and forget")).unwrap();

    assert_eq!(pool.submit(|| 5).unwrap().join().unwrap(), 5);
}

// =============================================================================
// Shutdown Tests
// =============================================================================

#[test]
fn test_shutdown_drains_all_queued_tasks() {
    let pool = WorkerPool::new(2).unwrap();
    let completed = Arc::new(AtomicUsize::new(0));

    for _ in 0..100 {
        let completed = Arc::clone(&completed);
        pool.execute(move || {
            thread::sleep(Duration::from_millis(1));
            completed.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    }

    pool.shutdown();

    assert_eq!(completed.load(Ordering::SeqCst), 100);
    assert_eq!(pool.pending_count(), 0);
}

#[test]
fn test_submit_after_shutdown_fails() {
    let pool = WorkerPool::new(2).unwrap();
    pool.shutdown();

    assert!(pool.is_closed());
    assert!(matches!(pool.submit(|| 1), Err(NetError::PoolClosed)));
    assert!(matches!(pool.execute(|| {}), Err(NetError::PoolClosed)));
}

#[test]
fn test_submit_after_shutdown_fails_with_busy_history() {
    let pool = WorkerPool::new(3).unwrap();
    let handles: Vec<_> = (0..20).map(|i| pool.submit(move || i).unwrap()).collect();
    pool.shutdown();

    let total: i32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(total, (0..20).sum());
    assert!(matches!(pool.submit(|| 1), Err(NetError::PoolClosed)));
}

#[test]
fn test_shutdown_is_idempotent() {
    let pool = WorkerPool::new(2).unwrap();
    pool.shutdown();
    pool.shutdown();
    assert!(pool.is_closed());
}

#[test]
fn test_drop_runs_pending_tasks() {
    let completed = Arc::new(AtomicUsize::new(0));
    {
        let pool = WorkerPool::new(1).unwrap();
        for _ in 0..10 {
            let completed = Arc::clone(&completed);
            pool.execute(move || {
                completed.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
    }
    assert_eq!(completed.load(Ordering::SeqCst), 10);
}

#[test]
fn test_shutdown_from_inside_worker() {
    let pool = Arc::new(WorkerPool::new(2).unwrap());
    let inner = Arc::clone(&pool);

    let handle = pool.submit(move || inner.shutdown()).unwrap();

    handle.join().unwrap();
    assert!(pool.is_closed());
    assert!(matches!(pool.submit(|| 1), Err(NetError::PoolClosed)));
}

// =============================================================================
// Scheduling Tests
// =============================================================================

#[test]
fn test_pending_count_tracks_queue() {
    let pool = WorkerPool::new(1).unwrap();
    let (release_tx, release_rx) = channel::bounded::<()>(0);
    let (started_tx, started_rx) = channel::bounded::<()>(1);

    // Park the only worker.
    pool.execute(move || {
        started_tx.send(()).unwrap();
        release_rx.recv().unwrap();
    })
    .unwrap();
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    for _ in 0..3 {
        pool.execute(|| {}).unwrap();
    }
    assert_eq!(pool.pending_count(), 3);

    release_tx.send(()).unwrap();
    pool.shutdown();
    assert_eq!(pool.pending_count(), 0);
}

#[test]
fn test_single_worker_runs_tasks_in_fifo_order() {
    let pool = WorkerPool::new(1).unwrap();
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

    for i in 0..50 {
        let order = Arc::clone(&order);
        pool.execute(move || order.lock().push(i)).unwrap();
    }
    pool.shutdown();

    assert_eq!(*order.lock(), (0..50).collect::<Vec<_>>());
}

#[test]
fn test_workers_run_in_parallel() {
    const WORKERS: usize = 4;
    let pool = WorkerPool::new(WORKERS).unwrap();
    let barrier = Arc::new(Barrier::new(WORKERS));

    // Deadlocks unless all four tasks run at the same time.
    let handles: Vec<_> = (0..WORKERS)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            pool.submit(move || barrier.wait().is_leader()).unwrap()
        })
        .collect();

    let leaders = handles
        .into_iter()
        .map(|h| h.join_timeout(Duration::from_secs(5)).unwrap().unwrap())
        .filter(|&leader| leader)
        .count();
    assert_eq!(leaders, 1);
}

#[test]
fn test_try_join_before_and_after_completion() {
    let pool = WorkerPool::new(1).unwrap();
    let (release_tx, release_rx) = channel::bounded::<()>(0);

    let handle = pool
        .submit(move || {
            release_rx.recv().unwrap();
            "finished"
        })
        .unwrap();

    assert!(handle.try_join().unwrap().is_none());
    release_tx.send(()).unwrap();
    assert_eq!(
        handle.join_timeout(Duration::from_secs(5)).unwrap(),
        Some("finished")
    );
}

#[test]
fn test_concurrent_submitters() {
    let pool = Arc::new(WorkerPool::new(4).unwrap());
    let completed = Arc::new(AtomicUsize::new(0));

    let submitters: Vec<_> = (0..8)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let completed = Arc::clone(&completed);
            thread::spawn(move || {
                for _ in 0..50 {
                    let completed = Arc::clone(&completed);
                    pool.execute(move || {
                        completed.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap();
                }
            })
        })
        .collect();
    for submitter in submitters {
        submitter.join().unwrap();
    }

    pool.shutdown();
    assert_eq!(completed.load(Ordering::SeqCst), 400);
}

//! Drain behaviour of the prediction tracker under concurrent shutdown.

use llama_runtime::{PredictionTracker, RuntimeError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn shutdown_waits_for_all_admitted_predictions() {
    let tracker = Arc::new(PredictionTracker::new());
    let released = Arc::new(AtomicUsize::new(0));

    let mut stops = Vec::new();
    let mut workers = Vec::new();
    for _ in 0..5 {
        let permit = tracker.admit().unwrap();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let released = Arc::clone(&released);
        stops.push(stop_tx);
        workers.push(thread::spawn(move || {
            let _ = stop_rx.recv();
            released.fetch_add(1, Ordering::SeqCst);
            drop(permit);
        }));
    }
    assert_eq!(tracker.in_flight(), 5);

    let stopper = {
        let tracker = Arc::clone(&tracker);
        thread::spawn(move || tracker.shutdown())
    };
    while !tracker.is_closed() {
        thread::yield_now();
    }

    // A sixth prediction arriving after shutdown began is turned away.
    assert_eq!(tracker.admit().err(), Some(RuntimeError::TrackerClosed));

    let mut stops = stops.into_iter();
    for _ in 0..4 {
        stops.next().unwrap().send(()).unwrap();
    }
    thread::sleep(Duration::from_millis(50));
    assert!(!stopper.is_finished());
    assert_eq!(tracker.in_flight(), 1);

    stops.next().unwrap().send(()).unwrap();
    stopper.join().unwrap();
    assert_eq!(released.load(Ordering::SeqCst), 5);
    assert_eq!(tracker.in_flight(), 0);

    for worker in workers {
        worker.join().unwrap();
    }
}

#[test]
fn concurrent_shutdown_calls_all_return() {
    let tracker = Arc::new(PredictionTracker::new());
    let permit = tracker.admit().unwrap();

    let n = 8;
    let barrier = Arc::new(Barrier::new(n + 1));
    let handles: Vec<_> = (0..n)
        .map(|_| {
            let tracker = Arc::clone(&tracker);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                tracker.shutdown();
            })
        })
        .collect();

    barrier.wait();
    while !tracker.is_closed() {
        thread::yield_now();
    }
    drop(permit);

    for handle in handles {
        handle.join().unwrap();
    }
    assert!(tracker.is_closed());
    assert_eq!(tracker.in_flight(), 0);
}

#[test]
fn admission_racing_shutdown_never_leaks() {
    let tracker = Arc::new(PredictionTracker::new());
    let admitted = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(9));

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let tracker = Arc::clone(&tracker);
            let admitted = Arc::clone(&admitted);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..1000 {
                    match tracker.admit() {
                        Ok(permit) => {
                            admitted.fetch_add(1, Ordering::SeqCst);
                            drop(permit);
                        }
                        Err(err) => {
                            assert_eq!(err, RuntimeError::TrackerClosed);
                            break;
                        }
                    }
                }
            })
        })
        .collect();

    barrier.wait();
    tracker.shutdown();
    assert_eq!(tracker.in_flight(), 0);
    assert!(tracker.admit().is_err());

    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(tracker.in_flight(), 0);
}

#[test]
fn bounded_shutdown_gives_up_on_stuck_prediction() {
    let tracker = Arc::new(PredictionTracker::new());
    let stuck = tracker.admit().unwrap();

    assert!(!tracker.shutdown_timeout(Duration::from_millis(30)));
    assert!(tracker.is_closed());
    assert_eq!(tracker.in_flight(), 1);

    stuck.release();
    assert!(tracker.shutdown_timeout(Duration::from_millis(30)));
}

#[test]
fn track_runs_and_releases() {
    let tracker = Arc::new(PredictionTracker::new());
    let out = tracker.track(|| "done").unwrap();
    assert_eq!(out, "done");
    assert_eq!(tracker.in_flight(), 0);

    tracker.shutdown();
    assert_eq!(tracker.track(|| "late"), Err(RuntimeError::TrackerClosed));
}

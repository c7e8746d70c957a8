#![allow(missing_docs)]
#![cfg(feature = "loom")]

use dagpool::{pool::ThreadPool, task::Task};
use loom::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn loom_chain_runs_once_in_order() {
    loom::model(|| {
        // Graph: A -> B on a single worker.
        // Expectation: each task runs exactly once, and B observes A's
        // write regardless of how the worker and the submitter interleave.
        let pool = ThreadPool::new(1);
        let a_runs = Arc::new(AtomicUsize::new(0));
        let b_runs = Arc::new(AtomicUsize::new(0));

        let ta = {
            let a_runs = Arc::clone(&a_runs);
            Task::with_fn(move || {
                a_runs.fetch_add(1, Ordering::Relaxed);
            })
        };
        let tb = {
            let a_runs = Arc::clone(&a_runs);
            let b_runs = Arc::clone(&b_runs);
            Task::with_fn(move || {
                assert_eq!(
                    a_runs.load(Ordering::Relaxed),
                    1,
                    "parent body must happen-before child body"
                );
                b_runs.fetch_add(1, Ordering::Relaxed);
            })
        };
        tb.add_dependency(&ta);

        pool.submit(&tb).expect("submit must succeed");
        pool.wait();

        assert_eq!(a_runs.load(Ordering::Relaxed), 1);
        assert_eq!(b_runs.load(Ordering::Relaxed), 1);
        assert_eq!(pool.pending(), 0);
        assert!(pool.idle());

        // Joins the worker; loom requires every spawned thread to finish.
        drop(pool);
    });
}

#[test]
fn loom_two_roots_release_shared_join() {
    loom::model(|| {
        // Graph:
        //   A   B
        //    \ /
        //     J
        // Two workers may finish A and B in either order; J must run
        // exactly once and see both parents' writes.
        let pool = ThreadPool::new(2);
        let a_runs = Arc::new(AtomicUsize::new(0));
        let b_runs = Arc::new(AtomicUsize::new(0));
        let j_runs = Arc::new(AtomicUsize::new(0));

        let ta = {
            let a_runs = Arc::clone(&a_runs);
            Task::with_fn(move || {
                a_runs.fetch_add(1, Ordering::Relaxed);
            })
        };
        let tb = {
            let b_runs = Arc::clone(&b_runs);
            Task::with_fn(move || {
                b_runs.fetch_add(1, Ordering::Relaxed);
            })
        };
        let tj = {
            let a_runs = Arc::clone(&a_runs);
            let b_runs = Arc::clone(&b_runs);
            let j_runs = Arc::clone(&j_runs);
            Task::with_fn(move || {
                assert_eq!(a_runs.load(Ordering::Relaxed), 1);
                assert_eq!(b_runs.load(Ordering::Relaxed), 1);
                j_runs.fetch_add(1, Ordering::Relaxed);
            })
        };
        tj.add_dependency(&ta);
        tj.add_dependency(&tb);

        pool.submit(&tj).expect("submit must succeed");
        pool.wait();

        assert_eq!(a_runs.load(Ordering::Relaxed), 1);
        assert_eq!(b_runs.load(Ordering::Relaxed), 1);
        assert_eq!(j_runs.load(Ordering::Relaxed), 1);

        drop(pool);
    });
}

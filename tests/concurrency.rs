//! Admission under concurrent access.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use floodgate::ratelimit::{ClientKey, CounterStore, ManualClock, Policy};

fn store(limit: u64, window_secs: u64) -> (Arc<CounterStore>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(),
    ));
    let policy = Policy::new(limit, Duration::from_secs(window_secs)).unwrap();
    (
        Arc::new(CounterStore::with_clock(policy, clock.clone())),
        clock,
    )
}

#[test]
fn test_simultaneous_threads_admit_exactly_limit() {
    const LIMIT: u64 = 50;
    let (store, _) = store(LIMIT, 60);
    let callers = (2 * LIMIT) as usize;
    let barrier = Arc::new(Barrier::new(callers));

    let handles: Vec<_> = (0..callers)
        .map(|_| {
            let store = store.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                store.record_and_check(&ClientKey::from("hot")).unwrap()
            })
        })
        .collect();

    let decisions: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let admitted = decisions.iter().filter(|d| d.allowed).count() as u64;

    assert_eq!(admitted, LIMIT);
    assert_eq!(decisions.len() as u64 - admitted, LIMIT);

    // Every admitted caller holds a distinct slot.
    let mut slots: Vec<u64> = decisions
        .iter()
        .filter(|d| d.allowed)
        .map(|d| d.remaining)
        .collect();
    slots.sort_unstable();
    assert_eq!(slots, (0..LIMIT).collect::<Vec<_>>());
    assert!(decisions.iter().filter(|d| !d.allowed).all(|d| d.remaining == 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_simultaneous_tasks_admit_exactly_limit() {
    const LIMIT: u64 = 200;
    let (store, _) = store(LIMIT, 60);

    let tasks = (0..2 * LIMIT).map(|_| {
        let store = store.clone();
        tokio::spawn(async move { store.record_and_check(&ClientKey::from("burst")).unwrap() })
    });

    let decisions: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let admitted = decisions.iter().filter(|d| d.allowed).count() as u64;
    assert_eq!(admitted, LIMIT);
    assert_eq!(store.count_for(&ClientKey::from("burst")), Some(2 * LIMIT));
}

#[test]
fn test_exhausting_one_key_leaves_others_untouched() {
    let (store, _) = store(3, 60);
    let barrier = Arc::new(Barrier::new(2));

    let noisy = {
        let store = store.clone();
        let barrier = barrier.clone();
        thread::spawn(move || {
            barrier.wait();
            for _ in 0..1_000 {
                store.record_and_check(&ClientKey::from("A")).unwrap();
            }
        })
    };
    barrier.wait();
    noisy.join().unwrap();

    let decision = store.record_and_check(&ClientKey::from("B")).unwrap();
    assert!(decision.allowed);
    assert_eq!(decision.remaining, 2);
}

#[test]
fn test_sweep_during_traffic_never_over_admits() {
    const LIMIT: u64 = 20;
    let (store, clock) = store(LIMIT, 1);
    store.record_and_check(&ClientKey::from("k")).unwrap();
    // The entry is now old enough to be evicted.
    clock.advance(Duration::from_secs(10));

    let callers = 4 * LIMIT as usize;
    let barrier = Arc::new(Barrier::new(callers + 1));

    let sweeper = {
        let store = store.clone();
        let barrier = barrier.clone();
        thread::spawn(move || {
            barrier.wait();
            (0..200).map(|_| store.sweep_now()).sum::<usize>()
        })
    };

    let handles: Vec<_> = (0..callers)
        .map(|_| {
            let store = store.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                store.record_and_check(&ClientKey::from("k"))
            })
        })
        .collect();

    let admitted = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|d| matches!(d, Ok(d) if d.allowed))
        .count() as u64;
    let evicted = sweeper.join().unwrap();

    assert!(evicted <= 1);
    assert_eq!(admitted, LIMIT);
}

#[test]
fn test_one_shot_keys_are_reclaimed() {
    let (store, clock) = store(10, 30);

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..250 {
                    store
                        .record_and_check(&ClientKey::new(format!("scan-{t}-{i}")))
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(store.len(), 2_000);

    clock.advance(Duration::from_secs(45));
    let regulars: Vec<_> = (0..5).map(|i| ClientKey::new(format!("regular-{i}"))).collect();
    for key in &regulars {
        store.record_and_check(key).unwrap();
    }

    clock.advance(Duration::from_secs(20));
    assert_eq!(store.sweep_now(), 2_000);
    assert_eq!(store.len(), regulars.len());
}

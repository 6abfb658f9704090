use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::*;

use crossbeam_utils::Backoff;

use crate::raw_lock::{RawLock, RawTryLock};

/// Test-and-test-and-set spin lock.
///
/// Waiters spin on a plain load and only attempt the exchange once the flag reads free,
/// so waiting keeps the cache line shared. No fairness: a waiter can starve.
#[derive(Debug, Default)]
pub struct TatasLock {
    locked: AtomicBool,
}

impl TatasLock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Relaxed)
    }
}

impl RawLock for TatasLock {
    type Token = ();

    fn lock(&self) {
        let backoff = Backoff::new();
        loop {
            while self.locked.load(Relaxed) {
                backoff.snooze();
            }
            if !self.locked.swap(true, Acquire) {
                return;
            }
        }
    }

    unsafe fn unlock(&self, _token: ()) {
        self.locked.store(false, Release);
    }
}

impl RawTryLock for TatasLock {
    fn try_lock(&self) -> Option<()> {
        // Skip the exchange when it would fail anyway.
        if self.locked.load(Relaxed) || self.locked.swap(true, Acquire) {
            None
        } else {
            Some(())
        }
    }
}

#[test]
fn excludes_concurrent_holders() {
    crate::raw_lock::check_mutual_exclusion::<TatasLock>(8, 5_000);
}

#[test]
fn try_lock_fails_while_held() {
    let lock = crate::Lock::<TatasLock, i32>::new(0);
    let guard = lock.lock();
    assert!(lock.try_lock().is_none());
    drop(guard);
    let mut guard = lock.try_lock().expect("lock is free");
    *guard += 1;
    drop(guard);
    assert_eq!(*lock.lock(), 1);
}

#[test]
fn try_lock_avoids_deadlock_between_pairs() {
    // Each worker takes its own fork and only tries the neighbour's, backing off on
    // failure, so a cycle of holders can never block forever.
    let forks: Vec<crate::Lock<TatasLock, u32>> = (0..5).map(|_| crate::Lock::new(0)).collect();
    std::thread::scope(|s| {
        for i in 0..forks.len() {
            let forks = &forks;
            s.spawn(move || {
                let mut meals = 0;
                while meals < 200 {
                    let mut left = forks[i].lock();
                    if let Some(mut right) = forks[(i + 1) % forks.len()].try_lock() {
                        *left += 1;
                        *right += 1;
                        meals += 1;
                    }
                    drop(left);
                    std::thread::yield_now();
                }
            });
        }
    });
    let total: u32 = forks.into_iter().map(|f| f.into_inner()).sum();
    assert_eq!(total, 5 * 200 * 2);
}

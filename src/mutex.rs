use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering::*;

use atomic_wait::{wait, wake_one};

use crate::raw_lock::{RawLock, RawTryLock};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;
const CONTENDED: u32 = 2;

/// Blocking lock: spins briefly, then sleeps on the futex.
#[derive(Debug, Default)]
pub struct FutexLock {
    /// 0: unlocked
    /// 1: locked, no other thread waiting
    /// 2: locked, other threads may be waiting
    state: AtomicU32,
}

impl FutexLock {
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(UNLOCKED),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.state.load(Relaxed) != UNLOCKED
    }
}

fn lock_contended(state: &AtomicU32) {
    let mut spin_count = 0;

    while state.load(Relaxed) == LOCKED && spin_count < 100 {
        spin_count += 1;
        std::hint::spin_loop();
    }

    if state.compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed).is_ok() {
        return;
    }

    // From here on we may be sleeping, so whoever releases must wake someone.
    while state.swap(CONTENDED, Acquire) != UNLOCKED {
        wait(state, CONTENDED);
    }
}

impl RawLock for FutexLock {
    type Token = ();

    fn lock(&self) {
        if self
            .state
            .compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed)
            .is_err()
        {
            lock_contended(&self.state);
        }
    }

    unsafe fn unlock(&self, _token: ()) {
        if self.state.swap(UNLOCKED, Release) == CONTENDED {
            wake_one(&self.state);
        }
    }
}

impl RawTryLock for FutexLock {
    fn try_lock(&self) -> Option<()> {
        self.state
            .compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed)
            .ok()
            .map(|_| ())
    }
}

#[test]
fn excludes_concurrent_holders() {
    crate::raw_lock::check_mutual_exclusion::<FutexLock>(8, 5_000);
}

#[test]
fn sleeping_waiter_is_woken() {
    use std::time::Duration;

    let lock = crate::Lock::<FutexLock, u32>::new(0);
    std::thread::scope(|s| {
        let guard = lock.lock();
        s.spawn(|| {
            *lock.lock() = 123;
        });
        // Long enough for the waiter to give up spinning and go to sleep.
        std::thread::sleep(Duration::from_millis(100));
        drop(guard);
    });
    assert_eq!(lock.into_inner(), 123);
}

#[test]
fn try_lock_reports_state() {
    let lock = FutexLock::new();
    assert_eq!(lock.try_lock(), Some(()));
    assert!(lock.is_locked());
    assert_eq!(lock.try_lock(), None);
    unsafe { lock.unlock(()) };
    assert!(!lock.is_locked());
}

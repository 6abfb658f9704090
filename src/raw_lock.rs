use std::cell::UnsafeCell;
use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};

/// A mutual-exclusion primitive that protects no data by itself.
///
/// `lock` hands back a token describing this acquisition (a queue position for
/// [`ClhLock`](crate::ClhLock), nothing for the others) which must be given back to
/// `unlock` exactly once.
pub trait RawLock: Default + Send + Sync {
    type Token;

    fn lock(&self) -> Self::Token;

    /// # Safety
    ///
    /// `token` must come from a `lock` (or successful `try_lock`) on this same lock and
    /// must not have been used to unlock already.
    unsafe fn unlock(&self, token: Self::Token);
}

/// A lock that can also be acquired without waiting.
pub trait RawTryLock: RawLock {
    fn try_lock(&self) -> Option<Self::Token>;
}

/// A value protected by a `RawLock`.
pub struct Lock<L: RawLock, T> {
    raw: L,
    value: UnsafeCell<T>,
}

unsafe impl<L: RawLock, T: Send> Send for Lock<L, T> {}
unsafe impl<L: RawLock, T: Send> Sync for Lock<L, T> {}

/// Releases the lock when dropped, whichever way the scope is left.
pub struct LockGuard<'a, L: RawLock, T> {
    lock: &'a Lock<L, T>,
    token: ManuallyDrop<L::Token>,
}

unsafe impl<L: RawLock, T: Sync> Sync for LockGuard<'_, L, T> {}

impl<L: RawLock, T> Lock<L, T> {
    pub fn new(value: T) -> Self {
        Self {
            raw: L::default(),
            value: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> LockGuard<'_, L, T> {
        let token = self.raw.lock();
        LockGuard {
            lock: self,
            token: ManuallyDrop::new(token),
        }
    }

    /// No locking needed: `&mut self` already proves nobody else holds the lock.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<L: RawTryLock, T> Lock<L, T> {
    pub fn try_lock(&self) -> Option<LockGuard<'_, L, T>> {
        self.raw.try_lock().map(|token| LockGuard {
            lock: self,
            token: ManuallyDrop::new(token),
        })
    }
}

impl<L: RawLock, T: Default> Default for Lock<L, T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<L: RawLock, T> fmt::Debug for Lock<L, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock").finish_non_exhaustive()
    }
}

impl<L: RawLock, T> Deref for LockGuard<'_, L, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.value.get() }
    }
}

impl<L: RawLock, T> DerefMut for LockGuard<'_, L, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<L: RawLock, T: fmt::Debug> fmt::Debug for LockGuard<'_, L, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<L: RawLock, T> Drop for LockGuard<'_, L, T> {
    fn drop(&mut self) {
        // Safety: the token is taken exactly once, here, and came from `self.lock.raw`.
        unsafe {
            let token = ManuallyDrop::take(&mut self.token);
            self.lock.raw.unlock(token);
        }
    }
}

#[cfg(test)]
pub(crate) fn check_mutual_exclusion<L: RawLock>(threads: usize, iterations: usize) {
    let counter = Lock::<L, usize>::new(0);
    std::thread::scope(|s| {
        for _ in 0..threads {
            s.spawn(|| {
                for _ in 0..iterations {
                    let mut guard = counter.lock();
                    // Split read and write so a missed exclusion loses an update.
                    let current = *guard;
                    std::hint::black_box(&current);
                    *guard = current + 1;
                }
            });
        }
    });
    assert_eq!(counter.into_inner(), threads * iterations);
}

#[test]
fn guard_releases_on_panic() {
    let lock = Lock::<crate::TatasLock, Vec<u32>>::new(vec![]);
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let mut guard = lock.lock();
        guard.push(1);
        panic!("poison");
    }));
    assert!(result.is_err());
    // A leaked acquisition would spin forever here.
    assert_eq!(*lock.lock(), vec![1]);
}

#[test]
fn get_mut_and_into_inner_skip_locking() {
    let mut lock = Lock::<crate::ClhLock, String>::new(String::from("a"));
    lock.get_mut().push('b');
    assert_eq!(lock.into_inner(), "ab");
}

use std::fmt;
use std::ptr;
use std::sync::atomic::Ordering::*;
use std::sync::atomic::{fence, AtomicBool, AtomicPtr};

use crossbeam_utils::{Backoff, CachePadded};

use crate::raw_lock::RawLock;

struct WaitNode {
    /// true while the owner holds or waits for the lock
    waiting: AtomicBool,
}

impl WaitNode {
    fn alloc() -> *mut CachePadded<WaitNode> {
        Box::into_raw(Box::new(CachePadded::new(WaitNode {
            waiting: AtomicBool::new(true),
        })))
    }
}

/// Position in a [`ClhLock`] queue, returned by `lock` and consumed by `unlock`.
///
/// Neither `Send` nor `Clone`: exactly one release per acquisition, on the acquiring thread.
pub struct ClhToken(*mut CachePadded<WaitNode>);

impl fmt::Debug for ClhToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ClhToken").field(&self.0).finish()
    }
}

/// CLH queue lock.
///
/// Every acquisition enqueues a private wait node by swapping it into `tail` and spins
/// on its predecessor's flag only, so contended waiters don't share a cache line.
/// Acquisition order is FIFO.
///
/// Wait node ownership:
/// - a successor frees its predecessor's node once it has seen the flag drop;
/// - a releaser that swings `tail` back to null had no successor, and frees its own node;
/// - a releaser that loses that race only clears its flag and never touches the node again.
pub struct ClhLock {
    tail: AtomicPtr<CachePadded<WaitNode>>,
}

unsafe impl Send for ClhLock {}
unsafe impl Sync for ClhLock {}

impl ClhLock {
    pub const fn new() -> Self {
        Self {
            tail: AtomicPtr::new(ptr::null_mut()),
        }
    }

    pub fn is_locked(&self) -> bool {
        !self.tail.load(Relaxed).is_null()
    }
}

impl Default for ClhLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ClhLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClhLock")
            .field("locked", &self.is_locked())
            .finish()
    }
}

impl RawLock for ClhLock {
    type Token = ClhToken;

    fn lock(&self) -> ClhToken {
        let node = WaitNode::alloc();
        // Release publishes our node's initialized flag to the successor,
        // Acquire pairs with the tail-clearing CAS of the previous holder.
        let pred = self.tail.swap(node, AcqRel);
        if !pred.is_null() {
            let backoff = Backoff::new();
            // Safety: the predecessor never frees its node once it has been swapped out
            // of `tail` by us; that node is ours to reclaim.
            let pred_node: &WaitNode = unsafe { &*pred };
            while pred_node.waiting.load(Relaxed) {
                backoff.snooze();
            }
            fence(Acquire);
            drop(unsafe { Box::from_raw(pred) });
        }
        ClhToken(node)
    }

    unsafe fn unlock(&self, token: ClhToken) {
        let node = token.0;
        match self.tail.compare_exchange(node, ptr::null_mut(), Release, Relaxed) {
            // Nobody queued behind us: the node is unreachable from any other thread.
            Ok(_) => drop(Box::from_raw(node)),
            // A successor holds a pointer to our node and will free it after this store.
            Err(_) => {
                let node: &WaitNode = &*node;
                node.waiting.store(false, Release);
            }
        }
    }
}

#[test]
fn excludes_concurrent_holders() {
    crate::raw_lock::check_mutual_exclusion::<ClhLock>(8, 5_000);
}

#[test]
fn tail_is_cleared_when_uncontended() {
    let lock = ClhLock::new();
    let token = lock.lock();
    assert!(lock.is_locked());
    unsafe { lock.unlock(token) };
    assert!(!lock.is_locked());
    // The lock is reusable after the fast path released it.
    let token = lock.lock();
    unsafe { lock.unlock(token) };
}

#[test]
fn grants_in_arrival_order() {
    use std::sync::atomic::AtomicUsize;

    let lock = ClhLock::new();
    let queued = AtomicUsize::new(0);
    let order = crate::Lock::<ClhLock, Vec<usize>>::new(Vec::new());

    let first = lock.lock();
    std::thread::scope(|s| {
        for i in 0..4 {
            // Start waiters one at a time so each is in the queue before the next arrives.
            while queued.load(Acquire) != i {
                std::hint::spin_loop();
            }
            let (lock, queued, order) = (&lock, &queued, &order);
            s.spawn(move || {
                queued.fetch_add(1, Release);
                let token = lock.lock();
                order.lock().push(i);
                unsafe { lock.unlock(token) };
            });
            // Give the spawned thread time to swap itself into the tail.
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        unsafe { lock.unlock(first) };
    });
    assert_eq!(order.into_inner(), vec![0, 1, 2, 3]);
}

#[test]
fn handoff_between_two_threads() {
    // Holding the lock across a sleep forces the other thread to queue behind us, so
    // every release goes through the flag hand-off instead of the tail reset.
    let lock = crate::Lock::<ClhLock, Vec<u8>>::new(Vec::new());
    std::thread::scope(|s| {
        for id in 0..2u8 {
            let lock = &lock;
            s.spawn(move || {
                for _ in 0..50 {
                    let mut guard = lock.lock();
                    guard.push(id);
                    std::thread::sleep(std::time::Duration::from_micros(200));
                }
            });
        }
    });
    let log = lock.into_inner();
    assert_eq!(log.len(), 100);
    assert_eq!(log.iter().filter(|&&id| id == 0).count(), 50);
}

use std::alloc::{self, Layout};
use std::fmt;
use std::marker::PhantomData;
use std::ptr;

use crate::error::{Error, Result};
use crate::raw_lock::{Lock, LockGuard, RawLock};
use crate::spin::TatasLock;

type Link<T, L> = *mut Node<T, L>;

/// A list cell. Its lock guards `next`, and by convention also reads of `value`
/// while the node is reachable.
struct Node<T, L: RawLock> {
    value: T,
    next: Lock<L, Link<T, L>>,
}

impl<T, L: RawLock> Node<T, L> {
    fn alloc(value: T) -> Link<T, L> {
        Box::into_raw(Box::new(Node {
            value,
            next: Lock::new(ptr::null_mut()),
        }))
    }

    fn try_alloc(value: T) -> Result<Link<T, L>> {
        let layout = Layout::new::<Self>();
        // Safety: a node always holds a pointer, so the layout is never zero-sized.
        let node = unsafe { alloc::alloc(layout) } as Link<T, L>;
        if node.is_null() {
            return Err(Error::Alloc {
                size: layout.size(),
                align: layout.align(),
            });
        }
        unsafe {
            node.write(Node {
                value,
                next: Lock::new(ptr::null_mut()),
            })
        };
        Ok(node)
    }
}

/// Concurrent sorted singly-linked list with one lock per node.
///
/// Every operation walks from the head hand-over-hand: the lock of the next node is
/// taken before the lock of the one behind it is released, so at most two adjacent
/// locks are held at a time and operations on disjoint parts of the list proceed in
/// parallel. Locks are always acquired in list order, which rules out deadlock.
///
/// Duplicates are kept. `L` picks the per-node lock: [`TatasLock`] (default),
/// [`ClhLock`](crate::ClhLock) or [`FutexLock`](crate::FutexLock).
pub struct SortedList<T, L: RawLock = TatasLock> {
    /// Sentinel: a value-less link to the first node.
    head: Lock<L, Link<T, L>>,
    _marker: PhantomData<Box<Node<T, L>>>,
}

unsafe impl<T: Send, L: RawLock> Send for SortedList<T, L> {}
unsafe impl<T: Send, L: RawLock> Sync for SortedList<T, L> {}

/// A node whose lock is held by the current thread.
struct Locked<'l, T, L: RawLock> {
    node: &'l Node<T, L>,
    next: LockGuard<'l, L, Link<T, L>>,
}

impl<'l, T, L: RawLock> Locked<'l, T, L> {
    /// # Safety
    ///
    /// `link` must be null or point at a reachable node, and the caller must hold the
    /// lock of the link it was read from.
    unsafe fn lock(link: Link<T, L>) -> Option<Self> {
        link.as_ref().map(|node| Locked {
            node,
            next: node.next.lock(),
        })
    }
}

/// Window of the traversal: the link pointing at `curr`, and `curr` itself.
///
/// Field order is drop order: the predecessor is released before the current node.
struct Cursor<'l, T, L: RawLock> {
    prev: LockGuard<'l, L, Link<T, L>>,
    curr: Option<Locked<'l, T, L>>,
}

impl<'l, T, L: RawLock> Cursor<'l, T, L> {
    fn new(head: &'l Lock<L, Link<T, L>>) -> Self {
        let prev = head.lock();
        let curr = unsafe { Locked::lock(*prev) };
        Self { prev, curr }
    }

    /// Steps past `curr`. Returns false at the end of the list.
    fn advance(&mut self) -> bool {
        let Some(curr) = self.curr.take() else {
            return false;
        };
        // Assigning drops the old guard: the predecessor is released only now that
        // `curr` (the new predecessor) is held.
        self.prev = curr.next;
        self.curr = unsafe { Locked::lock(*self.prev) };
        true
    }
}

impl<T: Ord, L: RawLock> Cursor<'_, T, L> {
    /// Moves to the first node whose value is not less than `value`.
    fn seek(&mut self, value: &T) {
        while self.curr.as_ref().is_some_and(|c| c.node.value < *value) {
            self.advance();
        }
    }

    fn at(&self, value: &T) -> bool {
        self.curr.as_ref().is_some_and(|c| c.node.value == *value)
    }
}

impl<T, L: RawLock> SortedList<T, L> {
    pub fn new() -> Self {
        Self {
            head: Lock::new(ptr::null_mut()),
            _marker: PhantomData,
        }
    }

    /// Number of nodes, counted hand-over-hand. Concurrent updates behind or ahead of
    /// the walk may or may not be included.
    pub fn len(&self) -> usize {
        let mut cursor = Cursor::new(&self.head);
        let mut len = 0;
        while cursor.advance() {
            len += 1;
        }
        len
    }

    pub fn is_empty(&self) -> bool {
        self.head.lock().is_null()
    }

    /// In-order iteration. Needs exclusive access, so no locks are taken.
    pub fn iter(&mut self) -> Iter<'_, T, L> {
        Iter {
            next: *self.head.get_mut(),
            _marker: PhantomData,
        }
    }
}

impl<T: Ord, L: RawLock> SortedList<T, L> {
    /// Inserts `value` in front of the first element not less than it.
    pub fn insert(&self, value: T) {
        self.link(Node::alloc(value));
    }

    /// Like `insert`, but reports failure to allocate the node instead of aborting.
    ///
    /// The node is allocated before any lock is taken, so on error no lock is held and
    /// the list is untouched. Only the node allocation is covered: with `L = ClhLock`
    /// each lock acquisition during the walk allocates a wait node with `Box::new`,
    /// which still aborts on exhaustion.
    pub fn try_insert(&self, value: T) -> Result<()> {
        self.link(Node::try_alloc(value)?);
        Ok(())
    }

    fn link(&self, node: Link<T, L>) {
        let mut cursor = Cursor::new(&self.head);
        cursor.seek(unsafe { &(*node).value });
        // Safety: `node` is not reachable yet, this thread is its only user. It is fully
        // initialized before the predecessor's link publishes it.
        unsafe { *(*node).next.get_mut() = *cursor.prev };
        *cursor.prev = node;
    }

    /// Unlinks and drops the first element equal to `value`. Returns whether one was found.
    pub fn remove(&self, value: &T) -> bool {
        let mut cursor = Cursor::new(&self.head);
        cursor.seek(value);
        // Release order here is current, then predecessor, on both paths.
        let victim = match cursor.curr.take() {
            Some(curr) if curr.node.value == *value => curr,
            _ => return false,
        };

        let unlinked = *cursor.prev;
        *cursor.prev = *victim.next;
        // No other thread can be waiting for the victim's lock: getting there takes the
        // predecessor's lock, which stays held until the node is gone.
        drop(victim);
        drop(unsafe { Box::from_raw(unlinked) });
        drop(cursor);
        true
    }

    /// Number of elements equal to `value`.
    pub fn count(&self, value: &T) -> usize {
        let mut cursor = Cursor::new(&self.head);
        cursor.seek(value);
        let mut count = 0;
        while cursor.at(value) {
            count += 1;
            cursor.advance();
        }
        count
    }

    pub fn contains(&self, value: &T) -> bool {
        let mut cursor = Cursor::new(&self.head);
        cursor.seek(value);
        cursor.at(value)
    }
}

impl<T, L: RawLock> Default for SortedList<T, L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Ord, L: RawLock> FromIterator<T> for SortedList<T, L> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let list = Self::new();
        for value in iter {
            list.insert(value);
        }
        list
    }
}

impl<T, L: RawLock> fmt::Debug for SortedList<T, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SortedList").finish_non_exhaustive()
    }
}

impl<T, L: RawLock> Drop for SortedList<T, L> {
    fn drop(&mut self) {
        let mut link = *self.head.get_mut();
        while !link.is_null() {
            // Safety: `&mut self` means no traversal is running; each node is freed once.
            let mut node = unsafe { Box::from_raw(link) };
            link = *node.next.get_mut();
        }
    }
}

pub struct Iter<'a, T, L: RawLock> {
    next: Link<T, L>,
    _marker: PhantomData<&'a SortedList<T, L>>,
}

impl<'a, T, L: RawLock> Iterator for Iter<'a, T, L> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let node: &'a mut Node<T, L> = unsafe { self.next.as_mut()? };
        self.next = *node.next.get_mut();
        Some(&node.value)
    }
}

impl<T, L: RawLock> fmt::Debug for Iter<'_, T, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iter").finish_non_exhaustive()
    }
}

#[cfg(test)]
fn contents<T: Clone, L: RawLock>(list: &mut SortedList<T, L>) -> Vec<T> {
    list.iter().cloned().collect()
}

#[cfg(test)]
fn sequential_scenario<L: RawLock>() {
    let mut list = SortedList::<i32, L>::new();
    assert!(list.is_empty());
    for v in [5, 3, 8, 3] {
        list.insert(v);
    }
    assert_eq!(contents(&mut list), [3, 3, 5, 8]);
    assert_eq!(list.count(&3), 2);
    assert_eq!(list.count(&9), 0);

    assert!(list.remove(&3));
    assert_eq!(contents(&mut list), [3, 5, 8]);
    assert_eq!(list.count(&3), 1);
    assert_eq!(list.len(), 3);
}

#[test]
fn sequential_scenario_spin() {
    sequential_scenario::<TatasLock>();
}

#[test]
fn sequential_scenario_clh() {
    sequential_scenario::<crate::ClhLock>();
}

#[test]
fn sequential_scenario_futex() {
    sequential_scenario::<crate::FutexLock>();
}

#[test]
fn absent_values_are_left_alone() {
    let mut list: SortedList<u32> = [4, 2, 6].into_iter().collect();
    assert!(!list.remove(&5));
    assert!(!list.remove(&100));
    assert!(!list.remove(&0));
    assert_eq!(list.count(&5), 0);
    assert!(list.remove(&2));
    assert!(!list.remove(&2));
    assert!(!list.contains(&2));
    assert_eq!(contents(&mut list), [4, 6]);

    let empty = SortedList::<u32>::new();
    assert!(!empty.remove(&1));
    assert_eq!(empty.count(&1), 0);
}

#[test]
fn net_count_after_sequential_inserts_and_removes() {
    let list = SortedList::<u8, crate::ClhLock>::new();
    let (mut inserts, mut removes) = (0, 0);
    for round in 0..50u8 {
        list.insert(7);
        inserts += 1;
        if round % 3 == 0 {
            assert!(list.remove(&7));
            removes += 1;
        }
        list.insert(round.wrapping_mul(2));
    }
    // Neighbours are all even, so only the explicit inserts of 7 are counted.
    assert_eq!(list.count(&7), inserts - removes);
    assert_eq!(list.len(), inserts - removes + 50);
}

#[test]
fn try_insert_links_node() {
    let mut list = SortedList::<String>::new();
    list.try_insert("b".to_string()).unwrap();
    list.try_insert("a".to_string()).unwrap();
    assert_eq!(contents(&mut list), ["a", "b"]);
}

#[test]
fn every_node_dropped_exactly_once() {
    use std::cmp::Ordering;
    use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};

    static NUM_DROPS: AtomicUsize = AtomicUsize::new(0);

    struct DetectDrop(u32);

    impl Drop for DetectDrop {
        fn drop(&mut self) {
            NUM_DROPS.fetch_add(1, Relaxed);
        }
    }
    impl PartialEq for DetectDrop {
        fn eq(&self, other: &Self) -> bool {
            self.0 == other.0
        }
    }
    impl Eq for DetectDrop {}
    impl PartialOrd for DetectDrop {
        fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
            Some(self.cmp(other))
        }
    }
    impl Ord for DetectDrop {
        fn cmp(&self, other: &Self) -> Ordering {
            self.0.cmp(&other.0)
        }
    }

    let list = SortedList::<DetectDrop, crate::ClhLock>::new();
    for i in 0..100 {
        list.insert(DetectDrop(i % 10));
    }
    // Probes passed by reference are dropped too; count them separately.
    let probe = DetectDrop(3);
    for _ in 0..5 {
        assert!(list.remove(&probe));
    }
    assert_eq!(NUM_DROPS.load(Relaxed), 5);

    drop(list);
    assert_eq!(NUM_DROPS.load(Relaxed), 100);
    drop(probe);
    assert_eq!(NUM_DROPS.load(Relaxed), 101);
}

#[cfg(test)]
fn distinct_concurrent_inserts<L: RawLock>() {
    let threads = 8;
    let per_thread = 200;
    let mut list = SortedList::<u32, L>::new();
    std::thread::scope(|s| {
        for t in 0..threads {
            let list = &list;
            s.spawn(move || {
                for i in 0..per_thread {
                    list.insert(i * threads + t);
                }
            });
        }
    });
    assert_eq!(list.len(), (threads * per_thread) as usize);
    for v in 0..threads * per_thread {
        assert_eq!(list.count(&v), 1, "value {v}");
    }
    let values = contents(&mut list);
    assert!(values.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn distinct_concurrent_inserts_spin() {
    distinct_concurrent_inserts::<TatasLock>();
}

#[test]
fn distinct_concurrent_inserts_clh() {
    distinct_concurrent_inserts::<crate::ClhLock>();
}

#[test]
fn distinct_concurrent_inserts_futex() {
    distinct_concurrent_inserts::<crate::FutexLock>();
}

#[test]
fn churn_on_one_value_keeps_chain_intact() {
    let mut list = SortedList::<u32, crate::ClhLock>::new();
    list.insert(1);
    list.insert(3);
    std::thread::scope(|s| {
        for _ in 0..8 {
            let list = &list;
            s.spawn(move || {
                for _ in 0..2_000 {
                    list.insert(2);
                    // Another thread may have taken our copy; one copy per insert remains.
                    while !list.remove(&2) {}
                    let _ = list.count(&2);
                }
            });
        }
    });
    assert_eq!(list.count(&2), 0);
    assert_eq!(contents(&mut list), [1, 3]);
}

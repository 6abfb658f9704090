use std::sync::Barrier;
use std::thread;

use fine_locks::workload::{self, Workload};
use fine_locks::{ClhLock, FutexLock, RawLock, SortedList, TatasLock};

fn eight_threads_insert_one_to_hundred<L: RawLock>() {
    let threads = 8;
    let mut list = SortedList::<u32, L>::new();
    let barrier = Barrier::new(threads);

    thread::scope(|s| {
        for t in 0..threads {
            let (list, barrier) = (&list, &barrier);
            s.spawn(move || {
                barrier.wait();
                // Half the threads go up, half go down, so inserts interleave.
                if t % 2 == 0 {
                    (1..=100).for_each(|v| list.insert(v));
                } else {
                    (1..=100).rev().for_each(|v| list.insert(v));
                }
            });
        }
    });

    assert_eq!(list.len(), 800);
    for k in 1..=100 {
        assert_eq!(list.count(&k), threads, "key {k}");
    }
    let contents: Vec<u32> = list.iter().copied().collect();
    assert!(contents.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn eight_threads_insert_one_to_hundred_spin() {
    eight_threads_insert_one_to_hundred::<TatasLock>();
}

#[test]
fn eight_threads_insert_one_to_hundred_clh() {
    eight_threads_insert_one_to_hundred::<ClhLock>();
}

#[test]
fn eight_threads_insert_one_to_hundred_futex() {
    eight_threads_insert_one_to_hundred::<FutexLock>();
}

fn insert_remove_same_values<L: RawLock>() {
    let threads = 8;
    let values = 50;
    let mut list = SortedList::<u32, L>::new();
    // Sits past every churned value and must come through untouched.
    list.insert(u32::MAX);

    thread::scope(|s| {
        for _ in 0..threads {
            let list = &list;
            s.spawn(move || {
                for _ in 0..10 {
                    for v in 0..values {
                        list.insert(v);
                    }
                    for v in 0..values {
                        // Our own insert of `v` is still accounted for, so some copy exists.
                        assert!(list.remove(&v));
                    }
                }
            });
        }
    });

    assert_eq!(list.len(), 1);
    assert_eq!(list.iter().copied().collect::<Vec<_>>(), [u32::MAX]);
}

#[test]
fn insert_remove_same_values_spin() {
    insert_remove_same_values::<TatasLock>();
}

#[test]
fn insert_remove_same_values_clh() {
    insert_remove_same_values::<ClhLock>();
}

#[test]
fn insert_remove_same_values_futex() {
    insert_remove_same_values::<FutexLock>();
}

#[test]
fn count_never_sees_unlinked_nodes() {
    // Writers keep at least one copy of 10 and 30 alive at every instant by inserting the
    // replacement before removing the old one; readers must always see at least one.
    let list = SortedList::<u32, ClhLock>::from_iter([10, 20, 30]);
    thread::scope(|s| {
        for v in [10, 30] {
            let list = &list;
            s.spawn(move || {
                for _ in 0..5_000 {
                    list.insert(v);
                    assert!(list.remove(&v));
                }
            });
        }
        for _ in 0..4 {
            let list = &list;
            s.spawn(move || {
                for _ in 0..5_000 {
                    let (a, b) = (list.count(&10), list.count(&30));
                    assert!((1..=2).contains(&a), "count(10) = {a}");
                    assert!((1..=2).contains(&b), "count(30) = {b}");
                    assert_eq!(list.count(&20), 1);
                }
            });
        }
    });
    assert_eq!(list.len(), 3);
}

#[test]
fn random_workloads_hold_invariants() {
    for seed in 0..4 {
        let workload = Workload {
            threads: 8,
            ops_per_thread: 5_000,
            key_range: 64,
            seed,
            ..Workload::default()
        };
        workload::run::<TatasLock>(&workload).unwrap().verify().unwrap();
        workload::run::<ClhLock>(&workload).unwrap().verify().unwrap();
        workload::run::<FutexLock>(&workload).unwrap().verify().unwrap();
    }
}

#[test]
fn remove_heavy_workload_holds_invariants() {
    let workload = Workload {
        threads: 6,
        ops_per_thread: 5_000,
        key_range: 8,
        insert_ratio: 0.4,
        remove_ratio: 0.5,
        seed: 42,
    };
    let report = workload::run::<ClhLock>(&workload).unwrap();
    report.verify().unwrap();
    assert!(report.ops.misses > 0);
}

use std::thread;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fine_locks::{ClhLock, FutexLock, Lock, RawLock, SortedList, TatasLock};

fn contended_counter<L: RawLock>(threads: usize, iterations: usize) -> usize {
    let counter = Lock::<L, usize>::new(0);
    thread::scope(|s| {
        for _ in 0..threads {
            s.spawn(|| {
                for _ in 0..iterations {
                    *counter.lock() += 1;
                }
            });
        }
    });
    counter.into_inner()
}

fn mixed_list_ops<L: RawLock>(threads: u64, ops: u64) -> usize {
    let list = SortedList::<u64, L>::new();
    thread::scope(|s| {
        for t in 0..threads {
            let list = &list;
            s.spawn(move || {
                for i in 0..ops {
                    let key = (i * 31 + t * 7) % 256;
                    match i % 4 {
                        0 | 1 => list.insert(key),
                        2 => {
                            list.remove(&key);
                        }
                        _ => {
                            black_box(list.count(&key));
                        }
                    }
                }
            });
        }
    });
    list.len()
}

fn lock_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_counter");
    for threads in [1, 4, 8] {
        group.bench_with_input(BenchmarkId::new("tatas", threads), &threads, |b, &t| {
            b.iter(|| contended_counter::<TatasLock>(t, 1_000))
        });
        group.bench_with_input(BenchmarkId::new("clh", threads), &threads, |b, &t| {
            b.iter(|| contended_counter::<ClhLock>(t, 1_000))
        });
        group.bench_with_input(BenchmarkId::new("futex", threads), &threads, |b, &t| {
            b.iter(|| contended_counter::<FutexLock>(t, 1_000))
        });
    }
    group.finish();
}

fn list_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("sorted_list_mixed");
    group.sample_size(20);
    for threads in [1, 4, 8] {
        group.bench_with_input(BenchmarkId::new("tatas", threads), &threads, |b, &t| {
            b.iter(|| mixed_list_ops::<TatasLock>(t, 2_000))
        });
        group.bench_with_input(BenchmarkId::new("clh", threads), &threads, |b, &t| {
            b.iter(|| mixed_list_ops::<ClhLock>(t, 2_000))
        });
        group.bench_with_input(BenchmarkId::new("futex", threads), &threads, |b, &t| {
            b.iter(|| mixed_list_ops::<FutexLock>(t, 2_000))
        });
    }
    group.finish();
}

criterion_group!(benches, lock_benchmark, list_benchmark);
criterion_main!(benches);

//! Randomized multi-threaded driver for [`SortedList`] and the checks run once it quiesces.

use std::thread;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, info_span};

use crate::error::{Error, Result};
use crate::list::SortedList;
use crate::raw_lock::RawLock;

/// Upper bound on `Workload::key_range`; per-key bookkeeping is a dense vector.
pub const MAX_KEY_RANGE: u64 = 1 << 24;

#[derive(Debug, Clone, PartialEq)]
pub struct Workload {
    pub threads: usize,
    pub ops_per_thread: usize,
    /// keys are drawn uniformly from `0..key_range`
    pub key_range: u64,
    pub insert_ratio: f64,
    pub remove_ratio: f64,
    pub seed: u64,
}

impl Default for Workload {
    fn default() -> Self {
        Self {
            threads: 8,
            ops_per_thread: 10_000,
            key_range: 100,
            insert_ratio: 0.5,
            remove_ratio: 0.3,
            seed: 0,
        }
    }
}

impl Workload {
    fn validate(&self) -> Result<()> {
        let reason = if self.threads == 0 {
            "at least one thread is required"
        } else if self.key_range == 0 {
            "key range must not be empty"
        } else if self.key_range > MAX_KEY_RANGE {
            "key range exceeds MAX_KEY_RANGE"
        } else if !(0.0..=1.0).contains(&self.insert_ratio)
            || !(0.0..=1.0).contains(&self.remove_ratio)
            || self.insert_ratio + self.remove_ratio > 1.0
        {
            "insert and remove ratios must be fractions summing to at most 1"
        } else {
            return Ok(());
        };
        Err(Error::InvalidWorkload { reason })
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OpCounts {
    pub inserts: usize,
    /// removes that found their key
    pub removes: usize,
    /// removes that found nothing
    pub misses: usize,
    pub counts: usize,
}

impl OpCounts {
    pub fn total(&self) -> usize {
        self.inserts + self.removes + self.misses + self.counts
    }

    fn merge(&mut self, other: &OpCounts) {
        self.inserts += other.inserts;
        self.removes += other.removes;
        self.misses += other.misses;
        self.counts += other.counts;
    }
}

struct WorkerResult {
    ops: OpCounts,
    /// inserts minus successful removes, per key
    net: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct Report {
    pub elapsed: Duration,
    pub ops: OpCounts,
    /// net inserts per key over all workers
    pub expected: Vec<i64>,
    /// `count(k)` per key after all workers joined
    pub observed: Vec<usize>,
    /// `len()` after all workers joined
    pub len: usize,
    /// final list contents in traversal order
    pub contents: Vec<u64>,
}

impl Report {
    /// Checks sortedness, per-key conservation and total length.
    pub fn verify(&self) -> Result<()> {
        if let Some(index) = self.contents.windows(2).position(|w| w[0] > w[1]) {
            return Err(Error::Unsorted { index: index + 1 });
        }
        for (key, (&expected, &actual)) in self.expected.iter().zip(&self.observed).enumerate() {
            if expected != actual as i64 {
                return Err(Error::CountMismatch {
                    key: key as u64,
                    expected,
                    actual,
                });
            }
        }
        let expected: i64 = self.expected.iter().sum();
        for actual in [self.len, self.contents.len()] {
            if actual as i64 != expected {
                return Err(Error::LengthMismatch { expected, actual });
            }
        }
        Ok(())
    }

    pub fn throughput(&self) -> f64 {
        self.ops.total() as f64 / self.elapsed.as_secs_f64().max(f64::EPSILON)
    }
}

fn worker<L: RawLock>(
    list: &SortedList<u64, L>,
    workload: &Workload,
    index: usize,
) -> WorkerResult {
    let mut rng = StdRng::seed_from_u64(workload.seed.wrapping_add(index as u64));
    let mut ops = OpCounts::default();
    let mut net = vec![0i64; workload.key_range as usize];

    for _ in 0..workload.ops_per_thread {
        let key = rng.gen_range(0..workload.key_range);
        let roll: f64 = rng.gen();
        if roll < workload.insert_ratio {
            list.insert(key);
            net[key as usize] += 1;
            ops.inserts += 1;
        } else if roll < workload.insert_ratio + workload.remove_ratio {
            if list.remove(&key) {
                net[key as usize] -= 1;
                ops.removes += 1;
            } else {
                ops.misses += 1;
            }
        } else {
            let _ = list.count(&key);
            ops.counts += 1;
        }
    }

    debug!(worker = index, ?ops, "worker finished");
    WorkerResult { ops, net }
}

/// Runs `workload` against a fresh list whose nodes are guarded by `L`.
pub fn run<L: RawLock>(workload: &Workload) -> Result<Report> {
    workload.validate()?;
    let span = info_span!("workload", lock = std::any::type_name::<L>());
    let _enter = span.enter();
    info!(
        threads = workload.threads,
        ops_per_thread = workload.ops_per_thread,
        key_range = workload.key_range,
        "starting"
    );

    let mut list = SortedList::<u64, L>::new();
    let start = Instant::now();
    let results: Vec<WorkerResult> = thread::scope(|s| {
        let handles: Vec<_> = (0..workload.threads)
            .map(|index| {
                let list = &list;
                s.spawn(move || worker(list, workload, index))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
            .collect()
    });
    let elapsed = start.elapsed();

    let mut ops = OpCounts::default();
    let mut net = vec![0i64; workload.key_range as usize];
    for result in &results {
        ops.merge(&result.ops);
        for (total, n) in net.iter_mut().zip(&result.net) {
            *total += n;
        }
    }
    // Kept signed: a negative total means a remove succeeded on a value never inserted,
    // which `verify` reports as a count mismatch.
    let expected = net;
    let observed = (0..workload.key_range).map(|k| list.count(&k)).collect();
    let len = list.len();
    let contents = list.iter().copied().collect();

    let report = Report {
        elapsed,
        ops,
        expected,
        observed,
        len,
        contents,
    };
    info!(
        elapsed_ms = report.elapsed.as_millis() as u64,
        len = report.len,
        ops_per_sec = report.throughput() as u64,
        "finished"
    );
    Ok(report)
}

#[test]
fn rejects_bad_ratios() {
    let workload = Workload {
        insert_ratio: 0.8,
        remove_ratio: 0.4,
        ..Workload::default()
    };
    assert!(matches!(
        run::<crate::TatasLock>(&workload),
        Err(Error::InvalidWorkload { .. })
    ));
}

#[test]
fn rejects_huge_key_range() {
    for key_range in [MAX_KEY_RANGE + 1, u64::MAX] {
        let workload = Workload {
            threads: 1,
            ops_per_thread: 1,
            key_range,
            ..Workload::default()
        };
        assert_eq!(
            run::<crate::TatasLock>(&workload).unwrap_err(),
            Error::InvalidWorkload {
                reason: "key range exceeds MAX_KEY_RANGE"
            }
        );
    }
}

#[test]
fn small_run_verifies() {
    let workload = Workload {
        threads: 4,
        ops_per_thread: 2_000,
        key_range: 32,
        ..Workload::default()
    };
    let report = run::<crate::ClhLock>(&workload).unwrap();
    report.verify().unwrap();
    assert_eq!(report.ops.total(), 8_000);
}

#[test]
fn verify_flags_corruption() {
    let mut report = Report {
        elapsed: Duration::ZERO,
        ops: OpCounts::default(),
        expected: vec![1, 2],
        observed: vec![1, 2],
        len: 3,
        contents: vec![0, 1, 1],
    };
    report.verify().unwrap();

    report.contents = vec![1, 0, 1];
    assert_eq!(report.verify(), Err(Error::Unsorted { index: 1 }));

    report.contents = vec![0, 1, 1];
    report.observed = vec![1, 1];
    assert_eq!(
        report.verify(),
        Err(Error::CountMismatch {
            key: 1,
            expected: 2,
            actual: 1
        })
    );

    report.observed = vec![1, 2];
    report.len = 4;
    assert_eq!(
        report.verify(),
        Err(Error::LengthMismatch {
            expected: 3,
            actual: 4
        })
    );
}

#[test]
fn verify_flags_negative_net() {
    // One more successful remove than inserts of key 0: the list can't hold -1 copies.
    let report = Report {
        elapsed: Duration::ZERO,
        ops: OpCounts::default(),
        expected: vec![-1, 1],
        observed: vec![0, 1],
        len: 1,
        contents: vec![1],
    };
    assert_eq!(
        report.verify(),
        Err(Error::CountMismatch {
            key: 0,
            expected: -1,
            actual: 0
        })
    );
}

//! Spin locks and a fine-grained concurrent sorted list built on them.
//!
//! - [`TatasLock`]: test-and-test-and-set spin lock.
//! - [`ClhLock`]: CLH queue lock, FIFO hand-off between spinning waiters.
//! - [`FutexLock`]: futex-backed lock that sleeps under contention.
//! - [`SortedList`]: sorted list with one lock per node and hand-over-hand traversal,
//!   generic over which of the above guards each node.
//!
//! ```
//! use fine_locks::{ClhLock, SortedList};
//!
//! let list = SortedList::<i32, ClhLock>::new();
//! std::thread::scope(|s| {
//!     s.spawn(|| list.insert(3));
//!     s.spawn(|| list.insert(3));
//! });
//! assert_eq!(list.count(&3), 2);
//! ```

mod clh;
mod error;
mod list;
mod mutex;
mod raw_lock;
mod spin;
pub mod workload;

pub use clh::{ClhLock, ClhToken};
pub use error::{Error, Result};
pub use list::{Iter, SortedList};
pub use mutex::FutexLock;
pub use raw_lock::{Lock, LockGuard, RawLock, RawTryLock};
pub use spin::TatasLock;

/// Synchronization primitives built on the scheduler: counting semaphores,
/// priority-donating locks, and Mesa-style condition variables.
///
/// Grounded in `original_source/threads/synch.c`. Waiter ordering is kept
/// by re-scanning for the highest-effective-priority waiter at wake time
/// (`sema_up`/`cond_signal`'s "re-sort then pop front") rather than
/// maintaining a sorted list — since donation can raise a waiter's
/// priority while it's already queued, a snapshot-sorted-at-insert list
/// would go stale; re-scanning at wake time is always correct.
pub mod condvar;
pub mod lock;
pub mod semaphore;

pub use condvar::CondVar;
pub use lock::Lock;
pub use semaphore::Semaphore;

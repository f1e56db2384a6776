/// Kernel thread scheduler and synchronization primitives.
///
/// `scheduler` owns the thread registry and the ready/sleep queues and
/// drives context switches from both the timer ISR and the voluntary-yield
/// ISR. `sync` holds the semaphore/lock/condvar primitives built on top of
/// it. `tcb` is the thread control block; `context` is the raw
/// interrupt-frame/ISR-stub boundary; `time` is the tick-driven sleep API.

pub mod context;
pub mod mlfqs;
pub mod scheduler;
pub mod sync;
pub mod tcb;
pub mod time;

pub use scheduler::{
    current_thread_id, current_priority, exit_current_thread, set_current_priority, spawn,
    thread_yield, ThreadId,
};
pub use time::sleep_for;

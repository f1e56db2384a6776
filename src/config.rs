/// Scheduler and synchronization-core tunables.
///
/// All of these are compile-time constants; there is no on-disk config
/// format (there's no filesystem yet to read one from). Values match the
/// defaults prescribed for the teaching kernel this core is modeled on.

use core::sync::atomic::{AtomicBool, Ordering};

/// Timer interrupts per second. Valid range enforced by `timer::calibrate`.
pub const TIMER_FREQ: u32 = 100;
pub const TIMER_FREQ_MIN: u32 = 19;
pub const TIMER_FREQ_MAX: u32 = 1000;

/// Ticks given to a thread before a time-slice-expiration yield is requested.
pub const TIME_SLICE: u64 = 4;

/// Priority range. Higher numeric value = higher priority.
pub const PRI_MIN: u8 = 0;
pub const PRI_DEFAULT: u8 = 31;
pub const PRI_MAX: u8 = 63;

/// Bound on the donation chain walk (§4.5, §9). Preserved verbatim: a
/// pathologically deep waits-for chain gets an incorrect (too-low)
/// donated priority past this depth rather than an unbounded walk.
pub const DONATION_MAX_DEPTH: usize = 8;

/// Per-thread kernel stack, in bytes.
pub const THREAD_STACK_SIZE: usize = 16 * 1024;

/// Magic value written at the base (low address) of every thread's kernel
/// stack. The scheduler checks it whenever it touches the current thread's
/// TCB (spec.md §5: "a magic sentinel at the stack base... asserts the
/// sentinel when accessing the current thread") and panics on mismatch,
/// catching a stack that grew past its allocation before it corrupts
/// another thread's memory.
pub const STACK_MAGIC: u32 = 0xcd6a_bf4b;

/// When set, `Lock::acquire`/`release` skip the donation walk entirely and
/// behave as plain semaphore operations. The multi-level feedback queue
/// scheduler that would flip this on is out of scope for this core (see
/// `crate::thread::mlfqs`); the flag and stub accessors are carried anyway
/// since a real kernel exposes them even before MLFQS is implemented.
static MLFQS_ENABLED: AtomicBool = AtomicBool::new(false);

pub fn mlfqs_enabled() -> bool {
    MLFQS_ENABLED.load(Ordering::Relaxed)
}

pub fn set_mlfqs_enabled(enabled: bool) {
    MLFQS_ENABLED.store(enabled, Ordering::Relaxed);
}

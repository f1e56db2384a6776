/// Mutex lock with priority donation (spec.md §4.5), grounded in
/// `original_source/threads/synch.c`'s `lock_init`/`lock_acquire`/
/// `lock_try_acquire`/`lock_release`/`lock_held_by_current_thread` and the
/// donation bookkeeping Pintos keeps on each thread (`wait_on_lock`,
/// `donations`).
///
/// A lock's identity for donation bookkeeping is its own address
/// (`self as *const _ as usize`), so it must not move for its lifetime —
/// true of the `static`/long-lived `Lock` values this core's clients use
/// (spec.md §3).
extern crate alloc;

use spin::Mutex;
use x86_64::instructions::interrupts::without_interrupts;

use super::semaphore::Semaphore;
use crate::thread::scheduler::{self, ThreadId};
use crate::thread::tcb::LockId;

pub struct Lock {
    sema: Semaphore,
    holder: Mutex<Option<ThreadId>>,
}

impl Lock {
    pub const fn new() -> Self {
        Lock {
            sema: Semaphore::new(1),
            holder: Mutex::new(None),
        }
    }

    fn id(&self) -> LockId {
        self as *const _ as usize
    }

    /// Acquires the lock, donating priority up the holder chain if it's
    /// currently held (D1-D4), then blocking on the underlying binary
    /// semaphore until it's free.
    pub fn acquire(&self) {
        assert!(
            !crate::interrupts::in_interrupt_context(),
            "lock acquire() called from interrupt context"
        );
        assert!(
            !self.is_held_by_current(),
            "lock re-acquired by its own holder"
        );

        let me = scheduler::current_thread_id();
        let lock_id = self.id();
        let held = without_interrupts(|| *self.holder.lock());
        if held.is_some() && !crate::config::mlfqs_enabled() {
            scheduler::with_scheduler_mut(|s| s.donate(me, lock_id));
        }

        // The decrement and the holder/donation-chain update happen in one
        // masked critical section, so no other `acquire()` can observe the
        // semaphore already taken but `holder` still `None` and skip
        // donation (I4).
        self.sema.down_then(|| {
            *self.holder.lock() = Some(me);
            scheduler::with_scheduler_mut(|s| {
                s.clear_waiting_on(me);
                s.set_lock_holder(lock_id, Some(me));
            });
        });
    }

    /// Non-blocking variant. Never donates: if the lock isn't immediately
    /// free, the caller just gets `false` back.
    pub fn try_acquire(&self) -> bool {
        assert!(
            !self.is_held_by_current(),
            "lock re-acquired by its own holder"
        );
        let me = scheduler::current_thread_id();
        let lock_id = self.id();
        self.sema.try_down_then(|| {
            *self.holder.lock() = Some(me);
            scheduler::with_scheduler_mut(|s| s.set_lock_holder(lock_id, Some(me)));
        })
    }

    /// Releases the lock, revoking whatever donations it caused (D3) and
    /// recomputing the releasing thread's effective priority (D4) before
    /// waking the next waiter.
    pub fn release(&self) {
        assert!(
            self.is_held_by_current(),
            "lock released by a thread that doesn't hold it"
        );
        let me = scheduler::current_thread_id();

        without_interrupts(|| {
            *self.holder.lock() = None;
        });
        scheduler::with_scheduler_mut(|s| {
            s.set_lock_holder(self.id(), None);
            if !crate::config::mlfqs_enabled() {
                s.revoke_donations(me, self.id());
            }
        });

        self.sema.up();
    }

    pub fn is_held_by_current(&self) -> bool {
        without_interrupts(|| *self.holder.lock()) == Some(scheduler::current_thread_id())
    }
}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

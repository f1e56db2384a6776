/// Mesa-style condition variable (spec.md §4.6), grounded in
/// `original_source/threads/synch.c`'s `cond_init`/`cond_wait`/
/// `cond_signal`/`cond_broadcast`.
///
/// Each waiter gets its own private binary semaphore (Pintos'
/// `semaphore_elem`), so `signal` can wake exactly one specific waiter
/// rather than racing all of them on a shared value.
extern crate alloc;

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use spin::Mutex;
use x86_64::instructions::interrupts::without_interrupts;

use super::lock::Lock;
use super::semaphore::Semaphore;
use crate::thread::scheduler::{self, ThreadId};

type Waiter = (ThreadId, Arc<Semaphore>);

pub struct CondVar {
    waiters: Mutex<VecDeque<Waiter>>,
}

impl CondVar {
    pub const fn new() -> Self {
        CondVar {
            waiters: Mutex::new(VecDeque::new()),
        }
    }

    /// Atomically releases `lock` and blocks until signaled, then
    /// reacquires `lock` before returning. `lock` must be held by the
    /// caller. Mesa semantics: the waker and waiter don't run as one
    /// atomic step, so callers must recheck their condition in a loop.
    pub fn wait(&self, lock: &Lock) {
        assert!(
            !crate::interrupts::in_interrupt_context(),
            "cond_wait called from interrupt context"
        );
        assert!(
            lock.is_held_by_current(),
            "cond_wait called without holding the associated lock"
        );
        let me = scheduler::current_thread_id();
        let sema = Arc::new(Semaphore::new(0));
        without_interrupts(|| {
            self.waiters.lock().push_back((me, sema.clone()));
        });

        lock.release();
        sema.down();
        lock.acquire();
    }

    /// Wakes the highest effective-priority waiter, if any (ties broken
    /// by wait order). `lock` must be held by the caller.
    pub fn signal(&self, lock: &Lock) {
        assert!(
            lock.is_held_by_current(),
            "cond_signal called without holding the associated lock"
        );
        let woken = without_interrupts(|| pop_best_waiter(&mut self.waiters.lock()));
        if let Some((_, sema)) = woken {
            sema.up();
        }
    }

    /// Wakes every current waiter, highest priority first.
    pub fn broadcast(&self, lock: &Lock) {
        assert!(
            lock.is_held_by_current(),
            "cond_broadcast called without holding the associated lock"
        );
        loop {
            let woken = without_interrupts(|| pop_best_waiter(&mut self.waiters.lock()));
            match woken {
                Some((_, sema)) => sema.up(),
                None => break,
            }
        }
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}

fn pop_best_waiter(waiters: &mut VecDeque<Waiter>) -> Option<Waiter> {
    if waiters.is_empty() {
        return None;
    }
    let best_index = scheduler::with_scheduler_mut(|s| {
        waiters
            .iter()
            .enumerate()
            .map(|(i, (id, _))| (i, s.effective_priority_of(*id)))
            .fold((0usize, 0u8), |best, cur| if cur.1 > best.1 { cur } else { best })
            .0
    });
    waiters.remove(best_index)
}

/// Counting semaphore (spec.md §4.4), grounded in
/// `original_source/threads/synch.c`'s `sema_init`/`sema_down`/
/// `sema_try_down`/`sema_up`.
extern crate alloc;

use alloc::collections::VecDeque;
use spin::Mutex;
use x86_64::instructions::interrupts::without_interrupts;

use crate::thread::scheduler::{self, Scheduler, ThreadId};

struct State {
    value: u32,
    waiters: VecDeque<ThreadId>,
}

pub struct Semaphore {
    inner: Mutex<State>,
}

impl Semaphore {
    pub const fn new(value: u32) -> Self {
        Semaphore {
            inner: Mutex::new(State {
                value,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Waits for the value to become positive, then atomically decrements
    /// it. Blocks (without busy-waiting) if the value is currently zero.
    pub fn down(&self) {
        self.down_then(|| {})
    }

    /// Like `down`, but runs `on_acquired` in the same masked critical
    /// section that decrements the value, before any other thread can
    /// observe the value having dropped. Lets `Lock::acquire` set its
    /// holder atomically with the semaphore's decrement (I4).
    pub fn down_then(&self, on_acquired: impl FnOnce()) {
        assert!(
            !crate::interrupts::in_interrupt_context(),
            "semaphore down() called from interrupt context"
        );
        loop {
            let acquired = without_interrupts(|| {
                let mut st = self.inner.lock();
                if st.value > 0 {
                    st.value -= 1;
                    on_acquired();
                    true
                } else {
                    let me = scheduler::current_thread_id();
                    if !st.waiters.contains(&me) {
                        st.waiters.push_back(me);
                    }
                    false
                }
            });
            if acquired {
                return;
            }
            scheduler::block_current();
        }
    }

    /// Non-blocking variant: decrements and returns `true` only if the
    /// value was already positive.
    pub fn try_down(&self) -> bool {
        self.try_down_then(|| {})
    }

    /// Like `try_down`, but runs `on_acquired` in the same masked critical
    /// section as the decrement when it succeeds.
    pub fn try_down_then(&self, on_acquired: impl FnOnce()) -> bool {
        without_interrupts(|| {
            let mut st = self.inner.lock();
            if st.value > 0 {
                st.value -= 1;
                on_acquired();
                true
            } else {
                false
            }
        })
    }

    /// Increments the value and, if anyone is waiting, wakes the highest
    /// effective-priority waiter (ties broken by FIFO wait order). The pop
    /// and the wake (status flip to Ready plus ready-queue insertion) happen
    /// under the same scheduler-lock acquisition as the counter increment,
    /// so no preemption can observe the waiter popped but still Blocked and
    /// in no queue (I2).
    pub fn up(&self) {
        let should_preempt = scheduler::with_scheduler_mut(|s| {
            let mut st = self.inner.lock();
            st.value += 1;
            match pop_best_waiter(s, &mut st.waiters) {
                Some(id) => s.make_ready(id),
                None => false,
            }
        });
        if should_preempt {
            scheduler::thread_yield();
        }
    }
}

/// Removes and returns the highest-priority waiter in `waiters`, ties
/// broken by earliest insertion (FIFO within a priority level, I1).
fn pop_best_waiter(s: &Scheduler, waiters: &mut VecDeque<ThreadId>) -> Option<ThreadId> {
    if waiters.is_empty() {
        return None;
    }
    let (best_index, _) = waiters
        .iter()
        .enumerate()
        .map(|(i, &id)| (i, s.effective_priority_of(id)))
        .fold((0usize, 0u8), |best, cur| if cur.1 > best.1 { cur } else { best });
    waiters.remove(best_index)
}

/// Preemptive, strict-priority, round-robin-within-priority thread
/// scheduler.
///
/// Every thread lives in one place, `Scheduler::threads`, keyed by
/// `ThreadId`; the ready queue, sleep queue, and each semaphore/condvar's
/// waiter list hold only ids, looked up against the registry. This trades
/// the original's intrusive `list_elem` links for a small amount of
/// lookup overhead, matching the registry-and-id-queues alternative design.
///
/// All mutation happens with interrupts masked and the single
/// `SCHEDULER` spinlock held — there is no finer-grained locking, since
/// this core targets one CPU.
extern crate alloc;

use alloc::collections::{BTreeMap, VecDeque};
use alloc::string::String;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::Mutex;
use x86_64::instructions::interrupts::without_interrupts;

use super::context::InterruptFrame;
use super::tcb::{LockId, Thread, ThreadStatus};

pub use super::tcb::ThreadId;

// Kernel segment selectors; must match gdt.rs's GDT entry order (null, code, tss).
const KERNEL_CS: u64 = 0x08;
// gdt.rs never appends a data-segment descriptor; every `iretq` stays at CPL 0
// with interrupts already masked, and the CPU does not fault on a non-null,
// non-matching SS in that case, so the TSS selector doubles as a harmless
// placeholder here (same reuse as the teacher's `task/scheduler.rs`).
const KERNEL_SS: u64 = 0x10;

pub struct Scheduler {
    threads: BTreeMap<ThreadId, Thread>,
    ready: VecDeque<ThreadId>,
    sleeping: Vec<ThreadId>,
    /// Lock identity -> current holder, maintained by `sync::lock::Lock` so
    /// the donation walk can follow a waits-for chain across locks without
    /// each `Lock` needing a reference to the others.
    lock_holders: BTreeMap<LockId, ThreadId>,
    current: ThreadId,
    idle_id: ThreadId,
    next_id: ThreadId,
    ticks_on_current: u64,
    deferred_dealloc: Option<(*mut u8, usize)>,
}

unsafe impl Send for Scheduler {}

pub static SCHEDULER: Mutex<Option<Scheduler>> = Mutex::new(None);
static STARTED: AtomicBool = AtomicBool::new(false);

/// Bring up the scheduler: register whatever's calling `init()` (the
/// boot/test-main call stack) as a normal thread, plus a dedicated idle
/// thread with its own stack that never blocks on anything but an
/// interrupt. Call once, after the heap is initialized and before
/// `intr_enable`.
///
/// Idle is kept separate from the boot thread deliberately: `pick_next`'s
/// empty-ready fallback dispatches `idle_id` unconditionally, without
/// checking its status, which is only safe for a thread that is never
/// legitimately BLOCKED for its own reasons (asleep, waiting on a lock).
/// The boot thread does sleep and lock like any other thread, so it
/// cannot double as that fallback.
pub fn init() {
    without_interrupts(|| {
        let mut guard = SCHEDULER.lock();

        let boot_id: ThreadId = 0;
        let mut boot = Thread::new(
            boot_id,
            String::from("main"),
            crate::config::PRI_DEFAULT,
            core::ptr::null_mut(),
            0,
            core::ptr::null_mut(),
        );
        boot.status = ThreadStatus::Running;

        let idle_id: ThreadId = 1;
        let idle_stack_size = crate::config::THREAD_STACK_SIZE;
        let (idle_stack_bottom, idle_frame) =
            build_synthetic_frame(idle_stack_size, idle_entry, 0)
                .expect("out of memory allocating the idle thread's stack at boot");
        let idle = Thread::new(
            idle_id,
            String::from("idle"),
            crate::config::PRI_MIN,
            idle_stack_bottom,
            idle_stack_size,
            idle_frame,
        );

        let mut threads = BTreeMap::new();
        threads.insert(boot_id, boot);
        threads.insert(idle_id, idle);

        *guard = Some(Scheduler {
            threads,
            ready: VecDeque::new(),
            sleeping: Vec::new(),
            lock_holders: BTreeMap::new(),
            current: boot_id,
            idle_id,
            next_id: 2,
            ticks_on_current: 0,
            deferred_dealloc: None,
        });
    });
    STARTED.store(true, Ordering::Release);
    crate::serial_println!("scheduler: initialized, boot thread 0, idle thread 1");
}

/// The idle thread's entire body: wait for an interrupt, forever. Never
/// calls `sleep_for`/`block_current` itself, so it's always safe for
/// `pick_next`'s fallback to resume it without consulting its status.
fn idle_entry(_: u64) {
    crate::hlt_loop()
}

pub fn is_started() -> bool {
    STARTED.load(Ordering::Acquire)
}

fn with_scheduler<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    without_interrupts(|| {
        let mut guard = SCHEDULER.lock();
        let sched = guard.as_mut().expect("scheduler used before init()");
        let current = sched.current;
        sched.threads[&current].assert_stack_intact();
        f(sched)
    })
}

pub fn current_thread_id() -> ThreadId {
    with_scheduler(|s| s.current)
}

pub fn current_priority() -> u8 {
    with_scheduler(|s| s.threads[&s.current].effective_priority)
}

/// Sets the current thread's *base* priority (spec.md §3: `priority_set`).
/// If the thread has active donors, its effective priority can still be
/// higher than the new base; if it has none, effective tracks base.
pub fn set_current_priority(priority: u8) {
    assert!(priority <= crate::config::PRI_MAX);
    let should_yield = with_scheduler(|s| {
        let id = s.current;
        s.threads.get_mut(&id).unwrap().base_priority = priority;
        s.recompute_priority(id);
        s.best_ready_priority() > Some(s.threads[&id].effective_priority)
    });
    if should_yield {
        thread_yield();
    }
}

/// Spawn a new kernel thread at `priority` running `entry(arg)`. The
/// thread starts Ready; it becomes eligible for the CPU on the next
/// schedule() that finds it the highest-priority ready thread.
///
/// Returns `None` — the error sentinel of spec.md §7's "resource
/// exhaustion" category — if no stack could be allocated for it. This is
/// the only failure mode `spawn` has; the caller decides whether to
/// propagate it, exactly like Pintos' `thread_create` returning
/// `TID_ERROR` on a failed `palloc_get_page`.
pub fn spawn(name: String, priority: u8, entry: fn(u64), arg: u64) -> Option<ThreadId> {
    assert!(priority <= crate::config::PRI_MAX);

    let stack_size = crate::config::THREAD_STACK_SIZE;
    let (stack_bottom, frame_ptr) = build_synthetic_frame(stack_size, entry, arg)?;

    let (id, should_preempt) = with_scheduler(|s| {
        let id = s.next_id;
        s.next_id += 1;
        let mut thread = Thread::new(id, name, priority, stack_bottom, stack_size, frame_ptr);
        thread.status = ThreadStatus::Ready;
        let new_priority = thread.effective_priority;
        s.threads.insert(id, thread);
        s.ready.push_back(id);
        let preempt = new_priority > s.threads[&s.current].effective_priority;
        (id, preempt)
    });
    // A newly-created thread that outranks the caller preempts immediately
    // rather than waiting for the next tick (§4.7, scenario 6).
    if should_preempt {
        thread_yield();
    }
    Some(id)
}

/// Entry trampoline every spawned thread's synthetic frame returns to.
/// rdi = arg, rsi = the real entry function pointer.
extern "C" fn thread_entry_trampoline(arg: u64, entry: u64) {
    let f: fn(u64) = unsafe { core::mem::transmute(entry) };
    f(arg);
    exit_current_thread();
}

/// Allocates a fresh kernel stack and writes an `InterruptFrame` at its top
/// shaped so that the first `iretq` that resumes it lands in
/// `thread_entry_trampoline(arg, entry)` with a clean, empty stack below —
/// the same synthetic-frame trick as the teacher's `spawn_thread`, with the
/// fixed entry point generalized to carry `entry` itself through `rsi`
/// rather than dispatching a single hardcoded thread body.
///
/// Returns `None` on stack allocation failure (spec.md §7: resource
/// exhaustion is reported to the caller, not panicked on).
fn build_synthetic_frame(
    stack_size: usize,
    entry: fn(u64),
    arg: u64,
) -> Option<(*mut u8, *mut InterruptFrame)> {
    let layout = alloc::alloc::Layout::from_size_align(stack_size, 16).unwrap();
    let stack_bottom = unsafe { alloc::alloc::alloc_zeroed(layout) };
    if stack_bottom.is_null() {
        return None;
    }
    let stack_top = unsafe { stack_bottom.add(stack_size) } as u64;

    let frame_ptr = unsafe {
        let ptr = (stack_top as *mut InterruptFrame).sub(1);
        core::ptr::write(
            ptr,
            InterruptFrame {
                r15: 0,
                r14: 0,
                r13: 0,
                r12: 0,
                r11: 0,
                r10: 0,
                r9: 0,
                r8: 0,
                rbp: 0,
                rdi: arg,
                rsi: entry as u64,
                rdx: 0,
                rcx: 0,
                rbx: 0,
                rax: 0,
                rip: thread_entry_trampoline as *const () as u64,
                cs: KERNEL_CS,
                rflags: 0x202,
                rsp: stack_top,
                ss: KERNEL_SS,
            },
        );
        ptr
    };

    Some((stack_bottom, frame_ptr))
}

/// Terminates the calling thread. Never returns.
pub fn exit_current_thread() -> ! {
    with_scheduler(|s| {
        let id = s.current;
        s.threads.get_mut(&id).unwrap().status = ThreadStatus::Dying;
    });
    request_reschedule();
    unreachable!("a Dying thread must never be scheduled again");
}

/// Voluntary, synchronous yield: give up the CPU to another ready thread
/// of at least the calling thread's priority without waiting for the next
/// tick.
pub fn thread_yield() {
    assert!(
        !crate::interrupts::in_interrupt_context(),
        "thread_yield() called from interrupt context"
    );
    with_scheduler(|s| {
        let id = s.current;
        if id != s.idle_id {
            s.threads.get_mut(&id).unwrap().status = ThreadStatus::Ready;
        }
    });
    request_reschedule();
}

/// Marks the calling thread Blocked and synchronously switches away. The
/// caller is responsible for having already recorded *why* it's blocked
/// (a semaphore/condvar waiter list entry, a sleep deadline) before
/// calling this — `schedule()` only looks at `status`.
pub fn block_current() {
    assert!(
        !crate::interrupts::in_interrupt_context(),
        "thread_block() called from interrupt context"
    );
    with_scheduler(|s| {
        let id = s.current;
        s.threads.get_mut(&id).unwrap().status = ThreadStatus::Blocked;
    });
    request_reschedule();
}

/// Moves a blocked thread back to Ready and, if it now outranks the
/// running thread, immediately preempts (strict priority: a higher
/// priority ready thread is never left waiting for the next tick).
pub fn unblock(id: ThreadId) {
    let should_preempt = with_scheduler(|s| s.make_ready(id));
    if should_preempt {
        thread_yield();
    }
}

fn request_reschedule() {
    unsafe {
        core::arch::asm!("int 0x81");
    }
}

/// Called from the raw timer ISR stub via `interrupts::timer_tick_handler`.
/// Always accounts the tick; only switches contexts when the current
/// thread's time slice has expired or a higher/equal-priority thread is
/// waiting (I3).
pub fn tick_hook(frame: *mut InterruptFrame) -> *mut InterruptFrame {
    let mut guard = match SCHEDULER.try_lock() {
        Some(g) => g,
        None => return frame,
    };
    let sched = match guard.as_mut() {
        Some(s) => s,
        None => return frame,
    };

    sched.wake_sleepers();
    sched.ticks_on_current += 1;

    let current_effective = sched.threads[&sched.current].effective_priority;
    let best_ready = sched.best_ready_priority();
    let slice_expired = sched.ticks_on_current >= crate::config::TIME_SLICE;
    let outranked = best_ready.map_or(false, |p| p > current_effective);

    if !slice_expired && !outranked {
        return frame;
    }

    let id = sched.current;
    if sched.threads[&id].status == ThreadStatus::Running {
        sched.threads.get_mut(&id).unwrap().status = ThreadStatus::Ready;
    }
    sched.schedule(frame)
}

/// Called from the raw yield ISR stub whenever a thread voluntarily
/// blocks or yields. Always reschedules.
pub fn yield_hook(frame: *mut InterruptFrame) -> *mut InterruptFrame {
    let mut guard = SCHEDULER.lock();
    let sched = guard.as_mut().expect("scheduler used before init()");
    sched.wake_sleepers();
    sched.schedule(frame)
}

impl Scheduler {
    /// Common context-switch path shared by the timer and yield ISRs.
    /// Saves the outgoing thread's frame, requeues/retires it according
    /// to its status, picks the next thread to run, and returns its
    /// saved frame.
    fn schedule(&mut self, frame: *mut InterruptFrame) -> *mut InterruptFrame {
        if let Some((ptr, size)) = self.deferred_dealloc.take() {
            dealloc_stack(ptr, size);
        }

        let outgoing = self.current;
        {
            let thread = self.threads.get_mut(&outgoing).unwrap();
            thread.assert_stack_intact();
            thread.saved_frame = frame;
            match thread.status {
                ThreadStatus::Dying => {
                    self.deferred_dealloc = Some((thread.stack_bottom, thread.stack_size));
                }
                ThreadStatus::Ready if outgoing != self.idle_id => {
                    self.ready.push_back(outgoing);
                }
                // Blocked: already recorded on whatever waiter list put it
                // there. Ready-and-idle: idle never sits in the ready
                // queue, it's the implicit fallback when ready is empty.
                _ => {}
            }
        }
        if matches!(self.threads[&outgoing].status, ThreadStatus::Dying) {
            self.threads.remove(&outgoing);
        }

        let next = self.pick_next();
        self.current = next;
        self.ticks_on_current = 0;
        let thread = self.threads.get_mut(&next).unwrap();
        thread.status = ThreadStatus::Running;
        thread.saved_frame
    }

    /// Transitions a Blocked thread to Ready and enqueues it, returning
    /// whether it now outranks the running thread (the caller yields in
    /// that case). Callers that pop a thread off a semaphore/condvar
    /// waiter queue must call this in the *same* masked, locked region
    /// that did the pop (spec §4.4/§5): otherwise a preemption could land
    /// with the thread in no queue at all and its status still Blocked,
    /// a transient violation of I2.
    pub(super) fn make_ready(&mut self, id: ThreadId) -> bool {
        let thread = self.threads.get_mut(&id).expect("unblock of unknown thread");
        assert_eq!(
            thread.status,
            ThreadStatus::Blocked,
            "unblock of a thread that isn't BLOCKED"
        );
        thread.status = ThreadStatus::Ready;
        if !self.ready.contains(&id) {
            self.ready.push_back(id);
        }
        thread.effective_priority > self.threads[&self.current].effective_priority
    }

    fn pick_next(&mut self) -> ThreadId {
        if self.ready.is_empty() {
            return self.idle_id;
        }
        let mut best_index = 0;
        let mut best_priority = self.threads[&self.ready[0]].effective_priority;
        for (i, id) in self.ready.iter().enumerate().skip(1) {
            let p = self.threads[id].effective_priority;
            if p > best_priority {
                best_priority = p;
                best_index = i;
            }
        }
        self.ready.remove(best_index).unwrap()
    }

    fn best_ready_priority(&self) -> Option<u8> {
        self.ready
            .iter()
            .map(|id| self.threads[id].effective_priority)
            .max()
    }

    fn wake_sleepers(&mut self) {
        let now = crate::interrupts::TICK_COUNT.load(Ordering::Relaxed);
        let mut i = 0;
        while i < self.sleeping.len() {
            let id = self.sleeping[i];
            let due = self.threads[&id].wakeup_tick.map_or(true, |t| now >= t);
            if due {
                self.sleeping.swap_remove(i);
                let thread = self.threads.get_mut(&id).unwrap();
                thread.wakeup_tick = None;
                thread.status = ThreadStatus::Ready;
                self.ready.push_back(id);
            } else {
                i += 1;
            }
        }
    }

    /// I4: recompute `id`'s effective priority from its current donor set.
    fn recompute_priority(&mut self, id: ThreadId) {
        let donor_priorities: Vec<u8> = self.threads[&id]
            .donors
            .iter()
            .filter_map(|d| self.threads.get(d).map(|t| t.effective_priority))
            .collect();
        self.threads
            .get_mut(&id)
            .unwrap()
            .recompute_effective_priority(&donor_priorities);
    }

    // --- Donation engine (spec.md §4.5, D1-D4) ---

    /// Records `waiter`'s intent to acquire `lock` and walks the holder
    /// chain donating `waiter`'s priority, bounded at
    /// `config::DONATION_MAX_DEPTH` hops (§9).
    pub(super) fn donate(&mut self, waiter: ThreadId, lock: LockId) {
        self.threads.get_mut(&waiter).unwrap().waiting_on = Some(lock);

        let mut hop_waiter = waiter;
        let mut hop_lock = lock;
        for _ in 0..crate::config::DONATION_MAX_DEPTH {
            let holder = match self.lock_holders.get(&hop_lock) {
                Some(&h) => h,
                None => break,
            };
            if holder == hop_waiter {
                break;
            }
            let donors = &mut self.threads.get_mut(&holder).unwrap().donors;
            if !donors.contains(&hop_waiter) {
                donors.push(hop_waiter);
            }
            self.recompute_priority(holder);

            match self.threads[&holder].waiting_on {
                Some(next_lock) => {
                    hop_waiter = holder;
                    hop_lock = next_lock;
                }
                None => break,
            }
        }
    }

    pub(super) fn set_lock_holder(&mut self, lock: LockId, holder: Option<ThreadId>) {
        match holder {
            Some(t) => {
                self.lock_holders.insert(lock, t);
            }
            None => {
                self.lock_holders.remove(&lock);
            }
        }
    }

    pub(super) fn clear_waiting_on(&mut self, id: ThreadId) {
        self.threads.get_mut(&id).unwrap().waiting_on = None;
    }

    /// Drops every donor of `holder` that was waiting specifically on
    /// `lock` (D3: a lock release only revokes the donations it caused),
    /// and recomputes `holder`'s effective priority (D4).
    pub(super) fn revoke_donations(&mut self, holder: ThreadId, lock: LockId) {
        let remaining: Vec<ThreadId> = self.threads[&holder]
            .donors
            .iter()
            .copied()
            .filter(|d| self.threads.get(d).and_then(|t| t.waiting_on) != Some(lock))
            .collect();
        self.threads.get_mut(&holder).unwrap().donors = remaining;
        self.recompute_priority(holder);
    }

    pub(super) fn effective_priority_of(&self, id: ThreadId) -> u8 {
        self.threads[&id].effective_priority
    }

    pub(super) fn put_to_sleep(&mut self, id: ThreadId, wakeup_tick: u64) {
        let thread = self.threads.get_mut(&id).unwrap();
        thread.status = ThreadStatus::Blocked;
        thread.wakeup_tick = Some(wakeup_tick);
        self.sleeping.push(id);
    }
}

fn dealloc_stack(stack_bottom: *mut u8, stack_size: usize) {
    if !stack_bottom.is_null() {
        unsafe {
            let layout = alloc::alloc::Layout::from_size_align(stack_size, 16).unwrap();
            alloc::alloc::dealloc(stack_bottom, layout);
        }
    }
}

pub(super) fn with_scheduler_mut<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    with_scheduler(f)
}

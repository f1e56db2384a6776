/// Interrupt Descriptor Table (IDT) and interrupt handlers.
///
/// The IDT tells the CPU which function to call for each interrupt:
///   - 0-31: CPU exceptions (divide by zero, page fault, double fault, etc.)
///   - 32-47: Hardware interrupts (remapped from PIC: timer, etc.)
///   - 0x81: software interrupt used to request an immediate scheduling
///     decision from outside the timer path (see `thread::context::yield_isr_addr`)
///
/// The PIC 8259 manages hardware interrupts. We remap IRQs 0-7 from
/// IDT entries 8-15 to 32-47 to avoid colliding with CPU exceptions.

use crate::gdt;
use crate::hlt_loop;
use crate::thread::context::InterruptFrame;
use core::sync::atomic::{AtomicU64, Ordering};
use pic8259::ChainedPics;
use spin::Mutex;
use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};
use x86_64::VirtAddr;

pub static TICK_COUNT: AtomicU64 = AtomicU64::new(0);

/// Nesting depth of hardware-interrupt handling, incremented/decremented
/// around `timer_tick_handler`. Mirrors `intr_context()` in
/// `original_source/threads/thread.c`: `down`/`lock.acquire`/`cond.wait`/
/// `sleep_for`/`thread_yield` assert this is zero, since none of them may
/// suspend a thread from inside a hardware interrupt handler (spec.md §5,
/// §7 — "blocking from interrupt context" is a fatal programming
/// violation). The software `int 0x81` yield path is deliberately NOT
/// counted here: it's how a thread that already decided to block gets a
/// synchronous reschedule, not a hardware interrupt a blocking call could
/// be invoked from.
static INTR_NESTING: AtomicU64 = AtomicU64::new(0);

pub fn in_interrupt_context() -> bool {
    INTR_NESTING.load(Ordering::Relaxed) > 0
}

// 8254 PIT constants
const PIT_OSCILLATOR_HZ: u32 = 1_193_182;
const PIT_COMMAND_PORT: u16 = 0x43;
const PIT_CHANNEL0_PORT: u16 = 0x40;

/// Configure the 8254 PIT to fire at `crate::config::TIMER_FREQ` Hz.
pub fn init_pit() {
    let divisor: u16 = (PIT_OSCILLATOR_HZ / crate::config::TIMER_FREQ) as u16;
    unsafe {
        x86_64::instructions::port::Port::new(PIT_COMMAND_PORT).write(0x36u8);
        x86_64::instructions::port::Port::new(PIT_CHANNEL0_PORT).write((divisor & 0xFF) as u8);
        x86_64::instructions::port::Port::new(PIT_CHANNEL0_PORT).write((divisor >> 8) as u8);
    }
}

pub const PIC_1_OFFSET: u8 = 32;
pub const PIC_2_OFFSET: u8 = PIC_1_OFFSET + 8;

pub static PICS: Mutex<ChainedPics> =
    Mutex::new(unsafe { ChainedPics::new(PIC_1_OFFSET, PIC_2_OFFSET) });

#[derive(Debug, Clone, Copy)]
#[repr(u8)]
pub enum InterruptIndex {
    Timer = PIC_1_OFFSET,
}

/// Software interrupt vector used to request a synchronous reschedule
/// (blocking on a semaphore/lock/condvar, or an explicit yield). Chosen
/// outside both the exception range (0-31) and the remapped PIC range
/// (32-47).
pub const YIELD_VECTOR: u8 = 0x81;

// --- IDT setup ---

static IDT: spin::Once<InterruptDescriptorTable> = spin::Once::new();

pub fn init_idt() {
    let idt = IDT.call_once(|| {
        let mut idt = InterruptDescriptorTable::new();
        idt.breakpoint.set_handler_fn(breakpoint_handler);
        unsafe {
            idt.double_fault
                .set_handler_fn(double_fault_handler)
                .set_stack_index(gdt::DOUBLE_FAULT_IST_INDEX);
        }
        idt.page_fault.set_handler_fn(page_fault_handler);
        unsafe {
            idt[InterruptIndex::Timer as u8]
                .set_handler_addr(VirtAddr::new(crate::thread::context::timer_isr_addr()));
            idt[YIELD_VECTOR]
                .set_handler_addr(VirtAddr::new(crate::thread::context::yield_isr_addr()));
        }
        idt
    });
    idt.load();
}

// --- CPU Exception Handlers ---

extern "x86-interrupt" fn breakpoint_handler(stack_frame: InterruptStackFrame) {
    crate::serial_println!("EXCEPTION: BREAKPOINT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame,
    _error_code: u64,
) -> ! {
    panic!("EXCEPTION: DOUBLE FAULT\n{:#?}", stack_frame);
}

extern "x86-interrupt" fn page_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    use x86_64::registers::control::Cr2;

    crate::serial_println!("EXCEPTION: PAGE FAULT");
    crate::serial_println!("Accessed Address: {:?}", Cr2::read());
    crate::serial_println!("Error Code: {:?}", error_code);
    crate::serial_println!("{:#?}", stack_frame);
    hlt_loop();
}

// --- Scheduling interrupt handlers ---
//
// Both of these are called from raw asm ISR stubs in `thread::context`, not
// through the `x86-interrupt` ABI: the stub already did the register
// save/restore, and hands us a plain pointer to the saved frame. We return
// the frame to resume, which may belong to a different thread's stack.

/// Called on every timer tick. Always advances the tick counter and runs
/// the sleep-queue wakeup check; only performs a context switch when the
/// current thread's time slice has expired (I3) or a higher-priority
/// thread is ready to run.
#[no_mangle]
extern "C" fn timer_tick_handler(frame: *mut InterruptFrame) -> *mut InterruptFrame {
    INTR_NESTING.fetch_add(1, Ordering::Relaxed);

    TICK_COUNT.fetch_add(1, Ordering::Relaxed);

    unsafe {
        PICS.lock()
            .notify_end_of_interrupt(InterruptIndex::Timer as u8);
    }

    let next = crate::thread::scheduler::tick_hook(frame);
    INTR_NESTING.fetch_sub(1, Ordering::Relaxed);
    next
}

/// Called by `int 0x81`, raised whenever a thread voluntarily blocks
/// (sleep, semaphore/lock/condvar wait) or calls `thread_yield`. No PIC
/// EOI here — this is a software interrupt, not a hardware one.
#[no_mangle]
extern "C" fn yield_isr_handler(frame: *mut InterruptFrame) -> *mut InterruptFrame {
    crate::thread::scheduler::yield_hook(frame)
}

/// Integration test: single, nested, and multiple priority donation
/// (spec.md §4.5, D1-D4) — a low-priority lock holder is raised to the
/// priority of whichever waiter (possibly several hops away) needs it to
/// finish.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use alloc::string::String;
use bootloader_api::{entry_point, BootInfo, BootloaderConfig};
use core::panic::PanicInfo;
use core::sync::atomic::{AtomicU8, Ordering};
use kernel::thread::sync::Lock;
use kernel::thread::{scheduler, time};
use kernel::{allocator, memory};

pub static BOOTLOADER_CONFIG: BootloaderConfig = {
    let mut config = BootloaderConfig::new_default();
    config.mappings.physical_memory = Some(bootloader_api::config::Mapping::Dynamic);
    config
};

entry_point!(main, config = &BOOTLOADER_CONFIG);

fn main(boot_info: &'static mut BootInfo) -> ! {
    kernel::init();

    let phys_mem_offset = x86_64::VirtAddr::new(
        boot_info
            .physical_memory_offset
            .into_option()
            .expect("physical_memory_offset not available"),
    );
    let mut mapper = unsafe { memory::init(phys_mem_offset) };
    let mut frame_allocator =
        unsafe { memory::BootInfoFrameAllocator::init(&boot_info.memory_regions) };
    allocator::init_heap(&mut mapper, &mut frame_allocator).expect("heap initialization failed");

    scheduler::init();
    x86_64::instructions::interrupts::enable();

    test_main();
    kernel::hlt_loop();
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    kernel::test_panic_handler(info)
}

static HOLDER_OBSERVED_PRIORITY: AtomicU8 = AtomicU8::new(0);

#[test_case]
fn single_donation_raises_holder() {
    static LOCK: Lock = Lock::new();

    fn holder(_: u64) {
        LOCK.acquire();
        time::sleep_for(2);
        HOLDER_OBSERVED_PRIORITY.store(scheduler::current_priority(), Ordering::SeqCst);
        LOCK.release();
    }

    fn high_waiter(_: u64) {
        LOCK.acquire();
        LOCK.release();
    }

    scheduler::spawn(String::from("holder"), kernel::config::PRI_MIN, holder, 0)
        .expect("out of memory spawning holder");
    time::sleep_for(1);
    scheduler::spawn(
        String::from("high-waiter"),
        kernel::config::PRI_MAX,
        high_waiter,
        0,
    )
    .expect("out of memory spawning high-waiter");

    for _ in 0..10 {
        time::sleep_for(1);
    }

    assert_eq!(
        HOLDER_OBSERVED_PRIORITY.load(Ordering::SeqCst),
        kernel::config::PRI_MAX,
        "a single waiter's priority must be donated to the lock holder"
    );
}

#[test_case]
fn nested_donation_propagates_two_hops() {
    static LOCK_A: Lock = Lock::new();
    static LOCK_B: Lock = Lock::new();
    static A_OBSERVED: AtomicU8 = AtomicU8::new(0);

    fn holder_a(_: u64) {
        LOCK_A.acquire();
        time::sleep_for(2);
        A_OBSERVED.store(scheduler::current_priority(), Ordering::SeqCst);
        LOCK_A.release();
    }

    fn holder_b(_: u64) {
        LOCK_B.acquire();
        LOCK_A.acquire();
        time::sleep_for(1);
        LOCK_A.release();
        LOCK_B.release();
    }

    fn high_waiter(_: u64) {
        LOCK_B.acquire();
        LOCK_B.release();
    }

    scheduler::spawn(
        String::from("holder-a"),
        kernel::config::PRI_MIN,
        holder_a,
        0,
    )
    .expect("out of memory spawning holder-a");
    time::sleep_for(1);
    scheduler::spawn(
        String::from("holder-b"),
        kernel::config::PRI_DEFAULT,
        holder_b,
        0,
    )
    .expect("out of memory spawning holder-b");
    time::sleep_for(1);
    scheduler::spawn(
        String::from("high-waiter"),
        kernel::config::PRI_MAX,
        high_waiter,
        0,
    )
    .expect("out of memory spawning high-waiter");

    for _ in 0..15 {
        time::sleep_for(1);
    }

    assert_eq!(
        A_OBSERVED.load(Ordering::SeqCst),
        kernel::config::PRI_MAX,
        "donation must propagate through holder-b to holder-a"
    );
}

#[test_case]
fn multiple_donation_drops_partially_on_partial_release() {
    static LOCK_X: Lock = Lock::new();
    static LOCK_Y: Lock = Lock::new();
    static AFTER_Y_RELEASE: AtomicU8 = AtomicU8::new(0);
    static AFTER_X_RELEASE: AtomicU8 = AtomicU8::new(0);

    let donor_a_priority = kernel::config::PRI_DEFAULT;
    let donor_b_priority = kernel::config::PRI_MAX;

    fn holder(_: u64) {
        LOCK_X.acquire();
        LOCK_Y.acquire();

        // Wait for both donors to block, then shed Y's donation first and
        // observe the partial drop before releasing X.
        for _ in 0..4 {
            time::sleep_for(1);
        }
        LOCK_Y.release();
        time::sleep_for(1);
        AFTER_Y_RELEASE.store(scheduler::current_priority(), Ordering::SeqCst);

        time::sleep_for(1);
        LOCK_X.release();
        time::sleep_for(1);
        AFTER_X_RELEASE.store(scheduler::current_priority(), Ordering::SeqCst);
    }

    fn donor_a(_: u64) {
        LOCK_X.acquire();
        LOCK_X.release();
    }

    fn donor_b(_: u64) {
        LOCK_Y.acquire();
        LOCK_Y.release();
    }

    scheduler::spawn(String::from("holder"), kernel::config::PRI_MIN, holder, 0)
        .expect("out of memory spawning holder");
    time::sleep_for(1);
    scheduler::spawn(String::from("donor-a"), donor_a_priority, donor_a, 0)
        .expect("out of memory spawning donor-a");
    scheduler::spawn(String::from("donor-b"), donor_b_priority, donor_b, 0)
        .expect("out of memory spawning donor-b");

    for _ in 0..20 {
        time::sleep_for(1);
    }

    assert_eq!(
        AFTER_Y_RELEASE.load(Ordering::SeqCst),
        donor_a_priority,
        "releasing Y must drop the holder to donor-a's donation, not its base priority"
    );
    assert_eq!(
        AFTER_X_RELEASE.load(Ordering::SeqCst),
        kernel::config::PRI_MIN,
        "releasing X must drop the holder all the way back to its base priority"
    );
}

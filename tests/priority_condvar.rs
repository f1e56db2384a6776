/// Integration test: ten waiters block on a condition variable at
/// distinct priorities; `broadcast` must wake them in strict
/// priority order (O4), independent of the order they called `wait`.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;
use bootloader_api::{entry_point, BootInfo, BootloaderConfig};
use core::panic::PanicInfo;
use core::sync::atomic::{AtomicU32, Ordering};
use kernel::thread::sync::{CondVar, Lock};
use kernel::thread::{scheduler, time};
use kernel::{allocator, memory};
use spin::Mutex;

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

static LOCK: Lock = Lock::new();
static COND: CondVar = CondVar::new();
static READY: AtomicU32 = AtomicU32::new(0);
static WAKE_ORDER: Mutex<Vec<u8>> = Mutex::new(Vec::new());

#[test_case]
fn broadcast_wakes_in_priority_order() {
    fn waiter(priority: u64) {
        LOCK.acquire();
        while READY.load(Ordering::Acquire) == 0 {
            COND.wait(&LOCK);
        }
        WAKE_ORDER.lock().push(priority as u8);
        LOCK.release();
    }

    // Spawn in increasing priority order so wake order can't be confused
    // with spawn/block order.
    for i in 0..10u8 {
        let priority = kernel::config::PRI_MIN + i * 2;
        scheduler::spawn(String::from("waiter"), priority, waiter, priority as u64)
            .expect("out of memory spawning waiter");
    }

    // Let every waiter reach cond.wait() before signaling.
    for _ in 0..3 {
        time::sleep_for(1);
    }

    LOCK.acquire();
    READY.store(1, Ordering::Release);
    COND.broadcast(&LOCK);
    LOCK.release();

    for _ in 0..10 {
        time::sleep_for(1);
    }

    let order = WAKE_ORDER.lock();
    assert_eq!(order.len(), 10, "every waiter must have woken");
    for pair in order.windows(2) {
        assert!(
            pair[0] >= pair[1],
            "waiters must wake in non-increasing priority order: {:?}",
            *order
        );
    }
}

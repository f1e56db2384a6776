/// Integration test: basic thread lifecycle — spawning runs the thread,
/// and priority governs which of two ready threads gets the CPU first.

#![no_std]
#![no_main]
#![feature(custom_test_frameworks)]
#![test_runner(kernel::test_runner)]
#![reexport_test_harness_main = "test_main"]

extern crate alloc;

use alloc::string::String;
use bootloader_api::{entry_point, BootInfo, BootloaderConfig};
use core::panic::PanicInfo;
use core::sync::atomic::{AtomicU32, Ordering};
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

#[test_case]
fn spawned_thread_runs() {
    static RAN: AtomicU32 = AtomicU32::new(0);

    scheduler::spawn(String::from("runner"), kernel::config::PRI_DEFAULT, |_| {
        RAN.store(1, Ordering::SeqCst);
    }, 0).expect("out of memory spawning runner");

    // Give the spawned thread a chance to run before checking.
    for _ in 0..10 {
        time::sleep_for(1);
    }

    assert_eq!(RAN.load(Ordering::SeqCst), 1);
}

#[test_case]
fn higher_priority_thread_runs_first() {
    static ORDER: spin::Mutex<alloc::vec::Vec<u8>> = spin::Mutex::new(alloc::vec::Vec::new());

    fn record(tag: u64) {
        ORDER.lock().push(tag as u8);
    }

    scheduler::spawn(String::from("low"), kernel::config::PRI_MIN, record, 1)
        .expect("out of memory spawning low");
    scheduler::spawn(String::from("high"), kernel::config::PRI_MAX, record, 2)
        .expect("out of memory spawning high");

    for _ in 0..10 {
        time::sleep_for(1);
    }

    let order = ORDER.lock();
    assert!(order.len() >= 2);
    assert_eq!(order[0], 2, "the higher-priority thread should run first");
}

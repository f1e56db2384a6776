/// Integration test: `sleep_for` suspends the calling thread for at
/// least the requested number of ticks and doesn't busy-loop the CPU
/// while doing it (another ready thread gets to run in the meantime).

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
fn sleep_for_waits_at_least_requested_ticks() {
    let before = time::ticks();
    time::sleep_for(5);
    let after = time::ticks();
    assert!(
        after - before >= 5,
        "sleep_for(5) returned after only {} ticks",
        after - before
    );
}

#[test_case]
fn sleeping_thread_does_not_block_other_ready_threads() {
    static OTHER_RAN: AtomicU32 = AtomicU32::new(0);

    scheduler::spawn(String::from("other"), kernel::config::PRI_DEFAULT, |_| {
        OTHER_RAN.store(1, Ordering::SeqCst);
    }, 0).expect("out of memory spawning other");

    time::sleep_for(5);

    assert_eq!(
        OTHER_RAN.load(Ordering::SeqCst),
        1,
        "another ready thread should have run while this one slept"
    );
}

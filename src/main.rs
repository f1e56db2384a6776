#![no_std]
#![no_main]
#![feature(abi_x86_interrupt)]

extern crate alloc;

use alloc::string::String;
use bootloader_api::{entry_point, BootInfo, BootloaderConfig};
use core::panic::PanicInfo;
use core::sync::atomic::{AtomicU32, Ordering};

use kernel::thread::sync::{CondVar, Lock};
use kernel::thread::{scheduler, time};

#[allow(deprecated)]
pub static BOOTLOADER_CONFIG: BootloaderConfig = {
    let mut config = BootloaderConfig::new_default();
    config.mappings.physical_memory = Some(bootloader_api::config::Mapping::Dynamic);
    config.kernel_stack_size = 512 * 1024;
    config
};

entry_point!(kernel_main, config = &BOOTLOADER_CONFIG);

fn kernel_main(boot_info: &'static mut BootInfo) -> ! {
    kernel::serial::init();
    kernel::serial_println!("serial initialized");

    kernel::init();
    kernel::serial_println!("GDT, IDT, PICs initialized");

    let phys_mem_offset = x86_64::VirtAddr::new(
        boot_info
            .physical_memory_offset
            .into_option()
            .expect("physical_memory_offset not available"),
    );
    let mut mapper = unsafe { kernel::memory::init(phys_mem_offset) };
    let mut frame_allocator =
        unsafe { kernel::memory::BootInfoFrameAllocator::init(&boot_info.memory_regions) };
    kernel::allocator::init_heap(&mut mapper, &mut frame_allocator)
        .expect("heap initialization failed");
    kernel::serial_println!("heap initialized");

    kernel::interrupts::init_pit();
    kernel::serial_println!("PIT configured at {} Hz", kernel::config::TIMER_FREQ);

    scheduler::init();

    x86_64::instructions::interrupts::enable();
    time::calibrate();

    spawn_donation_demo();
    spawn_condvar_demo();

    kernel::serial_println!("all subsystems initialized, entering idle loop");
    kernel::hlt_loop();
}

/// Exercises single and nested priority donation: a low-priority holder
/// sits on `lock` while a medium- and then a high-priority thread queue
/// up behind it, each donation raising the holder's effective priority
/// so it can finish and release promptly instead of starving the waiters.
fn spawn_donation_demo() {
    static LOCK: Lock = Lock::new();

    fn low_priority_holder(_: u64) {
        LOCK.acquire();
        kernel::serial_println!(
            "[donation] low holder running at effective priority {}",
            scheduler::current_priority()
        );
        for _ in 0..3 {
            time::sleep_for(1);
        }
        kernel::serial_println!("[donation] low holder releasing");
        LOCK.release();
    }

    fn waiter(arg: u64) {
        let label = arg;
        kernel::serial_println!("[donation] waiter {} blocking on lock", label);
        LOCK.acquire();
        kernel::serial_println!("[donation] waiter {} acquired lock", label);
        LOCK.release();
    }

    scheduler::spawn(
        String::from("donation-low"),
        kernel::config::PRI_DEFAULT.saturating_sub(2),
        low_priority_holder,
        0,
    )
    .expect("out of memory spawning donation-low");
    time::sleep_for(1);
    scheduler::spawn(
        String::from("donation-mid"),
        kernel::config::PRI_DEFAULT,
        waiter,
        1,
    )
    .expect("out of memory spawning donation-mid");
    scheduler::spawn(
        String::from("donation-high"),
        kernel::config::PRI_MAX,
        waiter,
        2,
    )
    .expect("out of memory spawning donation-high");
}

/// Ten waiters block on a condvar at distinct priorities; `broadcast`
/// wakes them in strict priority order regardless of block order (O4).
fn spawn_condvar_demo() {
    static LOCK: Lock = Lock::new();
    static COND: CondVar = CondVar::new();
    static READY: AtomicU32 = AtomicU32::new(0);

    fn waiter(priority_as_arg: u64) {
        LOCK.acquire();
        while READY.load(Ordering::Acquire) == 0 {
            COND.wait(&LOCK);
        }
        kernel::serial_println!(
            "[condvar] waiter woke at effective priority {}",
            priority_as_arg
        );
        LOCK.release();
    }

    for i in 0..10u8 {
        let priority = kernel::config::PRI_MIN + i * 2;
        scheduler::spawn(
            String::from("condvar-waiter"),
            priority,
            waiter,
            priority as u64,
        )
        .expect("out of memory spawning condvar-waiter");
    }

    scheduler::spawn(
        String::from("condvar-signaler"),
        kernel::config::PRI_DEFAULT,
        |_| {
            time::sleep_for(2);
            LOCK.acquire();
            READY.store(1, Ordering::Release);
            COND.broadcast(&LOCK);
            LOCK.release();
        },
        0,
    )
    .expect("out of memory spawning condvar-signaler");
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    kernel::serial_println!("{}", info);
    kernel::hlt_loop()
}

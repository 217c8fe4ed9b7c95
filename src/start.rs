//! Kernel entry points (spec.md §1 "bootloader is an external
//! collaborator", §7 "External Interfaces").
//!
//! Grounded on the teacher's `start.rs`/`kernel_main.rs` split: a tiny
//! piece of code outside this crate (there, `entry.S`/`start()`; here,
//! the platform's protected-mode bootloader) gets the machine into a
//! state where plain Rust can run and calls into exactly one
//! `extern "C"` function per CPU. CPU 0 builds every shared structure
//! once; the remaining CPUs wait for it to finish, then do only the
//! per-CPU setup (page table activation, trap handling) before falling
//! into the scheduler. `swtch`, `switch_uvm`, and `trapret` — the
//! context-switch primitive, the per-process `%cr3`/TSS activation, and
//! the shared trap-return tail — are, like the IDT and its vector
//! stubs, supplied by that same external layer; see `proc.rs`'s
//! `extern "C"` declarations.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::console;
use crate::devices::{BlockDevice, CharDevice};
use crate::kalloc;
use crate::kernel::kernel;
use crate::pic;
use crate::proc;
use crate::vm::PageTable;
use crate::x86;

static KERNEL_PAGETABLE: spin::Once<PageTable> = spin::Once::new();
static STARTED: AtomicBool = AtomicBool::new(false);

fn activate_kernel_pagetable() {
    let pt = KERNEL_PAGETABLE.call_once(|| PageTable::new().expect("out of memory building kernel page table"));
    // SAFETY: `pt`'s directory maps the kernel's own half identically to
    // how every process's page table will, so switching to it this
    // early is safe and leaves the kernel runnable afterward.
    unsafe { x86::lcr3(pt.physical_addr()) };
}

/// Boots CPU 0: the only CPU that runs before the others are released.
/// `kernel_end` is the first physical address after the kernel's own
/// image, the start of free memory [`kalloc::init`] hands out.
/// `console_device` and `root_disk` are the concrete drivers the
/// platform layer constructed; `init_code` is the first user process's
/// executable image, embedded by the platform's build (spec.md §4.E
/// "the first process").
///
/// # Safety
/// Must be called exactly once, before any other CPU runs Rust code,
/// with a valid GDT/IDT and protected mode (paging off) already in
/// effect.
#[no_mangle]
pub unsafe extern "C" fn boot_cpu0(
    kernel_end: usize,
    console_device: &'static dyn CharDevice,
    root_disk: &'static dyn BlockDevice,
    init_code: &'static [u8],
) -> ! {
    console::init(console_device);
    // SAFETY: caller's contract: `kernel_end..PHYSTOP` is free, unused
    // physical memory.
    unsafe { kalloc::init(kernel_end) };
    activate_kernel_pagetable();
    // SAFETY: called once, before interrupts are enabled anywhere.
    unsafe { pic::init() };

    kernel().set_root_disk(root_disk);
    let p = proc::create_first_process(init_code);
    kernel().set_init_proc(p);

    STARTED.store(true, Ordering::Release);
    // SAFETY: the kernel page table is active and the process table is
    // initialized.
    unsafe { proc::scheduler() }
}

/// Boots every CPU other than CPU 0. Spins until [`boot_cpu0`] has
/// finished the one-time setup, then does this CPU's own page table
/// activation and falls into the scheduler alongside it.
///
/// # Safety
/// Same contract as [`boot_cpu0`], except the GDT/IDT this CPU installs
/// must match the one CPU 0 is running with.
#[no_mangle]
pub unsafe extern "C" fn boot_ap() -> ! {
    while !STARTED.load(Ordering::Acquire) {
        core::hint::spin_loop();
    }
    activate_kernel_pagetable();
    // SAFETY: called once per AP, before interrupts are enabled on it.
    unsafe { proc::scheduler() }
}

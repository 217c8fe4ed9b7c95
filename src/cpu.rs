//! Per-CPU scheduler state (spec.md §3 "CPU descriptor", §4.E).
//!
//! Grounded on the teacher's `proc.rs`/`proc/mod.rs` `Cpu` struct and
//! `cpuid()`/`mycpu()` helpers.

use core::ptr;

use crate::memlayout::DEVSPACE;
use crate::proc::{Context, Proc};

/// Offset of the local APIC's ID register within the APIC MMIO window.
const APIC_ID_REG: usize = 0x20;

/// Returns the index of the calling CPU.
///
/// A real SMP x86 kernel reads this from the local APIC (or, once
/// paging is live, from a per-CPU `%gs`-relative struct); we read the
/// APIC ID register directly, matching the teacher's treatment of
/// "where am I" as a one-line architecture primitive.
///
/// # Safety
/// The local APIC must already be mapped at `DEVSPACE` (done once by
/// boot code before any CPU other than CPU 0 is started).
#[inline]
pub unsafe fn cpuid() -> usize {
    let apic_id_reg = (DEVSPACE + APIC_ID_REG) as *const u32;
    // SAFETY: caller guarantees the APIC window is mapped.
    ((unsafe { ptr::read_volatile(apic_id_reg) }) >> 24) as usize
}

/// Per-CPU scheduler state.
pub struct Cpu {
    /// Process currently running on this CPU, or null.
    proc: *mut Proc,

    /// Saved registers for the scheduler's own context, swapped to when
    /// this CPU is not running a process.
    pub(crate) scheduler: Context,

    /// Depth of nested `push_off` calls (spec.md §4.A).
    pub(crate) noff: i32,

    /// Whether interrupts were enabled before the outermost `push_off`.
    pub(crate) interrupt_enabled: bool,
}

impl Cpu {
    pub const fn zero() -> Self {
        Self {
            proc: ptr::null_mut(),
            scheduler: Context::zero(),
            noff: 0,
            interrupt_enabled: false,
        }
    }

    pub fn proc(&self) -> *mut Proc {
        self.proc
    }

    /// # Safety
    /// Must only be called by the CPU that owns this descriptor, with
    /// interrupts disabled (i.e. while `noff >= 1`, or during the boot
    /// sequence before any process has run).
    pub unsafe fn set_proc(&mut self, p: *mut Proc) {
        self.proc = p;
    }
}

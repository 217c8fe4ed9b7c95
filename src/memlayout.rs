//! Physical and virtual memory layout for 32-bit x86.
//!
//! Grounded on the teacher's `memlayout.rs`, which documents the
//! RISC-V `qemu -machine virt` layout as a set of named constants; this
//! module documents the analogous x86 layout instead (spec.md §4.C).
//!
//! Physical memory, as seen by the kernel:
//!
//! ```text
//! 0x00000000 -- real mode IVT, BIOS data area
//! 0x000A0000 -- video memory (text mode at 0xB8000)
//! 0x000F0000 -- BIOS ROM
//! 0x00100000 (EXTMEM) -- extended memory starts here (the boot loader and
//!                        kernel both run after this point)
//! EXTMEM .. PHYSTOP    -- RAM managed by the physical page allocator (4.B)
//! DEVSPACE             -- memory-mapped devices (APIC, IDE controller, ...)
//! ```
//!
//! Virtual memory, per address space: the low half is per-process user
//! memory; the high half is identical in every address space and maps
//! the kernel (spec.md §4.C).

#![allow(dead_code)]

use crate::mmu::PGSIZE;

/// First byte of "extended" physical memory (everything below is
/// reserved for real-mode structures, the BIOS and VGA text memory).
pub const EXTMEM: usize = 0x0010_0000;

/// Physical memory this kernel is willing to manage. A teaching kernel
/// targets a small, fixed-size machine rather than probing SMBIOS/e820.
pub const PHYSTOP: usize = 0x0E00_0000;

/// Physical address of the memory-mapped I/O window (local APIC, IO
/// APIC, and similar device registers live at/above this address).
pub const DEVSPACE: usize = 0xFE00_0000;

/// Kernel is linked and loaded here in virtual memory: 2 GiB, leaving
/// the low 2 GiB of every address space for user code.
pub const KERNBASE: usize = 0x8000_0000;

/// Kernel link address in physical memory (kernel text begins at
/// `EXTMEM`; `KERNLINK` is its virtual-address alias).
pub const KERNLINK: usize = KERNBASE + EXTMEM;

/// Translate a kernel virtual address to its physical counterpart.
#[inline]
pub const fn v2p(a: usize) -> usize {
    a - KERNBASE
}

/// Translate a physical address to its kernel virtual alias.
#[inline]
pub const fn p2v(a: usize) -> usize {
    a + KERNBASE
}

/// Per-process kernel stack size, in pages. A single guard page (left
/// unmapped) follows each stack to catch overflow (spec.md §4.C).
pub const KSTACKPAGES: usize = 2;
pub const KSTACKSIZE: usize = KSTACKPAGES * PGSIZE;

//! x86 two-level paging constants and bit layout (spec.md §3, §4.C).
//!
//! Grounded on the teacher's `vm.rs`/`riscv.rs` split between
//! architecture bit-layout constants and the `PageTableEntry` wrapper
//! that interprets them; this module supplies the x86 equivalent of
//! `riscv.rs`'s `PteFlags`/`pxshift`/`PXMASK`.

#![allow(dead_code)]

use bitflags::bitflags;

/// Size of one physical/virtual page.
pub const PGSIZE: usize = 4096;
pub const PGSHIFT: usize = 12;

/// Bits of virtual address consumed by each page-table level.
pub const PXSHIFT: usize = 10;
pub const NPTENTRIES: usize = 1024;

bitflags! {
    /// Page table / page directory entry permission bits.
    pub struct PteFlags: u32 {
        /// Present.
        const P = 0x001;
        /// Writable.
        const W = 0x002;
        /// User-accessible.
        const U = 0x004;
        /// Accessed (set by hardware).
        const A = 0x020;
        /// Dirty (set by hardware, page directory entries only meaningful
        /// for 4 MiB pages, unused here since we stick to 4 KiB pages).
        const D = 0x040;
    }
}

/// Round `a` down to the start of its containing page.
#[inline]
pub const fn pgrounddown(a: usize) -> usize {
    a & !(PGSIZE - 1)
}

/// Round `a` up to the start of the next page (or `a` itself if it is
/// already page-aligned).
#[inline]
pub const fn pgroundup(a: usize) -> usize {
    (a + PGSIZE - 1) & !(PGSIZE - 1)
}

/// Index into the page directory for virtual address `va` (top 10 bits).
#[inline]
pub const fn pdx(va: usize) -> usize {
    (va >> (PGSHIFT + PXSHIFT)) & (NPTENTRIES - 1)
}

/// Index into the second-level page table for virtual address `va`
/// (middle 10 bits).
#[inline]
pub const fn ptx(va: usize) -> usize {
    (va >> PGSHIFT) & (NPTENTRIES - 1)
}

/// Build a page-directory-entry/page-table-entry value from a page
/// frame's physical address and permission bits.
#[inline]
pub const fn pte_addr(pa: u32) -> u32 {
    pa & !((PGSIZE - 1) as u32)
}

static_assertions::const_assert_eq!(core::mem::size_of::<u32>(), 4);

/// Segment selectors used when building a trap frame that resumes in
/// user mode (spec.md §4.C). The GDT itself is set up once by boot
/// code (the bootloader/startup assembly this crate treats as
/// external); these indices are the contract both sides agree on.
pub mod seg {
    pub const KCODE: u16 = 1;
    pub const KDATA: u16 = 2;
    pub const UCODE: u16 = 3;
    pub const UDATA: u16 = 4;

    /// Ring-3 (user) privilege level, ORed into a segment index to
    /// form the selector the CPU actually loads.
    const DPL_USER: u16 = 3;

    #[inline]
    pub const fn selector(index: u16) -> u16 {
        (index << 3) | DPL_USER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_is_idempotent_on_aligned_addresses() {
        assert_eq!(pgrounddown(PGSIZE), PGSIZE);
        assert_eq!(pgroundup(PGSIZE), PGSIZE);
    }

    #[test]
    fn rounding_brackets_an_unaligned_address() {
        let a = PGSIZE * 3 + 17;
        assert_eq!(pgrounddown(a), PGSIZE * 3);
        assert_eq!(pgroundup(a), PGSIZE * 4);
    }

    #[test]
    fn pdx_and_ptx_split_a_virtual_address() {
        // Directory index lives in the top 10 bits, table index in the
        // next 10, independent of each other.
        let va = (5 << (PGSHIFT + PXSHIFT)) | (7 << PGSHIFT) | 0x123;
        assert_eq!(pdx(va), 5);
        assert_eq!(ptx(va), 7);
    }

    #[test]
    fn pte_addr_masks_off_the_flag_bits() {
        assert_eq!(pte_addr(0x1234_5fff), 0x1234_5000);
    }

    #[test]
    fn selector_ors_in_the_user_privilege_level() {
        assert_eq!(seg::selector(seg::UCODE), (seg::UCODE << 3) | 3);
    }
}

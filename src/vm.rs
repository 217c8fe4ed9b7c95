//! Two-level x86 paging: page directories, page tables, and the
//! per-process address space they describe (spec.md §4.C).
//!
//! Grounded on the teacher's `vm.rs`: an `Addr`-style newtype for
//! physical addresses, a `PageTableEntry` wrapper interpreting raw
//! `u32` entries, and walk/map/copy operations built on top. This
//! crate flattens the teacher's generic `Addr`/`VAddr` trait hierarchy
//! (built for two address-space flavors, kernel and RISC-V Sv39 user)
//! down to the one flavor spec.md needs: flat 32-bit x86 addresses.

use core::ptr;

use crate::kalloc::{kalloc, kfree};
use crate::memlayout::{p2v, v2p, DEVSPACE, KERNBASE, PHYSTOP};
use crate::mmu::{pdx, pgroundup, ptx, pte_addr, PteFlags, NPTENTRIES, PGSIZE};

/// One page-directory or page-table entry.
#[derive(Clone, Copy)]
#[repr(transparent)]
pub struct Pte(u32);

impl Pte {
    /// Whether the present bit is set, i.e. this entry actually maps
    /// something (a second-level table, at the directory level; a
    /// physical frame, at the page-table level).
    pub(crate) fn is_valid(self) -> bool {
        self.0 & PteFlags::P.bits() != 0
    }

    /// Whether the mapping this entry describes is user-accessible
    /// (the `U` bit). Meaningless on an invalid entry.
    pub(crate) fn is_user(self) -> bool {
        self.0 & PteFlags::U.bits() != 0
    }

    /// Whether a valid directory-level entry points to a second-level
    /// page table. This scheme has no 4 MiB page-size bit, so every
    /// valid directory entry is a table pointer; kept distinct from
    /// [`Pte::is_valid`] so call sites that walk the directory read as
    /// "is this a table" rather than "is this present".
    pub(crate) fn is_table(self) -> bool {
        self.is_valid()
    }

    fn addr(self) -> u32 {
        pte_addr(self.0)
    }

    fn make(pa: u32, flags: PteFlags) -> Self {
        Self(pte_addr(pa) | flags.bits() | PteFlags::P.bits())
    }
}

/// A full two-level address space: a page directory plus, transitively,
/// whatever second-level page tables its entries reference.
///
/// The directory's physical address is what `lcr3` loads; every
/// address space includes an identical mapping of the kernel's own
/// high half so that a syscall trap can keep running kernel code
/// immediately after switching `%cr3` (spec.md §4.C "Activation").
pub struct PageTable {
    /// Physical address of the page directory (one page, `NPTENTRIES`
    /// entries).
    pgdir: u32,
}

impl PageTable {
    pub fn physical_addr(&self) -> u32 {
        self.pgdir
    }

    /// Allocates a fresh page directory with the kernel's half already
    /// mapped. Returns `None` on allocation failure.
    pub fn new() -> Option<Self> {
        let page = kalloc()?;
        // SAFETY: `page` is a freshly allocated, exclusively owned page.
        unsafe { ptr::write_bytes(page, 0, PGSIZE) };
        let pgdir = v2p(page as usize) as u32;
        let mut pt = Self { pgdir };
        pt.map_kernel_half()?;
        Some(pt)
    }

    /// Maps the fixed kernel segments (text/data through `PHYSTOP`, and
    /// the device MMIO window) identically into this address space.
    fn map_kernel_half(&mut self) -> Option<()> {
        self.map_pages(KERNBASE, 0, PHYSTOP, PteFlags::W)?;
        self.map_pages(DEVSPACE, v2p(DEVSPACE), u32::MAX as usize - DEVSPACE, PteFlags::W)?;
        Some(())
    }

    /// Maps `size` bytes of physical memory starting at `pa` into the
    /// virtual range starting at `va`, both rounded to page boundaries.
    pub fn map_pages(&mut self, va: usize, pa: usize, size: usize, flags: PteFlags) -> Option<()> {
        let mut a = va & !(PGSIZE - 1);
        let last = pgroundup(va + size) - PGSIZE;
        let mut pa = pa as u32;
        loop {
            let pte = self.walk(a, true)?;
            // SAFETY: `walk` returns a pointer into a page table this
            // `PageTable` exclusively owns.
            unsafe { *pte = Pte::make(pa, flags) };
            if a == last {
                break;
            }
            a += PGSIZE;
            pa += PGSIZE as u32;
        }
        Some(())
    }

    /// Returns a pointer to the PTE for `va`, allocating an
    /// intermediate page table if `alloc` is set and none exists yet.
    fn walk(&mut self, va: usize, alloc: bool) -> Option<*mut Pte> {
        let dir = p2v(self.pgdir as usize) as *mut Pte;
        // SAFETY: `dir` is this address space's own page directory.
        let pde = unsafe { &mut *dir.add(pdx(va)) };
        let table_pa = if pde.is_table() {
            pde.addr()
        } else {
            if !alloc {
                return None;
            }
            let page = kalloc()?;
            // SAFETY: freshly allocated page, exclusively owned here.
            unsafe { ptr::write_bytes(page, 0, PGSIZE) };
            let pa = v2p(page as usize) as u32;
            *pde = Pte::make(pa, PteFlags::W | PteFlags::U);
            pa
        };
        let table = p2v(table_pa as usize) as *mut Pte;
        // SAFETY: `table` is a second-level page table this address
        // space owns (just allocated or already present).
        Some(unsafe { table.add(ptx(va)) })
    }

    /// Translates a user virtual address to its physical counterpart.
    /// Returns `None` if unmapped or not user-accessible: every caller
    /// reaches this through a syscall argument ultimately supplied by
    /// user code, so a mapped-but-kernel-only page (or an address past
    /// `KERNBASE` entirely) must be refused the same as an unmapped one
    /// (spec.md §4.C "copy_out... refusing non-user pages").
    pub fn translate(&mut self, va: usize) -> Option<u32> {
        if va >= KERNBASE {
            return None;
        }
        let pte = self.walk(va, false)?;
        // SAFETY: `pte` came from `walk` against this address space.
        let pte = unsafe { *pte };
        if !pte.is_valid() || !pte.is_user() {
            return None;
        }
        Some(pte.addr() | (va as u32 & (PGSIZE as u32 - 1)))
    }

    /// Copies `len` bytes from kernel memory at `src` into this address
    /// space starting at user virtual address `dst_va`, crossing page
    /// boundaries as needed. Used by `exec` to load program segments
    /// and build the initial stack (spec.md §4.F).
    pub fn copy_out(&mut self, dst_va: usize, src: &[u8]) -> Option<()> {
        let mut remaining = src;
        let mut va = dst_va;
        while !remaining.is_empty() {
            let page_va = va & !(PGSIZE - 1);
            let pa = self.translate(page_va)?;
            let offset = va - page_va;
            let n = (PGSIZE - offset).min(remaining.len());
            let dst = p2v(pa as usize) as *mut u8;
            // SAFETY: `dst` + offset lies within a page this address
            // space maps; `n` was clamped to stay inside it.
            unsafe { ptr::copy_nonoverlapping(remaining.as_ptr(), dst.add(offset), n) };
            remaining = &remaining[n..];
            va += n;
        }
        Some(())
    }

    /// Copies `len` bytes from this address space starting at user
    /// virtual address `src_va` into `dst`, crossing page boundaries as
    /// needed. Backs `copyin`-style syscall argument fetches.
    pub fn copy_in(&mut self, dst: &mut [u8], src_va: usize) -> Option<()> {
        let mut written = 0;
        let mut va = src_va;
        while written < dst.len() {
            let page_va = va & !(PGSIZE - 1);
            let pa = self.translate(page_va)?;
            let offset = va - page_va;
            let n = (PGSIZE - offset).min(dst.len() - written);
            let src = p2v(pa as usize) as *const u8;
            // SAFETY: symmetric with `copy_out`.
            unsafe { ptr::copy_nonoverlapping(src.add(offset), dst[written..].as_mut_ptr(), n) };
            written += n;
            va += n;
        }
        Some(())
    }

    /// Copies a NUL-terminated string from user space into `dst`,
    /// stopping at the terminator or when `dst` is full. Returns the
    /// copied length, excluding the terminator.
    pub fn copy_in_str(&mut self, dst: &mut [u8], src_va: usize) -> Option<usize> {
        for (i, slot) in dst.iter_mut().enumerate() {
            let mut byte = [0u8; 1];
            self.copy_in(&mut byte, src_va + i)?;
            if byte[0] == 0 {
                return Some(i);
            }
            *slot = byte[0];
        }
        None
    }

    /// Grows or shrinks the address space's user portion from `old_sz`
    /// to `new_sz` bytes, allocating or freeing whole pages.
    pub fn resize(&mut self, old_sz: usize, new_sz: usize) -> Option<usize> {
        if new_sz >= old_sz {
            let mut a = pgroundup(old_sz);
            while a < new_sz {
                let page = match kalloc() {
                    Some(p) => p,
                    None => {
                        self.resize(old_sz, a).ok()?;
                        return None;
                    }
                };
                // SAFETY: freshly allocated page.
                unsafe { ptr::write_bytes(page, 0, PGSIZE) };
                let pa = v2p(page as usize) as u32;
                self.map_pages(a, pa as usize, PGSIZE, PteFlags::W | PteFlags::U)?;
                a += PGSIZE;
            }
        } else {
            let mut a = pgroundup(new_sz);
            while a < old_sz {
                if let Some(pte) = self.walk(a, false) {
                    // SAFETY: `pte` is present iff a page was mapped here.
                    let entry = unsafe { *pte };
                    if entry.is_valid() {
                        let pa = p2v(entry.addr() as usize) as *mut u8;
                        // SAFETY: this page was allocated by `resize`'s
                        // growth path and is owned exclusively here.
                        unsafe { kfree(pa) };
                        unsafe { *pte = Pte(0) };
                    }
                }
                a += PGSIZE;
            }
        }
        Some(new_sz)
    }
}

impl Drop for PageTable {
    fn drop(&mut self) {
        let dir = p2v(self.pgdir as usize) as *mut Pte;
        for i in 0..pdx(KERNBASE) {
            // SAFETY: iterating only the user half of the directory.
            let pde = unsafe { *dir.add(i) };
            if pde.is_table() {
                let table = p2v(pde.addr() as usize) as *mut Pte;
                for j in 0..NPTENTRIES {
                    // SAFETY: `table` is a page table owned by this
                    // address space.
                    let pte = unsafe { *table.add(j) };
                    if pte.is_valid() {
                        let page = p2v(pte.addr() as usize) as *mut u8;
                        // SAFETY: every mapped user page was allocated
                        // by this `PageTable` and is being freed once.
                        unsafe { kfree(page) };
                    }
                }
                // SAFETY: the table page itself was allocated by `walk`.
                unsafe { kfree(table as *mut u8) };
            }
        }
        let page = p2v(self.pgdir as usize) as *mut u8;
        // SAFETY: the directory page was allocated by `PageTable::new`.
        unsafe { kfree(page) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_entry_reports_invalid() {
        let pte = Pte(0);
        assert!(!pte.is_valid());
        assert!(!pte.is_user());
        assert!(!pte.is_table());
    }

    #[test]
    fn valid_entry_carries_its_flags() {
        let kernel_only = Pte::make(0x1000, PteFlags::W);
        assert!(kernel_only.is_valid());
        assert!(kernel_only.is_table());
        assert!(!kernel_only.is_user());

        let user_page = Pte::make(0x2000, PteFlags::W | PteFlags::U);
        assert!(user_page.is_valid());
        assert!(user_page.is_user());
    }

    #[test]
    fn addr_strips_flag_bits() {
        let pte = Pte::make(0x1234_5000, PteFlags::W | PteFlags::U);
        assert_eq!(pte.addr(), 0x1234_5000);
    }
}

//! Physical page allocator (spec.md §4.B).
//!
//! Grounded on the teacher's `kalloc.rs`: a free list threaded through
//! the free pages themselves, behind a spinlock, seeded once at boot by
//! walking every page between the end of the kernel image and
//! [`PHYSTOP`].

use core::ptr;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::lock::spinlock::Spinlock;
use crate::memlayout::{p2v, PHYSTOP};
use crate::mmu::{pgroundup, PGSIZE};

struct Run {
    next: *mut Run,
}

struct FreeList {
    head: *mut Run,
}

// SAFETY: pages on the free list are touched only while the
// surrounding `Spinlock` is held.
unsafe impl Send for FreeList {}

static FREELIST: Spinlock<FreeList> = Spinlock::new("kmem", FreeList { head: ptr::null_mut() });

/// Total pages handed to the allocator by [`init`]. Set once, read by
/// [`used`].
static TOTAL_PAGES: AtomicUsize = AtomicUsize::new(0);

/// Pages currently on the free list, kept in step with `FREELIST` so
/// [`free_count`]/[`used`] don't need to take the lock and walk it.
static FREE_PAGES: AtomicUsize = AtomicUsize::new(0);

/// Adds every page from `start` (rounded up) through `PHYSTOP` to the
/// free list. Called once, by the boot CPU, before any other CPU runs.
///
/// # Safety
/// `start..PHYSTOP` must be physical memory this kernel owns and no
/// page in that range may already be in use.
pub unsafe fn init(start: usize) {
    let mut p = pgroundup(start);
    while p + PGSIZE <= PHYSTOP {
        // SAFETY: `p` is an unused, page-aligned physical address per
        // the caller's contract.
        unsafe { free_page(p2v(p) as *mut u8) };
        p += PGSIZE;
    }
    TOTAL_PAGES.store(FREE_PAGES.load(Ordering::Relaxed), Ordering::Relaxed);
}

/// Returns an allocated page filled with a junk byte (not zeroed:
/// callers that need a zero page, such as a fresh page table, must
/// clear it themselves), or `None` if none remain.
pub fn kalloc() -> Option<*mut u8> {
    let mut list = FREELIST.lock();
    if list.head.is_null() {
        return None;
    }
    let r = list.head;
    // SAFETY: `r` is the list head, linked in by a prior `free_page`.
    list.head = unsafe { (*r).next };
    let page = r as *mut u8;
    // SAFETY: freshly unlinked page, now exclusively owned by the caller.
    unsafe { ptr::write_bytes(page, 0x5a, PGSIZE) };
    FREE_PAGES.fetch_sub(1, Ordering::Relaxed);
    Some(page)
}

/// Returns `page` to the free list.
///
/// # Safety
/// `page` must be a page-aligned pointer previously returned by
/// [`kalloc`] (or handed to [`init`]), and the caller must not access
/// it again afterward.
pub unsafe fn kfree(page: *mut u8) {
    debug_assert_eq!(page as usize % PGSIZE, 0, "kfree: unaligned page");
    // SAFETY: caller's contract; fill with a recognizable pattern to
    // turn use-after-free into a loud garbage read.
    unsafe { ptr::write_bytes(page, 1, PGSIZE) };
    unsafe { free_page(page) };
}

unsafe fn free_page(page: *mut u8) {
    let r = page as *mut Run;
    let mut list = FREELIST.lock();
    // SAFETY: caller of `free_page` guarantees `page` is unused and
    // page-aligned.
    unsafe { (*r).next = list.head };
    list.head = r;
    FREE_PAGES.fetch_add(1, Ordering::Relaxed);
}

/// Pages presently on the free list.
pub fn free_count() -> usize {
    FREE_PAGES.load(Ordering::Relaxed)
}

/// Pages currently allocated out of the pool [`init`] seeded, i.e. not
/// on the free list. Used by `sbrk` boundary tests to check a process's
/// growth actually consumes physical memory.
pub fn used() -> usize {
    TOTAL_PAGES.load(Ordering::Relaxed).saturating_sub(free_count())
}

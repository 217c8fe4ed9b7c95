//! Interrupt-disabling spinlocks (spec.md §4.A).
//!
//! Grounded on the teacher's `lock/spinlock.rs`: a `RawSpinlock` storing
//! the owning CPU behind an atomic pointer, plus the `push_off`/
//! `pop_off` nested interrupt-disable discipline.

use core::hint::spin_loop;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use super::{Lock, RawLock};
use crate::cpu::Cpu;
use crate::kernel::kernel;
use crate::x86::{cli, read_eflags, sti, FL_IF};

/// Mutual-exclusion lock that busy-waits.
pub struct RawSpinlock {
    name: &'static str,
    /// Owning CPU while held; null otherwise.
    locked: AtomicPtr<Cpu>,
}

pub type Spinlock<T> = Lock<RawSpinlock, T>;
pub type SpinlockGuard<'s, T> = super::Guard<'s, RawSpinlock, T>;

impl RawSpinlock {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            locked: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

impl RawLock for RawSpinlock {
    fn acquire(&self) {
        // SAFETY: interrupts must be off while a spinlock is held on
        // this CPU (spec.md §4.A's invariant); push_off enforces that.
        unsafe { push_off() };
        assert!(!self.holding(), "acquire: already holding {}", self.name);

        let me = kernel().current_cpu();
        while self
            .locked
            .compare_exchange(ptr::null_mut(), me, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spin_loop();
        }
    }

    fn release(&self) {
        assert!(self.holding(), "release: not holding {}", self.name);
        self.locked.store(ptr::null_mut(), Ordering::Release);
        // SAFETY: paired with the `push_off` in `acquire`.
        unsafe { pop_off() };
    }

    fn holding(&self) -> bool {
        self.locked.load(Ordering::Relaxed) == kernel().current_cpu()
    }
}

impl<T> Spinlock<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Self::new_raw(RawSpinlock::new(name), data)
    }
}

/// Disables interrupts, remembering the pre-disable state the first
/// time this is nested on the current CPU (spec.md §4.A).
///
/// # Safety
/// Must always be paired with [`pop_off`].
pub unsafe fn push_off() {
    let enabled_before = read_eflags() & FL_IF != 0;
    // SAFETY: disabling interrupts is always sound; it just delays them.
    unsafe { cli() };

    let cpu = kernel().current_cpu();
    // SAFETY: interrupts are now off on this CPU, so nothing else can
    // race on `noff`/`interrupt_enabled`.
    unsafe {
        if (*cpu).noff == 0 {
            (*cpu).interrupt_enabled = enabled_before;
        }
        (*cpu).noff += 1;
    }
}

/// Undoes one [`push_off`]. Once the nesting count returns to zero,
/// restores whatever interrupt state was in effect before the
/// outermost `push_off`.
///
/// # Safety
/// Must be paired with a preceding `push_off` on the same CPU.
pub unsafe fn pop_off() {
    assert!(read_eflags() & FL_IF == 0, "pop_off: interruptible");
    let cpu = kernel().current_cpu();
    // SAFETY: interrupts are off, so this CPU owns `noff` exclusively.
    unsafe {
        (*cpu).noff -= 1;
        assert!((*cpu).noff >= 0, "pop_off: unbalanced");
        if (*cpu).noff == 0 && (*cpu).interrupt_enabled {
            sti();
        }
    }
}

//! Timer tick counter (spec.md §4.D "Timer IRQ"): incremented once per
//! timer interrupt on CPU 0, and the wait channel both `sleep()` and
//! `uptime()` rendezvous on.
//!
//! Grounded on the teacher's `trap.rs` tick-counting convention, kept
//! as its own small module since — unlike the rest of the per-CPU trap
//! dispatch — it's genuinely global, process-table-independent state
//! (spec.md §8 "Ticks counter: its own spinlock").

use crate::lock::spinlock::Spinlock;
use crate::proc::WaitChannel;

static TICKS: Spinlock<u32> = Spinlock::new("time", 0);
static TICK_CHANGED: WaitChannel = WaitChannel::new();

/// Advances the tick counter by one and wakes anyone sleeping on it.
/// Called by the timer IRQ handler, on CPU 0 only (spec.md's
/// once-per-physical-timer-interrupt semantics, not once per CPU).
pub fn tick() {
    let mut ticks = TICKS.lock();
    *ticks = ticks.wrapping_add(1);
    drop(ticks);
    TICK_CHANGED.wake_all();
}

/// Reads the current tick count.
pub fn uptime() -> u32 {
    *TICKS.lock()
}

/// Blocks the calling process for at least `n` ticks (spec.md §4.E
/// "Sleep"/`sys_sleep`).
pub fn sleep_ticks(n: u32) {
    let target = uptime().wrapping_add(n);
    let mut guard = TICKS.lock();
    while (guard.wrapping_sub(target) as i32) < 0 {
        if crate::proc::current_killed() {
            return;
        }
        TICK_CHANGED.sleep(&mut guard);
    }
}

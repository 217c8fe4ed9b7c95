//! Sleeplocks: mutual exclusion that parks the waiter instead of
//! spinning, for sections that may hold the lock across a disk
//! transfer (spec.md §4.A, used by inode locking in §4.I).
//!
//! Grounded on the teacher's `lock/sleeplock.rs`: a spinlock-protected
//! `locked` flag plus a [`WaitChannel`] processes block on, and the
//! held-by pid the teacher's `Sleeplock` records alongside it so
//! `holding_sleep` reports ownership, not mere occupancy (spec.md §3
//! "Sleeplock ... additional fields: held flag, owner process
//! identifier"; §4.A "`holding_sleep(l)` reports whether the current
//! process holds it").

use crate::lock::spinlock::Spinlock;
use crate::proc::{current_pid, WaitChannel};

use super::{Lock, RawLock};

struct SleepState {
    locked: bool,
    /// pid of the holder while `locked`; meaningless otherwise.
    pid: usize,
}

pub struct RawSleeplock {
    state: Spinlock<SleepState>,
    chan: WaitChannel,
}

pub type Sleeplock<T> = Lock<RawSleeplock, T>;

impl RawSleeplock {
    pub const fn new(name: &'static str) -> Self {
        Self {
            state: Spinlock::new(name, SleepState { locked: false, pid: 0 }),
            chan: WaitChannel::new(),
        }
    }
}

impl RawLock for RawSleeplock {
    fn acquire(&self) {
        let mut guard = self.state.lock();
        while guard.locked {
            self.chan.sleep(&mut guard);
        }
        guard.locked = true;
        guard.pid = current_pid();
    }

    fn release(&self) {
        let mut guard = self.state.lock();
        guard.locked = false;
        guard.pid = 0;
        drop(guard);
        self.chan.wake_all();
    }

    /// Whether *the calling process* holds this lock (spec.md §4.A
    /// `holding_sleep`), not merely whether some process does.
    fn holding(&self) -> bool {
        let guard = self.state.lock();
        guard.locked && guard.pid == current_pid()
    }
}

impl<T> Sleeplock<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Self::new_raw(RawSleeplock::new(name), data)
    }
}

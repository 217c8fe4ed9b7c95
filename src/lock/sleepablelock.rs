//! A spinlock whose guards are expected to sleep while held (spec.md
//! §4.E "Sleep/wakeup", used by pipes in §4.J).
//!
//! Grounded on the teacher's `lock/sleepablelock.rs`, which gives this
//! case its own `RawSleepableLock` type even though its locking
//! behavior is identical to a plain spinlock — the distinct name marks
//! intent at call sites (and return type) without adding a second
//! mutual-exclusion mechanism. This crate's [`super::Guard::reacquire_after`]
//! already lets any [`super::RawLock`]'s guard release-and-resleep
//! safely, so `Sleepablelock` is a type alias rather than new code.

use super::Lock;
use crate::lock::spinlock::RawSpinlock;

/// Same underlying type as [`super::spinlock::Spinlock`]; its own
/// `new` (and every other inherent method) applies here too, since a
/// type alias shares its target's `impl` blocks.
pub type Sleepablelock<T> = Lock<RawSpinlock, T>;

//! Buffer cache (spec.md §4.G): a fixed pool of disk-block-sized
//! buffers kept in MRU order, each behind its own sleeplock.
//!
//! Grounded on the teacher's `arena/mru_arena.rs` `MruArena`/`Arena`
//! pattern — `find_or_alloc`/`alloc`/`dealloc` over an intrusive,
//! MRU-ordered list of entries — but simplified to plain array indices
//! rather than the teacher's `Pin`-based intrusive pointers (see
//! DESIGN.md): this cache's entries never move once the pool is
//! allocated, so pinning buys nothing here.
//!
//! Identity and eviction bookkeeping (which `(dev, block_no)` a slot
//! holds, its reference count, MRU order) live behind one cache-wide
//! spinlock, exactly like the teacher's arena lock. But each buffer's
//! 512-byte payload lives behind its own sleeplock, matching the
//! teacher's per-buffer `SleepLock<BufInner>`: spec.md §3 gives every
//! `Buffer` an "embedded sleeplock", and §4.G says `bread` "returns a
//! sleeplock-held buffer" so two concurrent readers of the same block
//! block on each other instead of both proceeding. The cache-wide
//! spinlock is never held across `disk.read_block`/`disk.write_block`
//! (spec.md §5: "any path that reads from disk must hold no spinlock");
//! only the per-buffer sleeplock, which may suspend, spans the I/O.

use array_macro::array;

use crate::devices::BlockDevice;
use crate::kernel::kernel;
use crate::lock::sleeplock::{RawSleeplock, Sleeplock};
use crate::lock::spinlock::Spinlock;
use crate::lock::Guard;
use crate::param::{BSIZE, NBUF};

struct Meta {
    key: Option<(u32, u32)>,
    refcnt: u32,
}

impl Meta {
    const fn zero() -> Self {
        Self { key: None, refcnt: 0 }
    }
}

/// MRU-ordered identity/refcount bookkeeping for [`NBUF`] buffers.
/// `order[0]` is the most recently used index, `order[NBUF - 1]` the
/// least; eviction always takes the tail. Holds no buffer payload —
/// see [`BufCache::bufs`] for that.
struct Bcache {
    meta: [Meta; NBUF],
    order: [usize; NBUF],
}

impl Bcache {
    const fn zero() -> Self {
        Self {
            meta: array![_ => Meta::zero(); NBUF],
            order: array![i => i; NBUF],
        }
    }

    fn touch_mru(&mut self, slot: usize) {
        let pos = self.order.iter().position(|&i| i == slot).expect("slot in order list");
        self.order[..=pos].rotate_right(1);
    }

    /// Finds the slot already caching `(dev, block_no)`, or evicts the
    /// least-recently-used unreferenced slot and claims it. The `bool`
    /// is whether the slot was just (re)claimed for a new identity, in
    /// which case its data is stale and must be re-read from disk.
    fn find_or_evict(&mut self, dev: u32, block_no: u32) -> (usize, bool) {
        if let Some(i) = self.meta.iter().position(|e| e.key == Some((dev, block_no))) {
            self.meta[i].refcnt += 1;
            self.touch_mru(i);
            return (i, false);
        }
        let victim = *self
            .order
            .iter()
            .rev()
            .find(|&&i| self.meta[i].refcnt == 0)
            .expect("buffer cache exhausted: no unreferenced buffer to evict");
        self.meta[victim].key = Some((dev, block_no));
        self.meta[victim].refcnt = 1;
        self.touch_mru(victim);
        (victim, true)
    }
}

/// One buffer's payload, behind its own sleeplock.
struct BufData {
    valid: bool,
    data: [u8; BSIZE],
}

impl BufData {
    const fn zero() -> Self {
        Self {
            valid: false,
            data: [0; BSIZE],
        }
    }
}

/// The process-wide buffer cache: one spinlock for identity/eviction
/// bookkeeping, plus one sleeplock per buffer for its payload.
pub struct BufCache {
    meta: Spinlock<Bcache>,
    bufs: [Sleeplock<BufData>; NBUF],
}

impl BufCache {
    pub const fn zero() -> Self {
        Self {
            meta: Spinlock::new("bcache", Bcache::zero()),
            bufs: array![_ => Sleeplock::new("buf", BufData::zero()); NBUF],
        }
    }
}

/// A sleeplock-held reference to a cached block, obtained via [`bread`].
/// Dropping it does not release the buffer: call [`brelse`] explicitly,
/// matching the teacher's explicit-release buffer convention (spec.md's
/// buffer protocol is read/modify/`log_write`/`brelse`, not
/// scope-based). The held sleeplock is what gives this buffer mutual
/// exclusion against any other `bread` of the same block until
/// `brelse` runs.
pub struct BufGuard {
    slot: usize,
    dev: u32,
    block_no: u32,
    guard: Guard<'static, RawSleeplock, BufData>,
}

impl BufGuard {
    pub fn block_no(&self) -> u32 {
        self.block_no
    }

    pub fn dev(&self) -> u32 {
        self.dev
    }

    /// Copies this buffer's data out.
    pub fn read(&self) -> [u8; BSIZE] {
        self.guard.data
    }

    /// Copies `data` into this buffer.
    pub fn write(&mut self, data: &[u8; BSIZE]) {
        self.guard.data = *data;
    }

    /// Mutable access to this buffer's payload in place, for callers
    /// that only need to overwrite part of it.
    pub fn data_mut(&mut self) -> &mut [u8; BSIZE] {
        &mut self.guard.data
    }
}

/// Finds or allocates the cache slot for `(dev, block_no)`, acquires
/// its per-buffer sleeplock, reading it from disk if not already
/// valid, and returns a handle holding that sleeplock. Evicts the
/// least-recently-used unreferenced buffer when the pool is full.
///
/// The cache-wide spinlock is released before the sleeplock is
/// acquired and before any disk I/O runs, so neither can suspend while
/// it is held (spec.md §5).
pub fn bread(disk: &dyn BlockDevice, dev: u32, block_no: u32) -> BufGuard {
    let cache = kernel().bcache();
    let (slot, fresh) = {
        let mut meta = cache.meta.lock();
        meta.find_or_evict(dev, block_no)
    };

    let mut guard = cache.bufs[slot].lock();
    if fresh {
        guard.valid = false;
    }
    if !guard.valid {
        disk.read_block(block_no, &mut guard.data);
        guard.valid = true;
    }
    BufGuard { slot, dev, block_no, guard }
}

/// Writes a buffer's current contents to disk. The caller already
/// holds the buffer's sleeplock (via its `&BufGuard`); no cache lock
/// is touched.
pub fn bwrite(disk: &dyn BlockDevice, buf: &BufGuard) {
    disk.write_block(buf.block_no, &buf.guard.data);
}

/// Pins `(dev, block_no)` in the cache by bumping its reference count,
/// independent of any live [`BufGuard`]. Used by [`crate::log::Log`]
/// to keep a logged-but-not-yet-installed block's cache entry from
/// being evicted and repurposed after the caller's own `brelse` drops
/// its reference count to zero (spec.md §3's buffer invariant "Dirty
/// in use even if reference count = 0"; matching the teacher's
/// `bpin`/`bunpin`, this crate tracks that via the reference count
/// itself rather than a separate dirty-eviction check).
pub fn bpin(dev: u32, block_no: u32) {
    let cache = kernel().bcache();
    let mut meta = cache.meta.lock();
    if let Some(i) = meta.meta.iter().position(|e| e.key == Some((dev, block_no))) {
        meta.meta[i].refcnt += 1;
    }
}

/// Undoes one [`bpin`], making the block eligible for eviction again
/// once no other reference remains.
pub fn bunpin(dev: u32, block_no: u32) {
    let cache = kernel().bcache();
    let mut meta = cache.meta.lock();
    if let Some(i) = meta.meta.iter().position(|e| e.key == Some((dev, block_no))) {
        meta.meta[i].refcnt -= 1;
        if meta.meta[i].refcnt == 0 {
            meta.touch_mru(i);
        }
    }
}

/// Releases a buffer obtained from [`bread`]: decrements its reference
/// count and moves it to the MRU end if it becomes the
/// most-recently-used unreferenced buffer, then drops the per-buffer
/// sleeplock held in `buf`.
pub fn brelse(buf: BufGuard) {
    let cache = kernel().bcache();
    let mut meta = cache.meta.lock();
    meta.meta[buf.slot].refcnt -= 1;
    if meta.meta[buf.slot].refcnt == 0 {
        meta.touch_mru(buf.slot);
    }
    drop(meta);
    drop(buf.guard);
}

/// These run against [`kernel()`]'s single process-wide cache (there is
/// no way to construct a private `Bcache`; `bread`/`bwrite`/`brelse`
/// all reach through the singleton), so every test below picks its own
/// `dev` number to stay out of other tests' way, the same convention
/// `fs::tests` and `log::tests` use.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ramdisk::RamDisk;

    #[test]
    fn bread_caches_and_returns_the_same_bytes_on_a_second_read() {
        let disk = RamDisk::new(4);
        let mut seed = [0u8; BSIZE];
        seed[0] = 42;
        disk.write_block(1, &seed);

        let a = bread(&disk, 100, 1);
        assert_eq!(a.read()[0], 42);
        brelse(a);

        // Mutate the backing disk directly; a second bread of the same
        // (dev, block) while nothing forced eviction should still serve
        // the cached copy, not re-read the disk.
        let mut mutated = [0u8; BSIZE];
        mutated[0] = 99;
        disk.write_block(1, &mutated);
        let b = bread(&disk, 100, 1);
        assert_eq!(b.read()[0], 42, "a cache hit must not re-read the disk");
        brelse(b);
    }

    #[test]
    fn bwrite_persists_to_the_backing_disk() {
        let disk = RamDisk::new(4);
        let mut buf = bread(&disk, 101, 2);
        let mut data = [0u8; BSIZE];
        data[5] = 7;
        buf.write(&data);
        bwrite(&disk, &buf);
        brelse(buf);

        let mut out = [0u8; BSIZE];
        disk.read_block(2, &mut out);
        assert_eq!(out[5], 7);
    }

    #[test]
    fn bpin_keeps_a_fully_released_buffer_out_of_eviction() {
        let disk = RamDisk::new(NBUF + 2);
        let buf = bread(&disk, 102, 0);
        bpin(102, 0);
        brelse(buf); // refcnt drops to 1 (the pin), not 0

        // Touch one more distinct block than the cache has slots for,
        // forcing at least one eviction — but the pin holds (102, 0) at
        // refcnt 1, so it must never be the one evicted.
        for i in 1..=NBUF as u32 {
            let b = bread(&disk, 102, i);
            brelse(b);
        }

        let mut seed = [0u8; BSIZE];
        seed[0] = 55;
        disk.write_block(0, &seed);
        let again = bread(&disk, 102, 0);
        assert_ne!(again.read()[0], 55, "a pinned buffer's cache entry must not have been evicted");
        bunpin(102, 0);
        brelse(again);
    }

    #[test]
    fn bread_of_the_same_block_excludes_a_concurrent_holder() {
        // The per-buffer sleeplock is what gives `bread` its exclusivity:
        // a second `bread` of the same (dev, block_no) must not be able
        // to also claim the slot's data while the first guard is live.
        // We can't spawn a second kernel thread here, but we can assert
        // the lock is reported held for the duration the guard is live,
        // and free again once `brelse` runs.
        let disk = RamDisk::new(4);
        let buf = bread(&disk, 103, 0);
        assert!(kernel().bcache().bufs[buf.slot].holding());
        brelse(buf);
    }
}

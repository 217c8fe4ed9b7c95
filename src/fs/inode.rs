//! In-memory inode cache and the on-disk inode format (spec.md §4.I).
//!
//! Grounded on the teacher's `fs.rs` inode half: a fixed-size `dinode`
//! (type/major/minor/nlink/size plus 12 direct and 1 indirect block
//! pointer), an in-memory cache of `NINODE` slots behind one spinlock
//! for identity/refcount bookkeeping (`iget`/`iput`), with each slot's
//! actual content behind its own sleeplock (`ilock`/`iunlock`) so
//! unrelated files' I/O doesn't serialize against each other the way a
//! single table-wide lock would.

use array_macro::array;
use zerocopy::{AsBytes, FromBytes};

use crate::bio::{bread, brelse};
use crate::fs::FileSystem;
use crate::kernel::kernel;
use crate::lock::sleeplock::Sleeplock;
use crate::lock::spinlock::Spinlock;
use crate::param::{BSIZE, NDIRECT, NINDIRECT, NINODE};
use crate::stat::{InodeType, Stat};

/// On-disk inode format. `addrs[..NDIRECT]` are direct block pointers;
/// `addrs[NDIRECT]` points at one indirect block holding `NINDIRECT`
/// more pointers (spec.md §6 "dinode").
#[derive(AsBytes, FromBytes, Clone, Copy)]
#[repr(C)]
pub struct Dinode {
    kind: u16,
    major: u16,
    minor: u16,
    nlink: i16,
    size: u32,
    addrs: [u32; NDIRECT + 1],
}

impl Dinode {
    const fn zero() -> Self {
        Self {
            kind: 0,
            major: 0,
            minor: 0,
            nlink: 0,
            size: 0,
            addrs: [0; NDIRECT + 1],
        }
    }
}

static_assertions::const_assert_eq!(core::mem::size_of::<Dinode>(), 2 + 2 + 2 + 2 + 4 + 4 * (NDIRECT + 1));

struct InodeData {
    kind: u16,
    major: u16,
    minor: u16,
    nlink: i16,
    size: u32,
    addrs: [u32; NDIRECT + 1],
}

impl InodeData {
    const fn zero() -> Self {
        Self {
            kind: 0,
            major: 0,
            minor: 0,
            nlink: 0,
            size: 0,
            addrs: [0; NDIRECT + 1],
        }
    }

    fn to_dinode(&self) -> Dinode {
        Dinode {
            kind: self.kind,
            major: self.major,
            minor: self.minor,
            nlink: self.nlink,
            size: self.size,
            addrs: self.addrs,
        }
    }
}

struct Slot {
    dev: u32,
    inum: u32,
    refcnt: usize,
    /// Whether `data` currently reflects the on-disk content of
    /// `(dev, inum)`. Lives outside the sleeplock (unlike the teacher's
    /// `ip->valid`, which is a plain field read without synchronization):
    /// [`iget`] must be able to clear it when repurposing an unreferenced
    /// slot for a different inode while holding only the cache spinlock,
    /// never the per-slot sleeplock (spec.md §5's "the inode cache
    /// spinlock does not nest with the inode's sleeplock").
    valid: core::sync::atomic::AtomicBool,
    data: Sleeplock<InodeData>,
}

pub struct Icache {
    table: [Slot; NINODE],
}

pub type InodeTable = Spinlock<Icache>;

impl Icache {
    pub const fn zero() -> Self {
        Self {
            table: array![_ => Slot {
                dev: 0,
                inum: 0,
                refcnt: 0,
                valid: core::sync::atomic::AtomicBool::new(false),
                data: Sleeplock::new("inode", InodeData::zero()),
            }; NINODE],
        }
    }
}

/// A reference-counted handle to a cached inode, analogous to
/// [`crate::file::RcFile`] for files. Cloning bumps the cache's
/// in-memory refcount; dropping the last clone frees the slot, and —
/// if the on-disk link count has also reached zero — truncates and
/// frees the inode's blocks (spec.md §4.I "unlink").
pub struct InodeHandle {
    slot: usize,
}

/// Alias used by callers outside the filesystem module (the process
/// table's `cwd` field, open-file table) that just want "a reference to
/// an inode" without reaching into `fs::inode` internals.
pub type Inode = InodeHandle;

fn table() -> &'static InodeTable {
    kernel().itable()
}

fn slot_ptr(index: usize) -> &'static Sleeplock<InodeData> {
    let t = table().lock();
    // SAFETY: the table is a 'static array; the Sleeplock itself
    // outlives this function regardless of the table guard's lifetime.
    unsafe { &*(&t.table[index].data as *const Sleeplock<InodeData>) }
}

fn slot_valid(index: usize) -> &'static core::sync::atomic::AtomicBool {
    let t = table().lock();
    // SAFETY: see `slot_ptr`.
    unsafe { &*(&t.table[index].valid as *const core::sync::atomic::AtomicBool) }
}

/// Finds `(dev, inum)` in the cache, or claims an unreferenced slot for
/// it, without reading its content from disk yet. Call [`InodeHandle::lock`]
/// before touching fields.
pub fn iget(dev: u32, inum: u32) -> InodeHandle {
    let mut t = table().lock();
    if let Some(i) = t.table.iter().position(|s| s.refcnt > 0 && s.dev == dev && s.inum == inum) {
        t.table[i].refcnt += 1;
        return InodeHandle { slot: i };
    }
    let i = t
        .table
        .iter()
        .position(|s| s.refcnt == 0)
        .expect("inode cache exhausted");
    t.table[i].dev = dev;
    t.table[i].inum = inum;
    t.table[i].refcnt = 1;
    // A slot reused for a different (dev, inum) must forget whatever
    // content it cached for its previous occupant (matches the
    // teacher's `ip->valid = 0` on the same claim path); otherwise
    // `lock()` would skip the disk read and hand back the wrong
    // inode's fields.
    t.table[i].valid.store(false, core::sync::atomic::Ordering::Release);
    InodeHandle { slot: i }
}

impl Clone for InodeHandle {
    fn clone(&self) -> Self {
        table().lock().table[self.slot].refcnt += 1;
        Self { slot: self.slot }
    }
}

impl Drop for InodeHandle {
    /// Mirrors the teacher's `iput`: if this is the last in-memory
    /// reference to an inode whose on-disk link count has already
    /// reached zero, truncate its content and mark the slot free on
    /// disk before releasing the cache reference (spec.md §4.I
    /// "unlink" invariant — a file's content survives for as long as
    /// either a directory entry or an open handle keeps it alive).
    ///
    /// Locking the inode (a sleeplock) before re-checking the refcount
    /// under the cache spinlock is what makes this race-free against a
    /// concurrent [`iget`]: if another handle is claimed in between,
    /// the refcount observed here is above one and truncation is
    /// skipped.
    fn drop(&mut self) {
        if let Some(fs) = kernel().try_fs() {
            if fs.dev == self.dev() {
                let guard = self.lock(fs);
                if guard.nlink == 0 {
                    let refcnt = table().lock().table[self.slot].refcnt;
                    if refcnt == 1 {
                        drop(guard);
                        self.truncate(fs);
                        let mut guard = self.lock(fs);
                        guard.kind = 0;
                        drop(guard);
                        self.update(fs);
                    }
                }
            }
        }
        table().lock().table[self.slot].refcnt -= 1;
    }
}

impl InodeHandle {
    pub fn inum(&self) -> u32 {
        table().lock().table[self.slot].inum
    }

    fn dev(&self) -> u32 {
        table().lock().table[self.slot].dev
    }

    /// Locks the inode's content, reading it from disk the first time
    /// any handle locks this cache slot.
    fn lock(&self, fs: &FileSystem) -> crate::lock::Guard<'static, crate::lock::sleeplock::RawSleeplock, InodeData> {
        let lock = slot_ptr(self.slot);
        let mut guard = lock.lock();
        let valid = slot_valid(self.slot);
        if !valid.load(core::sync::atomic::Ordering::Acquire) {
            let dev = self.dev();
            let inum = self.inum();
            let block = fs.sb_iblock(inum);
            let buf = bread(fs.disk, dev, block);
            let offset = (inum as usize % fs.inodes_per_block()) * core::mem::size_of::<Dinode>();
            let bytes = buf.read();
            let dinode = Dinode::read_from_prefix(&bytes[offset..]).expect("dinode decode");
            brelse(buf);
            guard.kind = dinode.kind;
            guard.major = dinode.major;
            guard.minor = dinode.minor;
            guard.nlink = dinode.nlink;
            guard.size = dinode.size;
            guard.addrs = dinode.addrs;
            valid.store(true, core::sync::atomic::Ordering::Release);
        }
        guard
    }

    /// Writes the inode's current in-memory content back to disk.
    /// Callers bracket modifications with a transaction (spec.md §4.H).
    pub fn update(&self, fs: &FileSystem) {
        let guard = self.lock(fs);
        let block = fs.sb_iblock(self.inum());
        let mut buf = bread(fs.disk, self.dev(), block);
        let offset = (self.inum() as usize % fs.inodes_per_block()) * core::mem::size_of::<Dinode>();
        let mut bytes = buf.read();
        bytes[offset..offset + core::mem::size_of::<Dinode>()].copy_from_slice(guard.to_dinode().as_bytes());
        buf.write(&bytes);
        fs.log.log_write(&buf);
        brelse(buf);
    }

    pub fn kind(&self, fs: &FileSystem) -> InodeType {
        InodeType::from_disk(self.lock(fs).kind).unwrap_or(InodeType::Free)
    }

    pub fn size(&self, fs: &FileSystem) -> u32 {
        self.lock(fs).size
    }

    pub fn stat(&self) -> Stat {
        let fs = kernel().fs();
        let guard = self.lock(fs);
        Stat {
            dev: self.dev(),
            ino: self.inum(),
            kind: InodeType::from_disk(guard.kind).unwrap_or(InodeType::Free),
            nlink: guard.nlink,
            size: guard.size,
        }
    }

    /// Initializes a freshly [`iget`]-ed, newly allocated inode as
    /// `kind` with `nlink = 0`, ready for the caller to link in.
    pub fn init(&self, fs: &FileSystem, kind: InodeType) {
        let mut guard = self.lock(fs);
        *guard = InodeData {
            kind: kind as u16,
            major: 0,
            minor: 0,
            nlink: 0,
            size: 0,
            addrs: [0; NDIRECT + 1],
        };
        drop(guard);
        self.update(fs);
    }

    pub fn set_device(&self, fs: &FileSystem, major: u16, minor: u16) {
        let mut guard = self.lock(fs);
        guard.major = major;
        guard.minor = minor;
        drop(guard);
        self.update(fs);
    }

    pub fn device_numbers(&self, fs: &FileSystem) -> (u16, u16) {
        let guard = self.lock(fs);
        (guard.major, guard.minor)
    }

    pub fn link(&self, fs: &FileSystem) {
        let mut guard = self.lock(fs);
        guard.nlink += 1;
        drop(guard);
        self.update(fs);
    }

    /// Decrements the on-disk link count. Does *not* truncate by
    /// itself, even if the count reaches zero: a process may still hold
    /// this inode open (spec.md §4.I "unlink an open file" — the
    /// content must stay readable through that handle). Freeing happens
    /// in [`Drop`] once the last in-memory reference goes away.
    pub fn unlink(&self, fs: &FileSystem) {
        let mut guard = self.lock(fs);
        guard.nlink -= 1;
        drop(guard);
        self.update(fs);
    }

    /// Returns the physical block number for the `block_index`'th block
    /// of this inode's content, allocating it (and, if needed, the
    /// indirect block) on first use (spec.md §4.I "bmap").
    fn bmap(&self, fs: &FileSystem, block_index: usize) -> u32 {
        let mut guard = self.lock(fs);
        if block_index < NDIRECT {
            if guard.addrs[block_index] == 0 {
                guard.addrs[block_index] = fs.balloc();
            }
            return guard.addrs[block_index];
        }
        let index = block_index - NDIRECT;
        assert!(index < NINDIRECT, "bmap: offset out of MAXFILE range");
        if guard.addrs[NDIRECT] == 0 {
            guard.addrs[NDIRECT] = fs.balloc();
        }
        let indirect_block = guard.addrs[NDIRECT];
        drop(guard);

        let mut buf = bread(fs.disk, fs.dev, indirect_block);
        let raw = buf.read();
        let mut pointers = [0u32; NINDIRECT];
        for (i, chunk) in raw.chunks_exact(4).enumerate() {
            pointers[i] = u32::from_ne_bytes(chunk.try_into().unwrap());
        }
        if pointers[index] == 0 {
            pointers[index] = fs.balloc();
            let mut out = [0u8; BSIZE];
            for (i, p) in pointers.iter().enumerate() {
                out[i * 4..i * 4 + 4].copy_from_slice(&p.to_ne_bytes());
            }
            buf.write(&out);
            fs.log.log_write(&buf);
        }
        let result = pointers[index];
        brelse(buf);
        result
    }

    /// Frees every block this inode owns (direct, indirect, and the
    /// indirect block itself) and resets its size to zero.
    fn truncate(&self, fs: &FileSystem) {
        let mut guard = self.lock(fs);
        for addr in guard.addrs[..NDIRECT].iter_mut() {
            if *addr != 0 {
                fs.bfree(*addr);
                *addr = 0;
            }
        }
        if guard.addrs[NDIRECT] != 0 {
            let buf = bread(fs.disk, fs.dev, guard.addrs[NDIRECT]);
            let raw = buf.read();
            for chunk in raw.chunks_exact(4) {
                let p = u32::from_ne_bytes(chunk.try_into().unwrap());
                if p != 0 {
                    fs.bfree(p);
                }
            }
            brelse(buf);
            fs.bfree(guard.addrs[NDIRECT]);
            guard.addrs[NDIRECT] = 0;
        }
        guard.size = 0;
        drop(guard);
        self.update(fs);
    }

    /// Reads up to `buf.len()` bytes starting at byte `offset`,
    /// returning the number actually read (spec.md §4.I "readi").
    pub fn read_at(&self, offset: u32, buf: &mut [u8]) -> Result<usize, &'static str> {
        let fs = kernel().fs();
        let size = self.size(fs);
        if offset >= size {
            return Ok(0);
        }
        let n = buf.len().min((size - offset) as usize);
        let mut done = 0;
        while done < n {
            let block_index = (offset as usize + done) / BSIZE;
            let block_off = (offset as usize + done) % BSIZE;
            let block_no = self.bmap(fs, block_index);
            let chunk = (BSIZE - block_off).min(n - done);
            let data = bread(fs.disk, fs.dev, block_no);
            buf[done..done + chunk].copy_from_slice(&data.read()[block_off..block_off + chunk]);
            brelse(data);
            done += chunk;
        }
        Ok(done)
    }

    /// Writes `buf` starting at byte `offset`, growing the inode's size
    /// if the write extends past the current end (spec.md §4.I
    /// "writei"). Must be called within a log transaction.
    pub fn write_at(&self, offset: u32, buf: &[u8]) -> Result<usize, &'static str> {
        let fs = kernel().fs();
        use crate::param::MAXFILE;
        if offset as usize + buf.len() > MAXFILE * BSIZE {
            return Err("write would exceed maximum file size");
        }
        let mut done = 0;
        while done < buf.len() {
            let block_index = (offset as usize + done) / BSIZE;
            let block_off = (offset as usize + done) % BSIZE;
            let block_no = self.bmap(fs, block_index);
            let chunk = (BSIZE - block_off).min(buf.len() - done);
            let mut data = bread(fs.disk, fs.dev, block_no);
            let mut bytes = data.read();
            bytes[block_off..block_off + chunk].copy_from_slice(&buf[done..done + chunk]);
            data.write(&bytes);
            fs.log.log_write(&data);
            brelse(data);
            done += chunk;
        }
        let new_size = offset + done as u32;
        let mut guard = self.lock(fs);
        if new_size > guard.size {
            guard.size = new_size;
        }
        drop(guard);
        self.update(fs);
        Ok(done)
    }
}

impl FileSystem {
    fn sb_iblock(&self, inum: u32) -> u32 {
        self.sb.inodestart + inum / self.inodes_per_block() as u32
    }

    fn inodes_per_block(&self) -> usize {
        BSIZE / core::mem::size_of::<Dinode>()
    }

    /// Allocates a free on-disk inode of type `kind`, returning a
    /// locked, initialized handle.
    pub fn ialloc(&self, kind: InodeType) -> InodeHandle {
        for inum in 1..self.sb.ninodes {
            let block = self.sb_iblock(inum);
            let buf = bread(self.disk, self.dev, block);
            let offset = (inum as usize % self.inodes_per_block()) * core::mem::size_of::<Dinode>();
            let bytes = buf.read();
            let dinode = Dinode::read_from_prefix(&bytes[offset..]).expect("dinode decode");
            brelse(buf);
            if dinode.kind == 0 {
                let handle = iget(self.dev, inum);
                handle.init(self, kind);
                return handle;
            }
        }
        panic!("ialloc: no free inodes");
    }
}

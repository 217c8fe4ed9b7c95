//! Write-ahead log (spec.md §4.H): groups each filesystem syscall's
//! writes into one on-disk transaction so a crash mid-operation cannot
//! leave the filesystem half-updated.
//!
//! Grounded on the teacher's `fs/log.rs`: a fixed-size `LogHeader`
//! (block count plus the array of destination block numbers) written
//! to a reserved region of the disk, with `begin_op`/`end_op` bracketing
//! a transaction, `log_write` absorbing repeated writes to the same
//! block within one transaction, and `recover_from_log` replaying a
//! committed-but-not-installed transaction at mount time.

use zerocopy::{AsBytes, FromBytes};

use crate::bio::{bread, brelse, bwrite};
use crate::devices::BlockDevice;
use crate::kernel::kernel;
use crate::lock::spinlock::Spinlock;
use crate::param::{BSIZE, LOGSIZE, MAXOPBLOCKS};
use crate::proc::WaitChannel;

/// On-disk layout of the log's first block: how many of the following
/// `LOGSIZE` blocks hold valid data, and which home-disk block each one
/// belongs to. A nonzero `count` on mount means a transaction committed
/// but was never installed, and must be replayed.
#[derive(AsBytes, FromBytes, Clone, Copy)]
#[repr(C)]
struct LogHeader {
    count: u32,
    block: [u32; LOGSIZE],
}

static_assertions::const_assert!(core::mem::size_of::<LogHeader>() <= BSIZE);

struct LogState {
    /// Disk block number of the first log block (the header).
    start: u32,
    dev: u32,
    /// Block numbers of the transaction's writes so far, for absorption.
    logged: [u32; LOGSIZE],
    count: usize,
    /// Number of `begin_op` calls currently outstanding.
    outstanding: usize,
    /// Set while `commit` is writing back; new `begin_op`s wait.
    committing: bool,
}

pub struct Log {
    state: Spinlock<LogState>,
    room: WaitChannel,
}

impl Log {
    pub const fn zero() -> Self {
        Self {
            state: Spinlock::new(
                "log",
                LogState {
                    start: 0,
                    dev: 0,
                    logged: [0; LOGSIZE],
                    count: 0,
                    outstanding: 0,
                    committing: false,
                },
            ),
            room: WaitChannel::new(),
        }
    }

    /// Initializes the log for `dev`, whose on-disk log region begins
    /// at block `start` and is `LOGSIZE + 1` blocks long (header plus
    /// data blocks), replaying any committed-but-uninstalled
    /// transaction left over from an unclean shutdown.
    pub fn init(&self, disk: &dyn BlockDevice, dev: u32, start: u32) {
        {
            let mut s = self.state.lock();
            s.dev = dev;
            s.start = start;
        }
        self.recover(disk, dev, start);
    }

    fn recover(&self, disk: &dyn BlockDevice, dev: u32, start: u32) {
        let header = read_header(disk, dev, start);
        if header.count == 0 {
            return;
        }
        for i in 0..header.count as usize {
            let from = bread(disk, dev, start + 1 + i as u32);
            let mut to = bread(disk, dev, header.block[i]);
            to.write(&from.read());
            bwrite(disk, &to);
            brelse(from);
            brelse(to);
        }
        write_header(disk, dev, start, &LogHeader { count: 0, block: [0; LOGSIZE] });
    }

    /// Marks the start of a filesystem operation that may write the
    /// disk. Blocks if a commit is in progress or if the current
    /// transaction has no room left for this operation's worst-case
    /// write count ([`MAXOPBLOCKS`]).
    pub fn begin_op(&self) {
        let mut s = self.state.lock();
        loop {
            if s.committing {
                self.room.sleep(&mut s);
            } else if s.count + (s.outstanding + 1) * MAXOPBLOCKS > LOGSIZE {
                self.room.sleep(&mut s);
            } else {
                s.outstanding += 1;
                return;
            }
        }
    }

    /// Marks the end of a filesystem operation. The last outstanding
    /// operation triggers a commit, flushing every absorbed write to
    /// the log and then to its home location.
    pub fn end_op(&self, disk: &dyn BlockDevice) {
        let mut do_commit = false;
        {
            let mut s = self.state.lock();
            s.outstanding -= 1;
            assert!(!s.committing, "end_op: commit already in progress");
            if s.outstanding == 0 {
                do_commit = true;
                s.committing = true;
            } else {
                self.room.wake_all();
            }
        }
        if do_commit {
            self.commit(disk);
            let mut s = self.state.lock();
            s.committing = false;
            s.count = 0;
            self.room.wake_all();
        }
    }

    fn commit(&self, disk: &dyn BlockDevice) {
        let (dev, start, count, blocks) = {
            let s = self.state.lock();
            (s.dev, s.start, s.count, s.logged)
        };
        if count == 0 {
            return;
        }
        for i in 0..count {
            let cached = bread(disk, dev, blocks[i]);
            let mut to = bread(disk, dev, start + 1 + i as u32);
            to.write(&cached.read());
            bwrite(disk, &to);
            brelse(cached);
            brelse(to);
        }
        let header = LogHeader {
            count: count as u32,
            block: {
                let mut b = [0u32; LOGSIZE];
                b[..count].copy_from_slice(&blocks[..count]);
                b
            },
        };
        write_header(disk, dev, start, &header);

        for i in 0..count {
            let from = bread(disk, dev, start + 1 + i as u32);
            let mut to = bread(disk, dev, blocks[i]);
            to.write(&from.read());
            bwrite(disk, &to);
            brelse(from);
            brelse(to);
            crate::bio::bunpin(dev, blocks[i]);
        }

        write_header(disk, dev, start, &LogHeader { count: 0, block: [0; LOGSIZE] });
    }

    /// Records that the block behind `buf` must be part of the current
    /// transaction. Absorbs repeated writes to the same block so a
    /// block touched many times within one transaction is only copied
    /// to the log once. The first time a block is added, it is pinned
    /// in the buffer cache ([`crate::bio::bpin`]) so the caller's
    /// following `brelse` cannot let it be evicted before [`Self::commit`]
    /// installs it to its home location and unpins it.
    pub fn log_write(&self, buf: &crate::bio::BufGuard) {
        let newly_added = {
            let mut s = self.state.lock();
            assert!(s.count < LOGSIZE, "log_write: transaction too big");
            assert!(s.outstanding > 0, "log_write: outside begin_op/end_op");
            if s.logged[..s.count].iter().any(|&b| b == buf.block_no()) {
                false
            } else {
                s.logged[s.count] = buf.block_no();
                s.count += 1;
                true
            }
        };
        if newly_added {
            crate::bio::bpin(buf.dev(), buf.block_no());
        }
    }
}

fn read_header(disk: &dyn BlockDevice, dev: u32, start: u32) -> LogHeader {
    let buf = bread(disk, dev, start);
    let header = LogHeader::read_from_prefix(&buf.read()[..]).expect("log header decode");
    brelse(buf);
    header
}

fn write_header(disk: &dyn BlockDevice, dev: u32, start: u32, header: &LogHeader) {
    let mut buf = bread(disk, dev, start);
    buf.data_mut()[..core::mem::size_of::<LogHeader>()].copy_from_slice(header.as_bytes());
    bwrite(disk, &buf);
    brelse(buf);
}

/// Convenience wrapper bracketing `f` with [`Log::begin_op`]/
/// [`Log::end_op`] on the kernel's singleton log.
pub fn with_transaction<R>(disk: &dyn BlockDevice, f: impl FnOnce() -> R) -> R {
    let log = kernel().log();
    log.begin_op();
    let r = f();
    log.end_op(disk);
    r
}

/// `Log` takes its disk as a parameter on every call rather than
/// storing it (see DESIGN.md's note on the `bwrite` Open Question), so
/// these tests exercise a private `Log` + [`crate::ramdisk::RamDisk`]
/// pair directly, with no dependency on [`crate::kernel::kernel`]'s
/// singleton log. Each test picks its own `dev` number so the one
/// thing they do share — [`crate::bio`]'s global buffer cache — never
/// sees two tests touch the same `(dev, block)` key.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ramdisk::RamDisk;

    /// spec.md §8 property 7: logging the same block twice within one
    /// transaction must occupy exactly one header slot.
    #[test]
    fn log_write_absorbs_repeated_writes_to_one_block() {
        let disk = RamDisk::new(200);
        let log = Log::zero();
        log.init(&disk, 1, 0);

        log.begin_op();
        let a = bread(&disk, 1, 50);
        log.log_write(&a);
        brelse(a); // the per-buffer sleeplock excludes a second live guard on block 50
        let b = bread(&disk, 1, 50);
        log.log_write(&b);
        assert_eq!(log.state.lock().count, 1, "writing the same block twice absorbs into one entry");
        brelse(b);
        log.end_op(&disk);
    }

    /// spec.md §8 property 3 / "Recovery is idempotent": a
    /// committed-but-uninstalled transaction left on disk (simulating a
    /// crash between the header write and the install-to-home pass) is
    /// replayed on the next mount, and replaying it again afterward is
    /// a no-op.
    #[test]
    fn recovery_installs_a_pending_transaction_and_is_idempotent() {
        let disk = RamDisk::new(200);
        let log = Log::zero();
        log.init(&disk, 2, 0); // fresh disk: header is all-zero, recovery here is a no-op

        // Stage a transaction as if `commit` had written its header but
        // crashed before installing block 60 to its home location.
        let payload = [0xABu8; BSIZE];
        let mut data_buf = bread(&disk, 2, 1); // start + 1: the log's first data block
        data_buf.write(&payload);
        bwrite(&disk, &data_buf);
        brelse(data_buf);

        let mut pending = LogHeader { count: 1, block: [0; LOGSIZE] };
        pending.block[0] = 60;
        let mut hdr_buf = bread(&disk, 2, 0);
        let mut raw = [0u8; BSIZE];
        raw[..core::mem::size_of::<LogHeader>()].copy_from_slice(pending.as_bytes());
        hdr_buf.write(&raw);
        bwrite(&disk, &hdr_buf);
        brelse(hdr_buf);

        log.recover(&disk, 2, 0);
        let mut installed = [0u8; BSIZE];
        disk.read_block(60, &mut installed);
        assert_eq!(installed, payload, "recovery installs the pending block to its home location");
        assert_eq!(read_header(&disk, 2, 0).count, 0, "recovery clears the header once installed");

        log.recover(&disk, 2, 0);
        disk.read_block(60, &mut installed);
        assert_eq!(installed, payload, "a second recovery pass leaves already-installed data untouched");
    }
}

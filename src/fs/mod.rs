//! On-disk filesystem (spec.md §4.I): superblock layout, the free-block
//! bitmap, and the inode/path-resolution layers in the `inode` and
//! `path` submodules.
//!
//! Grounded on the teacher's `fs.rs`: a `Superblock` read once at mount
//! time describing every other region's extent, `balloc`/`bfree`
//! walking the bitmap one block at a time, and block-layout macros
//! (`IBLOCK`, `BBLOCK`) used throughout the inode layer.

pub mod inode;
pub mod path;

use zerocopy::{AsBytes, FromBytes};

use crate::bio::{bread, brelse};
use crate::devices::BlockDevice;
use crate::log::Log;
use crate::param::BSIZE;

const FSMAGIC: u32 = 0x1020_2420;

/// On-disk layout header, stored in block 1 (block 0 is the boot
/// sector, left to the bootloader this crate treats as external).
#[derive(AsBytes, FromBytes, Clone, Copy, Debug)]
#[repr(C)]
pub struct Superblock {
    magic: u32,
    pub size: u32,
    pub nblocks: u32,
    pub ninodes: u32,
    pub nlog: u32,
    pub logstart: u32,
    pub inodestart: u32,
    pub bmapstart: u32,
}

static_assertions::const_assert!(core::mem::size_of::<Superblock>() <= BSIZE);

impl Superblock {
    /// Reads and validates the superblock from block 1 of `dev`.
    pub fn read(disk: &dyn BlockDevice, dev: u32) -> Self {
        let buf = bread(disk, dev, 1);
        let sb = Superblock::read_from_prefix(&buf.read()[..]).expect("superblock decode");
        brelse(buf);
        assert_eq!(sb.magic, FSMAGIC, "bad filesystem magic");
        sb
    }

    fn bblock(&self, block_no: u32) -> u32 {
        const BPB: u32 = (BSIZE * 8) as u32;
        self.bmapstart + block_no / BPB
    }
}

/// The mounted filesystem: a disk, its superblock, and the log that
/// makes every multi-block update crash-atomic.
pub struct FileSystem {
    pub disk: &'static dyn BlockDevice,
    pub dev: u32,
    pub sb: Superblock,
    pub log: &'static Log,
}

impl FileSystem {
    /// Mounts `dev`: reads its superblock and brings the log's on-disk
    /// state up to date (replaying a pending transaction if needed).
    pub fn mount(disk: &'static dyn BlockDevice, dev: u32, log: &'static Log) -> Self {
        let sb = Superblock::read(disk, dev);
        log.init(disk, dev, sb.logstart);
        Self { disk, dev, sb, log }
    }

    /// Allocates a free data block, zeroing it, or panics if the disk
    /// is full (spec.md has no graceful ENOSPC recovery path; matching
    /// the teacher, exhaustion is a fatal condition here).
    pub fn balloc(&self) -> u32 {
        for b in (0..self.sb.size).step_by(BSIZE * 8) {
            let mut buf = bread(self.disk, self.dev, self.sb.bblock(b));
            let mut bitmap = buf.read();
            for bi in 0..(BSIZE * 8).min((self.sb.size - b) as usize) {
                let byte = bi / 8;
                let mask = 1u8 << (bi % 8);
                if bitmap[byte] & mask == 0 {
                    bitmap[byte] |= mask;
                    buf.write(&bitmap);
                    self.log.log_write(&buf);
                    brelse(buf);
                    let block_no = b + bi as u32;
                    self.zero_block(block_no);
                    return block_no;
                }
            }
            brelse(buf);
        }
        panic!("balloc: out of disk blocks");
    }

    /// Clears `block_no`'s bit in the free bitmap, returning it to the
    /// free pool.
    pub fn bfree(&self, block_no: u32) {
        let mut buf = bread(self.disk, self.dev, self.sb.bblock(block_no));
        let mut bitmap = buf.read();
        let bi = block_no as usize % (BSIZE * 8);
        let byte = bi / 8;
        let mask = 1u8 << (bi % 8);
        assert!(bitmap[byte] & mask != 0, "bfree: freeing a free block");
        bitmap[byte] &= !mask;
        buf.write(&bitmap);
        self.log.log_write(&buf);
        brelse(buf);
    }

    fn zero_block(&self, block_no: u32) {
        let mut buf = bread(self.disk, self.dev, block_no);
        buf.write(&[0; BSIZE]);
        self.log.log_write(&buf);
        brelse(buf);
    }
}

/// Host-side integration tests exercising spec.md §8's filesystem
/// properties end to end, through the real `balloc`/`ialloc`/`bmap`/
/// `readi`/`writei`/`dirlink` machinery over an in-memory disk — the
/// same seam [`crate::ramdisk::RamDisk`] was built for.
///
/// [`crate::kernel::kernel`]'s filesystem slot is a `spin::Once`: it
/// mounts exactly one disk for the lifetime of the process, so every
/// test here shares one filesystem (built once, lazily, by
/// [`tests::mounted`]) rather than each mounting its own. `TEST_LOCK`
/// serializes test bodies against each other — not for memory safety
/// (every shared structure here is already lock-protected) but because
/// two tests racing over the same handful of inodes/bitmap bits could
/// otherwise see each other's partial states between a setup step and
/// its assertion.
#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::fs::inode::{iget, Dinode};
    use crate::fs::path::{dir_is_empty, dirlink, dirlookup, dirunlink};
    use crate::kernel::kernel;
    use crate::param::MAXFILE;
    use crate::ramdisk::RamDisk;
    use crate::stat::InodeType;

    static TEST_LOCK: Mutex<()> = Mutex::new(());

    const NBLOCKS: u32 = 4096;
    const NINODES: u32 = 200;

    /// Builds a fresh disk image (superblock, a bitmap with every
    /// metadata block pre-marked used, and a root directory at inode 1
    /// self-linked "." / ".."), mounts it on the kernel singleton, and
    /// returns the mounted filesystem. Runs its setup exactly once per
    /// process, matching `Kernel::mount_fs`'s own `Once` semantics.
    fn mounted() -> &'static FileSystem {
        static ONCE: std::sync::Once = std::sync::Once::new();
        ONCE.call_once(|| {
            let ipb = (BSIZE / core::mem::size_of::<Dinode>()) as u32;
            let inodeblocks = (NINODES + ipb - 1) / ipb;
            let nlog = (crate::param::LOGSIZE + 1) as u32;
            let logstart = 2u32;
            let inodestart = logstart + nlog;
            let bpb = (BSIZE * 8) as u32;
            let bmapblocks = (NBLOCKS + bpb - 1) / bpb;
            let bmapstart = inodestart + inodeblocks;
            let nmeta = bmapstart + bmapblocks;

            let disk: &'static RamDisk = Box::leak(Box::new(RamDisk::new(NBLOCKS as usize)));

            let sb = Superblock {
                magic: FSMAGIC,
                size: NBLOCKS,
                nblocks: NBLOCKS - nmeta,
                ninodes: NINODES,
                nlog,
                logstart,
                inodestart,
                bmapstart,
            };
            let mut sb_block = [0u8; BSIZE];
            sb_block[..core::mem::size_of::<Superblock>()].copy_from_slice(sb.as_bytes());
            disk.write_block(1, &sb_block);

            // Pre-mark every metadata block (boot, superblock, log,
            // inode table, bitmap itself) used, the way an external
            // image builder would, so `balloc` never hands out a block
            // that's actually part of the filesystem's own structure.
            let mut bitmap = vec![[0u8; BSIZE]; bmapblocks as usize];
            for b in 0..nmeta {
                let block_idx = (b / bpb) as usize;
                let bit = (b % bpb) as usize;
                bitmap[block_idx][bit / 8] |= 1 << (bit % 8);
            }
            for (i, blk) in bitmap.iter().enumerate() {
                disk.write_block(bmapstart + i as u32, blk);
            }

            let dev = 9;
            kernel().set_root_disk(disk);
            kernel().mount_fs(disk, dev);
            let fs = kernel().fs();

            kernel().log().begin_op();
            let root = fs.ialloc(InodeType::Dir);
            assert_eq!(root.inum(), 1, "root directory must be the first inode allocated");
            dirlink(fs, &root, ".", root.inum()).unwrap();
            dirlink(fs, &root, "..", root.inum()).unwrap();
            root.link(fs); // "."
            kernel().log().end_op(fs.disk);
        });
        kernel().fs()
    }

    #[test]
    fn write_then_read_round_trip() {
        let _g = TEST_LOCK.lock().unwrap();
        let fs = mounted();

        kernel().log().begin_op();
        let file = fs.ialloc(InodeType::File);
        let n = file.write_at(0, b"hello world").unwrap();
        kernel().log().end_op(fs.disk);
        assert_eq!(n, 11);

        let mut buf = [0u8; 11];
        let read = file.read_at(0, &mut buf).unwrap();
        assert_eq!(read, 11);
        assert_eq!(&buf, b"hello world");
    }

    #[test]
    fn write_at_an_offset_leaves_earlier_bytes_untouched() {
        let _g = TEST_LOCK.lock().unwrap();
        let fs = mounted();

        kernel().log().begin_op();
        let file = fs.ialloc(InodeType::File);
        file.write_at(0, &[0xAA; 16]).unwrap();
        kernel().log().end_op(fs.disk);

        kernel().log().begin_op();
        file.write_at(16, &[0xBB; 16]).unwrap();
        kernel().log().end_op(fs.disk);

        let mut buf = [0u8; 32];
        file.read_at(0, &mut buf).unwrap();
        assert_eq!(&buf[..16], &[0xAA; 16][..]);
        assert_eq!(&buf[16..], &[0xBB; 16][..]);
        assert_eq!(file.size(fs), 32);
    }

    /// spec.md §8 boundary behavior: a file of exactly 12 direct blocks,
    /// where the 13th block's write forces indirect-block allocation.
    #[test]
    fn write_crosses_into_the_indirect_block() {
        let _g = TEST_LOCK.lock().unwrap();
        let fs = mounted();

        kernel().log().begin_op();
        let file = fs.ialloc(InodeType::File);
        kernel().log().end_op(fs.disk);

        let pattern: Vec<u8> = (0..BSIZE).map(|i| (i % 251) as u8).collect();
        for block in 0..13u32 {
            kernel().log().begin_op();
            file.write_at(block * BSIZE as u32, &pattern).unwrap();
            kernel().log().end_op(fs.disk);
        }

        assert_eq!(file.size(fs), 13 * BSIZE as u32);
        let mut out = vec![0u8; BSIZE];
        file.read_at(12 * BSIZE as u32, &mut out).unwrap();
        assert_eq!(out, pattern, "13th block (first indirect-mapped block) round-trips");
    }

    /// spec.md §8 boundary behavior: a write that would extend a file
    /// past `MAXFILE` blocks is rejected outright.
    #[test]
    fn write_beyond_max_file_size_is_rejected() {
        let _g = TEST_LOCK.lock().unwrap();
        let fs = mounted();

        kernel().log().begin_op();
        let file = fs.ialloc(InodeType::File);
        let result = file.write_at((MAXFILE * BSIZE) as u32, &[1]);
        kernel().log().end_op(fs.disk);

        assert!(result.is_err());
    }

    /// spec.md §8 "create/link/unlink cycles preserve directory link
    /// counts": `mkdir`-equivalent leaves the new directory's nlink at 1
    /// (just "."), and unlinking it afterward drops it to 0.
    #[test]
    fn mkdir_then_unlink_round_trips_link_counts() {
        let _g = TEST_LOCK.lock().unwrap();
        let fs = mounted();

        let sub_inum = {
            kernel().log().begin_op();
            let root = iget(fs.dev, 1);
            let sub = fs.ialloc(InodeType::Dir);
            dirlink(fs, &sub, ".", sub.inum()).unwrap();
            dirlink(fs, &sub, "..", root.inum()).unwrap();
            sub.link(fs); // "."
            root.link(fs); // sub's ".."
            dirlink(fs, &root, "sub", sub.inum()).unwrap();
            let inum = sub.inum();
            kernel().log().end_op(fs.disk);
            inum
        };

        {
            let sub = iget(fs.dev, sub_inum);
            assert_eq!(sub.stat().nlink, 1, "a fresh subdirectory is linked only by its own \".\"");
            assert!(dir_is_empty(fs, &sub));
        }

        kernel().log().begin_op();
        {
            let root = iget(fs.dev, 1);
            let (entry, offset) = dirlookup(fs, &root, "sub").expect("\"sub\" entry exists");
            dirunlink(fs, &root, offset);
            root.unlink(fs); // the removed directory's ".." no longer references root
            entry.unlink(fs);
        }
        kernel().log().end_op(fs.disk);

        kernel().log().begin_op();
        assert!(
            dirlookup(fs, &iget(fs.dev, 1), "sub").is_none(),
            "unlinked subdirectory no longer appears in its parent"
        );
        kernel().log().end_op(fs.disk);
    }
}

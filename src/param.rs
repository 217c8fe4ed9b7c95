//! Compile-time kernel configuration.
//!
//! An OS kernel core has no runtime configuration layer; every tunable
//! here is a `const` baked into the image at build time, the same way
//! the teacher kernel configures itself.

/// Maximum number of CPUs.
pub const NCPU: usize = 8;

/// Maximum number of processes.
pub const NPROC: usize = 64;

/// Maximum length of a process name (for debugging/`ps`).
pub const MAXPROCNAME: usize = 16;

/// Open files per process.
pub const NOFILE: usize = 16;

/// Open files system-wide.
pub const NFILE: usize = 100;

/// Maximum number of active in-memory inodes.
pub const NINODE: usize = 50;

/// Maximum major device number.
pub const NDEV: usize = 10;

/// Device number of the file system root disk.
pub const ROOTDEV: u32 = 1;

/// Max exec() arguments.
pub const MAXARG: usize = 32;

/// Maximum file path length.
pub const MAXPATH: usize = 128;

/// Disk block size, in bytes.
pub const BSIZE: usize = 512;

/// Max # of distinct blocks any single FS operation writes.
pub const MAXOPBLOCKS: usize = 10;

/// Max data blocks in the on-disk log.
pub const LOGSIZE: usize = MAXOPBLOCKS * 3;

/// Size of the disk block cache, in buffers.
pub const NBUF: usize = MAXOPBLOCKS * 3;

/// Number of direct block pointers in a dinode.
pub const NDIRECT: usize = 12;

/// Number of block pointers held in the (one) indirect block.
pub const NINDIRECT: usize = BSIZE / core::mem::size_of::<u32>();

/// Maximum file size, in blocks.
pub const MAXFILE: usize = NDIRECT + NINDIRECT;

/// Directory entry name length, not counting the terminator.
pub const DIRNAMESZ: usize = 14;

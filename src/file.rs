//! The open file abstraction (spec.md §4.I): a tagged union over
//! pipes, inodes, and devices, reference-counted through a
//! system-wide table.
//!
//! Grounded on the teacher's `file.rs`: `FileType` {None, Pipe, Inode,
//! Device}, a fixed `File` table behind one spinlock, and `RcFile` as
//! the reference-counted handle processes' per-process fd tables hold.
//! This crate's `RcFile` is an index into the table plus manual
//! refcounting (via `Clone`/`Drop`) rather than the teacher's
//! `Arena`-based `Rc` wrapper, since the table here has no eviction —
//! only allocate-by-scanning-for-a-free-slot (see DESIGN.md).

use core::sync::atomic::{AtomicU32, Ordering};

use array_macro::array;

use crate::devices;
use crate::fcntl::{O_RDONLY, O_RDWR, O_WRONLY};
use crate::fs::inode::InodeHandle;
use crate::kernel::kernel;
use crate::lock::spinlock::Spinlock;
use crate::param::NFILE;
use crate::pipe::{PipeReader, PipeWriter};
use crate::stat::Stat;

/// What an open file actually refers to.
///
/// `Inode`'s offset is an atomic rather than a plain field: spec.md §5
/// assigns the file table's spinlock to reference counts only ("per-file
/// reference count only (fields are immutable once set except offset...")
/// , so advancing it on every `read`/`write` must not go through that
/// lock at all, let alone stay held across the disk I/O those calls do.
pub enum FileType {
    Pipe { reader: Option<PipeReader>, writer: Option<PipeWriter> },
    Inode { inode: InodeHandle, offset: AtomicU32 },
    Device { major: usize, inode: InodeHandle },
}

pub struct File {
    kind: FileType,
    readable: bool,
    writable: bool,
    refcnt: usize,
}

pub struct FileTable {
    files: [Option<File>; NFILE],
}

pub type SharedFileTable = Spinlock<FileTable>;

impl FileTable {
    pub const fn zero() -> Self {
        Self {
            files: array![_ => None; NFILE],
        }
    }
}

/// A reference-counted handle to a system-wide open file. Cloning bumps
/// the table's refcount; dropping the last clone releases the slot
/// (closing the underlying pipe end or releasing the inode).
pub struct RcFile {
    index: usize,
}

fn table() -> &'static SharedFileTable {
    kernel().ftable()
}

/// Installs `kind`/`readable`/`writable` into a freshly allocated slot
/// of the system file table. Returns `None` if the table is full.
pub fn alloc(kind: FileType, readable: bool, writable: bool) -> Option<RcFile> {
    let mut t = table().lock();
    let index = t.files.iter().position(|f| f.is_none())?;
    t.files[index] = Some(File {
        kind,
        readable,
        writable,
        refcnt: 1,
    });
    Some(RcFile { index })
}

/// Derives `readable`/`writable` from an `open()` flags argument
/// (spec.md §4.I "open"); used by `sysfile::open`.
pub fn open_mode_flags(flags: i32) -> (bool, bool) {
    match flags & (O_RDONLY | O_WRONLY | O_RDWR) {
        O_WRONLY => (false, true),
        O_RDWR => (true, true),
        _ => (true, false),
    }
}

impl Clone for RcFile {
    fn clone(&self) -> Self {
        let mut t = table().lock();
        t.files[self.index].as_mut().expect("clone of closed RcFile").refcnt += 1;
        Self { index: self.index }
    }
}

impl Drop for RcFile {
    fn drop(&mut self) {
        let mut t = table().lock();
        let slot = t.files[self.index].as_mut().expect("drop of closed RcFile");
        slot.refcnt -= 1;
        if slot.refcnt == 0 {
            t.files[self.index] = None;
        }
    }
}

impl RcFile {
    pub fn readable(&self) -> bool {
        self.with(|f| f.readable)
    }

    pub fn writable(&self) -> bool {
        self.with(|f| f.writable)
    }

    fn with<R>(&self, f: impl FnOnce(&File) -> R) -> R {
        let t = table().lock();
        f(t.files[self.index].as_ref().expect("use of closed RcFile"))
    }

    /// Returns a `'static` reference to this handle's `FileType`,
    /// touching the file table's spinlock only long enough to read the
    /// pointer out.
    ///
    /// Grounded on `fs::inode::slot_ptr`'s identical pattern: the table
    /// is a `'static` array, and this `RcFile`'s own reference keeps the
    /// slot from being reused for a different file while the returned
    /// reference is alive, so the borrow outlives the guard safely.
    /// This is what lets `read`/`write` perform pipe or disk I/O — a
    /// suspension point — without the file table's spinlock held across
    /// it (spec.md §5 forbids holding any spinlock across a suspension
    /// point; "any path that reads from disk must hold no spinlock").
    fn kind(&self) -> &'static FileType {
        let t = table().lock();
        let f = t.files[self.index].as_ref().expect("use of closed RcFile");
        // SAFETY: see above.
        unsafe { &*(&f.kind as *const FileType) }
    }

    /// Reads up to `buf.len()` bytes (spec.md §4.I "read").
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, &'static str> {
        if !self.readable() {
            return Err("file not open for reading");
        }
        match self.kind() {
            FileType::Pipe { reader: Some(r), .. } => r.read(buf).map_err(|_| "pipe read failed"),
            FileType::Pipe { reader: None, .. } => Err("read end closed"),
            FileType::Inode { inode, offset } => {
                let off = offset.load(Ordering::Relaxed);
                let n = inode.read_at(off, buf)?;
                offset.fetch_add(n as u32, Ordering::Relaxed);
                Ok(n)
            }
            FileType::Device { major, .. } => {
                let dev = devices::char_device(*major).ok_or("no such device")?;
                let n = dev.read(buf);
                if n < 0 {
                    Err("device read failed")
                } else {
                    Ok(n as usize)
                }
            }
        }
    }

    /// Writes `buf` (spec.md §4.I "write").
    pub fn write(&self, buf: &[u8]) -> Result<usize, &'static str> {
        if !self.writable() {
            return Err("file not open for writing");
        }
        match self.kind() {
            FileType::Pipe { writer: Some(w), .. } => w.write(buf).map_err(|_| "pipe write failed"),
            FileType::Pipe { writer: None, .. } => Err("write end closed"),
            FileType::Inode { inode, offset } => {
                let off = offset.load(Ordering::Relaxed);
                let n = inode.write_at(off, buf)?;
                offset.fetch_add(n as u32, Ordering::Relaxed);
                Ok(n)
            }
            FileType::Device { major, .. } => {
                let dev = devices::char_device(*major).ok_or("no such device")?;
                let n = dev.write(buf);
                if n < 0 {
                    Err("device write failed")
                } else {
                    Ok(n as usize)
                }
            }
        }
    }

    /// Populates `stat` from the underlying inode (spec.md §4.I
    /// "fstat"). Pipes have no `fstat` result.
    pub fn stat(&self) -> Option<Stat> {
        match self.kind() {
            FileType::Inode { inode, .. } | FileType::Device { inode, .. } => Some(inode.stat()),
            FileType::Pipe { .. } => None,
        }
    }
}

//! File, directory, and process-image syscalls (spec.md §4.F, §5):
//! `open`, `close`, `read`, `write`, `dup`, `fstat`, `link`, `unlink`,
//! `mkdir`, `mknod`, `chdir`, `pipe`, `exec`.
//!
//! Grounded on the teacher's `sysfile.rs`: thin syscall wrappers that
//! fetch arguments via [`crate::syscall`], resolve paths through
//! [`crate::fs::path`], and bracket every write to the filesystem in a
//! log transaction via [`crate::log::with_transaction`]. `create`
//! mirrors the teacher's (and xv6's) single routine backing `open`
//! with `O_CREATE`, `mkdir`, and `mknod` alike.

use arrayvec::ArrayVec;

use crate::error::SysError;
use crate::file::{self, FileType, RcFile};
use crate::fcntl::{O_CREATE, O_RDWR, O_WRONLY};
use crate::fs::inode::InodeHandle;
use crate::fs::path;
use crate::fs::FileSystem;
use crate::kernel::kernel;
use crate::log;
use crate::param::{MAXARG, NOFILE};
use crate::pipe;
use crate::proc::Proc;
use crate::stat::{InodeType, Stat};
use crate::syscall::{argaddr, argint, argstr, fetch, fetchstr, put, PATH_BUF};

fn current() -> *mut Proc {
    kernel().current_proc()
}

fn current_cwd() -> Result<InodeHandle, &'static str> {
    // SAFETY: the calling process is the only one touching its own
    // `cwd` field while it runs.
    unsafe { (*current()).cwd.as_ref().cloned().ok_or("no current directory") }
}

fn read_path(n: usize) -> Result<([u8; PATH_BUF], usize), &'static str> {
    let mut buf = [0u8; PATH_BUF];
    let len = argstr(n, &mut buf)?;
    Ok((buf, len))
}

fn path_str(buf: &[u8], len: usize) -> Result<&str, &'static str> {
    core::str::from_utf8(&buf[..len]).map_err(|_| "path is not valid UTF-8")
}

/// Resolves syscall argument `n` as an open file descriptor, returning
/// its index and a reference to the calling process. Fails if the
/// index is out of range or the slot is empty.
fn argfd(n: usize) -> Result<usize, &'static str> {
    let fd = argint(n);
    if fd < 0 || fd as usize >= NOFILE {
        return Err("bad file descriptor");
    }
    let fd = fd as usize;
    let p = current();
    // SAFETY: the calling process exclusively owns its own `ofile`
    // table while it runs.
    if unsafe { (*p).ofile[fd].is_none() } {
        return Err("bad file descriptor");
    }
    Ok(fd)
}

/// Installs `f` into the calling process's first free descriptor slot.
/// Returns the file untouched (as `Err`) if the table is full, so the
/// caller can close or otherwise dispose of it.
fn fdalloc(f: RcFile) -> Result<i32, RcFile> {
    let p = current();
    // SAFETY: see `argfd`.
    let ofile = unsafe { &mut (*p).ofile };
    match ofile.iter().position(|slot| slot.is_none()) {
        Some(fd) => {
            ofile[fd] = Some(f);
            Ok(fd as i32)
        }
        None => Err(f),
    }
}

/// Finds or creates the inode named by `path`, mirroring the teacher's
/// (and xv6's) `create`: refuses to replace an existing directory, a
/// device, or a file of a different kind, but permits re-`open`ing an
/// existing plain file with `O_CREATE` (spec.md §4.F "create").
fn create(path_in: &str, kind: InodeType, major: u16, minor: u16) -> Result<InodeHandle, &'static str> {
    let cwd = current_cwd()?;
    let fs = kernel().fs();
    let (dir, name) = path::nameiparent(&cwd, path_in).ok_or("no such directory")?;
    if dir.kind(fs) != InodeType::Dir {
        return Err("parent is not a directory");
    }

    if let Some((ip, _)) = path::dirlookup(fs, &dir, name) {
        let existing = ip.kind(fs);
        return if kind == InodeType::File && (existing == InodeType::File || existing == InodeType::Device) {
            Ok(ip)
        } else {
            Err("already exists")
        };
    }

    let ip = fs.ialloc(kind);
    if kind == InodeType::Device {
        ip.set_device(fs, major, minor);
    }
    ip.link(fs);

    if kind == InodeType::Dir {
        dir.link(fs); // the new directory's ".." entry references the parent
        path::dirlink(fs, &ip, ".", ip.inum())?;
        path::dirlink(fs, &ip, "..", dir.inum())?;
    }

    path::dirlink(fs, &dir, name, ip.inum())?;
    Ok(ip)
}

pub fn sys_open() -> Result<i32, SysError> {
    let (buf, len) = read_path(0)?;
    let path_in = path_str(&buf, len)?;
    let flags = argint(1);

    let fs = kernel().fs();
    let ip = if flags & O_CREATE != 0 {
        log::with_transaction(fs.disk, || create(path_in, InodeType::File, 0, 0))?
    } else {
        let cwd = current_cwd()?;
        path::namex(&cwd, path_in).ok_or("no such file")?
    };

    if ip.kind(fs) == InodeType::Dir && flags & (O_WRONLY | O_RDWR) != 0 {
        return Err(SysError::from("cannot open a directory for writing"));
    }

    let (readable, writable) = file::open_mode_flags(flags);
    let kind = if ip.kind(fs) == InodeType::Device {
        let (major, _minor) = ip.device_numbers(fs);
        FileType::Device { major: major as usize, inode: ip }
    } else {
        FileType::Inode { inode: ip, offset: core::sync::atomic::AtomicU32::new(0) }
    };

    let f = file::alloc(kind, readable, writable).ok_or("open: file table full")?;
    fdalloc(f).map_err(|_| SysError::from("open: descriptor table full"))
}

pub fn sys_mkdir() -> Result<i32, SysError> {
    let (buf, len) = read_path(0)?;
    let path_in = path_str(&buf, len)?;
    let fs = kernel().fs();
    log::with_transaction(fs.disk, || create(path_in, InodeType::Dir, 0, 0))?;
    Ok(0)
}

pub fn sys_mknod() -> Result<i32, SysError> {
    let (buf, len) = read_path(0)?;
    let path_in = path_str(&buf, len)?;
    let major = argint(1) as u16;
    let minor = argint(2) as u16;
    let fs = kernel().fs();
    log::with_transaction(fs.disk, || create(path_in, InodeType::Device, major, minor))?;
    Ok(0)
}

pub fn sys_chdir() -> Result<i32, SysError> {
    let (buf, len) = read_path(0)?;
    let path_in = path_str(&buf, len)?;
    let cwd = current_cwd()?;
    let fs = kernel().fs();

    // `chdir` only reads metadata, but brackets the lookup in a
    // transaction anyway: resolving the path can drop the process's
    // previous `cwd` inode, whose `iput` may need to truncate a file
    // unlinked while it was the working directory.
    let ip = log::with_transaction(fs.disk, || path::namex(&cwd, path_in).ok_or("no such directory"))?;
    if ip.kind(fs) != InodeType::Dir {
        return Err(SysError::from("not a directory"));
    }

    let p = current();
    // SAFETY: the calling process exclusively owns its own `cwd` field.
    unsafe { (*p).cwd = Some(ip) };
    Ok(0)
}

pub fn sys_dup() -> Result<i32, SysError> {
    let fd = argfd(0)?;
    let p = current();
    // SAFETY: see `argfd`.
    let f = unsafe { (*p).ofile[fd].as_ref().expect("argfd validated this slot").clone() };
    fdalloc(f).map_err(|_| SysError::from("dup: descriptor table full"))
}

pub fn sys_close() -> Result<i32, SysError> {
    let fd = argfd(0)?;
    let p = current();
    // SAFETY: see `argfd`. Dropping the slot's `RcFile` releases the
    // underlying pipe end/inode once its refcount reaches zero.
    unsafe { (*p).ofile[fd] = None };
    Ok(0)
}

pub fn sys_read() -> Result<i32, SysError> {
    let fd = argfd(0)?;
    let addr = argaddr(1);
    let n = argint(2);
    if n < 0 {
        return Err(SysError::from("read: negative count"));
    }
    let n = n as usize;
    let p = current();

    let mut total = 0usize;
    let mut chunk = [0u8; 512];
    while total < n {
        let want = chunk.len().min(n - total);
        // SAFETY: see `argfd`.
        let got = unsafe { (*p).ofile[fd].as_ref().expect("argfd validated this slot").read(&mut chunk[..want])? };
        if got == 0 {
            break;
        }
        put(addr + total, &chunk[..got])?;
        total += got;
        if got < want {
            break;
        }
    }
    Ok(total as i32)
}

/// Largest chunk a single `write` syscall hands to the filesystem
/// layer inside one log transaction: small enough that its worst-case
/// block writes (data blocks plus the inode and any newly allocated
/// indirect block) can never overflow the log (spec.md §4.H "log
/// transaction size").
const MAX_WRITE_CHUNK: usize = ((crate::param::MAXOPBLOCKS - 1 - 1 - 2) / 2) * crate::param::BSIZE;

pub fn sys_write() -> Result<i32, SysError> {
    let fd = argfd(0)?;
    let addr = argaddr(1);
    let n = argint(2);
    if n < 0 {
        return Err(SysError::from("write: negative count"));
    }
    let n = n as usize;
    let p = current();
    let fs = kernel().fs();

    let mut total = 0usize;
    while total < n {
        let want = MAX_WRITE_CHUNK.min(n - total);
        let mut buf = [0u8; MAX_WRITE_CHUNK];
        fetch(addr + total, &mut buf[..want])?;
        let wrote = log::with_transaction(fs.disk, || {
            // SAFETY: see `argfd`.
            unsafe { (*p).ofile[fd].as_ref().expect("argfd validated this slot").write(&buf[..want]) }
        })?;
        total += wrote;
        if wrote < want {
            break;
        }
    }
    Ok(total as i32)
}

pub fn sys_fstat() -> Result<i32, SysError> {
    let fd = argfd(0)?;
    let addr = argaddr(1);
    let p = current();
    // SAFETY: see `argfd`.
    let stat = unsafe { (*p).ofile[fd].as_ref().expect("argfd validated this slot").stat() }.ok_or("fstat: not backed by an inode")?;
    let bytes = unsafe {
        core::slice::from_raw_parts((&stat as *const Stat) as *const u8, core::mem::size_of::<Stat>())
    };
    put(addr, bytes)?;
    Ok(0)
}

pub fn sys_link() -> Result<i32, SysError> {
    let (old_buf, old_len) = read_path(0)?;
    let (new_buf, new_len) = read_path(1)?;
    let old_path = path_str(&old_buf, old_len)?;
    let new_path = path_str(&new_buf, new_len)?;
    let fs = kernel().fs();
    log::with_transaction(fs.disk, || link_paths(fs, old_path, new_path))?;
    Ok(0)
}

fn link_paths(fs: &FileSystem, old_path: &str, new_path: &str) -> Result<(), &'static str> {
    let cwd = current_cwd()?;
    let ip = path::namex(&cwd, old_path).ok_or("no such file")?;
    if ip.kind(fs) == InodeType::Dir {
        return Err("cannot link a directory");
    }
    ip.link(fs);

    let result = (|| {
        let (dir, name) = path::nameiparent(&cwd, new_path).ok_or("no such directory")?;
        if dir.stat().dev != ip.stat().dev {
            return Err("cannot link across devices");
        }
        path::dirlink(fs, &dir, name, ip.inum())
    })();

    if result.is_err() {
        ip.unlink(fs);
    }
    result
}

pub fn sys_unlink() -> Result<i32, SysError> {
    let (buf, len) = read_path(0)?;
    let path_in = path_str(&buf, len)?;
    let fs = kernel().fs();
    log::with_transaction(fs.disk, || unlink_path(fs, path_in))?;
    Ok(0)
}

fn unlink_path(fs: &FileSystem, path_in: &str) -> Result<(), &'static str> {
    let cwd = current_cwd()?;
    let (dir, name) = path::nameiparent(&cwd, path_in).ok_or("no such directory")?;
    if name == "." || name == ".." {
        return Err("cannot unlink . or ..");
    }
    let (ip, offset) = path::dirlookup(fs, &dir, name).ok_or("no such file")?;
    if ip.kind(fs) == InodeType::Dir && !path::dir_is_empty(fs, &ip) {
        return Err("directory not empty");
    }
    path::dirunlink(fs, &dir, offset);
    if ip.kind(fs) == InodeType::Dir {
        dir.unlink(fs); // the removed directory's ".." no longer references the parent
    }
    ip.unlink(fs);
    Ok(())
}

pub fn sys_pipe() -> Result<i32, SysError> {
    let fdarray_addr = argaddr(0);
    let (reader, writer) = pipe::allocate().ok_or("pipe: out of memory")?;

    let rf = file::alloc(FileType::Pipe { reader: Some(reader), writer: None }, true, false)
        .ok_or("pipe: file table full")?;
    let wf = match file::alloc(FileType::Pipe { reader: None, writer: Some(writer) }, false, true) {
        Some(f) => f,
        None => return Err(SysError::from("pipe: file table full")),
    };

    let rfd = match fdalloc(rf) {
        Ok(fd) => fd,
        Err(_) => return Err(SysError::from("pipe: descriptor table full")),
    };
    let wfd = match fdalloc(wf) {
        Ok(fd) => fd,
        Err(_) => {
            // Roll back the read end's descriptor so its `Drop` closes
            // the pipe's read side too.
            let p = current();
            // SAFETY: `rfd` was just installed by `fdalloc` above.
            unsafe { (*p).ofile[rfd as usize] = None };
            return Err(SysError::from("pipe: descriptor table full"));
        }
    };

    if put(fdarray_addr, &rfd.to_ne_bytes()).is_err() || put(fdarray_addr + 4, &wfd.to_ne_bytes()).is_err() {
        let p = current();
        // SAFETY: both fds were just installed above.
        unsafe {
            (*p).ofile[rfd as usize] = None;
            (*p).ofile[wfd as usize] = None;
        }
        return Err(SysError::from("pipe: bad descriptor pointer"));
    }
    Ok(0)
}

pub fn sys_exec() -> Result<i32, SysError> {
    let (path_buf, path_len) = read_path(0)?;
    let path_in = path_str(&path_buf, path_len)?;
    let argv_addr = argaddr(1);

    let mut arg_storage = [[0u8; PATH_BUF]; MAXARG];
    let mut argv: ArrayVec<&[u8], MAXARG> = ArrayVec::new();
    for i in 0..MAXARG {
        let mut ptr_bytes = [0u8; 4];
        fetch(argv_addr + i * 4, &mut ptr_bytes)?;
        let arg_ptr = u32::from_ne_bytes(ptr_bytes) as usize;
        if arg_ptr == 0 {
            break;
        }
        let len = fetchstr(arg_ptr, &mut arg_storage[i])?;
        argv.push(&arg_storage[i][..len]);
    }

    let cwd = current_cwd()?;
    let fs = kernel().fs();
    let ip = path::namex(&cwd, path_in).ok_or("exec: no such file")?;
    if ip.kind(fs) != InodeType::File {
        return Err(SysError::from("exec: not a regular file"));
    }

    crate::exec::exec(&ip, &argv)?;
    // `eax` is overwritten by `exec` itself (to `argc`) before this
    // returns, so the dispatcher's own write of our return value is
    // harmlessly redundant with it.
    Ok(unsafe { (*(*current()).tf).eax as i32 })
}

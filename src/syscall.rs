//! Syscall argument marshaling and dispatch (spec.md §4.D, §5).
//!
//! Grounded on the teacher's `syscall.rs`: `argraw`/`argint`/`argaddr`/
//! `argstr` fetch values out of the calling process's trap frame and
//! validate any pointer argument against its address space before the
//! kernel dereferences it, and `syscall()` dispatches on the number
//! left in `eax` by the trap stub.

use crate::error::SysError;
use crate::file::RcFile;
use crate::kernel::kernel;
use crate::kprintln;
use crate::param::{MAXPATH, NOFILE};
use crate::proc::Proc;
use crate::sysfile;
use crate::sysproc;

pub mod num {
    pub const FORK: u32 = 1;
    pub const EXIT: u32 = 2;
    pub const WAIT: u32 = 3;
    pub const PIPE: u32 = 4;
    pub const READ: u32 = 5;
    pub const KILL: u32 = 6;
    pub const EXEC: u32 = 7;
    pub const FSTAT: u32 = 8;
    pub const CHDIR: u32 = 9;
    pub const DUP: u32 = 10;
    pub const GETPID: u32 = 11;
    pub const SBRK: u32 = 12;
    pub const SLEEP: u32 = 13;
    pub const UPTIME: u32 = 14;
    pub const OPEN: u32 = 15;
    pub const WRITE: u32 = 16;
    pub const MKNOD: u32 = 17;
    pub const UNLINK: u32 = 18;
    pub const LINK: u32 = 19;
    pub const MKDIR: u32 = 20;
    pub const CLOSE: u32 = 21;
}

fn current() -> *mut Proc {
    kernel().current_proc()
}

/// Address on the user stack holding the `n`th syscall argument
/// (spec.md §4.D "arguments are fetched positionally from the user
/// stack pointer saved in the trap frame, skipping one slot for the
/// user-mode return address"): the syscall stub's `call` into the
/// trampoline pushed that return address just below `esp`, so argument
/// 0 sits one word above it.
fn arg_addr(n: usize) -> usize {
    let p = current();
    // SAFETY: the calling process's trap frame is stable for the
    // duration of the syscall.
    let tf = unsafe { &*(*p).tf };
    tf.esp as usize + 4 + 4 * n
}

/// Reads the `n`th syscall argument (0-indexed) as a raw 32-bit word,
/// copied in from the user stack at its positional address.
fn argraw(n: usize) -> u32 {
    let mut bytes = [0u8; 4];
    fetch(arg_addr(n), &mut bytes).expect("argraw: user stack argument unmapped");
    u32::from_ne_bytes(bytes)
}

/// Fetches the `n`th argument as an integer, validating that its
/// source address lies within the calling process's user size
/// (spec.md §4.D "Integer fetch validates that the source address
/// lies within the calling process's user size").
pub fn argint(n: usize) -> i32 {
    let p = current();
    let addr = arg_addr(n);
    let sz = unsafe { (*p).sz };
    assert!(addr + 4 <= sz, "argint: syscall argument address out of range");
    argraw(n) as i32
}

/// Fetches the `n`th argument as a raw user pointer, with no bounds
/// check of its own (spec.md §4.D "Pointer argument fetch returns the
/// raw pointer; the caller is responsible for bounds-checking the
/// pointed-at region" — `fetch`/`fetchstr`/`put` do that when the
/// pointer is actually dereferenced).
pub fn argaddr(n: usize) -> usize {
    argraw(n) as usize
}

/// Copies a NUL-terminated string argument from user space into `buf`,
/// returning its length. Fails if the address is unmapped or the
/// string doesn't fit.
pub fn argstr(n: usize, buf: &mut [u8]) -> Result<usize, &'static str> {
    let addr = argaddr(n);
    fetchstr(addr, buf)
}

/// Copies a NUL-terminated string starting at user virtual address
/// `addr` into `buf`.
pub fn fetchstr(addr: usize, buf: &mut [u8]) -> Result<usize, &'static str> {
    let p = current();
    // SAFETY: the calling process exclusively owns its own address
    // space while running.
    let pagetable = unsafe { (*p).pagetable.as_mut() }.ok_or("no address space")?;
    pagetable.copy_in_str(buf, addr).ok_or("bad string pointer")
}

/// Copies `buf.len()` bytes from user virtual address `addr`.
pub fn fetch(addr: usize, buf: &mut [u8]) -> Result<(), &'static str> {
    let p = current();
    // SAFETY: see `fetchstr`.
    let pagetable = unsafe { (*p).pagetable.as_mut() }.ok_or("no address space")?;
    pagetable.copy_in(buf, addr).ok_or("bad pointer")
}

/// Copies `buf` out to user virtual address `addr`. The inverse of
/// [`fetch`]; used by syscalls (`read`, `fstat`, `pipe`) that hand a
/// result back to user space rather than only reading an argument.
pub fn put(addr: usize, buf: &[u8]) -> Result<(), &'static str> {
    let p = current();
    // SAFETY: see `fetchstr`.
    let pagetable = unsafe { (*p).pagetable.as_mut() }.ok_or("no address space")?;
    pagetable.copy_out(addr, buf).ok_or("bad pointer")
}

/// Dispatches syscall `num`, returning the value to leave in `eax`
/// (spec.md §5's per-syscall return-value convention: non-negative on
/// success, `-1` on failure unless documented otherwise).
pub fn syscall(num: u32) -> i32 {
    let result = match num {
        num::FORK => sysproc::sys_fork(),
        num::EXIT => sysproc::sys_exit(),
        num::WAIT => sysproc::sys_wait(),
        num::PIPE => sysfile::sys_pipe(),
        num::READ => sysfile::sys_read(),
        num::KILL => sysproc::sys_kill(),
        num::EXEC => sysfile::sys_exec(),
        num::FSTAT => sysfile::sys_fstat(),
        num::CHDIR => sysfile::sys_chdir(),
        num::DUP => sysfile::sys_dup(),
        num::GETPID => sysproc::sys_getpid(),
        num::SBRK => sysproc::sys_sbrk(),
        num::SLEEP => sysproc::sys_sleep(),
        num::UPTIME => sysproc::sys_uptime(),
        num::OPEN => sysfile::sys_open(),
        num::WRITE => sysfile::sys_write(),
        num::MKNOD => sysfile::sys_mknod(),
        num::UNLINK => sysfile::sys_unlink(),
        num::LINK => sysfile::sys_link(),
        num::MKDIR => sysfile::sys_mkdir(),
        num::CLOSE => sysfile::sys_close(),
        _ => {
            kprintln!("unknown syscall {}", num);
            Err(SysError::from("no such syscall"))
        }
    };
    result.unwrap_or_else(|e: SysError| e.code())
}

/// Maximum path length a syscall will ever fetch from user space
/// (spec.md's open/exec/chdir/link/unlink/mkdir path arguments all
/// share this bound).
pub const PATH_BUF: usize = MAXPATH;

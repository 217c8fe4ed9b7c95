//! Process-related syscalls (spec.md §4.E, §5): `fork`, `exit`, `wait`,
//! `kill`, `getpid`, `sbrk`, `sleep`, `uptime`.
//!
//! Grounded on the teacher's `sysproc.rs`: thin wrappers that fetch
//! arguments via [`crate::syscall`] and hand off to the process-table
//! operations in [`crate::proc`].

use crate::clock;
use crate::error::SysError;
use crate::kernel::kernel;
use crate::proc;
use crate::syscall::argint;

pub fn sys_fork() -> Result<i32, SysError> {
    proc::fork().map(|pid| pid as i32).ok_or(SysError::from("fork: resources exhausted"))
}

/// Never actually returns to its caller: [`proc::exit_current`] is `!`.
pub fn sys_exit() -> Result<i32, SysError> {
    let status = argint(0);
    proc::exit_current(status)
}

pub fn sys_wait() -> Result<i32, SysError> {
    proc::wait().map(|(pid, _status)| pid as i32).ok_or(SysError::from("wait: no children"))
}

pub fn sys_kill() -> Result<i32, SysError> {
    let pid = argint(0) as usize;
    if proc::kill(pid) {
        Ok(0)
    } else {
        Err(SysError::from("kill: no such process"))
    }
}

pub fn sys_getpid() -> Result<i32, SysError> {
    let p = kernel().current_proc();
    // SAFETY: the calling process is `p`; `pid` never changes after
    // process creation.
    Ok(unsafe { (*p).pid } as i32)
}

/// Grows or shrinks the calling process's address space by `n` bytes
/// (may be negative), returning the address space's size *before* the
/// change (spec.md §4.E "sbrk" / POSIX `sbrk` semantics).
pub fn sys_sbrk() -> Result<i32, SysError> {
    let n = argint(0);
    let p = kernel().current_proc();
    // SAFETY: the calling process exclusively owns its own address
    // space and `sz` field while running.
    unsafe {
        let old_sz = (*p).sz;
        let pagetable = (*p).pagetable.as_mut().ok_or("sbrk: no address space")?;
        let new_sz = if n >= 0 {
            old_sz + n as usize
        } else {
            old_sz.saturating_sub((-n) as usize)
        };
        (*p).sz = pagetable.resize(old_sz, new_sz).ok_or("sbrk: out of memory")?;
        Ok(old_sz as i32)
    }
}

pub fn sys_sleep() -> Result<i32, SysError> {
    let n = argint(0);
    if n < 0 {
        return Err(SysError::from("sleep: negative duration"));
    }
    clock::sleep_ticks(n as u32);
    Ok(0)
}

pub fn sys_uptime() -> Result<i32, SysError> {
    Ok(clock::uptime() as i32)
}

//! The kernel's single global singleton (spec.md §3 "Kernel").
//!
//! Every subsystem above this module reaches its shared state — the
//! process table, buffer cache, log, inode/file tables, the mounted
//! filesystem, the per-CPU descriptors — through [`kernel()`] rather
//! than a free-standing `static` per subsystem, the way the teacher's
//! `kernel::Kernel` aggregates `procs`/`bcache`/`ftable`/`itable` behind
//! one `static KERNEL: spin::Once<Kernel>` filled in once by boot code.
//! Fields that can only be built once a disk is available (`fs`) or
//! that are written exactly once during boot (`root_disk`, `init_proc`)
//! use `spin::Once`/`AtomicPtr` instead of needing their own mutable
//! boot-time initialization dance.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicPtr, Ordering};

use array_macro::array;

use crate::bio::BufCache;
use crate::cpu::{cpuid, Cpu};
use crate::devices::BlockDevice;
use crate::file::{FileTable, SharedFileTable};
use crate::fs::inode::{Icache, InodeTable};
use crate::fs::FileSystem;
use crate::lock::spinlock::Spinlock;
use crate::log::Log;
use crate::param::NCPU;
use crate::proc::{Proc, ProcTable, Procs};

pub struct Kernel {
    cpus: [UnsafeCell<Cpu>; NCPU],
    procs: ProcTable,
    bcache: BufCache,
    log: Log,
    itable: InodeTable,
    ftable: SharedFileTable,
    fs: spin::Once<FileSystem>,
    root_disk: spin::Once<&'static dyn BlockDevice>,
    init_proc: AtomicPtr<Proc>,
}

// SAFETY: every field is either a lock, an atomic, or a `spin::Once`
// written exactly once before being read; `cpus` is only ever indexed
// by the CPU that owns that slot (see `current_cpu`).
unsafe impl Sync for Kernel {}

static KERNEL: Kernel = Kernel {
    cpus: array![_ => UnsafeCell::new(Cpu::zero()); NCPU],
    procs: Spinlock::new("procs", Procs::zero()),
    bcache: BufCache::zero(),
    log: Log::zero(),
    itable: Spinlock::new("itable", Icache::zero()),
    ftable: Spinlock::new("ftable", FileTable::zero()),
    fs: spin::Once::new(),
    root_disk: spin::Once::new(),
    init_proc: AtomicPtr::new(core::ptr::null_mut()),
};

/// Returns the kernel singleton. Valid to call from the moment Rust
/// code starts running; every field is either statically initialized
/// or explicitly checked for the one-time setup it still needs
/// (`mount_fs`, `set_root_disk`, `set_init_proc`).
pub fn kernel() -> &'static Kernel {
    &KERNEL
}

impl Kernel {
    pub fn procs(&self) -> &ProcTable {
        &self.procs
    }

    pub fn bcache(&self) -> &BufCache {
        &self.bcache
    }

    pub fn log(&self) -> &Log {
        &self.log
    }

    pub fn itable(&self) -> &InodeTable {
        &self.itable
    }

    pub fn ftable(&self) -> &SharedFileTable {
        &self.ftable
    }

    /// The mounted root filesystem. Panics if called before
    /// [`Kernel::mount_fs`] — every caller runs only after boot has
    /// mounted the disk, so this is a programming error, not a runtime
    /// condition to recover from.
    pub fn fs(&self) -> &FileSystem {
        self.fs.get().expect("filesystem not mounted yet")
    }

    /// Like [`Kernel::fs`], but returns `None` instead of panicking
    /// before the filesystem is mounted. Used by [`Proc`]/inode
    /// teardown paths that can run during early boot, before any file
    /// has been opened.
    pub fn try_fs(&self) -> Option<&FileSystem> {
        self.fs.get()
    }

    /// Mounts `disk` as device `dev` and records it as the kernel's
    /// filesystem. Called once, by boot code on CPU 0.
    pub fn mount_fs(&self, disk: &'static dyn BlockDevice, dev: u32) {
        self.fs.call_once(|| FileSystem::mount(disk, dev, &self.log));
    }

    /// Records the block device backing the root filesystem, for
    /// drivers/boot code that need to reach it before (or instead of)
    /// going through [`Kernel::fs`].
    pub fn set_root_disk(&self, disk: &'static dyn BlockDevice) {
        self.root_disk.call_once(|| disk);
    }

    pub fn root_disk(&self) -> &'static dyn BlockDevice {
        *self.root_disk.get().expect("root disk not registered yet")
    }

    /// Records `p` as the process every orphaned child gets reparented
    /// to (spec.md §4.E "Termination"). Called once, right after the
    /// first process is created.
    pub fn set_init_proc(&self, p: *mut Proc) {
        self.init_proc.store(p, Ordering::Release);
    }

    pub fn init_proc(&self) -> *mut Proc {
        self.init_proc.load(Ordering::Acquire)
    }

    /// Returns this CPU's descriptor. Callers must not let the
    /// returned pointer outlive a window where this kernel thread could
    /// migrate CPUs (in practice: use it only with interrupts disabled,
    /// or before any other CPU has been started).
    pub fn current_cpu(&self) -> *mut Cpu {
        // SAFETY: `cpuid()` requires the APIC window to be mapped, true
        // from early boot onward.
        let id = unsafe { cpuid() };
        self.cpus[id].get()
    }

    /// Returns the process currently running on this CPU, or null if
    /// none is (e.g. the scheduler's own idle context).
    pub fn current_proc(&self) -> *mut Proc {
        let cpu = self.current_cpu();
        // SAFETY: `cpu` is this CPU's own descriptor.
        unsafe { (*cpu).proc() }
    }
}

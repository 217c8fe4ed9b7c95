//! Process table and cooperative SMP scheduler (spec.md §4.E).
//!
//! Grounded on the teacher's `proc/mod.rs`/`proc/procs.rs`: a fixed
//! process table behind a spinlock, `Procstate` transitions, sleep and
//! wakeup on opaque wait-channel addresses (the teacher's
//! `WaitChannel`), and a `swtch`-based scheduler loop. This crate uses
//! one table-wide lock rather than the teacher's per-process
//! `Branded<'id, _>` guards (see DESIGN.md): spec.md's process table has
//! no per-CPU sharding, so the simpler xv6-style single lock is enough.

use array_macro::array;

use crate::file::RcFile;
use crate::fs::inode::Inode;
use crate::kalloc::kalloc;
use crate::kernel::kernel;
use crate::lock::spinlock::Spinlock;
use crate::lock::{Guard, RawLock};
use crate::param::{MAXPROCNAME, NOFILE, NPROC};
use crate::trap::TrapFrame;
use crate::vm::PageTable;

extern "C" {
    /// Saves the caller's callee-saved registers into `*old`, loads
    /// them from `*new`, and returns into the new context. Implemented
    /// in hand-written assembly (spec.md §4.E "Context switch").
    fn swtch(old: *mut Context, new: *mut Context);

    /// Activates `pagedir` (a `lcr3`) and points the calling CPU's
    /// task-state segment at `kstack_top`, so the next privilege-level
    /// change lands on this process's kernel stack (spec.md §4.C
    /// "Activation"). Implemented by the same external platform layer
    /// that owns the GDT/TSS (see `start.rs`'s module doc); called once
    /// by the scheduler every time it switches into a process.
    fn switch_uvm(pagedir: u32, kstack_top: u32);

    /// Restores registers from `tf` and returns to user mode via
    /// `iret`. Shared with the tail of the ordinary trap-return path
    /// the external assembly trap stub runs after [`crate::trap::dispatch`]
    /// returns; [`forkret`] calls it directly because a newly forked
    /// process reaches its first user-mode entry via [`swtch`], not via
    /// a trap, so there is no trap stub already on the call stack to
    /// fall back into.
    fn trapret(tf: *mut TrapFrame) -> !;
}

/// Callee-saved register save area used by [`swtch`]. Includes the
/// stack pointer explicitly (unlike the classic xv6-x86 `struct
/// context`, which recovers it from the `old` argument's own address)
/// so `swtch`'s C signature stays the simple `(*mut Context, *mut
/// Context)` shared with every other architecture this kernel's
/// `Context` type could describe.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Context {
    edi: u32,
    esi: u32,
    ebx: u32,
    ebp: u32,
    esp: u32,
    eip: u32,
}

impl Context {
    pub const fn zero() -> Self {
        Self {
            edi: 0,
            esi: 0,
            ebx: 0,
            ebp: 0,
            esp: 0,
            eip: 0,
        }
    }
}

/// A process's position in its lifecycle (spec.md §4.E).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Procstate {
    Unused,
    Embryo,
    Sleeping,
    Runnable,
    Running,
    Zombie,
}

/// One process-table slot.
///
/// Every field is protected by the enclosing [`Procs`]'s spinlock,
/// except `context`, which only the process's own kernel thread (or
/// the scheduler switching into/out of it, also under that lock) ever
/// touches.
pub struct Proc {
    pub state: Procstate,
    pub pid: usize,
    pub parent: *mut Proc,
    pub killed: bool,
    /// Wait-channel address this process is sleeping on; meaningless
    /// unless `state == Sleeping`.
    pub chan: usize,
    /// Exit status, valid once `state == Zombie`.
    pub xstate: i32,

    pub sz: usize,
    pub pagetable: Option<PageTable>,
    pub kstack: usize,
    pub tf: *mut TrapFrame,
    pub context: Context,
    pub name: [u8; MAXPROCNAME],
    pub ofile: [Option<RcFile>; NOFILE],
    pub cwd: Option<Inode>,
}

impl Proc {
    const fn zero() -> Self {
        Self {
            state: Procstate::Unused,
            pid: 0,
            parent: core::ptr::null_mut(),
            killed: false,
            chan: 0,
            xstate: 0,
            sz: 0,
            pagetable: None,
            kstack: 0,
            tf: core::ptr::null_mut(),
            context: Context::zero(),
            name: [0; MAXPROCNAME],
            ofile: array![_ => None; NOFILE],
            cwd: None,
        }
    }

    pub fn name(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        core::str::from_utf8(&self.name[..len]).unwrap_or("?")
    }
}

/// The process table. Exactly one [`Spinlock`] over the whole array,
/// matching the teacher's `ptable`-style single-lock convention.
pub struct Procs {
    table: [Proc; NPROC],
    next_pid: usize,
}

impl Procs {
    pub const fn zero() -> Self {
        Self {
            table: array![_ => Proc::zero(); NPROC],
            next_pid: 1,
        }
    }
}

pub type ProcTable = Spinlock<Procs>;

/// A sleep/wakeup rendezvous point identified by its own address
/// (spec.md §4.E "Sleep/wakeup"). Any stable address works as a
/// channel; embedding one next to the resource it guards (a pipe
/// buffer, a disk buffer, a process slot) is the usual idiom.
pub struct WaitChannel;

impl WaitChannel {
    pub const fn new() -> Self {
        Self
    }

    fn addr(&self) -> usize {
        self as *const Self as usize
    }

    /// Atomically releases `guard`'s lock and puts the calling process
    /// to sleep on this channel, reacquiring the lock before returning.
    /// The caller must re-check its wakeup condition in a loop: a
    /// spurious wakeup is always possible.
    pub fn sleep<L: RawLock, T>(&self, guard: &mut Guard<'_, L, T>) {
        // SAFETY: `guard` is not touched while released; `sleep_on`
        // reacquires the process table lock only, independent of `L`.
        unsafe {
            guard.reacquire_after(|| sleep_on(self.addr()));
        }
    }

    /// Wakes every process sleeping on this channel.
    pub fn wake_all(&self) {
        wakeup(self.addr());
    }
}

/// Puts the calling process to sleep on `chan`. Called only from
/// [`WaitChannel::sleep`], with the caller's original lock already
/// released by `reacquire_after`.
fn sleep_on(chan: usize) {
    let procs = kernel().procs();
    let mut guard = procs.lock();
    let p = kernel().current_proc();
    // SAFETY: `p` is the calling process; only it and the scheduler
    // (under this same lock) touch its slot.
    let slot = unsafe { &mut *p };
    slot.chan = chan;
    slot.state = Procstate::Sleeping;
    sched(&mut guard, slot);
    slot.chan = 0;
}

/// Wakes every `Sleeping` process whose channel is `chan`.
fn wakeup(chan: usize) {
    let procs = kernel().procs();
    let mut guard = procs.lock();
    for p in guard.table.iter_mut() {
        if p.state == Procstate::Sleeping && p.chan == chan {
            p.state = Procstate::Runnable;
        }
    }
}

/// Returns the calling process's pid, or `0` if none is running on this
/// CPU (e.g. the scheduler's idle loop). `pid` is assigned once by
/// [`alloc_process`] and never changes afterward, so reading it for the
/// process we're currently running as needs no lock (spec.md §3: "state
/// reads outside the lock are only safe for the current process
/// observing its own state").
pub fn current_pid() -> usize {
    let p = kernel().current_proc();
    if p.is_null() {
        0
    } else {
        // SAFETY: see above.
        unsafe { (*p).pid }
    }
}

/// Reports whether the calling process has been marked for death
/// (spec.md §4.E "Kill"). Blocking syscalls (console reads, pipe
/// reads/writes) poll this on every wakeup so a killed process doesn't
/// block forever.
pub fn current_killed() -> bool {
    let procs = kernel().procs();
    let guard = procs.lock();
    let p = kernel().current_proc();
    guard
        .table
        .iter()
        .find(|slot| core::ptr::eq(*slot, p))
        .map(|slot| slot.killed)
        .unwrap_or(false)
}

/// Finds an `Unused` slot, gives it a pid, and brings it to `Embryo`
/// with a fresh kernel stack and trap frame allocated. Returns a raw
/// pointer to the slot, still held under the table lock's protection
/// (the caller must fill in the rest before marking it `Runnable`).
///
/// Returns `None` if the table is full.
pub fn alloc_process() -> Option<*mut Proc> {
    let procs = kernel().procs();
    let mut guard = procs.lock();
    let pid = guard.next_pid;
    for (i, p) in guard.table.iter_mut().enumerate() {
        if p.state == Procstate::Unused {
            p.pid = pid;
            guard.next_pid += 1;
            p.state = Procstate::Embryo;
            let slot: *mut Proc = &mut guard.table[i];
            return Some(slot);
        }
    }
    None
}

/// Finishes initializing a freshly [`alloc_process`]-ed `Embryo` slot:
/// gives it a kernel stack, a trap frame page, `pagetable` as its
/// address space, and a context primed to resume in [`forkret`] the
/// first time the scheduler switches into it. Still `Embryo` when this
/// returns; the caller fills in `name`/`parent`/`ofile`/`cwd` and marks
/// the slot `Runnable` once it's ready to run (spec.md §4.E "Process
/// creation").
fn init_embryo(p: *mut Proc, pagetable: PageTable, sz: usize) -> Option<()> {
    let kstack = kalloc()?;
    let tf = match kalloc() {
        Some(page) => page as *mut TrapFrame,
        None => {
            // SAFETY: `kstack` was just allocated and is unreferenced.
            unsafe { crate::kalloc::kfree(kstack) };
            return None;
        }
    };
    // SAFETY: `p` is `Embryo`; only the allocating thread touches it
    // until it is marked `Runnable`.
    let slot = unsafe { &mut *p };
    slot.kstack = kstack as usize;
    slot.tf = tf;
    slot.sz = sz;
    slot.pagetable = Some(pagetable);
    slot.context = Context::zero();
    slot.context.eip = forkret as usize as u32;
    slot.context.esp = (kstack as usize + crate::memlayout::KSTACKSIZE) as u32;
    Some(())
}

/// Creates the first process, running `init_code` (a tiny static
/// binary the boot sequence embeds) at user address 0. Called exactly
/// once, by the boot CPU, before the scheduler starts (spec.md §4.E
/// "Process creation").
pub fn create_first_process(init_code: &[u8]) -> *mut Proc {
    let p = alloc_process().expect("create_first_process: process table unexpectedly full");
    let mut pagetable = PageTable::new().expect("create_first_process: out of memory");
    let sz = pagetable.resize(0, init_code.len()).expect("create_first_process: out of memory");
    pagetable.copy_out(0, init_code).expect("create_first_process: out of memory");
    init_embryo(p, pagetable, sz).expect("create_first_process: out of memory");

    // SAFETY: still `Embryo`; only we touch it.
    let slot = unsafe { &mut *p };
    slot.name[..4].copy_from_slice(b"init");
    slot.parent = core::ptr::null_mut();
    slot.cwd = Some(crate::fs::inode::iget(crate::param::ROOTDEV, 1));
    // SAFETY: `tf` was allocated by `init_embryo`.
    let tf = unsafe { &mut *slot.tf };
    *tf = TrapFrame::default();
    tf.eip = 0;
    tf.esp = sz as u32;
    tf.eflags = crate::x86::FL_IF;
    tf.cs = crate::mmu::seg::selector(crate::mmu::seg::UCODE);
    tf.ds = crate::mmu::seg::selector(crate::mmu::seg::UDATA);
    tf.es = tf.ds;
    tf.ss = tf.ds;

    let procs = kernel().procs();
    let mut guard = procs.lock();
    let slot = guard.table.iter_mut().find(|s| core::ptr::eq(*s, p)).expect("slot in table");
    slot.state = Procstate::Runnable;
    drop(guard);
    p
}

/// Creates a new process running the same program as the calling
/// process, resuming at the same point with a return value of `0`
/// (spec.md §4.E "Process creation" / POSIX `fork`). Returns the
/// child's pid, or `None` on resource exhaustion (process table,
/// memory, or file descriptor table all full).
pub fn fork() -> Option<usize> {
    let parent = kernel().current_proc();
    // SAFETY: the calling process is `parent`; only it (and, for
    // table-protected fields, code holding the table lock) touches
    // these while it runs.
    let (sz, ofile, cwd, name) = unsafe {
        (
            (*parent).sz,
            array![i => (*parent).ofile[i].clone(); NOFILE],
            (*parent).cwd.clone(),
            (*parent).name,
        )
    };

    let mut child_pt = PageTable::new()?;
    // SAFETY: every running process has an address space.
    let parent_pt = unsafe { (*parent).pagetable.as_mut().expect("fork: parent has no address space") };
    copy_uvm(parent_pt, &mut child_pt, sz)?;

    let child = alloc_process()?;
    init_embryo(child, child_pt, sz)?;

    // SAFETY: `child` is `Embryo`; only we touch it until `Runnable`.
    let slot = unsafe { &mut *child };
    slot.ofile = ofile;
    slot.cwd = cwd;
    slot.name = name;
    slot.parent = parent;
    // SAFETY: `parent`'s trap frame is stable while it's `Running`,
    // which it is — `fork` is a syscall the parent itself is making.
    let parent_tf = unsafe { &*(*parent).tf };
    // SAFETY: `tf` was allocated by `init_embryo`.
    let tf = unsafe { &mut *slot.tf };
    *tf = *parent_tf;
    tf.eax = 0; // the child's fork() returns 0

    let pid = slot.pid;
    let procs = kernel().procs();
    let mut guard = procs.lock();
    guard
        .table
        .iter_mut()
        .find(|s| core::ptr::eq(*s, child))
        .expect("slot in table")
        .state = Procstate::Runnable;
    drop(guard);
    Some(pid)
}

/// Deep-copies every present user page below `sz` from `src` into
/// `dst`, allocating fresh physical pages for the copy (spec.md's
/// address spaces never share writable pages, so there is no
/// copy-on-write optimization here — see DESIGN.md).
fn copy_uvm(src: &mut PageTable, dst: &mut PageTable, sz: usize) -> Option<()> {
    use crate::kalloc::kfree;
    use crate::memlayout::{p2v, v2p};
    use crate::mmu::{pgroundup, PteFlags, PGSIZE};

    let mut va = 0;
    while va < pgroundup(sz) {
        let pa = src.translate(va)?;
        let page = kalloc()?;
        // SAFETY: `pa` is a physical page mapped by `src`; `page` is a
        // freshly allocated page at least `PGSIZE` bytes long.
        unsafe { core::ptr::copy_nonoverlapping(p2v(pa as usize) as *const u8, page, PGSIZE) };
        if dst.map_pages(va, v2p(page as usize), PGSIZE, PteFlags::W | PteFlags::U).is_none() {
            // SAFETY: `page` was just allocated and failed to map;
            // nothing else references it.
            unsafe { kfree(page) };
            return None;
        }
        va += PGSIZE;
    }
    Some(())
}

/// Drops `p` back to `Unused`, clearing the fields the next occupant
/// must not inherit. Called with the table lock held.
fn free_process(p: &mut Proc) {
    p.pagetable = None; // drops every mapped user page, then the directory
    if !p.tf.is_null() {
        // SAFETY: `tf` was allocated by `init_embryo` via `kalloc` and
        // is not referenced once the process is a reaped `Zombie`.
        unsafe { crate::kalloc::kfree(p.tf as *mut u8) };
    }
    if p.kstack != 0 {
        // SAFETY: same reasoning as the trap frame above.
        unsafe { crate::kalloc::kfree(p.kstack as *mut u8) };
    }
    p.tf = core::ptr::null_mut();
    p.kstack = 0;
    p.pid = 0;
    p.parent = core::ptr::null_mut();
    p.name = [0; MAXPROCNAME];
    p.killed = false;
    p.xstate = 0;
    p.chan = 0;
    p.state = Procstate::Unused;
}

/// Marks the calling process `Zombie`, hands its children to the init
/// process, and wakes its parent (spec.md §4.E "Termination"). Never
/// returns: the process's last act is to switch away from itself via
/// the scheduler.
///
/// Follows the xv6 convention that a process's wait-channel address is
/// simply its own `*mut Proc`: a parent sleeping in [`wait`] sleeps on
/// itself, and an exiting child wakes on `self.parent`, so the two
/// addresses always match without a separate channel object.
pub fn exit_current(status: i32) -> ! {
    let procs = kernel().procs();
    let p = kernel().current_proc();
    let mut guard = procs.lock();
    // SAFETY: no other process touches `p`'s non-table-protected
    // fields while we hold the table lock and `p` is `Running`.
    let me = unsafe { &mut *p };
    me.ofile = array![_ => None; NOFILE];
    me.cwd = None;

    let init = kernel().init_proc();
    for child in guard.table.iter_mut() {
        if child.parent == p {
            child.parent = init;
        }
    }

    let me = unsafe { &mut *p };
    let parent_chan = me.parent as usize;
    me.xstate = status;
    me.state = Procstate::Zombie;
    wakeup(parent_chan);
    sched(&mut guard, me);
    unreachable!("exited process rescheduled");
}

/// Blocks until a child of the calling process exits, reaps it, and
/// returns its pid and exit status. Returns `None` if the calling
/// process has no children.
pub fn wait() -> Option<(usize, i32)> {
    let procs = kernel().procs();
    let p = kernel().current_proc();
    loop {
        let mut guard = procs.lock();
        let mut have_children = false;
        for i in 0..guard.table.len() {
            if guard.table[i].parent != p {
                continue;
            }
            have_children = true;
            if guard.table[i].state == Procstate::Zombie {
                let pid = guard.table[i].pid;
                let xstate = guard.table[i].xstate;
                free_process(&mut guard.table[i]);
                return Some((pid, xstate));
            }
        }
        if !have_children {
            return None;
        }
        // SAFETY: `p` is the calling process, sleeping on its own
        // address; only its own exiting children wake it.
        let me = unsafe { &mut *p };
        me.chan = p as usize;
        me.state = Procstate::Sleeping;
        sched(&mut guard, me);
        me.chan = 0;
    }
}

/// Marks `pid` for death: sets its `killed` flag and, if sleeping,
/// makes it runnable so it observes the flag promptly (spec.md §4.E
/// "Kill"). Returns whether `pid` was found.
pub fn kill(pid: usize) -> bool {
    let procs = kernel().procs();
    let mut guard = procs.lock();
    for p in guard.table.iter_mut() {
        if p.pid == pid {
            p.killed = true;
            if p.state == Procstate::Sleeping {
                p.state = Procstate::Runnable;
            }
            return true;
        }
    }
    false
}

/// Activates `p`'s current address space and kernel stack on this CPU
/// (spec.md §4.C "Activation"). Called by the scheduler every time it
/// switches into a process, and by [`crate::exec::exec`] right after
/// installing a replacement page table: a running process's old
/// directory cannot be freed until `%cr3` has moved off it.
///
/// # Safety
/// `p` must be the process about to run (or already running) on the
/// calling CPU, with an address space and kernel stack already set up.
pub fn activate(p: *mut Proc) {
    // SAFETY: caller's contract above; `pagetable`/`kstack` are
    // exclusively owned by `p` while it is current on this CPU.
    unsafe {
        let pagedir = (*p).pagetable.as_ref().expect("activate: process has no address space").physical_addr();
        let kstack_top = (*p).kstack + crate::memlayout::KSTACKSIZE;
        switch_uvm(pagedir, kstack_top as u32);
    }
}

/// Per-CPU idle loop: picks a `Runnable` process, switches into it,
/// and regains control only once that process yields back to the
/// scheduler (spec.md §4.E "Scheduler").
///
/// # Safety
/// Must run on the per-CPU scheduler stack, never on a process's
/// kernel stack.
pub unsafe fn scheduler() -> ! {
    let procs = kernel().procs();
    loop {
        // SAFETY: interrupts enabled here let device interrupts (e.g.
        // the timer) make progress while no process is runnable.
        unsafe { crate::x86::sti() };

        let mut guard = procs.lock();
        for i in 0..guard.table.len() {
            if guard.table[i].state != Procstate::Runnable {
                continue;
            }
            guard.table[i].state = Procstate::Running;
            let p: *mut Proc = &mut guard.table[i];
            let cpu = kernel().current_cpu();
            // SAFETY: `cpu` is this CPU's own descriptor.
            unsafe { (*cpu).set_proc(p) };
            activate(p);

            let proc_ctx: *mut Context = &mut guard.table[i].context;
            let sched_ctx: *mut Context = &mut (*cpu).scheduler as *const _ as *mut _;
            // SAFETY: both contexts are valid and this CPU owns `cpu`.
            unsafe { swtch(sched_ctx, proc_ctx) };

            // SAFETY: the process switched back to us; no process runs
            // on this CPU until the next iteration picks one.
            unsafe { (*cpu).set_proc(core::ptr::null_mut()) };
        }
    }
}

/// Switches from the calling process back to its CPU's scheduler.
/// Caller must hold the process table lock and have already updated
/// `p.state` to something other than `Running`.
fn sched(guard: &mut Guard<'_, crate::lock::spinlock::RawSpinlock, Procs>, p: &mut Proc) {
    debug_assert!(p.state != Procstate::Running);
    let cpu = kernel().current_cpu();
    // SAFETY: this CPU's scheduler context is only ever touched here
    // and in `scheduler`, both under the table lock.
    unsafe {
        let proc_ctx: *mut Context = &mut p.context;
        let sched_ctx: *mut Context = &mut (*cpu).scheduler;
        swtch(proc_ctx, sched_ctx);
    }
    let _ = guard;
}

/// Reports whether this CPU currently has a `Running` process, i.e.
/// whether a timer tick landed on a process rather than the idle
/// scheduler loop (spec.md §4.E "Preemption": "if a process is
/// Running, cooperatively yield").
///
/// Reading `state` without the table lock is safe here: a process may
/// only read its own state outside the lock (spec.md §3), and this
/// check runs on the same CPU that would be running `p`.
pub fn current_proc_is_running() -> bool {
    let p = kernel().current_proc();
    if p.is_null() {
        return false;
    }
    // SAFETY: see above.
    unsafe { (*p).state == Procstate::Running }
}

/// Voluntarily gives up the CPU, e.g. on a timer interrupt (spec.md
/// §4.E "Preemption").
pub fn proc_yield() {
    let procs = kernel().procs();
    let mut guard = procs.lock();
    let p = kernel().current_proc();
    // SAFETY: the calling process is `p`; only it changes its own
    // state from `Running`.
    let me = unsafe { &mut *p };
    me.state = Procstate::Runnable;
    sched(&mut guard, me);
}

/// Trampoline a brand-new process returns through the first time it
/// is scheduled, after `fork`-style setup left its trap frame primed
/// to resume in user space (spec.md §4.E "Process creation").
///
/// The very first process to run this trampoline also mounts the root
/// filesystem: initializing the log and inode layer means reading disk
/// blocks, which needs a process context to block on (sleeplocks sleep
/// the calling process, and there is no "calling process" yet any
/// earlier in boot). `Kernel::mount_fs` is built on `spin::Once`, so
/// every later process through here is a no-op.
///
/// Never returns in the Rust sense: it ends by jumping into user mode
/// through [`trapret`], the same tail every ordinary trap return runs.
pub extern "C" fn forkret() -> ! {
    // The table lock, held since `scheduler` switched into us, must be
    // released before returning to user space.
    unsafe { kernel().procs().unlock() };

    kernel().mount_fs(kernel().root_disk(), crate::param::ROOTDEV);

    let p = kernel().current_proc();
    // SAFETY: `p` is the process that was just scheduled onto this CPU;
    // its trap frame was primed by `create_first_process`/`fork` before
    // it became `Runnable`, and only this process touches it now.
    unsafe { trapret((*p).tf) }
}

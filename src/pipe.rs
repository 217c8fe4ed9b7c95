//! Anonymous pipes (spec.md §4.J): a fixed-size ring buffer shared by
//! a read end and a write end, with blocking semantics driven by two
//! wait channels.
//!
//! Grounded on the teacher's `pipe.rs`: `PipeInner` (`data`, `nread`,
//! `nwrite`, `readopen`, `writeopen`) behind one spinlock, `nread`/
//! `nwrite` as unbounded counters taken mod the buffer size rather than
//! a head/tail pair, and `try_read`/`try_write` returning a `PipeError`
//! the caller retries or gives up on. Like the teacher's
//! `AllocatedPipe`, the `Pipe` itself is carved out of a page from the
//! physical allocator rather than the heap (this kernel has no general
//! allocator; see SPEC_FULL.md §B) and is freed once both ends close.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::kalloc::{kalloc, kfree};
use crate::lock::spinlock::Spinlock;
use crate::mmu::PGSIZE;
use crate::proc::{current_killed, WaitChannel};

const PIPE_SIZE: usize = 512;

struct PipeInner {
    data: [u8; PIPE_SIZE],
    /// Total bytes ever written/read; the buffer index is `n % PIPE_SIZE`.
    nwrite: usize,
    nread: usize,
    readopen: bool,
    writeopen: bool,
}

/// Why a non-blocking pipe operation didn't complete.
#[derive(Debug, PartialEq, Eq)]
pub enum PipeError {
    /// The peer end has closed; no more data will ever arrive/be read.
    ClosedPeer,
    /// The calling process was killed while waiting.
    Killed,
}

struct Pipe {
    inner: Spinlock<PipeInner>,
    read_ready: WaitChannel,
    write_ready: WaitChannel,
    /// Open `PipeReader`/`PipeWriter` handles referencing this pipe.
    readers: AtomicUsize,
    writers: AtomicUsize,
}

static_assertions::const_assert!(core::mem::size_of::<Pipe>() <= PGSIZE);

/// A pipe's read end. Dropping the last one marks `readopen` false and
/// frees the pipe once the write end has also dropped.
pub struct PipeReader(*mut Pipe);

/// A pipe's write end. Dropping the last one marks `writeopen` false
/// (waking any blocked reader so it observes end-of-file) and frees
/// the pipe once the read end has also dropped.
pub struct PipeWriter(*mut Pipe);

// SAFETY: all shared state lives behind `inner`'s spinlock or is a
// plain atomic refcount.
unsafe impl Send for PipeReader {}
unsafe impl Send for PipeWriter {}

/// Allocates a new pipe, returning its read and write ends, or `None`
/// if the physical page allocator is exhausted.
pub fn allocate() -> Option<(PipeReader, PipeWriter)> {
    let page = kalloc()?;
    let ptr = page as *mut Pipe;
    // SAFETY: `page` is a freshly allocated, exclusively owned page at
    // least as large as `Pipe` (enforced by the const assert above).
    unsafe {
        ptr.write(Pipe {
            inner: Spinlock::new(
                "pipe",
                PipeInner {
                    data: [0; PIPE_SIZE],
                    nwrite: 0,
                    nread: 0,
                    readopen: true,
                    writeopen: true,
                },
            ),
            read_ready: WaitChannel::new(),
            write_ready: WaitChannel::new(),
            readers: AtomicUsize::new(1),
            writers: AtomicUsize::new(1),
        });
    }
    Some((PipeReader(ptr), PipeWriter(ptr)))
}

impl PipeWriter {
    fn pipe(&self) -> &Pipe {
        // SAFETY: `self.0` is valid until both ends drop, and at least
        // one (`self`) is still alive.
        unsafe { &*self.0 }
    }

    /// Writes `buf`, blocking while the buffer is full, until all of it
    /// is written or the read end closes or the calling process is
    /// killed.
    pub fn write(&self, buf: &[u8]) -> Result<usize, PipeError> {
        let pipe = self.pipe();
        let mut written = 0;
        let mut inner = pipe.inner.lock();
        while written < buf.len() {
            if !inner.readopen {
                return Err(PipeError::ClosedPeer);
            }
            if current_killed() {
                return Err(PipeError::Killed);
            }
            if inner.nwrite == inner.nread + PIPE_SIZE {
                pipe.write_ready.wake_all();
                pipe.read_ready.sleep(&mut inner);
                continue;
            }
            let idx = inner.nwrite % PIPE_SIZE;
            inner.data[idx] = buf[written];
            inner.nwrite += 1;
            written += 1;
        }
        pipe.write_ready.wake_all();
        Ok(written)
    }
}

impl PipeReader {
    fn pipe(&self) -> &Pipe {
        // SAFETY: see `PipeWriter::pipe`.
        unsafe { &*self.0 }
    }

    /// Reads up to `buf.len()` bytes, blocking while the buffer is
    /// empty and the write end is still open. Returns 0 once the write
    /// end has closed and every written byte has been consumed.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, PipeError> {
        let pipe = self.pipe();
        let mut inner = pipe.inner.lock();
        while inner.nread == inner.nwrite && inner.writeopen {
            if current_killed() {
                return Err(PipeError::Killed);
            }
            pipe.write_ready.sleep(&mut inner);
        }
        let mut n = 0;
        while n < buf.len() && inner.nread < inner.nwrite {
            let idx = inner.nread % PIPE_SIZE;
            buf[n] = inner.data[idx];
            inner.nread += 1;
            n += 1;
        }
        pipe.read_ready.wake_all();
        Ok(n)
    }
}

/// Frees `pipe`'s backing page once neither end references it.
///
/// # Safety
/// `pipe` must not be dereferenced by the caller again afterward.
unsafe fn maybe_free(pipe: *mut Pipe) {
    // SAFETY: caller holds the last handle referencing `pipe`.
    let p = unsafe { &*pipe };
    if p.readers.load(Ordering::Acquire) == 0 && p.writers.load(Ordering::Acquire) == 0 {
        // SAFETY: no reader or writer handle remains; nothing else can
        // be touching `pipe`.
        unsafe {
            core::ptr::drop_in_place(pipe);
            kfree(pipe as *mut u8);
        }
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        let pipe = self.pipe();
        if pipe.readers.fetch_sub(1, Ordering::AcqRel) == 1 {
            pipe.inner.lock().readopen = false;
            pipe.write_ready.wake_all();
        }
        // SAFETY: this was the reader's own reference; `maybe_free`
        // only frees once both counts have reached zero.
        unsafe { maybe_free(self.0) };
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        let pipe = self.pipe();
        if pipe.writers.fetch_sub(1, Ordering::AcqRel) == 1 {
            pipe.inner.lock().writeopen = false;
            pipe.read_ready.wake_all();
        }
        // SAFETY: see `PipeReader::drop`.
        unsafe { maybe_free(self.0) };
    }
}

//! Syscall error taxonomy (SPEC_FULL.md §B "Error handling").
//!
//! The teacher mostly returns `Result<T, ()>` at the syscall boundary and
//! leans on `kprintln!` for diagnosis. This crate keeps every lower
//! layer's `Result<T, &'static str>` (a static message is already enough
//! detail for a kernel panic or a debug print) but classifies those
//! messages into a small taxonomy right at the syscall wrapper layer, so
//! a syscall's failure mode is a type a caller can match on instead of a
//! string to `contains()`. It still collapses to `-1` for the user-mode
//! caller, matching spec.md §4.F's "returns -1" contract.

/// Coarse classification of why a syscall failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SysError {
    /// A user-space pointer argument was unmapped or pointed outside the
    /// calling process's address space.
    BadAddress(&'static str),
    /// A path argument did not resolve, or a directory operation hit a
    /// name that already exists / doesn't exist / isn't empty.
    BadPath(&'static str),
    /// A file descriptor argument was out of range or not open.
    NoSuchFd(&'static str),
    /// An operation was attempted against the wrong kind of inode (e.g.
    /// writing to a directory, `chdir` into a file).
    TypeMismatch(&'static str),
    /// A fixed-size table (process, file, inode, descriptor) had no room
    /// left, or the disk/log had no space for the request.
    ResourceExhausted(&'static str),
    /// Doesn't fit the categories above.
    Other(&'static str),
}

impl SysError {
    /// The message every variant carries, for `kprintln!`-style reporting.
    pub fn message(&self) -> &'static str {
        match *self {
            SysError::BadAddress(m)
            | SysError::BadPath(m)
            | SysError::NoSuchFd(m)
            | SysError::TypeMismatch(m)
            | SysError::ResourceExhausted(m)
            | SysError::Other(m) => m,
        }
    }

    /// The value left in `eax` for a failed syscall (spec.md §4.F /
    /// §5's per-syscall return-value convention).
    pub fn code(&self) -> i32 {
        -1
    }
}

/// Classifies a lower layer's bare error message into a [`SysError`]
/// variant by the vocabulary those layers actually use. Lets every
/// `sys_*` wrapper propagate `Result<_, &'static str>` with `?` and land
/// in the right bucket without hand-annotating each call site.
impl From<&'static str> for SysError {
    fn from(message: &'static str) -> Self {
        if message.contains("pointer") || message.contains("address space") || message.contains("UTF-8") {
            SysError::BadAddress(message)
        } else if message.contains("path")
            || message.contains("directory")
            || message.contains("no such file")
            || message.contains("already exists")
            || message.contains("unlink")
            || message.contains("link")
        {
            SysError::BadPath(message)
        } else if message.contains("descriptor") {
            SysError::NoSuchFd(message)
        } else if message.contains("not a directory") || message.contains("not a regular file") || message.contains("cannot open") || message.contains("backed by") {
            SysError::TypeMismatch(message)
        } else if message.contains("full") || message.contains("exhausted") || message.contains("out of memory") || message.contains("too long") || message.contains("too big") {
            SysError::ResourceExhausted(message)
        } else {
            SysError::Other(message)
        }
    }
}

//! `open()` flag bits (spec.md §4.I "open").
//!
//! Grounded on the teacher's `fcntl.rs`: a flat set of `pub const`
//! bit flags rather than a `bitflags!` type, matching how this value
//! crosses the user/kernel boundary as a bare integer syscall argument.

pub const O_RDONLY: i32 = 0x000;
pub const O_WRONLY: i32 = 0x001;
pub const O_RDWR: i32 = 0x002;
pub const O_CREATE: i32 = 0x200;
pub const O_TRUNC: i32 = 0x400;

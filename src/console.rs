//! Console line discipline (spec.md §4.K): canonical-mode input
//! buffering with backspace and kill-line editing, laid over whatever
//! raw character device the platform registers for actual output.
//!
//! Grounded on the teacher's `console.rs`: a fixed input ring buffer
//! guarded by a spinlock, fed one byte at a time from a keyboard
//! interrupt handler, with a [`WaitChannel`] waking blocked readers
//! once a full line (or ^D) is available. The raw keyboard/VGA/UART
//! access this crate's `console.rs` performs directly is, here, behind
//! the injected [`CharDevice`] the external driver registers (spec.md
//! treats drivers as external collaborators).

use spin::Once;

use crate::devices::CharDevice;
use crate::lock::spinlock::Spinlock;
use crate::proc::WaitChannel;

const BACKSPACE: u8 = 0x08;
const CTRL_U: u8 = 0x15;
const CTRL_D: u8 = 0x04;
const INPUT_BUF_SIZE: usize = 128;

struct InputBuffer {
    buf: [u8; INPUT_BUF_SIZE],
    /// Index of the next byte a reader will consume.
    read_index: usize,
    /// Index of the next byte `interrupt` will write.
    write_index: usize,
    /// Index one past the last complete line (the edit point).
    edit_index: usize,
}

impl InputBuffer {
    const fn new() -> Self {
        Self {
            buf: [0; INPUT_BUF_SIZE],
            read_index: 0,
            write_index: 0,
            edit_index: 0,
        }
    }
}

pub struct Console {
    input: Spinlock<InputBuffer>,
    line_ready: WaitChannel,
    raw: Once<&'static dyn CharDevice>,
}

static CONSOLE: Console = Console {
    input: Spinlock::new("console", InputBuffer::new()),
    line_ready: WaitChannel::new(),
    raw: Once::new(),
};

/// Registers the physical device (UART, VGA text mode, ...) console
/// output and raw echo go through, and registers the console itself as
/// the major-1 character device. Called once by the platform's boot
/// sequence after the real driver is up.
pub fn init(raw: &'static dyn CharDevice) {
    CONSOLE.raw.call_once(|| raw);
    crate::devices::register_char_device(1, &CONSOLE);
}

fn raw() -> &'static dyn CharDevice {
    *CONSOLE.raw.get().expect("console raw device not registered")
}

/// Feeds one byte from the keyboard interrupt handler into the
/// console's line buffer, applying backspace/kill-line editing and
/// echoing the byte back out. Wakes any reader once a newline or ^D
/// completes a line.
pub fn interrupt(c: u8) {
    let mut input = CONSOLE.input.lock();
    match c {
        CTRL_U => {
            while input.write_index != input.edit_index
                && input.buf[(input.write_index - 1) % INPUT_BUF_SIZE] != b'\n'
            {
                input.write_index -= 1;
                raw().write(b"\x08 \x08");
            }
        }
        BACKSPACE | 0x7f => {
            if input.write_index != input.edit_index {
                input.write_index -= 1;
                raw().write(b"\x08 \x08");
            }
        }
        _ => {
            if input.write_index - input.read_index < INPUT_BUF_SIZE {
                let c = if c == b'\r' { b'\n' } else { c };
                let idx = input.write_index % INPUT_BUF_SIZE;
                input.buf[idx] = c;
                input.write_index += 1;
                raw().write(&[c]);
                if c == b'\n' || c == CTRL_D || input.write_index == input.edit_index + INPUT_BUF_SIZE {
                    input.edit_index = input.write_index;
                    drop(input);
                    CONSOLE.line_ready.wake_all();
                    return;
                }
            }
        }
    }
}

impl CharDevice for Console {
    fn write(&self, buf: &[u8]) -> isize {
        for &b in buf {
            raw().write(&[b]);
        }
        buf.len() as isize
    }

    /// Reads up to `buf.len()` bytes, blocking until at least one
    /// complete line is available. A `^D` in the middle of a line ends
    /// the read early without consuming the `^D` byte; at the start of
    /// a line it signals end-of-file by returning 0.
    fn read(&self, buf: &mut [u8]) -> isize {
        let mut input = self.input.lock();
        let mut n = 0;
        while n < buf.len() {
            while input.read_index == input.write_index {
                if crate::proc::current_killed() {
                    return -1;
                }
                self.line_ready.sleep(&mut input);
            }
            let idx = input.read_index % INPUT_BUF_SIZE;
            let c = input.buf[idx];
            input.read_index += 1;
            if c == CTRL_D {
                if n > 0 {
                    input.read_index -= 1;
                }
                break;
            }
            buf[n] = c;
            n += 1;
            if c == b'\n' {
                break;
            }
        }
        n as isize
    }
}

// SAFETY: all mutable state lives behind `input`'s spinlock; `raw` is
// set once via `Once` before any concurrent access.
unsafe impl Sync for Console {}

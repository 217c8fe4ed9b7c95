//! Device dispatch: the trait seam external drivers plug into
//! (spec.md §4.K, §7 "External Interfaces").
//!
//! The bootloader, the UART/keyboard/VGA console driver, and the IDE
//! disk driver all live outside this crate. What lives here is the
//! contract they implement — [`CharDevice`] and [`BlockDevice`] — plus
//! the major-number-keyed table `open`/`read`/`write` use to reach
//! whichever concrete driver registered itself at boot.
//!
//! Grounded on the teacher's `file.rs` `Devsw`/`DEVSW` table (one slot
//! per major device number, each holding `read`/`write` function
//! pointers) and `virtio.rs`'s use of a disk trait to isolate the
//! block layer from one specific controller.

use array_macro::array;

use crate::lock::spinlock::Spinlock;
use crate::param::NDEV;

/// A byte-stream device reachable by major device number (spec.md
/// §4.K): the console is major 1, but the table has room for others
/// (a serial port, say) an external driver could register.
pub trait CharDevice: Send {
    /// Writes `buf` to the device, returning the number of bytes
    /// written or a negative value on error.
    fn write(&self, buf: &[u8]) -> isize;

    /// Reads up to `buf.len()` bytes from the device, blocking until at
    /// least one byte is available. Returns the number read, 0 on
    /// EOF-like conditions, or a negative value on error.
    fn read(&self, buf: &mut [u8]) -> isize;
}

/// A random-access block device (spec.md §4.G "Block device contract").
/// The buffer cache and log both go through this trait so the rest of
/// the kernel never assumes a specific disk controller.
pub trait BlockDevice: Send + Sync {
    /// Block size in bytes this device transfers at a time.
    fn block_size(&self) -> usize;

    /// Reads block `block_no` into `buf` (`buf.len() == block_size()`).
    fn read_block(&self, block_no: u32, buf: &mut [u8]);

    /// Writes `buf` to block `block_no`.
    fn write_block(&self, block_no: u32, buf: &[u8]);
}

struct Slot {
    dev: Option<&'static dyn CharDevice>,
}

struct DeviceTable {
    table: [Slot; NDEV],
}

static DEVICES: Spinlock<DeviceTable> = Spinlock::new(
    "devsw",
    DeviceTable {
        table: array![_ => Slot { dev: None }; NDEV],
    },
);

/// Registers `dev` as the character device for `major`. Called once by
/// an external driver during boot.
pub fn register_char_device(major: usize, dev: &'static dyn CharDevice) {
    let mut table = DEVICES.lock();
    table.table[major].dev = Some(dev);
}

/// Looks up the character device registered for `major`, if any.
pub fn char_device(major: usize) -> Option<&'static dyn CharDevice> {
    DEVICES.lock().table.get(major).and_then(|s| s.dev)
}

/// A handler invoked when a device's IRQ line fires.
pub trait IrqHandler: Send + Sync {
    fn handle(&self);
}

struct IrqSlot {
    handler: Option<&'static dyn IrqHandler>,
}

struct IrqTable {
    table: [IrqSlot; 16],
}

static IRQS: Spinlock<IrqTable> = Spinlock::new(
    "irqtab",
    IrqTable {
        table: array![_ => IrqSlot { handler: None }; 16],
    },
);

/// Registers `handler` to run when IRQ `irq` (0..15) fires, and
/// unmasks that line at the PIC.
pub fn register_irq(irq: u8, handler: &'static dyn IrqHandler) {
    IRQS.lock().table[irq as usize].handler = Some(handler);
    // SAFETY: the PIC has already been programmed by `pic::init` before
    // any driver registers.
    unsafe { crate::pic::enable(irq) };
}

/// Dispatches a fired IRQ to its registered handler, if any.
pub fn dispatch_irq(irq: u32) {
    if let Some(slot) = IRQS.lock().table.get(irq as usize) {
        if let Some(h) = slot.handler {
            h.handle();
        }
    }
}

//! An in-memory [`BlockDevice`] for host-side tests (SPEC_FULL.md §B/§D
//! "test tooling"): the log, buffer cache, and filesystem layers are
//! pure logic over that trait, so they can be exercised with `std`
//! available instead of a real IDE controller.
//!
//! Grounded on the pattern in `NeilAllavarpu-Rasperry-Pi-OS`'s
//! `kernel/tests/thread.rs` of isolating hardware-independent logic
//! behind a trait and testing it with a host-side double; this crate's
//! seam for that is [`crate::devices::BlockDevice`], already required
//! to keep `bio`/`log`/`fs` independent of one disk controller.

use std::sync::Mutex;

use crate::devices::BlockDevice;
use crate::param::BSIZE;

/// A fixed number of `BSIZE`-byte blocks backed by a `Vec`, guarded by a
/// `std::sync::Mutex` since this only ever runs in `#[cfg(test)]` host
/// builds where blocking is fine.
pub struct RamDisk {
    blocks: Mutex<Vec<[u8; BSIZE]>>,
}

impl RamDisk {
    /// Creates a disk of `nblocks` zeroed blocks.
    pub fn new(nblocks: usize) -> Self {
        RamDisk { blocks: Mutex::new(vec![[0u8; BSIZE]; nblocks]) }
    }
}

impl BlockDevice for RamDisk {
    fn block_size(&self) -> usize {
        BSIZE
    }

    fn read_block(&self, block_no: u32, buf: &mut [u8]) {
        let blocks = self.blocks.lock().expect("ramdisk mutex poisoned");
        let block = blocks.get(block_no as usize).expect("ramdisk: block_no out of range");
        buf.copy_from_slice(block);
    }

    fn write_block(&self, block_no: u32, buf: &[u8]) {
        let mut blocks = self.blocks.lock().expect("ramdisk mutex poisoned");
        let block = blocks.get_mut(block_no as usize).expect("ramdisk: block_no out of range");
        block.copy_from_slice(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_block() {
        let disk = RamDisk::new(4);
        let mut data = [0u8; BSIZE];
        data[0] = 7;
        data[BSIZE - 1] = 9;
        disk.write_block(2, &data);

        let mut out = [0u8; BSIZE];
        disk.read_block(2, &mut out);
        assert_eq!(out, data);
    }

    #[test]
    fn blocks_start_zeroed_and_are_independent() {
        let disk = RamDisk::new(2);
        let mut out = [1u8; BSIZE];
        disk.read_block(0, &mut out);
        assert_eq!(out, [0u8; BSIZE]);

        disk.write_block(0, &[2u8; BSIZE]);
        let mut other = [0u8; BSIZE];
        disk.read_block(1, &mut other);
        assert_eq!(other, [0u8; BSIZE]);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn out_of_range_block_panics() {
        let disk = RamDisk::new(1);
        let mut out = [0u8; BSIZE];
        disk.read_block(1, &mut out);
    }
}

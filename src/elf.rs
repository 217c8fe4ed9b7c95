//! ELF32 header layout (spec.md §4.F "Program loading").
//!
//! Grounded on the teacher's `elf.rs`: a `zerocopy`-decodable
//! `ElfHeader`/`ProgHeader` pair plus a `bitflags!` set of segment
//! permission bits, matching the wire format `exec()` reads directly
//! off disk.

use bitflags::bitflags;
use zerocopy::{AsBytes, FromBytes};

pub const ELF_MAGIC: u32 = 0x464c457f;

#[derive(AsBytes, FromBytes, Clone, Copy)]
#[repr(C)]
pub struct ElfHeader {
    pub magic: u32,
    pub ident: [u8; 12],
    pub kind: u16,
    pub machine: u16,
    pub version: u32,
    pub entry: u32,
    pub phoff: u32,
    pub shoff: u32,
    pub flags: u32,
    pub ehsize: u16,
    pub phentsize: u16,
    pub phnum: u16,
    pub shentsize: u16,
    pub shnum: u16,
    pub shstrndx: u16,
}

/// Segment types this kernel cares about; every other `ProgHeader`
/// entry is skipped (spec.md's loader only maps `PT_LOAD` segments).
pub const PT_LOAD: u32 = 1;

bitflags! {
    pub struct ProgFlags: u32 {
        const EXEC = 1;
        const WRITE = 2;
        const READ = 4;
    }
}

#[derive(AsBytes, FromBytes, Clone, Copy)]
#[repr(C)]
pub struct ProgHeader {
    pub kind: u32,
    pub off: u32,
    pub vaddr: u32,
    pub paddr: u32,
    pub filesz: u32,
    pub memsz: u32,
    pub flags: u32,
    pub align: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> ElfHeader {
        ElfHeader {
            magic: ELF_MAGIC,
            ident: [0; 12],
            kind: 2,
            machine: 3,
            version: 1,
            entry: 0x1000,
            phoff: core::mem::size_of::<ElfHeader>() as u32,
            shoff: 0,
            flags: 0,
            ehsize: core::mem::size_of::<ElfHeader>() as u16,
            phentsize: core::mem::size_of::<ProgHeader>() as u16,
            phnum: 1,
            shentsize: 0,
            shnum: 0,
            shstrndx: 0,
        }
    }

    #[test]
    fn header_round_trips_through_bytes() {
        let header = sample_header();
        let bytes = header.as_bytes();
        let decoded = ElfHeader::read_from_prefix(bytes).expect("decode");
        assert_eq!(decoded.magic, ELF_MAGIC);
        assert_eq!(decoded.entry, 0x1000);
        assert_eq!(decoded.phnum, 1);
    }

    #[test]
    fn short_buffer_fails_to_decode() {
        let bytes = [0u8; 4];
        assert!(ElfHeader::read_from_prefix(&bytes[..]).is_none());
    }

    #[test]
    fn prog_flags_distinguish_read_write_exec() {
        let flags = ProgFlags::READ | ProgFlags::WRITE;
        assert!(flags.contains(ProgFlags::READ));
        assert!(flags.contains(ProgFlags::WRITE));
        assert!(!flags.contains(ProgFlags::EXEC));
    }
}

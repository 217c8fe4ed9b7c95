//! Program loading (spec.md §4.F): replaces the calling process's
//! address space with a fresh one built from an ELF32 executable on
//! disk, including the argument vector.
//!
//! Grounded on the teacher's `exec.rs`: validate the ELF header, map
//! each `PT_LOAD` segment at its `vaddr`, leave one page unmapped as a
//! stack guard and map one page above that for the initial stack and
//! `argv`/`argc`, then atomically swap the new address space into the
//! running process only once every fallible step has succeeded (so a
//! bad binary leaves the caller's old address space, and thus the
//! caller, intact).

use zerocopy::FromBytes;

use crate::elf::{ElfHeader, ProgHeader, ELF_MAGIC, PT_LOAD};
use crate::fs::inode::InodeHandle;
use crate::kernel::kernel;
use crate::mmu::{pgroundup, PGSIZE};
use crate::param::MAXARG;
use crate::vm::PageTable;

/// Loads `path` as the calling process's new program image, passing
/// `argv` as its argument vector. On success, never returns to the
/// caller in the usual sense: the process's trap frame is rewritten to
/// resume at the new entry point. Returns an error (leaving the
/// process's existing image untouched) if the binary or arguments are
/// invalid.
pub fn exec(path: &InodeHandle, argv: &[&[u8]]) -> Result<(), &'static str> {
    if argv.len() > MAXARG {
        return Err("too many arguments");
    }

    let mut header_bytes = [0u8; core::mem::size_of::<ElfHeader>()];
    path.read_at(0, &mut header_bytes).map_err(|_| "read failed")?;
    let header = ElfHeader::read_from_prefix(&header_bytes[..]).ok_or("short elf header")?;
    if header.magic != ELF_MAGIC {
        return Err("not an ELF executable");
    }

    let mut pagetable = PageTable::new().ok_or("out of memory")?;
    let mut sz = 0usize;

    for i in 0..header.phnum {
        let off = header.phoff as usize + i as usize * core::mem::size_of::<ProgHeader>();
        let mut ph_bytes = [0u8; core::mem::size_of::<ProgHeader>()];
        path.read_at(off as u32, &mut ph_bytes).map_err(|_| "read failed")?;
        let ph = ProgHeader::read_from_prefix(&ph_bytes[..]).ok_or("short program header")?;
        if ph.kind != PT_LOAD {
            continue;
        }
        if ph.memsz < ph.filesz {
            return Err("segment memsz smaller than filesz");
        }
        let seg_end = (ph.vaddr as usize)
            .checked_add(ph.memsz as usize)
            .ok_or("segment overflows address space")?;
        sz = pagetable.resize(sz, seg_end).ok_or("out of memory")?;
        load_segment(&mut pagetable, path, ph.vaddr as usize, ph.off, ph.filesz as usize)?;
    }

    // Two pages above the program image: the lower is left unmapped as
    // a guard (a stack overflow faults instead of corrupting whatever
    // the loader placed above it), the upper holds argv/argc and the
    // initial stack.
    sz = pgroundup(sz);
    let stack_page = sz + PGSIZE;
    sz = pagetable.resize(stack_page, stack_page + PGSIZE).ok_or("out of memory")?;
    let mut stack_top = sz;

    let mut arg_pointers = [0u32; MAXARG + 1];
    for (i, arg) in argv.iter().enumerate().rev() {
        stack_top -= arg.len() + 1;
        stack_top &= !3; // keep the stack word-aligned
        if stack_top < stack_page {
            return Err("argument list too long");
        }
        pagetable.copy_out(stack_top, arg).ok_or("out of memory")?;
        pagetable.copy_out(stack_top + arg.len(), &[0]).ok_or("out of memory")?;
        arg_pointers[i] = stack_top as u32;
    }
    arg_pointers[argv.len()] = 0;

    let argv_bytes_len = (argv.len() + 1) * 4;
    stack_top -= argv_bytes_len;
    stack_top &= !3;
    if stack_top < stack_page {
        return Err("argument list too long");
    }
    let argv_ptr = stack_top;
    for (i, ptr) in arg_pointers[..=argv.len()].iter().enumerate() {
        pagetable
            .copy_out(argv_ptr + i * 4, &ptr.to_ne_bytes())
            .ok_or("out of memory")?;
    }

    let p = kernel().current_proc();
    // SAFETY: the calling process is the only one touching its own
    // trap frame and address space fields.
    unsafe {
        let old_pagetable = (*p).pagetable.replace(pagetable);
        (*p).sz = sz;
        let tf = &mut *(*p).tf;
        tf.eip = header.entry;
        tf.esp = stack_top as u32;
        tf.eax = argv.len() as u32;
        tf.ebx = argv_ptr as u32;
        // `%cr3` still points at `old_pagetable`'s directory; move it
        // onto the new one before the old one's frames (including its
        // own directory page) are freed out from under it.
        crate::proc::activate(p);
        drop(old_pagetable);
    }
    Ok(())
}

fn load_segment(
    pagetable: &mut PageTable,
    inode: &InodeHandle,
    vaddr: usize,
    file_off: u32,
    file_sz: usize,
) -> Result<(), &'static str> {
    let mut done = 0;
    let mut chunk = [0u8; 512];
    while done < file_sz {
        let n = chunk.len().min(file_sz - done);
        inode.read_at(file_off + done as u32, &mut chunk[..n]).map_err(|_| "read failed")?;
        pagetable.copy_out(vaddr + done, &chunk[..n]).ok_or("out of memory")?;
        done += n;
    }
    Ok(())
}

// SPDX-License-Identifier: Apache-2.0

//! The ELF loader used to map the library-OS image in simulation builds
//! (spec §1: "out of scope... produces `base` and `entry_point`"). The
//! protocol the rest of the launcher depends on is just that interface;
//! this gives it a real implementation using `goblin`, mapping each
//! `PT_LOAD` segment with the requested permissions.

use std::fs;

use anyhow::{bail, Context, Result};
use goblin::elf::Elf;
use mmarinus::{perms, Kind, Map};

pub struct LoadedImage {
    pub base: usize,
    pub entry: usize,
    /// Segment mappings kept alive for the process lifetime.
    pub segments: Vec<Map<perms::ReadWrite>>,
}

/// Loads the library-OS shared object at `path`, mapping each loadable
/// segment into a fresh anonymous region and copying its bytes in. Returns
/// the base address of the mapping and the (base-relocated) entry point.
pub fn load(path: &str) -> Result<LoadedImage> {
    let data = fs::read(path).with_context(|| format!("reading {}", path))?;
    let elf = Elf::parse(&data).with_context(|| format!("parsing ELF headers in {}", path))?;

    let max_vaddr = elf
        .program_headers
        .iter()
        .filter(|ph| ph.p_type == goblin::elf::program_header::PT_LOAD)
        .map(|ph| ph.p_vaddr + ph.p_memsz)
        .max()
        .unwrap_or(0);

    if max_vaddr == 0 {
        bail!("{} has no PT_LOAD segments", path);
    }

    // One reservation covering the whole image, so relative offsets between
    // segments are preserved regardless of where the kernel places it.
    let reservation = Map::map(max_vaddr as usize)
        .anywhere()
        .anonymously()
        .known::<perms::ReadWrite>(Kind::Private)
        .map_err(|e| e.err)
        .with_context(|| format!("reserving address space for {}", path))?;

    let base = reservation.addr();

    for ph in elf
        .program_headers
        .iter()
        .filter(|ph| ph.p_type == goblin::elf::program_header::PT_LOAD)
    {
        let dst = base + ph.p_vaddr as usize;
        let src_off = ph.p_offset as usize;
        let filesz = ph.p_filesz as usize;
        if src_off + filesz > data.len() {
            bail!("{} has a truncated PT_LOAD segment", path);
        }
        unsafe {
            std::ptr::copy_nonoverlapping(data[src_off..].as_ptr(), dst as *mut u8, filesz);
        }
    }

    let entry = base + elf.entry as usize;

    Ok(LoadedImage {
        base,
        entry,
        segments: vec![reservation],
    })
}

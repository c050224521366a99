// SPDX-License-Identifier: Apache-2.0

//! Shared-memory registration (spec §4.G.10): maps three files of the
//! configured size — `<name>`, `<name>-eo`, `<name>-oe` — for the
//! bidirectional shared-memory channel between host and enclave.

use anyhow::{bail, Context, Result};
use mmarinus::{perms, Kind, Map};

use crate::config::record::ShmemConfig;

fn register_one(path: &str, len: usize) -> Result<Map<perms::ReadWrite>> {
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;

    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
        .with_context(|| format!("unable to access shared memory {}", path))?;

    file.set_len(len as u64)
        .with_context(|| format!("ftruncate({})", path))?;

    Map::map(len)
        .anywhere()
        .from(file.as_raw_fd(), 0)
        .known::<perms::ReadWrite>(Kind::Shared)
        .map_err(|e| e.err)
        .with_context(|| format!("mmap({})", path))
}

/// Registers the shared-memory triple, or returns `Ok(None)` if shared
/// memory was not requested (no file name, or zero length).
pub fn register_shm(name: Option<&str>, len: u64) -> Result<Option<ShmemConfig>> {
    let name = match name {
        Some(n) if !n.is_empty() && len > 0 => n,
        _ => return Ok(None),
    };

    if len == 0 {
        bail!("invalid shared memory size 0");
    }
    let len = len as usize;

    let common = register_one(name, len)?;
    let enc_to_out = register_one(&format!("{}-eo", name), len)?;
    let out_to_enc = register_one(&format!("{}-oe", name), len)?;

    Ok(Some(ShmemConfig {
        common,
        enc_to_out,
        out_to_enc,
    }))
}

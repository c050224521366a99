// SPDX-License-Identifier: Apache-2.0

//! The configuration record (spec §3): a single, page-aligned allocation
//! shared by host and enclave. Every field is written once by the launcher
//! before any worker thread starts and is read-only thereafter, except the
//! two queues and the slot array, which the bridge protocol governs.

use std::ffi::c_void;
use std::net::Ipv4Addr;

use mmarinus::{perms, Map};

use crate::queue::MpmcQueue;
use crate::slot::SlotTable;

pub const DISK_MNT_MAX_PATH_LEN: usize = 255;
pub const HOSTNAME_MAX_LEN: usize = 64;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    Hardware,
    Simulation,
}

pub struct DiskConfig {
    pub fd: i32,
    pub mount_path: String,
    pub read_only: bool,
    pub encrypted: bool,
}

#[derive(Default)]
pub struct NetConfig {
    pub tap_fd: Option<i32>,
    pub ipv4_addr: Ipv4Addr,
    pub ipv4_gw: Ipv4Addr,
    pub ipv4_mask: u8,
    pub hostname: String,
}

/// The `shm_common` / `shm_enc_to_out` / `shm_out_to_enc` triple (spec
/// §4.G.10), each the same size, mapped from `<name>`, `<name>-eo`, and
/// `<name>-oe` respectively.
pub struct ShmemConfig {
    pub common: Map<perms::ReadWrite>,
    pub enc_to_out: Map<perms::ReadWrite>,
    pub out_to_enc: Map<perms::ReadWrite>,
}

/// The shared configuration record (spec §3). Owns the heap mapping, the
/// two bridge queues, and the syscall slot table; everything else is plain
/// data copied into the enclave's view of the record by the backend.
pub struct EnclaveConfig {
    pub mode: Mode,

    pub heap: Map<perms::ReadWrite>,
    pub stack_size: u64,
    pub max_user_threads: usize,

    pub submission_queue: MpmcQueue,
    pub return_queue: MpmcQueue,
    pub slots: SlotTable,

    pub disks: Vec<DiskConfig>,
    pub net: NetConfig,
    pub shmem: Option<ShmemConfig>,

    /// Host vDSO data page address, or `None` if unavailable/disabled.
    pub vvar: Option<*const c_void>,

    pub nproc_conf: usize,
    pub nproc_online: usize,

    pub argv: Vec<String>,

    /// Results of ELF mapping, simulation mode only.
    pub base: usize,
    pub entry: usize,
}

// SAFETY: `vvar`/`heap`/`base`/`entry` are raw addresses into mappings that
// outlive every thread that reads them; the record is built once by the
// launcher before any worker thread is spawned and never mutated
// concurrently except through `submission_queue`/`return_queue`/`slots`,
// which are independently `Sync`.
unsafe impl Sync for EnclaveConfig {}
unsafe impl Send for EnclaveConfig {}

impl EnclaveConfig {
    pub fn heap_ptr(&self) -> *mut c_void {
        self.heap.as_ptr() as *mut c_void
    }

    pub fn heap_size(&self) -> usize {
        self.heap.size()
    }
}

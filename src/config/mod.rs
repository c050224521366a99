// SPDX-License-Identifier: Apache-2.0

pub mod affinity;
pub mod env;
pub mod record;

pub use record::{DiskConfig, EnclaveConfig, Mode, NetConfig, ShmemConfig};

/// Knobs read once at startup (spec §6 environment variable table).
pub struct Settings {
    pub cmdline: String,
    pub sigpipe: bool,
    pub non_pie: bool,
    pub ethreads: u64,
    pub sthreads: u64,
    pub max_user_threads: u64,
    pub stack_size: u64,
    pub heap_size: u64,
    pub sspins: u64,
    pub ssleep: u64,
    pub real_time_prio: bool,
    pub ethreads_affinity: String,
    pub sthreads_affinity: String,
    pub gettime_vdso: bool,
    pub tap: Option<String>,
    pub tap_offload: bool,
    pub tap_mtu: Option<u64>,
    pub ip4: Option<String>,
    pub gw4: Option<String>,
    pub mask4: Option<String>,
    pub hostname: Option<String>,
    pub hostnet: bool,
    pub hd_ro: bool,
    pub hd_verity: Option<String>,
    pub hds: String,
    pub shmem_file: Option<String>,
    pub shmem_size: u64,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            cmdline: env::str_var("CMDLINE", ""),
            sigpipe: env::bool_var("SIGPIPE", false),
            non_pie: env::bool_var("NON_PIE", false),
            ethreads: env::u64_var("ETHREADS", 1, 1024),
            sthreads: env::u64_var("STHREADS", 4, 1024),
            max_user_threads: env::u64_var("MAX_USER_THREADS", 256, 100_000),
            stack_size: env::u64_var("STACK_SIZE", 512 * 1024, u64::MAX),
            heap_size: env::u64_var("HEAP", 200 * 1024 * 1024, u64::MAX),
            sspins: env::u64_var("SSPINS", 100, u64::MAX),
            ssleep: env::u64_var("SSLEEP", 4000, u64::MAX),
            real_time_prio: env::bool_var("REAL_TIME_PRIO", false),
            ethreads_affinity: env::str_var("ETHREADS_AFFINITY", ""),
            sthreads_affinity: env::str_var("STHREADS_AFFINITY", ""),
            gettime_vdso: env::bool_var("GETTIME_VDSO", true),
            tap: env::opt_str_var("TAP"),
            tap_offload: env::bool_var("TAP_OFFLOAD", false),
            tap_mtu: std::env::var("TAP_MTU").ok().and_then(|v| v.parse().ok()),
            ip4: env::opt_str_var("IP4"),
            gw4: env::opt_str_var("GW4"),
            mask4: env::opt_str_var("MASK4"),
            hostname: env::opt_str_var("HOSTNAME"),
            hostnet: env::bool_var("HOSTNET", false),
            hd_ro: env::bool_var("HD_RO", false),
            hd_verity: env::opt_str_var("HD_VERITY"),
            hds: env::str_var("HDS", ""),
            shmem_file: env::opt_str_var("SHMEM_FILE"),
            shmem_size: env::u64_var("SHMEM_SIZE", 0, 1024 * 1024 * 1024),
        }
    }
}

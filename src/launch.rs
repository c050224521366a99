// SPDX-License-Identifier: Apache-2.0

//! The launch sequencer (spec §4.G): the bounded, ordered assembly of the
//! enclave configuration record and the start-up of the two worker pools.
//! Every step aborts the whole process with a descriptive message on
//! failure; nothing here retries.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use mmarinus::{perms, Kind, Map};

#[cfg(feature = "backend-hw")]
use crate::backend::hw::HwBackend;
use crate::backend::{sim::SimBackend, EnclaveBackend};
use crate::backoff::Backoff;
use crate::cli::Cli;
use crate::config::affinity;
use crate::config::record::{EnclaveConfig, Mode};
use crate::config::Settings;
use crate::disk;
use crate::elf;
use crate::net::{self, NetSettings};
use crate::queue::MpmcQueue;
use crate::shmem;
use crate::signal;
use crate::slot::SlotTable;
use crate::stats::DebugStats;
use crate::term::TerminalLocks;
use crate::vdso::{self, ClockGettime};
use crate::worker::{driver, syscall_worker};

/// Low-mapping offset used to reserve space for a non-PIE guest's default
/// text base (spec §4.G.5, §9 Design Notes "Non-PIE overlap check").
const SIM_NON_PIE_ENCL_MMAP_OFFSET: usize = 0x0020_0000;

extern "C" {
    /// Linker-provided start of the launcher's own text segment, used by
    /// the non-PIE overlap guard.
    static __executable_start: u8;
}

/// Runs the whole launch sequence and blocks until the enclave terminates.
/// Returns the process exit code.
pub fn run(cli: Cli) -> Result<i32> {
    let settings = Settings::from_env();

    // Step 2: signal handling.
    if !settings.sigpipe {
        unsafe { libc::signal(libc::SIGPIPE, libc::SIG_IGN) };
    }
    let exiting = Arc::new(AtomicBool::new(false));

    let debug_stats = if crate::config::env::bool_var("PRINT_HOST_SYSCALL_STATS", false)
        || crate::config::env::bool_var("PRINT_ENCLAVE_EXIT_STATS", false)
    {
        Some(Arc::new(DebugStats::new()))
    } else {
        None
    };
    if let Some(stats) = debug_stats.clone() {
        install_sigint_dump(stats);
    }
    crate::config::env::warn_ignored_debug_vars(&["TRACE_", "PRINT_"]);

    // Step 3: backoff parameters.
    let backoff = Backoff::new(settings.sspins as u32, settings.ssleep);

    // Step 4: resolve the library-OS image path relative to our own binary.
    let libos_path = resolve_libos_path()?;

    // Determine mode up front: hardware unless the "backend-hw" feature is
    // disabled at compile time, in which case simulation is the only
    // option (spec §1 "mode: {hardware, simulation}").
    #[cfg(feature = "backend-hw")]
    let mode = Mode::Hardware;
    #[cfg(not(feature = "backend-hw"))]
    let mode = Mode::Simulation;

    // Steps 5-6: heap + queues + slot table.
    let (backend, heap, max_user_threads, base, entry): (
        Arc<dyn EnclaveBackend>,
        Map<perms::ReadWrite>,
        usize,
        usize,
        usize,
    ) = match mode {
        Mode::Simulation => {
            let heap = allocate_sim_heap(settings.heap_size as usize, settings.non_pie)?;
            let image = elf::load(&libos_path)
                .with_context(|| format!("loading library-OS image {}", libos_path))?;
            let (base, entry) = (image.base, image.entry);
            let backend: Arc<dyn EnclaveBackend> = Arc::new(unsafe { SimBackend::new(image) });
            (backend, heap, settings.max_user_threads as usize, base, entry)
        }
        #[cfg(feature = "backend-hw")]
        Mode::Hardware => {
            let (hw, tcs_num) = HwBackend::init(
                std::env::var("KEY").ok().as_deref(),
                Some(settings.heap_size).filter(|_| std::env::var("KEY").is_ok()),
                settings.non_pie,
                std::ptr::null(),
            )?;
            let heap = Map::map(settings.heap_size as usize)
                .anywhere()
                .anonymously()
                .known::<perms::ReadWrite>(Kind::Private)
                .map_err(|e| e.err)
                .context("mmap enclave heap")?;
            let max_user_threads = (settings.max_user_threads as usize).min(tcs_num.max(1));
            (Arc::new(hw) as Arc<dyn EnclaveBackend>, heap, max_user_threads, 0, 0)
        }
        #[cfg(not(feature = "backend-hw"))]
        Mode::Hardware => unreachable!("hardware backend not compiled in"),
    };

    let submission_queue = MpmcQueue::with_capacity(256);
    let return_queue = MpmcQueue::with_capacity(256);
    let slots = SlotTable::new(max_user_threads);

    // Step 7: vDSO.
    let vvar = vdso::capture_vvar(settings.gettime_vdso);
    let clock = if settings.gettime_vdso {
        ClockGettime::resolve().map(Arc::new)
    } else {
        None
    };

    // Step 8: disks.
    let disks = disk::register_hds(&cli.disk_image, settings.hd_ro, &settings.hds)
        .context("registering disks")?;

    // Step 9: network.
    let net = net::register_net(NetSettings {
        tap: settings.tap.as_deref(),
        tap_offload: settings.tap_offload,
        ip4: settings.ip4.as_deref(),
        gw4: settings.gw4.as_deref(),
        mask4: settings.mask4.as_deref(),
        hostname: settings.hostname.as_deref(),
    })
    .context("registering network")?;

    // Step 10: shared memory.
    let shmem = shmem::register_shm(settings.shmem_file.as_deref(), settings.shmem_size)
        .context("registering shared memory")?;

    // Step 11: CPU counts, both clamped to the enclave-thread budget.
    let nproc_online = cpu_count(libc::_SC_NPROCESSORS_ONLN);
    let reported = nproc_online.min(settings.ethreads as usize).max(1);
    let nproc_conf = cpu_count(libc::_SC_NPROCESSORS_CONF)
        .min(settings.ethreads as usize)
        .max(1);

    // Step 12: affinity plans.
    let ethreads_affinity = affinity::parse(&settings.ethreads_affinity, nproc_online);
    let sthreads_affinity = affinity::parse(&settings.sthreads_affinity, nproc_online);

    let mut argv = vec![cli.executable.clone()];
    argv.extend(cli.args.iter().cloned());

    let config = Arc::new(EnclaveConfig {
        mode,
        heap,
        stack_size: settings.stack_size,
        max_user_threads,
        submission_queue,
        return_queue,
        slots,
        disks,
        net,
        shmem,
        vvar,
        nproc_conf,
        nproc_online: reported,
        argv,
        base,
        entry,
    });

    if mode == Mode::Hardware {
        signal::install(Arc::clone(&backend), Arc::clone(&exiting));
    }

    // Step 13: start the two pools.
    let terminal = Arc::new(TerminalLocks::new());

    let syscall_handles: Vec<_> = (0..settings.sthreads)
        .map(|i| {
            let config = Arc::clone(&config);
            let terminal = Arc::clone(&terminal);
            let clock = clock.clone();
            let exiting = Arc::clone(&exiting);
            let stats = debug_stats.clone();
            let cpu = pinned_cpu(&sthreads_affinity, i as usize, nproc_online);
            std::thread::Builder::new()
                .name(format!("sgx-lkl-hostw-{}", i))
                .spawn(move || {
                    pin_to_cpu(cpu);
                    syscall_worker::run(config, terminal, clock, backoff, exiting, stats);
                })
                .expect("spawning host syscall worker")
        })
        .collect();

    let driver_handles: Vec<_> = (0..settings.ethreads)
        .map(|i| {
            let backend = Arc::clone(&backend);
            let exiting = Arc::clone(&exiting);
            let stats = debug_stats.clone();
            let cpu = pinned_cpu(&ethreads_affinity, i as usize, nproc_online);
            let real_time = settings.real_time_prio;
            std::thread::Builder::new()
                .name(format!("sgx-lkl-encl-{}", i))
                .spawn(move || {
                    pin_to_cpu(cpu);
                    if real_time && !set_fifo_priority() {
                        log::error!(
                            "[ Launcher ] failed to set real-time FIFO priority for enclave thread {}; \
                             check /etc/security/limits.conf rtprio settings",
                            i
                        );
                        std::process::exit(1);
                    }
                    signal::register_thread(i as usize);
                    let code = driver::run(&*backend, i as usize, exiting, stats.as_deref());
                    signal::unregister_thread();
                    code
                })
                .expect("spawning enclave thread driver")
        })
        .collect();

    // A debugger attachment point, called right before any enclave driver
    // would ordinarily be reached through this path (spec §4.G, the note
    // right after step 13 about a designated no-op before the driver pool
    // is entered).
    debugger_attach_point(&config);

    // Step 15: join the host-syscall pool; the process normally only ends
    // when an enclave driver observes TERMINATE and the loop above calls
    // `std::process::exit`.
    let mut exit_code = None;
    for h in driver_handles {
        if let Some(code) = h.join().expect("enclave driver thread panicked") {
            exit_code = Some(code);
        }
    }
    for h in syscall_handles {
        let _ = h.join();
    }

    if let Some(stats) = debug_stats {
        stats.dump();
    }

    Ok(exit_code.unwrap_or(0))
}

/// A no-op kept for debugger attachment (spec §4.G, paragraph after step
/// 13): breaking here with the configuration pointer already in scope lets
/// a debugger resolve in-enclave symbols before execution proceeds.
#[inline(never)]
fn debugger_attach_point(_config: &Arc<EnclaveConfig>) {}

fn resolve_libos_path() -> Result<String> {
    let exe = std::env::current_exe().context("resolving own executable path")?;
    let dir = exe.parent().unwrap_or_else(|| Path::new("."));
    let candidate: PathBuf = dir.join("libsgx-lkl.so");
    Ok(candidate.to_string_lossy().into_owned())
}

fn allocate_sim_heap(heap_size: usize, non_pie: bool) -> Result<Map<perms::ReadWrite>> {
    if non_pie {
        let launcher_text_start = unsafe { &__executable_start as *const u8 as usize };
        if SIM_NON_PIE_ENCL_MMAP_OFFSET + heap_size > launcher_text_start {
            bail!(
                "non-PIE enclave heap of {} bytes at offset {:#x} would overlap the launcher's own \
                 text segment at {:#x}; the maximum allowed heap size here is {} bytes",
                heap_size,
                SIM_NON_PIE_ENCL_MMAP_OFFSET,
                launcher_text_start,
                launcher_text_start.saturating_sub(SIM_NON_PIE_ENCL_MMAP_OFFSET)
            );
        }
        Map::map(heap_size)
            .at(SIM_NON_PIE_ENCL_MMAP_OFFSET)
            .anonymously()
            .known::<perms::ReadWrite>(Kind::Private)
            .map_err(|e| e.err)
            .context("mmap non-PIE enclave heap")
    } else {
        Map::map(heap_size)
            .anywhere()
            .anonymously()
            .known::<perms::ReadWrite>(Kind::Private)
            .map_err(|e| e.err)
            .context("mmap enclave heap")
    }
}

fn cpu_count(which: libc::c_int) -> usize {
    let n = unsafe { libc::sysconf(which) };
    if n > 0 {
        n as usize
    } else {
        1
    }
}

fn pinned_cpu(affinity: &[usize], index: usize, nproc: usize) -> usize {
    if affinity.is_empty() {
        if nproc == 0 {
            0
        } else {
            index % nproc
        }
    } else {
        affinity[index % affinity.len()]
    }
}

fn pin_to_cpu(cpu: usize) {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(cpu, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
    }
}

fn set_fifo_priority() -> bool {
    unsafe {
        let prio = libc::sched_get_priority_max(libc::SCHED_FIFO);
        if prio < 0 {
            return false;
        }
        let param = libc::sched_param {
            sched_priority: prio,
        };
        libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) == 0
    }
}

fn install_sigint_dump(stats: Arc<DebugStats>) {
    use std::sync::Once;
    static SIGINT_STATE_INIT: Once = Once::new();
    static mut SIGINT_STATE: Option<Arc<DebugStats>> = None;

    SIGINT_STATE_INIT.call_once(|| unsafe {
        SIGINT_STATE = Some(stats);
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = sigint_handler as usize;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGINT, &sa, std::ptr::null_mut());
    });

    extern "C" fn sigint_handler(_signum: libc::c_int) {
        // SAFETY: initialized before this handler can ever be invoked.
        if let Some(stats) = unsafe { SIGINT_STATE.as_ref() } {
            stats.dump();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pinned_cpu_round_robins_without_affinity() {
        assert_eq!(pinned_cpu(&[], 0, 4), 0);
        assert_eq!(pinned_cpu(&[], 5, 4), 1);
    }

    #[test]
    fn pinned_cpu_cycles_through_affinity_list() {
        let list = vec![0, 1, 3];
        assert_eq!(pinned_cpu(&list, 0, 4), 0);
        assert_eq!(pinned_cpu(&list, 1, 4), 1);
        assert_eq!(pinned_cpu(&list, 2, 4), 3);
        assert_eq!(pinned_cpu(&list, 3, 4), 0);
    }

    #[test]
    fn non_pie_heap_rejects_overlap_with_launcher_text() {
        let launcher_text_start = unsafe { &__executable_start as *const u8 as usize };
        let huge = launcher_text_start.saturating_sub(SIM_NON_PIE_ENCL_MMAP_OFFSET) + 1;
        assert!(allocate_sim_heap(huge, true).is_err());
    }
}

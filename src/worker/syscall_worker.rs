// SPDX-License-Identifier: Apache-2.0

//! Host syscall worker main loop (spec §4.D): pop a slot index off the
//! submission queue, execute the requested syscall on the host, and
//! publish the result either through the direct-return fast path or the
//! return queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::backoff::Backoff;
use crate::config::record::EnclaveConfig;
use crate::slot::{STATUS_DIRECT_PENDING, SyscallSlot};
use crate::stats::DebugStats;
use crate::term::TerminalLocks;
use crate::vdso::ClockGettime;

/// Runs one host-syscall worker's loop for the life of the process. Never
/// returns in practice: the only way out is the enclave calling `exit`,
/// which the driver pool handles by terminating the whole process.
pub fn run(
    config: Arc<EnclaveConfig>,
    terminal: Arc<TerminalLocks>,
    clock: Option<Arc<ClockGettime>>,
    backoff: Backoff,
    exiting: Arc<AtomicBool>,
    stats: Option<Arc<DebugStats>>,
) {
    let mut spins = 0u32;
    loop {
        let index = match config.submission_queue.dequeue() {
            Some(i) => i,
            None => {
                if exiting.load(Ordering::Relaxed) {
                    return;
                }
                spins = backoff.step(spins);
                continue;
            }
        };
        spins = 0;

        let slot = config.slots.get(index);
        let direct = slot.load_status() == STATUS_DIRECT_PENDING;

        service_one(slot, &terminal, clock.as_deref(), stats.as_deref());

        if direct {
            slot.publish_direct_done();
        } else {
            let mut put_spins = 0u32;
            while !config.return_queue.enqueue(index) {
                put_spins = backoff.step(put_spins);
            }
        }
    }
}

fn service_one(
    slot: &SyscallSlot,
    terminal: &TerminalLocks,
    clock: Option<&ClockGettime>,
    stats: Option<&DebugStats>,
) {
    let syscallno = slot.syscallno();
    let args = slot.args();

    if let Some(stats) = stats {
        stats.record_syscall(syscallno);
    }

    let write_fd = if syscallno as i64 == libc::SYS_write {
        terminal.for_fd(args[0] as i32)
    } else {
        None
    };
    let _guard = write_fd.map(|lock| lock.lock());

    let ret = if syscallno as i64 == libc::SYS_clock_gettime {
        dispatch_clock_gettime(args, clock)
    } else {
        dispatch_raw(syscallno, args)
    };

    slot.set_ret_val(ret as u64);
}

/// Services `clock_gettime` via the resolved vDSO symbol when available, to
/// exploit the same fast path the host enjoys (spec §4.D step 3). Falls
/// back to the raw syscall if no vDSO entry point was resolved.
fn dispatch_clock_gettime(args: [u64; 6], clock: Option<&ClockGettime>) -> i64 {
    let clockid = args[0] as libc::clockid_t;
    let tp = args[1] as *mut libc::timespec;

    let rc = match clock {
        Some(clock) => clock.call(clockid, tp),
        None => unsafe { libc::clock_gettime(clockid, tp) },
    };

    if rc < 0 {
        -(std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EINVAL) as i64)
    } else {
        rc as i64
    }
}

/// Executes the raw syscall with the six argument registers loaded
/// verbatim from the slot (spec §4.D step 3, §9 "Raw inline syscall").
fn dispatch_raw(syscallno: u64, args: [u64; 6]) -> i64 {
    unsafe {
        libc::syscall(
            syscallno as i64,
            args[0],
            args[1],
            args[2],
            args[3],
            args[4],
            args[5],
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn dispatch_clock_gettime_without_vdso_uses_raw_syscall() {
        let mut tp = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        let args = [
            libc::CLOCK_MONOTONIC as u64,
            &mut tp as *mut _ as u64,
            0,
            0,
            0,
            0,
        ];
        let rc = dispatch_clock_gettime(args, None);
        assert_eq!(rc, 0);
        assert!(tp.tv_sec > 0 || tp.tv_nsec > 0);
    }

    #[test]
    fn dispatch_raw_getpid_matches_libc() {
        let args = [0; 6];
        let ret = dispatch_raw(libc::SYS_getpid as u64, args);
        assert_eq!(ret as i32, unsafe { libc::getpid() });
    }
}

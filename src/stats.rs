// SPDX-License-Identifier: Apache-2.0

//! Debug statistics surface (supplemented from `sgx_lkl_run.c`'s
//! `_enclave_exit_stats`/`_host_syscall_stats` arrays). Spec §1 lists
//! "debug statistics and tracing surface" as out of scope in general, but
//! §4.G.2 explicitly calls for an optional SIGINT stats dump, so the
//! feature itself is kept; only its internal layout is ours to choose.
//!
//! Enabled by `PRINT_HOST_SYSCALL_STATS=1` / `PRINT_ENCLAVE_EXIT_STATS=1`
//! rather than a cargo feature, matching the original's env-var gate.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::backend::ExitReason;

const MAX_SYSCALLNO: usize = 512;

/// Exit-reason buckets, ordered the same way the original debug build's
/// `exit_reason_names` table is, so a dump is directly comparable.
#[derive(Debug, Default)]
struct ExitReasonCounters {
    terminate: AtomicU64,
    cpuid: AtomicU64,
    sleep: AtomicU64,
    doresume: AtomicU64,
    error: AtomicU64,
    other: AtomicU64,
}

/// Process-wide counters, installed once and shared by every worker thread.
#[derive(Debug, Default)]
pub struct DebugStats {
    exit_reasons: ExitReasonCounters,
    syscalls: Vec<AtomicU64>,
}

impl DebugStats {
    pub fn new() -> Self {
        let syscalls = (0..MAX_SYSCALLNO).map(|_| AtomicU64::new(0)).collect();
        Self {
            exit_reasons: ExitReasonCounters::default(),
            syscalls,
        }
    }

    pub fn record_exit_reason(&self, reason: &ExitReason) {
        let counter = match reason {
            ExitReason::Terminate(_) => &self.exit_reasons.terminate,
            ExitReason::Cpuid { .. } => &self.exit_reasons.cpuid,
            ExitReason::Sleep { .. } => &self.exit_reasons.sleep,
            ExitReason::DoResume => &self.exit_reasons.doresume,
            ExitReason::Error(_) => &self.exit_reasons.error,
            ExitReason::Other(_) => &self.exit_reasons.other,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_syscall(&self, syscallno: u64) {
        if let Some(counter) = self.syscalls.get(syscallno as usize) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Prints a human-readable dump to stderr, matching the original's
    /// `[ Stats ]`-tagged table.
    pub fn dump(&self) {
        eprintln!("[ Stats ] enclave exit reasons:");
        eprintln!("[ Stats ]   TERMINATE = {}", self.exit_reasons.terminate.load(Ordering::Relaxed));
        eprintln!("[ Stats ]   CPUID     = {}", self.exit_reasons.cpuid.load(Ordering::Relaxed));
        eprintln!("[ Stats ]   SLEEP     = {}", self.exit_reasons.sleep.load(Ordering::Relaxed));
        eprintln!("[ Stats ]   DORESUME  = {}", self.exit_reasons.doresume.load(Ordering::Relaxed));
        eprintln!("[ Stats ]   ERROR     = {}", self.exit_reasons.error.load(Ordering::Relaxed));
        eprintln!("[ Stats ]   OTHER     = {}", self.exit_reasons.other.load(Ordering::Relaxed));

        eprintln!("[ Stats ] host syscalls:");
        for (no, counter) in self.syscalls.iter().enumerate() {
            let n = counter.load(Ordering::Relaxed);
            if n > 0 {
                eprintln!("[ Stats ]   syscall {} = {}", no, n);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn counts_each_exit_reason_independently() {
        let stats = DebugStats::new();
        stats.record_exit_reason(&ExitReason::Terminate(0));
        stats.record_exit_reason(&ExitReason::Terminate(0));
        stats.record_exit_reason(&ExitReason::Sleep { nanos: 5 });
        assert_eq!(stats.exit_reasons.terminate.load(Ordering::Relaxed), 2);
        assert_eq!(stats.exit_reasons.sleep.load(Ordering::Relaxed), 1);
        assert_eq!(stats.exit_reasons.cpuid.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn syscall_counter_ignores_out_of_range_numbers() {
        let stats = DebugStats::new();
        stats.record_syscall(3);
        stats.record_syscall(3);
        stats.record_syscall(u64::MAX);
        assert_eq!(stats.syscalls[3].load(Ordering::Relaxed), 2);
    }
}

// SPDX-License-Identifier: Apache-2.0

//! Enclave thread driver loop (spec §4.E): repeatedly enters the enclave
//! at a bound `slot_id`, dispatches on the returned exit reason, and either
//! re-enters or terminates the process. Identical for both backends; only
//! the `EnclaveBackend` implementation differs (spec §9 "Resume/entry as a
//! capability").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::backend::{EnclaveBackend, ExitReason, CALL_RESUME, CALL_THREAD_CREATE};
use crate::stats::DebugStats;

/// Runs one enclave driver thread until `TERMINATE` or `ERROR`, or until
/// `exiting` is observed set by some other thread.
///
/// Returns the process exit code the caller should use if this thread was
/// the one that observed `TERMINATE`/`ERROR`; `None` if it stopped because
/// `exiting` was already set by a sibling.
pub fn run(
    backend: &dyn EnclaveBackend,
    slot_id: usize,
    exiting: Arc<AtomicBool>,
    stats: Option<&DebugStats>,
) -> Option<i32> {
    let mut call_id = CALL_THREAD_CREATE;

    loop {
        if exiting.load(Ordering::Acquire) {
            return None;
        }

        let reason = backend.enter(slot_id, call_id, std::ptr::null_mut());
        if let Some(stats) = stats {
            stats.record_exit_reason(&reason);
        }

        match reason {
            ExitReason::Terminate(code) => {
                exiting.store(true, Ordering::Release);
                return Some(code);
            }
            ExitReason::Cpuid { reg_ptr } => {
                // SAFETY: the enclave guarantees `reg_ptr` is a valid,
                // exclusively-owned pointer to four consecutive `u32`s
                // (eax, ebx, ecx, edx) for the duration of this call.
                unsafe { do_cpuid(reg_ptr) };
                call_id = CALL_RESUME;
            }
            ExitReason::Sleep { nanos } => {
                std::thread::sleep(std::time::Duration::from_nanos(nanos));
                call_id = CALL_RESUME;
            }
            ExitReason::DoResume => {
                backend.resume(slot_id);
                call_id = CALL_RESUME;
            }
            ExitReason::Error(code) => {
                log::error!("[ Launcher ] enclave thread {} exited with error {}", slot_id, code);
                exiting.store(true, Ordering::Release);
                return Some(1);
            }
            ExitReason::Other(code) => {
                log::warn!("[ Launcher ] enclave thread {} unexpected exit reason {}", slot_id, code);
                call_id = CALL_RESUME;
            }
        }
    }
}

/// Executes `cpuid` with `eax`/`ecx` taken from `reg_ptr[0]`/`reg_ptr[2]`,
/// writing `eax`/`ebx`/`ecx`/`edx` back into `reg_ptr[0..4]` (spec §4.E
/// `CPUID`).
///
/// # Safety
/// `reg_ptr` must point to four valid, writable `u32`s.
#[cfg(target_arch = "x86_64")]
unsafe fn do_cpuid(reg_ptr: *mut u32) {
    use std::arch::x86_64::__cpuid_count;

    let eax_in = *reg_ptr;
    let ecx_in = *reg_ptr.add(2);
    let result = __cpuid_count(eax_in, ecx_in);
    *reg_ptr = result.eax;
    *reg_ptr.add(1) = result.ebx;
    *reg_ptr.add(2) = result.ecx;
    *reg_ptr.add(3) = result.edx;
}

#[cfg(not(target_arch = "x86_64"))]
unsafe fn do_cpuid(_reg_ptr: *mut u32) {
    log::warn!("[ Launcher ] cpuid emulation is only implemented on x86_64");
}

#[cfg(test)]
mod test {
    use super::*;
    use std::ffi::c_void;
    use std::sync::atomic::AtomicUsize;

    struct ScriptedBackend {
        reasons: Vec<ExitReason>,
        calls: AtomicUsize,
    }

    impl EnclaveBackend for ScriptedBackend {
        fn enter(&self, _slot_id: usize, _call_id: u64, _arg: *mut c_void) -> ExitReason {
            let i = self.calls.fetch_add(1, Ordering::Relaxed);
            match &self.reasons[i] {
                ExitReason::Terminate(c) => ExitReason::Terminate(*c),
                ExitReason::Sleep { nanos } => ExitReason::Sleep { nanos: *nanos },
                ExitReason::DoResume => ExitReason::DoResume,
                ExitReason::Error(c) => ExitReason::Error(*c),
                ExitReason::Other(c) => ExitReason::Other(*c),
                ExitReason::Cpuid { reg_ptr } => ExitReason::Cpuid { reg_ptr: *reg_ptr },
            }
        }

        fn resume(&self, _slot_id: usize) {}
    }

    #[test]
    fn terminate_sets_exiting_and_returns_code() {
        let backend = ScriptedBackend {
            reasons: vec![
                ExitReason::Sleep { nanos: 1 },
                ExitReason::Terminate(7),
            ],
            calls: AtomicUsize::new(0),
        };
        let exiting = Arc::new(AtomicBool::new(false));
        let code = run(&backend, 0, Arc::clone(&exiting), None);
        assert_eq!(code, Some(7));
        assert!(exiting.load(Ordering::Acquire));
    }

    #[test]
    fn preset_exiting_flag_stops_without_entering() {
        let backend = ScriptedBackend {
            reasons: vec![ExitReason::Terminate(1)],
            calls: AtomicUsize::new(0),
        };
        let exiting = Arc::new(AtomicBool::new(true));
        let code = run(&backend, 0, exiting, None);
        assert_eq!(code, None);
        assert_eq!(backend.calls.load(Ordering::Relaxed), 0);
    }
}

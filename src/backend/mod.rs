// SPDX-License-Identifier: Apache-2.0

//! The enclave backend capability (spec §9 Design Notes: "Resume/entry as a
//! capability"). `enter`, `resume`, and enclave creation/heap-update are all
//! opaque per spec §1 ("hardware-enclave primitives... opaque"); this trait
//! is the seam between the driver loop (identical for both backends) and
//! whichever concrete backend produced the configuration record.

#[cfg(feature = "backend-hw")]
pub mod hw;
pub mod sim;

use std::ffi::c_void;

/// Call ids the driver passes back into `enter` (spec §4.E/§4.F).
pub const CALL_THREAD_CREATE: u64 = 0;
pub const CALL_RESUME: u64 = 1;
pub const CALL_HANDLE_SIGNAL: u64 = 2;

/// The small set of exit reasons `enter` may return (spec §4.E).
#[derive(Debug)]
pub enum ExitReason {
    Terminate(i32),
    Cpuid { reg_ptr: *mut u32 },
    Sleep { nanos: u64 },
    DoResume,
    Error(u64),
    Other(u64),
}

/// An enclave execution backend: either the hardware primitives (SGX) or
/// the in-process simulation mode. The enclave-thread driver (spec §4.E)
/// and the signal forwarder (spec §4.F) are written once against this
/// trait.
pub trait EnclaveBackend: Send + Sync {
    /// Re-enters the enclave at `slot_id` with `call_id`, blocking until
    /// the enclave exits. `arg` is call-id-specific (e.g. the signal
    /// descriptor for `CALL_HANDLE_SIGNAL`).
    fn enter(&self, slot_id: usize, call_id: u64, arg: *mut c_void) -> ExitReason;

    /// Hardware-mode-only: resumes a previously AEX'd TCS without going
    /// through `enter`'s call-id protocol (spec §4.E `DORESUME`).
    fn resume(&self, slot_id: usize);
}

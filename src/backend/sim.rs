// SPDX-License-Identifier: Apache-2.0

//! Simulation backend: runs the library-OS image in-process instead of
//! inside real SGX, by calling straight into its loaded entry point using
//! the same `(tcs_id, call_id, arg) -> (reason, payload)` calling
//! convention the hardware backend's `enter_enclave` uses (spec §4.G.14,
//! "simulation mode runs the same protocol without real hardware").

use std::ffi::c_void;
use std::os::raw::c_int;

use super::{EnclaveBackend, ExitReason};
use crate::elf::LoadedImage;

type EnterFn = extern "C" fn(tcs_id: c_int, call_id: u64, arg: *mut c_void, ret: *mut u64);

const EXIT_TERMINATE: u64 = 0;
const EXIT_ERROR: u64 = 2;
const EXIT_SLEEP: u64 = 3;
const EXIT_CPUID: u64 = 4;
const EXIT_DORESUME: u64 = 5;

pub struct SimBackend {
    entry: EnterFn,
    // Kept alive so the mapped segments backing `entry` aren't unmapped
    // out from under us for the life of the backend.
    _image: LoadedImage,
}

impl SimBackend {
    /// Wraps an already-loaded library-OS image, treating its ELF entry
    /// point as the simulated enclave's `enter_enclave` equivalent.
    ///
    /// # Safety
    /// `image.entry` must point to code compiled to honor the
    /// `(tcs_id, call_id, arg, *mut ret)` calling convention documented
    /// above; this holds for any library-OS image built against the same
    /// simulation shim the real hardware backend's link-time contract
    /// describes.
    pub unsafe fn new(image: LoadedImage) -> Self {
        let entry: EnterFn = std::mem::transmute::<usize, EnterFn>(image.entry);
        Self {
            entry,
            _image: image,
        }
    }
}

// SAFETY: `entry` is a plain function pointer into a mapping that outlives
// the backend; calling it from multiple enclave-driver threads is the same
// concurrency model the hardware backend's TCS table already allows.
unsafe impl Send for SimBackend {}
unsafe impl Sync for SimBackend {}

impl EnclaveBackend for SimBackend {
    fn enter(&self, slot_id: usize, call_id: u64, arg: *mut c_void) -> ExitReason {
        let mut ret = [0u64; 2];
        (self.entry)(slot_id as c_int, call_id, arg, ret.as_mut_ptr());
        decode(ret[0], ret[1])
    }

    fn resume(&self, slot_id: usize) {
        // Simulation mode has no hardware AEX/EENTER distinction: a resume
        // is just another call-id-driven entry.
        let mut ret = [0u64; 2];
        (self.entry)(
            slot_id as c_int,
            super::CALL_RESUME,
            std::ptr::null_mut(),
            ret.as_mut_ptr(),
        );
    }
}

fn decode(reason: u64, payload: u64) -> ExitReason {
    match reason {
        EXIT_TERMINATE => ExitReason::Terminate(payload as i32),
        EXIT_CPUID => ExitReason::Cpuid {
            reg_ptr: payload as *mut u32,
        },
        EXIT_SLEEP => ExitReason::Sleep { nanos: payload },
        EXIT_DORESUME => ExitReason::DoResume,
        EXIT_ERROR => ExitReason::Error(payload),
        other => ExitReason::Other(other),
    }
}

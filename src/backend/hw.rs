// SPDX-License-Identifier: Apache-2.0

//! Hardware backend: the opaque SGX enclave-runtime entry points (spec §1,
//! "Out of scope... only their interfaces are specified"). These are
//! linked in from the enclave-runtime support library; this module only
//! declares the calling convention and translates the raw `(reason,
//! payload)` pair `enter_enclave` returns into an [`ExitReason`].

use std::ffi::c_void;
use std::os::raw::c_char;

use super::{EnclaveBackend, ExitReason};

// Exit-reason codes, numbered the same way the enclave runtime's own debug
// build does, so a raw trace log lines up with these names.
const EXIT_TERMINATE: u64 = 0;
#[allow(dead_code)]
const EXIT_SYSCALL: u64 = 1; // defined by the runtime, never produced on this path
const EXIT_ERROR: u64 = 2;
const EXIT_SLEEP: u64 = 3;
const EXIT_CPUID: u64 = 4;
const EXIT_DORESUME: u64 = 5;

extern "C" {
    fn init_sgx() -> *mut c_char;
    fn get_tcs_num() -> i32;
    fn enter_enclave(tcs_id: i32, call_id: u64, arg: *mut c_void, ret: *mut u64);
    fn create_enclave_mem(
        p: *mut c_char,
        einit_path: *const c_char,
        base_zero: i32,
        base_zero_max: *const c_void,
    ) -> u64;
    fn enclave_update_heap(p: *mut c_void, new_heap: u64, key_path: *const c_char);
    fn eresume(tcs_id: u64);
}

pub struct HwBackend;

impl HwBackend {
    /// Maps the library-OS enclave file into memory and performs whatever
    /// one-time EINIT/signature work the runtime needs. Returns the number
    /// of hardware thread-control-structures (TCSes) available, which
    /// upper-bounds the enclave-driver pool.
    pub fn init(
        key_path: Option<&str>,
        heap_size: Option<u64>,
        non_pie: bool,
        base_zero_max: *const c_void,
    ) -> anyhow::Result<(Self, usize)> {
        use std::ffi::CString;

        let enclave_start = unsafe { init_sgx() };

        if let Some(heap_size) = heap_size {
            let key = key_path
                .ok_or_else(|| anyhow::anyhow!("heap size given but no enclave signing key (KEY)"))?;
            let key_c = CString::new(key)?;
            unsafe {
                enclave_update_heap(enclave_start as *mut c_void, heap_size, key_c.as_ptr());
            }
        }

        unsafe {
            create_enclave_mem(
                enclave_start,
                std::ptr::null(),
                non_pie as i32,
                base_zero_max,
            );
        }

        let tcs_num = unsafe { get_tcs_num() };
        if tcs_num <= 0 {
            anyhow::bail!("no TCS number specified");
        }

        Ok((Self, tcs_num as usize))
    }
}

impl EnclaveBackend for HwBackend {
    fn enter(&self, slot_id: usize, call_id: u64, arg: *mut c_void) -> ExitReason {
        let mut ret = [0u64; 2];
        unsafe { enter_enclave(slot_id as i32, call_id, arg, ret.as_mut_ptr()) };
        decode(ret[0], ret[1])
    }

    fn resume(&self, slot_id: usize) {
        unsafe { eresume(slot_id as u64) };
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

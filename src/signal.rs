// SPDX-License-Identifier: Apache-2.0

//! Signal forwarder (spec §4.F, hardware mode only): SIGILL and SIGSEGV
//! handlers that build a small descriptor and re-enter the enclave at the
//! current thread's slot with `call_id = HANDLE_SIGNAL`, using the same
//! exit-reason dispatch as the driver loop, restricted to
//! `CPUID`/`DORESUME`/`TERMINATE`.
//!
//! Per spec §9 Design Notes ("Per-thread 'current slot id'"), the slot a
//! signal handler should re-enter is looked up by OS thread id in a small
//! table rather than kept in a mutable global or `static mut`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};

use crate::backend::{EnclaveBackend, ExitReason, CALL_HANDLE_SIGNAL};

static REGISTRY_INIT: Once = Once::new();
static mut REGISTRY: Option<Mutex<HashMap<libc::pid_t, usize>>> = None;

fn registry() -> &'static Mutex<HashMap<libc::pid_t, usize>> {
    REGISTRY_INIT.call_once(|| unsafe {
        REGISTRY = Some(Mutex::new(HashMap::new()));
    });
    unsafe { REGISTRY.as_ref().unwrap() }
}

fn current_tid() -> libc::pid_t {
    unsafe { libc::syscall(libc::SYS_gettid) as libc::pid_t }
}

/// Associates the calling OS thread with `slot_id`. Called by a driver
/// thread before it starts entering the enclave.
pub fn register_thread(slot_id: usize) {
    registry().lock().unwrap().insert(current_tid(), slot_id);
}

/// Removes the calling OS thread's association, if any.
pub fn unregister_thread() {
    registry().lock().unwrap().remove(&current_tid());
}

fn slot_for_current_thread() -> Option<usize> {
    registry().lock().unwrap().get(&current_tid()).copied()
}

/// The descriptor the enclave observes at the nested entry (spec §6
/// "Signal protocol"): `signum` plus a signal-specific `aux` word — the
/// current timestamp counter for SIGILL (so the enclave can emulate
/// `rdtsc`), or the `siginfo_t` pointer for SIGSEGV.
#[repr(C)]
pub struct SignalDescriptor {
    pub signum: i32,
    pub aux: u64,
}

/// Re-enters the enclave to deliver a forwarded signal (spec §4.F). If
/// `exiting` is already set, returns without entering. The nested
/// `enter()` call's exit-reason dispatch is restricted to
/// `CPUID`/`DORESUME`/`TERMINATE`; any other reason is logged and the
/// thread simply returns to the interrupted host context rather than
/// looping (spec §9 Open Question 2: re-enter-and-log, never abort from
/// within a handler).
pub fn forward_signal(
    backend: &dyn EnclaveBackend,
    slot_id: usize,
    descriptor: &SignalDescriptor,
    exiting: &AtomicBool,
) {
    if exiting.load(Ordering::Acquire) {
        return;
    }

    let arg = descriptor as *const SignalDescriptor as *mut std::ffi::c_void;
    match backend.enter(slot_id, CALL_HANDLE_SIGNAL, arg) {
        ExitReason::Terminate(code) => {
            exiting.store(true, Ordering::Release);
            std::process::exit(code);
        }
        ExitReason::Cpuid { .. } | ExitReason::DoResume => {
            backend.resume(slot_id);
        }
        other => {
            log::error!(
                "[ Launcher ] signal-forwarded entry on slot {} returned unexpected {:?}, resuming",
                slot_id,
                other
            );
        }
    }
}

#[cfg(target_arch = "x86_64")]
fn read_tsc() -> u64 {
    unsafe { std::arch::x86_64::_rdtsc() }
}

#[cfg(not(target_arch = "x86_64"))]
fn read_tsc() -> u64 {
    0
}

/// The global signal forwarding state, installed once by the launcher and
/// reachable from the raw `extern "C"` signal handlers, which cannot
/// otherwise be given closures or captured state (spec §9 "Global mutable
/// state").
struct ForwarderState {
    backend: Arc<dyn EnclaveBackend>,
    exiting: Arc<AtomicBool>,
}

static STATE_INIT: Once = Once::new();
static mut STATE: Option<ForwarderState> = None;

/// Installs the SIGILL/SIGSEGV handlers (spec §4.G step 2, hardware mode
/// only). Must be called exactly once, before any driver thread starts.
pub fn install(backend: Arc<dyn EnclaveBackend>, exiting: Arc<AtomicBool>) {
    STATE_INIT.call_once(|| unsafe {
        STATE = Some(ForwarderState { backend, exiting });
    });

    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = sigill_handler as usize;
        sa.sa_flags = libc::SA_SIGINFO;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGILL, &sa, std::ptr::null_mut());

        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = sigsegv_handler as usize;
        sa.sa_flags = libc::SA_SIGINFO;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGSEGV, &sa, std::ptr::null_mut());
    }
}

extern "C" fn sigill_handler(signum: libc::c_int, _info: *mut libc::siginfo_t, _ctx: *mut libc::c_void) {
    handle(signum, read_tsc());
}

extern "C" fn sigsegv_handler(signum: libc::c_int, info: *mut libc::siginfo_t, _ctx: *mut libc::c_void) {
    handle(signum, info as u64);
}

fn handle(signum: libc::c_int, aux: u64) {
    let slot_id = match slot_for_current_thread() {
        Some(id) => id,
        None => {
            // A signal landed on a thread the forwarder doesn't track
            // (e.g. a host-syscall worker); nothing to forward it to.
            return;
        }
    };

    let descriptor = SignalDescriptor { signum, aux };

    // SAFETY: `install` runs before any driver thread starts, so `STATE`
    // is fully initialized by the time a signal can land here.
    let state = unsafe { STATE.as_ref().expect("signal forwarder not installed") };
    forward_signal(&*state.backend, slot_id, &descriptor, &state.exiting);
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn thread_registration_round_trips() {
        register_thread(42);
        assert_eq!(slot_for_current_thread(), Some(42));
        unregister_thread();
        assert_eq!(slot_for_current_thread(), None);
    }
}

// SPDX-License-Identifier: Apache-2.0

//! vDSO capture (spec §4.G.7): stashes the host's vDSO data page address in
//! the configuration record so the enclave can use the same fast
//! `clock_gettime` path the host does, and resolves the `clock_gettime`
//! vDSO symbol directly for the host syscall worker's own fast path
//! (spec §4.D step 3).

use std::ffi::c_void;

use vdso::Vdso;

/// `AT_SYSINFO_EHDR` offset from the vDSO data page to its ELF header, used
/// by the library-OS to locate `vvar` the same way the host kernel does.
const VVAR_OFFSET: usize = 0x3000;

/// Captures `vvar`, or `None` if vDSO use was disabled or unavailable.
pub fn capture_vvar(enabled: bool) -> Option<*const c_void> {
    if !enabled {
        return None;
    }

    let base = unsafe { libc::getauxval(libc::AT_SYSINFO_EHDR) };
    if base == 0 {
        log::warn!("[ Launcher ] no vDSO info in auxiliary vector, vDSO will not be used");
        return None;
    }

    Some((base as usize - VVAR_OFFSET) as *const c_void)
}

/// A resolved `__vdso_clock_gettime`, used by the host syscall worker to
/// service `clock_gettime` relays without a real syscall instruction
/// (spec §4.D step 3).
pub struct ClockGettime {
    sym: extern "C" fn(clockid: libc::clockid_t, tp: *mut libc::timespec) -> libc::c_int,
}

impl ClockGettime {
    pub fn resolve() -> Option<Self> {
        let vdso = Vdso::locate()?;
        let sym = vdso.lookup("clock_gettime")? as usize;
        // SAFETY: the vDSO's `clock_gettime` symbol has the same signature
        // as libc's; `vdso::Vdso::lookup` gives us a valid function pointer
        // into the kernel-mapped vDSO page for the lifetime of the process.
        let sym = unsafe {
            std::mem::transmute::<
                usize,
                extern "C" fn(libc::clockid_t, *mut libc::timespec) -> libc::c_int,
            >(sym)
        };
        Some(Self { sym })
    }

    pub fn call(&self, clockid: libc::clockid_t, tp: *mut libc::timespec) -> libc::c_int {
        (self.sym)(clockid, tp)
    }
}

// SPDX-License-Identifier: Apache-2.0

//! Terminal output serializer (spec §4.I): two process-wide spin-based
//! mutual-exclusion primitives, one per standard stream, so that concurrent
//! in-enclave `write(2, ...)`/`write(1, ...)` calls relayed through the
//! syscall bridge never interleave at the byte level.

use std::sync::atomic::{AtomicBool, Ordering};

/// A minimal spinlock, the Rust equivalent of the original launcher's
/// `pthread_spinlock_t`. Acquisition backs off with the same pause-then-park
/// strategy as [`crate::backoff`], but uncapped since terminal contention is
/// expected to be brief.
pub struct SpinLock {
    locked: AtomicBool,
}

impl SpinLock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    pub fn lock(&self) -> SpinGuard<'_> {
        let mut spins: u32 = 0;
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spins += 1;
            if spins < 100 {
                std::hint::spin_loop();
            } else {
                std::thread::yield_now();
            }
        }
        SpinGuard { lock: self }
    }
}

pub struct SpinGuard<'a> {
    lock: &'a SpinLock,
}

impl Drop for SpinGuard<'_> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

/// Two process-wide terminal locks, one per fd. Only `write` syscalls to
/// `stdout`/`stderr` take these (spec §4.D step 2); no other syscall does.
pub struct TerminalLocks {
    pub stdout: SpinLock,
    pub stderr: SpinLock,
}

impl TerminalLocks {
    pub const fn new() -> Self {
        Self {
            stdout: SpinLock::new(),
            stderr: SpinLock::new(),
        }
    }

    /// Returns the lock guarding `fd` if it is a standard stream the bridge
    /// serializes, or `None` for any other fd.
    pub fn for_fd(&self, fd: i32) -> Option<&SpinLock> {
        match fd {
            libc::STDOUT_FILENO => Some(&self.stdout),
            libc::STDERR_FILENO => Some(&self.stderr),
            _ => None,
        }
    }
}

impl Default for TerminalLocks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn serializes_interleaved_writers() {
        // Emulate N "in-enclave" writers racing to append to a shared
        // buffer through one lock, the same role the stdout spinlock plays
        // for real `write` syscalls.
        let lock = Arc::new(SpinLock::new());
        let buf = Arc::new(std::sync::Mutex::new(Vec::<u8>::new()));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let lock = Arc::clone(&lock);
                let buf = Arc::clone(&buf);
                thread::spawn(move || {
                    let msg = format!("msg-{}\n", i);
                    let _g = lock.lock();
                    buf.lock().unwrap().write_all(msg.as_bytes()).unwrap();
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        let out = buf.lock().unwrap();
        let text = String::from_utf8(out.clone()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 8, "no message bytes should have merged");
        for i in 0..8 {
            assert!(lines.contains(&format!("msg-{}", i).as_str()));
        }
    }
}

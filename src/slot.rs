// SPDX-License-Identifier: Apache-2.0

//! The syscall slot table (spec §3/§4.C): a fixed array of request/response
//! records, one per concurrently in-flight in-enclave syscall. Slot
//! identity is purely positional — its index into the array, which is also
//! the token carried on the submission/return queues.
//!
//! Ownership of a slot's non-atomic fields passes producer -> host ->
//! producer exactly once per syscall (spec §3 invariants), so they live in
//! `UnsafeCell`s: the `status` word (and, for non-direct slots, the
//! submission/return queues) is the only synchronization, never a lock.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, Ordering};

use const_default::ConstDefault;

/// `status` values, spec §3.
pub const STATUS_IDLE: u32 = 0;
pub const STATUS_DIRECT_PENDING: u32 = 1;
pub const STATUS_DIRECT_DONE: u32 = 2;

/// One syscall request/response record.
///
/// Field order and size are part of the host/enclave wire contract
/// (spec §6): six machine-word arguments, a return value, and a status
/// word, `repr(C)` so the layout is stable across the boundary.
#[repr(C)]
pub struct SyscallSlot {
    syscallno: UnsafeCell<u64>,
    args: UnsafeCell<[u64; 6]>,
    ret_val: UnsafeCell<u64>,
    status: AtomicU32,
}

// SAFETY: every field is guarded by the `status` handoff protocol
// documented on this type; callers on either side of the boundary only
// touch a slot's cells while they hold ownership under that protocol.
unsafe impl Sync for SyscallSlot {}

impl ConstDefault for SyscallSlot {
    const DEFAULT: Self = SyscallSlot {
        syscallno: UnsafeCell::new(0),
        args: UnsafeCell::new([0; 6]),
        ret_val: UnsafeCell::new(0),
        status: AtomicU32::new(STATUS_IDLE),
    };
}

impl Default for SyscallSlot {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl SyscallSlot {
    /// Read the syscall number. Safe to call once the host has dequeued
    /// this slot's index: the queue's acquire/release pair establishes
    /// happens-before with the producer's writes.
    pub fn syscallno(&self) -> u64 {
        unsafe { *self.syscallno.get() }
    }

    pub fn arg(&self, i: usize) -> u64 {
        unsafe { (*self.args.get())[i] }
    }

    pub fn args(&self) -> [u64; 6] {
        unsafe { *self.args.get() }
    }

    pub fn ret_val(&self) -> u64 {
        unsafe { *self.ret_val.get() }
    }

    /// Host-side write of the syscall result. Must only be called by the
    /// worker that currently owns this slot (i.e. the one that dequeued its
    /// index), and must happen-before either the return-queue enqueue or
    /// `publish_direct_done`.
    pub fn set_ret_val(&self, val: u64) {
        unsafe { *self.ret_val.get() = val };
    }

    /// `status` as observed before dispatch.
    pub fn load_status(&self) -> u32 {
        self.status.load(Ordering::Acquire)
    }

    /// Writes a new request into the slot: the producer side of the
    /// protocol. The real producer is the in-enclave library-OS, outside
    /// this crate; this is exposed so bridge-level tests can drive the
    /// relay without a real enclave. `direct` selects the direct-return
    /// fast path (`status = 1`) over the return-queue path (`status = 0`).
    pub fn submit(&self, syscallno: u64, args: [u64; 6], direct: bool) {
        unsafe {
            *self.syscallno.get() = syscallno;
            *self.args.get() = args;
        }
        let status = if direct {
            STATUS_DIRECT_PENDING
        } else {
            STATUS_IDLE
        };
        // Release: must happen-before the index is enqueued on the
        // submission queue, so the host's dequeue-then-load_status sees
        // these writes (spec §9 Open Question 1).
        self.status.store(status, Ordering::Release);
    }

    /// Publish `ret_val` having already been written, with the release
    /// ordering the direct-return fast path requires: the producer's
    /// matching `Acquire` load must not observe `status == 2` before it can
    /// see `ret_val` (spec §9 Open Question 1).
    pub fn publish_direct_done(&self) {
        self.status.store(STATUS_DIRECT_DONE, Ordering::Release);
    }

}

/// Fixed array of `max_user_threads` slots (spec §4.C). The host only ever
/// indexes into it with values popped off the submission queue; it never
/// scans the table.
pub struct SlotTable {
    slots: Box<[SyscallSlot]>,
}

impl SlotTable {
    pub fn new(max_user_threads: usize) -> Self {
        let slots = (0..max_user_threads)
            .map(|_| SyscallSlot::DEFAULT)
            .collect();
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: usize) -> &SyscallSlot {
        &self.slots[index]
    }

    /// Raw pointer handed to the enclave side of the boundary as part of
    /// the configuration record.
    pub fn as_ptr(&self) -> *const SyscallSlot {
        self.slots.as_ptr()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn direct_return_round_trip_is_visible() {
        let table = Arc::new(SlotTable::new(4));
        let idx = 2;

        table.get(idx).submit(39 /* SYS_clock_gettime on x86_64 */, [0; 6], true);

        let t = {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                let slot = table.get(idx);
                assert_eq!(slot.load_status(), STATUS_DIRECT_PENDING);
                slot.set_ret_val(42);
                slot.publish_direct_done();
            })
        };
        t.join().unwrap();

        let slot = table.get(idx);
        while slot.load_status() != STATUS_DIRECT_DONE {
            thread::yield_now();
        }
        assert_eq!(slot.ret_val(), 42);
    }

    #[test]
    fn fresh_table_is_zeroed() {
        let table = SlotTable::new(8);
        for i in 0..8 {
            let slot = table.get(i);
            assert_eq!(slot.load_status(), STATUS_IDLE);
            assert_eq!(slot.ret_val(), 0);
        }
    }
}

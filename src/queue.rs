// SPDX-License-Identifier: Apache-2.0

//! A bounded, lock-free, multi-producer/multi-consumer ring queue of
//! word-sized tokens (syscall slot indices). This is the classic
//! Vyukov-style sequence-numbered ring: each cell carries its own sequence
//! counter so producers and consumers never contend on a single head/tail
//! pair beyond a single fetch-add.
//!
//! The queue is built over a caller-supplied buffer so its storage can live
//! in the same page-aligned mapping as the rest of the configuration record
//! (spec §6, "Queue wire layout") — no allocation happens on the
//! `enqueue`/`dequeue` hot path.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Cell {
    sequence: AtomicUsize,
    token: UnsafeCell<MaybeUninit<usize>>,
}

/// A bounded MPMC ring queue over `capacity` (power-of-two) token slots.
pub struct MpmcQueue {
    buffer: Box<[Cell]>,
    mask: usize,
    enqueue_pos: AtomicUsize,
    dequeue_pos: AtomicUsize,
}

// SAFETY: all access to `token` is guarded by the sequence-number protocol
// below, so `Cell`'s `UnsafeCell` is safe to share across threads.
unsafe impl Sync for Cell {}

impl MpmcQueue {
    /// Build a queue with the given capacity, which must be a power of two.
    /// The reference configuration uses 256 entries (spec §3).
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity.is_power_of_two(), "queue capacity must be a power of two");
        assert!(capacity > 0);

        let buffer: Box<[Cell]> = (0..capacity)
            .map(|i| Cell {
                sequence: AtomicUsize::new(i),
                token: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();

        Self {
            buffer,
            mask: capacity - 1,
            enqueue_pos: AtomicUsize::new(0),
            dequeue_pos: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Attempt to enqueue `token`. Returns `false` iff the queue was full
    /// at the linearization point.
    pub fn enqueue(&self, token: usize) -> bool {
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
        loop {
            let cell = &self.buffer[pos & self.mask];
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq as isize - pos as isize;

            if diff == 0 {
                match self.enqueue_pos.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe { (*cell.token.get()).write(token) };
                        // Release: publishes both the token write and the
                        // slot ownership transfer to the consumer that
                        // observes this sequence number.
                        cell.sequence.store(pos + 1, Ordering::Release);
                        return true;
                    }
                    Err(cur) => pos = cur,
                }
            } else if diff < 0 {
                return false; // full
            } else {
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Attempt to dequeue a token. Returns `None` iff the queue was empty
    /// at the linearization point.
    pub fn dequeue(&self) -> Option<usize> {
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);
        loop {
            let cell = &self.buffer[pos & self.mask];
            let seq = cell.sequence.load(Ordering::Acquire);
            let diff = seq as isize - (pos as isize + 1);

            if diff == 0 {
                match self.dequeue_pos.compare_exchange_weak(
                    pos,
                    pos + 1,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let token = unsafe { (*cell.token.get()).assume_init() };
                        cell.sequence
                            .store(pos + self.mask + 1, Ordering::Release);
                        return Some(token);
                    }
                    Err(cur) => pos = cur,
                }
            } else if diff < 0 {
                return None; // empty
            } else {
                pos = self.dequeue_pos.load(Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn single_threaded_fifo() {
        let q = MpmcQueue::with_capacity(8);
        for i in 0..8 {
            assert!(q.enqueue(i));
        }
        assert!(!q.enqueue(99), "queue should report full");
        for i in 0..8 {
            assert_eq!(q.dequeue(), Some(i));
        }
        assert_eq!(q.dequeue(), None);
    }

    #[test]
    fn wraps_around() {
        let q = MpmcQueue::with_capacity(4);
        for round in 0..100 {
            assert!(q.enqueue(round));
            assert_eq!(q.dequeue(), Some(round));
        }
    }

    #[test]
    fn concurrent_producers_consumers_preserve_token_set() {
        let q = Arc::new(MpmcQueue::with_capacity(256));
        let producers = 4;
        let per_producer = 2000;

        let handles: Vec<_> = (0..producers)
            .map(|p| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for i in 0..per_producer {
                        let token = p * per_producer + i;
                        loop {
                            if q.enqueue(token) {
                                break;
                            }
                            thread::yield_now();
                        }
                    }
                })
            })
            .collect();

        let total = producers * per_producer;
        let consumer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                let mut seen = vec![false; total];
                let mut count = 0;
                while count < total {
                    if let Some(tok) = q.dequeue() {
                        assert!(!seen[tok], "token {} observed twice", tok);
                        seen[tok] = true;
                        count += 1;
                    } else {
                        thread::yield_now();
                    }
                }
                seen
            })
        };

        for h in handles {
            h.join().unwrap();
        }
        let seen = consumer.join().unwrap();
        assert!(seen.iter().all(|&b| b), "every enqueued token must be dequeued exactly once");
    }
}

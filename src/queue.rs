//! A bounded multi-producer, single-consumer queue of owned batches.
//!
//! ## Design
//!
//! The queue is a ring of slots, each tagged with a sequence number that
//! records whether the slot is free or occupied and for which lap of the
//! ring. A producer claims the slot at `tail` with a compare-and-swap,
//! writes its value, then publishes by bumping the slot's sequence. The
//! single consumer reads at `head` without any contention of its own:
//! only the slot sequences synchronize it with producers.
//!
//! Sequence numbers grow without bound, so a stale claim can never be
//! confused with a fresh one after the ring wraps. The `head` and `tail`
//! indices live on separate cache lines so producers hammering `tail` do
//! not invalidate the consumer's line.
//!
//! A full queue rejects the push and hands the value back; backpressure
//! (spin-then-yield) lives at the call site.

use crossbeam_utils::CachePadded;
use std::{
    cell::UnsafeCell,
    mem::MaybeUninit,
    sync::atomic::{AtomicUsize, Ordering},
};

struct Slot<T> {
    /// Equals the slot's claim position when free, one past it when the
    /// value is published, and jumps a full lap once consumed.
    seq: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

pub(crate) struct IngestQueue<T> {
    slots: Box<[Slot<T>]>,
    mask: usize,
    /// Next position producers claim.
    tail: CachePadded<AtomicUsize>,
    /// Next position the consumer reads. Written only by the consumer.
    head: CachePadded<AtomicUsize>,
}

unsafe impl<T: Send> Send for IngestQueue<T> {}
unsafe impl<T: Send> Sync for IngestQueue<T> {}

impl<T> IngestQueue<T> {
    /// Creates a queue holding at least `capacity` elements, rounded up
    /// to a power of two (and never less than two).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        let slots = (0..capacity)
            .map(|i| Slot {
                seq: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();

        Self {
            slots,
            mask: capacity - 1,
            tail: CachePadded::new(AtomicUsize::new(0)),
            head: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Attempts to enqueue `value`, returning it when the queue is full.
    ///
    /// Safe to call from any number of threads. Ownership transfers to
    /// the queue only on `Ok`.
    pub fn push(&self, value: T) -> Result<(), T> {
        let mut pos = self.tail.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos & self.mask];
            let seq = slot.seq.load(Ordering::Acquire);
            let lag = (seq as isize).wrapping_sub(pos as isize);

            if lag == 0 {
                // The slot is free for this lap; try to claim it.
                match self.tail.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe { (*slot.value.get()).write(value) };
                        slot.seq.store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if lag < 0 {
                // The consumer has not freed this slot yet.
                return Err(value);
            } else {
                // Another producer claimed the slot; catch up.
                pos = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Dequeues one element without blocking.
    ///
    /// Single-consumer: exactly one thread may call this at a time. The
    /// manager is the sole consumer while it runs; the drain takes over
    /// only after joining it.
    pub fn pop(&self) -> Option<T> {
        let pos = self.head.load(Ordering::Relaxed);
        let slot = &self.slots[pos & self.mask];
        let seq = slot.seq.load(Ordering::Acquire);

        if (seq as isize).wrapping_sub(pos.wrapping_add(1) as isize) == 0 {
            let value = unsafe { (*slot.value.get()).assume_init_read() };
            // Free the slot for the producers' next lap.
            slot.seq
                .store(pos.wrapping_add(self.mask + 1), Ordering::Release);
            self.head.store(pos.wrapping_add(1), Ordering::Relaxed);
            Some(value)
        } else {
            None
        }
    }
}

impl<T> Drop for IngestQueue<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

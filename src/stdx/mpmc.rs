//! Bounded MPMC (Multi-Producer, Multi-Consumer) ring buffer.
//!
//! # Design
//!
//! Based on Dmitry Vyukov's bounded MPMC queue, the canonical fixed-capacity
//! multi-producer ring used as reference by crossbeam's `ArrayQueue`, Rigtorp's
//! `MPMCQueue`, and DPDK's `rte_ring`. Each slot carries its own atomic
//! sequence number; the sequence value relative to `head`/`tail` tells a
//! producer or consumer whether the slot is ready for it.
//!
//! # Key properties
//!
//! - **Non-blocking**: `try_enqueue` and `try_dequeue` never wait. A full ring
//!   hands the value back to the producer; an empty ring returns `None`.
//! - **Per-slot linearization**: the slot's sequence is the publication point.
//!   The `head`/`tail` CAS decides *who* owns a position; the sequence decides
//!   *when* the position's contents become visible.
//! - **Cache-line padded**: `head`, `tail`, and every slot live on their own
//!   cache lines. Producers and consumers otherwise invalidate each other's
//!   lines on every operation and throughput collapses under contention.
//! - **Power-of-2 capacity**: bitwise AND masking for O(1) slot indexing.
//! - **Monotonic indices**: `head`/`tail` never wrap at capacity; the mask
//!   wraps positions, which sidesteps the ABA problem on index values.
//!
//! # Slot state encoding
//!
//! For the slot at position `p` on round `k` (capacity `C`):
//!
//! ```text
//! sequence == p + k*C      slot is empty, ready for the producer of index p + k*C
//! sequence == p + k*C + 1  slot is full, ready for the consumer of index p + k*C
//! ```
//!
//! A producer that loads `sequence - tail < 0` is looking at a slot still
//! holding last round's value: the ring is full. A consumer that loads
//! `sequence - (head + 1) < 0` is looking at a slot not yet published: the
//! ring is empty.
//!
//! # Ordering rationale
//!
//! ```text
//! Producer writes slot, then Release-stores sequence  →  consumer Acquire-loads sequence, then reads slot
//! Consumer reads slot, then Release-stores sequence   →  producer Acquire-loads sequence, then writes slot
//! ```
//!
//! The Release store on the sequence pairs with the Acquire load by the next
//! owner, ordering the slot write before the slot read in both directions.
//! The `head`/`tail` CAS uses AcqRel so a claimed index orders the claimer's
//! slot access after the claim.
//!
//! # Safety
//!
//! Uses `unsafe` for `MaybeUninit` slot access and raw reads. A slot is only
//! written after its sequence proves it empty and only read after its
//! sequence proves it full; the CAS on `head`/`tail` guarantees a position
//! has exactly one owner per round.

#[cfg(not(loom))]
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(loom)]
use loom::sync::atomic::{AtomicUsize, Ordering};

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;

use crossbeam_utils::CachePadded;

/// One cell of the ring: a sequence number and storage for one value.
///
/// Padded to a cache line by the containing slice so that two threads
/// operating on adjacent positions never contend on the same line.
struct Slot<T> {
    /// Encodes the slot's state relative to `head`/`tail` (see module docs).
    sequence: AtomicUsize,
    /// Valid exactly when `sequence` marks the slot full.
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded MPMC ring buffer with wait-free producer and consumer fast paths.
///
/// # Invariants
///
/// - Capacity is a power of two `>= 2`; `mask = capacity - 1`.
/// - `tail - head` is always in `[0, capacity]`.
/// - The slot at position `p` has `sequence ∈ {p + k*C, p + k*C + 1}` for
///   some round `k >= 0`.
/// - A value is observed by exactly one consumer; a slot is written by at
///   most one producer per round.
pub struct MpmcRing<T> {
    slots: Box<[CachePadded<Slot<T>>]>,
    mask: usize,
    /// Next consumer index.
    head: CachePadded<AtomicUsize>,
    /// Next producer index.
    tail: CachePadded<AtomicUsize>,
}

// SAFETY: The sequence protocol ensures producers and consumers access
// disjoint slots, and the Release/Acquire pairing on each slot's sequence
// transfers ownership of the stored value across threads.
unsafe impl<T: Send> Send for MpmcRing<T> {}
unsafe impl<T: Send> Sync for MpmcRing<T> {}

impl<T> MpmcRing<T> {
    /// Create a ring with the given capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is not a power of two or is less than 2.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity >= 2, "ring capacity must be >= 2");
        assert!(
            capacity.is_power_of_two(),
            "ring capacity must be a power of two"
        );

        // Slot p starts at sequence p: empty, ready for round-0 producers.
        let slots = (0..capacity)
            .map(|position| {
                CachePadded::new(Slot {
                    sequence: AtomicUsize::new(position),
                    value: UnsafeCell::new(MaybeUninit::uninit()),
                })
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            slots,
            mask: capacity - 1,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Attempt to enqueue `value`.
    ///
    /// Returns `Ok(())` once the value is committed (exactly one future
    /// dequeue will observe it), or `Err(value)` if the ring is full.
    ///
    /// # Ordering
    ///
    /// 1. Load `tail` (Relaxed) and the target slot's sequence (Acquire).
    /// 2. `sequence == tail`: claim the position with an AcqRel CAS on
    ///    `tail`. On success, write the value, then Release-store
    ///    `tail + 1` into the sequence, which publishes the value.
    /// 3. `sequence < tail`: the slot still holds last round's value; full.
    /// 4. `sequence > tail`: another producer advanced `tail`; reload.
    pub fn try_enqueue(&self, value: T) -> Result<(), T> {
        let mut tail = self.tail.load(Ordering::Relaxed);

        loop {
            let slot = &self.slots[tail & self.mask];
            let sequence = slot.sequence.load(Ordering::Acquire);
            let state = sequence as isize - tail as isize;

            if state == 0 {
                match self.tail.compare_exchange_weak(
                    tail,
                    tail.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: Winning the CAS makes this thread the sole
                        // owner of position `tail` for this round, and the
                        // sequence check proved the slot empty. No consumer
                        // reads it until the Release store below.
                        unsafe { (*slot.value.get()).write(value) };
                        slot.sequence
                            .store(tail.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    // CAS failure hands back the current tail; retry there.
                    Err(current) => tail = current,
                }
            } else if state < 0 {
                return Err(value);
            } else {
                tail = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Attempt to dequeue a value.
    ///
    /// Returns `Some(value)` for exactly one prior committed enqueue, or
    /// `None` if the ring is empty.
    ///
    /// Mirrors `try_enqueue` against `head`, comparing the sequence with
    /// `head + 1`. After moving the value out, the sequence is set to
    /// `head + capacity` with Release, re-publishing the slot for the
    /// producer of the next round.
    pub fn try_dequeue(&self) -> Option<T> {
        let mut head = self.head.load(Ordering::Relaxed);

        loop {
            let slot = &self.slots[head & self.mask];
            let sequence = slot.sequence.load(Ordering::Acquire);
            let state = sequence as isize - head.wrapping_add(1) as isize;

            if state == 0 {
                match self.head.compare_exchange_weak(
                    head,
                    head.wrapping_add(1),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: Winning the CAS makes this thread the sole
                        // consumer of position `head`, and the sequence check
                        // proved the slot full. The producer's Release store
                        // on the sequence makes the value write visible.
                        let value = unsafe { (*slot.value.get()).as_ptr().read() };
                        slot.sequence
                            .store(head.wrapping_add(self.capacity()), Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => head = current,
                }
            } else if state < 0 {
                return None;
            } else {
                head = self.head.load(Ordering::Relaxed);
            }
        }
    }

    /// Approximate number of values in the ring.
    ///
    /// `head` and `tail` are loaded independently, so the result is a
    /// monitoring-grade snapshot, not a linearizable count.
    #[inline]
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);
        tail.saturating_sub(head)
    }

    /// Whether the ring currently appears empty (same caveat as [`len`]).
    ///
    /// [`len`]: MpmcRing::len
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl<T> Drop for MpmcRing<T> {
    fn drop(&mut self) {
        // Exclusive access: every index in [head, tail) completed its
        // publish store, so those slots are initialized.
        let mut head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Relaxed);

        while head != tail {
            let slot = &self.slots[head & self.mask];
            // SAFETY: Slots in [head, tail) hold initialized values.
            unsafe { (*slot.value.get()).assume_init_drop() };
            head = head.wrapping_add(1);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize as StdAtomicUsize, Ordering as StdOrdering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fresh_ring_is_empty() {
        let ring: MpmcRing<u64> = MpmcRing::with_capacity(8);
        assert_eq!(ring.len(), 0);
        assert!(ring.is_empty());
        assert_eq!(ring.capacity(), 8);
        assert_eq!(ring.try_dequeue(), None);
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn rejects_non_power_of_two_capacity() {
        let _ = MpmcRing::<u64>::with_capacity(6);
    }

    #[test]
    #[should_panic(expected = ">= 2")]
    fn rejects_capacity_below_two() {
        let _ = MpmcRing::<u64>::with_capacity(1);
    }

    #[test]
    fn single_producer_fifo() {
        let ring = MpmcRing::with_capacity(16);
        for i in 0..10u64 {
            assert!(ring.try_enqueue(i).is_ok());
        }
        for i in 0..10u64 {
            assert_eq!(ring.try_dequeue(), Some(i));
        }
        assert_eq!(ring.try_dequeue(), None);
    }

    #[test]
    fn capacity_bound_enforced() {
        let ring = MpmcRing::with_capacity(4);
        for i in 0..4u64 {
            assert!(ring.try_enqueue(i).is_ok());
        }
        // The value comes back to the caller on a full ring.
        assert_eq!(ring.try_enqueue(99), Err(99));
        assert_eq!(ring.len(), 4);

        assert_eq!(ring.try_dequeue(), Some(0));
        assert!(ring.try_enqueue(99).is_ok());
    }

    #[test]
    fn wraparound_correctness() {
        let ring = MpmcRing::with_capacity(4);

        // Fill-and-drain cycles exercise every slot across several rounds.
        for round in 0..10u64 {
            let base = round * 3;
            for i in 0..3 {
                assert!(ring.try_enqueue(base + i).is_ok());
            }
            for i in 0..3 {
                assert_eq!(ring.try_dequeue(), Some(base + i));
            }
            assert_eq!(ring.try_dequeue(), None);
        }
    }

    #[test]
    fn len_tracks_occupancy() {
        let ring = MpmcRing::with_capacity(8);
        assert_eq!(ring.len(), 0);
        ring.try_enqueue(1u64).unwrap();
        ring.try_enqueue(2u64).unwrap();
        assert_eq!(ring.len(), 2);
        ring.try_dequeue().unwrap();
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn mpmc_conservation() {
        const PRODUCERS: usize = 4;
        const CONSUMERS: usize = 4;
        const PER_PRODUCER: usize = 10_000;
        const TOTAL: usize = PRODUCERS * PER_PRODUCER;

        let ring: Arc<MpmcRing<usize>> = Arc::new(MpmcRing::with_capacity(64));
        let consumed = Arc::new(StdAtomicUsize::new(0));

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let ring = Arc::clone(&ring);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        let mut value = p * PER_PRODUCER + i;
                        loop {
                            match ring.try_enqueue(value) {
                                Ok(()) => break,
                                Err(rejected) => {
                                    value = rejected;
                                    std::hint::spin_loop();
                                }
                            }
                        }
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..CONSUMERS)
            .map(|_| {
                let ring = Arc::clone(&ring);
                let consumed = Arc::clone(&consumed);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    loop {
                        if let Some(value) = ring.try_dequeue() {
                            seen.push(value);
                            consumed.fetch_add(1, StdOrdering::AcqRel);
                        } else if consumed.load(StdOrdering::Acquire) == TOTAL {
                            return seen;
                        } else {
                            std::hint::spin_loop();
                        }
                    }
                })
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }

        let mut all = Vec::with_capacity(TOTAL);
        for consumer in consumers {
            all.extend(consumer.join().unwrap());
        }

        // Every distinct value consumed exactly once.
        assert_eq!(all.len(), TOTAL);
        all.sort_unstable();
        for (expected, &value) in all.iter().enumerate() {
            assert_eq!(value, expected, "value {} duplicated or lost", expected);
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn drop_releases_remaining_values() {
        let drop_count = Arc::new(StdAtomicUsize::new(0));

        struct DropTracker(Arc<StdAtomicUsize>);
        impl Drop for DropTracker {
            fn drop(&mut self) {
                self.0.fetch_add(1, StdOrdering::Relaxed);
            }
        }

        {
            let ring = MpmcRing::with_capacity(4);
            for _ in 0..3 {
                assert!(ring.try_enqueue(DropTracker(Arc::clone(&drop_count))).is_ok());
            }
            // One value dequeued and dropped here; two remain in the ring.
            drop(ring.try_dequeue());
            assert_eq!(drop_count.load(StdOrdering::Relaxed), 1);
        }

        assert_eq!(drop_count.load(StdOrdering::Relaxed), 3);
    }
}

// ============================================================================
// Property Tests
// ============================================================================


// ============================================================================
// Loom Tests
// ============================================================================

#[cfg(all(test, loom))]
mod loom_tests {
    use super::*;
    use loom::thread;

    /// Two producers race for slots; the consumer must observe both values
    /// exactly once under every interleaving loom explores.
    #[test]
    fn loom_two_producers_conserve_values() {
        loom::model(|| {
            let ring = loom::sync::Arc::new(MpmcRing::<u32>::with_capacity(2));

            let handles: Vec<_> = (0..2u32)
                .map(|value| {
                    let ring = loom::sync::Arc::clone(&ring);
                    thread::spawn(move || loop {
                        match ring.try_enqueue(value) {
                            Ok(()) => break,
                            Err(_) => loom::thread::yield_now(),
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            let mut seen = Vec::new();
            while seen.len() < 2 {
                match ring.try_dequeue() {
                    Some(value) => seen.push(value),
                    None => loom::thread::yield_now(),
                }
            }
            seen.sort_unstable();
            assert_eq!(seen, vec![0, 1]);
            assert!(ring.try_dequeue().is_none());
        });
    }

    /// A producer pushing past capacity must see clean full/retry behavior
    /// while a consumer drains, with FIFO preserved for a single producer.
    #[test]
    fn loom_full_retry_preserves_fifo() {
        loom::model(|| {
            let ring = loom::sync::Arc::new(MpmcRing::<u32>::with_capacity(2));

            let producer = {
                let ring = loom::sync::Arc::clone(&ring);
                thread::spawn(move || {
                    for value in 0..3u32 {
                        loop {
                            match ring.try_enqueue(value) {
                                Ok(()) => break,
                                Err(_) => loom::thread::yield_now(),
                            }
                        }
                    }
                })
            };

            let mut received = Vec::new();
            while received.len() < 3 {
                match ring.try_dequeue() {
                    Some(value) => received.push(value),
                    None => loom::thread::yield_now(),
                }
            }

            producer.join().unwrap();
            assert_eq!(received, vec![0, 1, 2]);
        });
    }
}

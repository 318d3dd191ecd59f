//! `SubmissionQueue` - the shared submission ring plus its slot allocator.
//!
//! # Memory layout
//!
//! ```text
//! SQ ring mapping (OFF_SQ_RING):  head, tail, ring_mask, ring_entries,
//!                                 flags, dropped, array[ring_entries]
//! SQE mapping     (OFF_SQES):     SubmitEntry[ring_entries]
//! ```
//!
//! # Counters
//!
//! - `cursor` (user memory): next sequence to hand out. Multi-producer,
//!   advanced by CAS.
//! - `tail` (shared): last published sequence + 1. Advanced in sequence
//!   order by `try_publish` and `retire_abandoned`; read by the kernel.
//! - `head` (shared): kernel consumption point. Read-only here.
//!
//! All three are free-running `u32`s; the ring index is `seq & mask`.
//! A slot is free when `cursor - head < size`, i.e. the entry that last
//! used its index has been consumed by the kernel.

use std::ptr;
use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use iouring_core::opcode::sq_flags;
use iouring_core::{AtomicRingState, RingParams, RingState, SubmitEntry};

use crate::region::MappedRegion;

/// `user_data` carried by the NOP that stands in for an abandoned slot.
/// `Ring::reap` never returns these completions.
pub const RETIRED_USER_DATA: u64 = u64::MAX;

/// Abandonment marker; the low 32 bits hold the abandoned sequence.
const ABANDONED: u64 = 1 << 32;

/// Exclusive right to one submission slot, from allocation until `publish`.
///
/// Publication is strictly in allocation order, so a slot that is dropped
/// unpublished would stall every later one. Dropping it instead marks it
/// abandoned; the next publish or submit retires it as a NOP.
#[must_use = "an unpublished slot is retired as a NOP when dropped"]
pub struct Slot {
    seq: u32,
    index: u32,
    /// Abandonment marks of the owning queue; `None` once published.
    abandoned: Option<Arc<[AtomicU64]>>,
}

impl Slot {
    /// Position in the SQE array.
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Free-running sequence number; publication happens in this order.
    #[inline]
    pub fn seq(&self) -> u32 {
        self.seq
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Some(marks) = self.abandoned.take() {
            marks[self.index as usize].store(ABANDONED | self.seq as u64, Ordering::Release);
        }
    }
}

impl PartialEq for Slot {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq && self.index == other.index
    }
}

impl Eq for Slot {}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot").field("seq", &self.seq).field("index", &self.index).finish()
    }
}

/// Outcome of a single allocation attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum Acquire {
    Acquired(Slot),
    /// Lost the cursor CAS to another thread; retry immediately.
    Contended,
    /// Every slot is allocated and unconsumed; retry after the kernel
    /// advances `head`.
    Full,
}

pub struct SubmissionQueue {
    ring: MappedRegion,
    sqes: MappedRegion,

    k_head: *const AtomicU32,
    k_tail: *const AtomicU32,
    k_flags: *const AtomicU32,
    k_dropped: *const AtomicU32,
    array: *mut u32,
    entries: *mut SubmitEntry,
    mask: u32,
    size: u32,

    cursor: AtomicU32,
    state: AtomicRingState,
    /// Per index: `ABANDONED | seq` once the slot holding it was dropped
    /// unpublished, 0 otherwise.
    abandoned: Arc<[AtomicU64]>,
}

// Safety: the raw pointers target `ring`/`sqes`, which live exactly as long
// as this struct. Shared counters are only touched through atomics; an SQE
// slot is written only by the thread holding its `Slot`.
unsafe impl Send for SubmissionQueue {}
unsafe impl Sync for SubmissionQueue {}

impl SubmissionQueue {
    pub(crate) fn new(ring: MappedRegion, sqes: MappedRegion, params: &RingParams) -> Self {
        let off = &params.sq_off;

        let mask = ring.read_u32(off.ring_mask as usize);
        let size = ring.read_u32(off.ring_entries as usize);
        debug_assert!(size.is_power_of_two(), "sq ring_entries {} not a power of 2", size);
        debug_assert_eq!(mask, size.wrapping_sub(1));

        let k_head = ring.atomic_u32(off.head as usize);
        let k_tail = ring.atomic_u32(off.tail as usize);
        let k_flags = ring.atomic_u32(off.flags as usize);
        let k_dropped = ring.atomic_u32(off.dropped as usize);
        let array = ring.array_at::<u32>(off.array as usize, size as usize);
        let entries = sqes.array_at::<SubmitEntry>(0, size as usize);

        // Nothing is in flight on a fresh ring; start allocating where the
        // kernel will start reading.
        let start = unsafe { (*k_tail).load(Ordering::Acquire) };

        Self {
            ring,
            sqes,
            k_head,
            k_tail,
            k_flags,
            k_dropped,
            array,
            entries,
            mask,
            size,
            cursor: AtomicU32::new(start),
            state: AtomicRingState::new(),
            abandoned: (0..size).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    // ── Allocation ──

    /// One allocation attempt. Never blocks, never enters the kernel.
    pub fn try_acquire(&self) -> Acquire {
        let seq = self.cursor.load(Ordering::Acquire);
        let consumed = self.head();

        if seq.wrapping_sub(consumed) >= self.size {
            return Acquire::Full;
        }

        match self.cursor.compare_exchange_weak(
            seq,
            seq.wrapping_add(1),
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => {
                self.state.mark_filling();
                Acquire::Acquired(Slot {
                    seq,
                    index: seq & self.mask,
                    abandoned: Some(Arc::clone(&self.abandoned)),
                })
            }
            Err(_) => Acquire::Contended,
        }
    }

    /// Write `entry` into the slot's SQE.
    ///
    /// # Safety
    /// Any memory `entry` points at (buffers, iovecs, paths) must stay valid
    /// until its completion has been reaped.
    #[inline]
    pub unsafe fn fill(&self, slot: &Slot, entry: SubmitEntry) {
        ptr::write(self.entries.add(slot.index as usize), entry);
    }

    /// Make the slot visible to the kernel if every earlier sequence has
    /// been published. Returns false (slot untouched) when a predecessor is
    /// still outstanding.
    pub fn try_publish(&self, slot: &mut Slot) -> bool {
        self.retire_abandoned();
        if self.tail() != slot.seq {
            return false;
        }
        self.commit(slot.seq, slot.index);
        slot.abandoned = None;
        true
    }

    /// Publish a NOP for every abandoned slot sitting at the tail. Returns
    /// how many were retired.
    ///
    /// The mark carries its sequence, so clearing the mark for `tail` proves
    /// that sequence is still unpublished and its owner gone. Whoever clears
    /// it owns the index until it is committed.
    pub fn retire_abandoned(&self) -> u32 {
        let mut retired = 0;
        loop {
            let seq = self.tail();
            let index = seq & self.mask;
            if self.abandoned[index as usize]
                .compare_exchange(ABANDONED | seq as u64, 0, Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
            {
                return retired;
            }
            unsafe {
                ptr::write(self.entries.add(index as usize), SubmitEntry::nop(RETIRED_USER_DATA))
            };
            self.commit(seq, index);
            retired += 1;
        }
    }

    #[inline]
    fn commit(&self, seq: u32, index: u32) {
        unsafe { ptr::write_volatile(self.array.add(index as usize), index) };
        self.tail_atomic().store(seq.wrapping_add(1), Ordering::Release);
    }

    // ── Flush bookkeeping ──

    /// Full fence: every SQE and array write made so far is visible before
    /// whatever the kernel reads next.
    #[inline]
    pub fn submit_barrier(&self) {
        fence(Ordering::SeqCst);
    }

    #[inline]
    pub fn mark_empty(&self) {
        self.state.mark_empty();
    }

    /// Committed state, or `Full` while every slot is in flight.
    pub fn state(&self) -> RingState {
        match self.state.load() {
            RingState::Filling if self.is_saturated() => RingState::Full,
            s => s,
        }
    }

    // ── Introspection ──

    /// Kernel consumption point.
    #[inline]
    pub fn head(&self) -> u32 {
        unsafe { (*self.k_head).load(Ordering::Acquire) }
    }

    /// Published tail.
    #[inline]
    pub fn tail(&self) -> u32 {
        self.tail_atomic().load(Ordering::Acquire)
    }

    /// Next sequence the allocator will hand out.
    #[inline]
    pub fn cursor(&self) -> u32 {
        self.cursor.load(Ordering::Acquire)
    }

    /// Published but not yet consumed by the kernel.
    #[inline]
    pub fn pending(&self) -> u32 {
        self.tail().wrapping_sub(self.head())
    }

    /// Allocated (published or not) and not yet consumed.
    #[inline]
    pub fn in_flight(&self) -> u32 {
        self.cursor().wrapping_sub(self.head())
    }

    #[inline]
    pub fn is_saturated(&self) -> bool {
        self.in_flight() >= self.size
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.size
    }

    #[inline]
    pub fn mask(&self) -> u32 {
        self.mask
    }

    pub fn flags(&self) -> u32 {
        unsafe { (*self.k_flags).load(Ordering::Acquire) }
    }

    /// SQ poll thread is asleep and must be woken through `enter`.
    pub fn need_wakeup(&self) -> bool {
        self.flags() & sq_flags::NEED_WAKEUP != 0
    }

    /// Entries the kernel discarded as invalid.
    pub fn dropped(&self) -> u32 {
        unsafe { (*self.k_dropped).load(Ordering::Acquire) }
    }

    /// The SQ ring mapping; the completion ring lives here under single mmap.
    pub(crate) fn ring_region(&self) -> &MappedRegion {
        &self.ring
    }

    /// Hand the mappings back for teardown.
    pub(crate) fn into_regions(self) -> (MappedRegion, MappedRegion) {
        (self.ring, self.sqes)
    }

    #[inline]
    fn tail_atomic(&self) -> &AtomicU32 {
        unsafe { &*self.k_tail }
    }
}

impl std::fmt::Debug for SubmissionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionQueue")
            .field("size", &self.size)
            .field("head", &self.head())
            .field("tail", &self.tail())
            .field("cursor", &self.cursor())
            .field("state", &self.state.load())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::KernelBoundary;
    use crate::mock::MockKernel;
    use iouring_core::abi::{IoUringParams, OFF_SQES, OFF_SQ_RING};

    fn queue(entries: u32) -> (MockKernel, SubmissionQueue) {
        let kernel = MockKernel::new(true);
        let mut raw = IoUringParams::default();
        let fd = kernel.setup(entries, &mut raw).unwrap();
        let params = RingParams::new(raw);
        let ring = kernel.map(fd, params.sq_map_size(), OFF_SQ_RING).unwrap();
        let sqes = kernel.map(fd, params.sqes_size(), OFF_SQES).unwrap();
        (kernel, SubmissionQueue::new(ring, sqes, &params))
    }

    fn acquire(sq: &SubmissionQueue) -> Slot {
        loop {
            match sq.try_acquire() {
                Acquire::Acquired(slot) => return slot,
                Acquire::Contended => continue,
                Acquire::Full => panic!("ring unexpectedly full"),
            }
        }
    }

    #[test]
    fn test_sequential_indices() {
        let (_k, sq) = queue(4);
        assert_eq!(sq.capacity(), 4);
        assert_eq!(sq.state(), RingState::Empty);

        for i in 0..4 {
            let slot = acquire(&sq);
            assert_eq!(slot.index(), i);
            assert_eq!(slot.seq(), i);
        }
        assert_eq!(sq.in_flight(), 4);
        assert_eq!(sq.try_acquire(), Acquire::Full);
        assert_eq!(sq.state(), RingState::Full);
    }

    #[test]
    fn test_publish_is_ordered() {
        let (_k, sq) = queue(4);
        let mut a = acquire(&sq);
        let mut b = acquire(&sq);

        assert!(!sq.try_publish(&mut b), "b must wait for a");
        assert_eq!(sq.tail(), 0);

        assert!(sq.try_publish(&mut a));
        assert!(sq.try_publish(&mut b));
        assert_eq!(sq.tail(), 2);
        assert_eq!(sq.pending(), 2);
    }

    #[test]
    fn test_full_clears_after_consumption() {
        let (kernel, sq) = queue(2);
        let mut a = acquire(&sq);
        let mut b = acquire(&sq);
        unsafe {
            sq.fill(&a, SubmitEntry::nop(1));
            sq.fill(&b, SubmitEntry::nop(2));
        }
        assert!(sq.try_publish(&mut a));
        assert!(sq.try_publish(&mut b));
        assert_eq!(sq.try_acquire(), Acquire::Full);

        kernel.consume_all();
        assert_eq!(sq.head(), 2);

        let c = acquire(&sq);
        assert_eq!(c.index(), 0);
        assert_eq!(c.seq(), 2);
    }

    #[test]
    fn test_dropped_slot_is_retired_in_order() {
        let (kernel, sq) = queue(4);
        let a = acquire(&sq);
        let mut b = acquire(&sq);
        unsafe { sq.fill(&b, SubmitEntry::nop(2)) };

        drop(a);
        assert!(sq.try_publish(&mut b), "b must not wait on a dropped slot");
        assert_eq!(sq.tail(), 2);

        // Published slots are not retired a second time.
        drop(b);
        assert_eq!(sq.retire_abandoned(), 0);
        assert_eq!(sq.tail(), 2);

        assert_eq!(kernel.consume_all(), 2);
        let seen: Vec<u64> = kernel.submitted().iter().map(|e| e.user_data).collect();
        assert_eq!(seen, vec![RETIRED_USER_DATA, 2]);
    }

    #[test]
    fn test_dropped_slots_out_of_order() {
        let (_k, sq) = queue(4);
        let a = acquire(&sq);
        let b = acquire(&sq);
        let mut c = acquire(&sq);

        drop(b);
        assert_eq!(sq.retire_abandoned(), 0, "a still holds the tail");
        drop(a);
        assert_eq!(sq.retire_abandoned(), 2);
        assert!(sq.try_publish(&mut c));
        assert_eq!(sq.tail(), 3);
    }

    #[test]
    fn test_state_machine() {
        let (_k, sq) = queue(4);
        let _slot = acquire(&sq);
        assert_eq!(sq.state(), RingState::Filling);
        sq.submit_barrier();
        sq.mark_empty();
        assert_eq!(sq.state(), RingState::Empty);
    }

    #[test]
    fn test_need_wakeup_flag() {
        let (kernel, sq) = queue(4);
        assert!(!sq.need_wakeup());
        kernel.set_need_wakeup(true);
        assert!(sq.need_wakeup());
        assert_eq!(sq.dropped(), 0);
    }
}

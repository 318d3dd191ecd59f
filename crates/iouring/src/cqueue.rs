//! `CompletionQueue` - the shared completion ring.
//!
//! ```text
//! CQ ring (OFF_CQ_RING, or inside the SQ mapping under single mmap):
//!   head, tail, ring_mask, ring_entries, overflow, flags?, cqes[ring_entries]
//! ```
//!
//! The kernel produces at `tail`; we consume at `head`. `pop` advances head
//! by CAS so several reapers may share one ring.

use std::sync::atomic::{AtomicU32, Ordering};

use iouring_core::{CompletionEntry, RingParams};

use crate::region::MappedRegion;

pub struct CompletionQueue {
    /// `None` when the ring lives inside the SQ mapping.
    region: Option<MappedRegion>,

    k_head: *const AtomicU32,
    k_tail: *const AtomicU32,
    k_overflow: *const AtomicU32,
    /// Absent on kernels that predate the CQ flags word (offset 0).
    k_flags: Option<*const AtomicU32>,
    cqes: *const CompletionEntry,
    mask: u32,
    size: u32,
}

// Safety: pointers target memory owned by `region` or by the SQ mapping,
// both of which the ring keeps alive until this view is dropped. The
// counters are atomics; CQEs are only read after an Acquire load of tail.
unsafe impl Send for CompletionQueue {}
unsafe impl Sync for CompletionQueue {}

impl CompletionQueue {
    /// View over a separately mapped CQ ring.
    pub(crate) fn owned(region: MappedRegion, params: &RingParams) -> Self {
        let mut cq = Self::view(&region, params);
        cq.region = Some(region);
        cq
    }

    /// View into the SQ mapping (single-mmap kernels).
    pub(crate) fn shared(sq_ring: &MappedRegion, params: &RingParams) -> Self {
        Self::view(sq_ring, params)
    }

    fn view(region: &MappedRegion, params: &RingParams) -> Self {
        let off = &params.cq_off;
        let mask = region.read_u32(off.ring_mask as usize);
        let size = region.read_u32(off.ring_entries as usize);
        debug_assert_eq!(mask, size.wrapping_sub(1));

        Self {
            region: None,
            k_head: region.atomic_u32(off.head as usize),
            k_tail: region.atomic_u32(off.tail as usize),
            k_overflow: region.atomic_u32(off.overflow as usize),
            k_flags: (off.flags != 0).then(|| region.atomic_u32(off.flags as usize)),
            cqes: region.array_at::<CompletionEntry>(off.cqes as usize, size as usize),
            mask,
            size,
        }
    }

    #[inline]
    pub fn head(&self) -> u32 {
        unsafe { (*self.k_head).load(Ordering::Acquire) }
    }

    #[inline]
    pub fn tail(&self) -> u32 {
        unsafe { (*self.k_tail).load(Ordering::Acquire) }
    }

    /// Completions posted and not yet reaped.
    #[inline]
    pub fn ready(&self) -> u32 {
        self.tail().wrapping_sub(self.head())
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.size
    }

    /// Completions the kernel could not post because the ring was full.
    pub fn overflow(&self) -> u32 {
        unsafe { (*self.k_overflow).load(Ordering::Acquire) }
    }

    pub fn flags(&self) -> u32 {
        self.k_flags.map_or(0, |p| unsafe { (*p).load(Ordering::Acquire) })
    }

    /// Take the oldest completion, if any.
    pub fn pop(&self) -> Option<CompletionEntry> {
        let head = unsafe { &*self.k_head };
        loop {
            let h = head.load(Ordering::Acquire);
            if h == self.tail() {
                return None;
            }
            // Copy out before releasing the slot back to the kernel.
            let cqe = unsafe { std::ptr::read_volatile(self.cqes.add((h & self.mask) as usize)) };
            if head
                .compare_exchange_weak(h, h.wrapping_add(1), Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(cqe);
            }
            std::hint::spin_loop();
        }
    }

    /// Whether this view owns a mapping of its own.
    #[inline]
    pub fn is_separate(&self) -> bool {
        self.region.is_some()
    }

    pub(crate) fn into_region(self) -> Option<MappedRegion> {
        self.region
    }
}

impl std::fmt::Debug for CompletionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionQueue")
            .field("size", &self.size)
            .field("head", &self.head())
            .field("tail", &self.tail())
            .field("separate", &self.is_separate())
            .finish()
    }
}

//! Negotiated ring parameters.
//!
//! Produced once by `io_uring_setup` and immutable afterward. Region sizes
//! are derived here so the mapping layer never repeats the arithmetic.

use std::ops::Deref;

use crate::abi::IoUringParams;
use crate::entry::{CQE_SIZE, SQE_SIZE};
use crate::opcode::{feat, setup};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingParams {
    raw: IoUringParams,
}

impl RingParams {
    pub fn new(raw: IoUringParams) -> Self {
        Self { raw }
    }

    #[inline]
    pub fn raw(&self) -> &IoUringParams {
        &self.raw
    }

    #[inline]
    pub fn has_feature(&self, bit: u32) -> bool {
        self.raw.features & bit != 0
    }

    #[inline]
    pub fn has_setup_flag(&self, bit: u32) -> bool {
        self.raw.flags & bit != 0
    }

    /// Both rings live in the SQ mapping.
    #[inline]
    pub fn single_mmap(&self) -> bool {
        self.has_feature(feat::SINGLE_MMAP)
    }

    #[inline]
    pub fn sqpoll(&self) -> bool {
        self.has_setup_flag(setup::SQPOLL)
    }

    /// Bytes of the SQ ring mapping (header fields + index array).
    pub fn sq_ring_size(&self) -> usize {
        self.raw.sq_off.array as usize + self.raw.sq_entries as usize * std::mem::size_of::<u32>()
    }

    /// Bytes of the CQ ring mapping (header fields + CQE array).
    pub fn cq_ring_size(&self) -> usize {
        self.raw.cq_off.cqes as usize + self.raw.cq_entries as usize * CQE_SIZE
    }

    /// Bytes of the SQE array mapping.
    pub fn sqes_size(&self) -> usize {
        self.raw.sq_entries as usize * SQE_SIZE
    }

    /// Bytes to map at the SQ offset; covers the CQ ring too under single mmap.
    pub fn sq_map_size(&self) -> usize {
        if self.single_mmap() {
            self.sq_ring_size().max(self.cq_ring_size())
        } else {
            self.sq_ring_size()
        }
    }
}

impl Deref for RingParams {
    type Target = IoUringParams;

    fn deref(&self) -> &Self::Target {
        &self.raw
    }
}

impl From<IoUringParams> for RingParams {
    fn from(raw: IoUringParams) -> Self {
        Self::new(raw)
    }
}

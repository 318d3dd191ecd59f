//! Submission ring fill state.
//!
//! ```text
//!            allocate                 enter() ok
//!   Empty ─────────────► Filling ─────────────────► Empty
//!                           │
//!                           └── saturated: reported as Full, not stored
//! ```

use std::sync::atomic::{AtomicU8, Ordering};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingState {
    /// No unflushed entries since the last kernel entry.
    Empty = 0,
    /// At least one slot handed out since the last flush.
    Filling = 1,
    /// Every slot is in flight; allocation is spinning.
    Full = 2,
}

impl RingState {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => RingState::Empty,
            1 => RingState::Filling,
            _ => RingState::Full,
        }
    }
}

/// Atomic holder for the committed (Empty/Filling) state.
#[derive(Debug)]
pub struct AtomicRingState(AtomicU8);

impl AtomicRingState {
    pub const fn new() -> Self {
        Self(AtomicU8::new(RingState::Empty as u8))
    }

    #[inline]
    pub fn load(&self) -> RingState {
        RingState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Empty → Filling. Returns true if this call made the transition.
    #[inline]
    pub fn mark_filling(&self) -> bool {
        self.0
            .compare_exchange(
                RingState::Empty as u8,
                RingState::Filling as u8,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    /// Back to Empty after a successful flush.
    #[inline]
    pub fn mark_empty(&self) {
        self.0.store(RingState::Empty as u8, Ordering::Release);
    }
}

impl Default for AtomicRingState {
    fn default() -> Self {
        Self::new()
    }
}

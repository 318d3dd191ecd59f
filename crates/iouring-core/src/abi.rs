//! Kernel ABI mirror for `io_uring_setup(2)`.
//!
//! Mirrors `uapi/linux/io_uring.h`. Every struct here is `repr(C)` and must
//! match the kernel layout bit-for-bit; the size tests at the bottom pin it.

/// Syscall numbers (identical on every architecture except alpha/mips-o32).
pub const SYS_SETUP: i64 = 425;
pub const SYS_ENTER: i64 = 426;
pub const SYS_REGISTER: i64 = 427;

// ── Magic mmap offsets ──

/// Offset of the submission ring (head, tail, mask, flags, dropped, array).
pub const OFF_SQ_RING: u64 = 0;
/// Offset of the completion ring when it is mapped on its own.
pub const OFF_CQ_RING: u64 = 0x800_0000;
/// Offset of the submission entry array.
pub const OFF_SQES: u64 = 0x1000_0000;

/// Largest submission ring the kernel accepts without `SETUP_CLAMP`.
pub const MAX_ENTRIES: u32 = 32768;

/// Field offsets of the submission ring, relative to the SQ mapping.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SqRingOffsets {
    pub head: u32,
    pub tail: u32,
    pub ring_mask: u32,
    pub ring_entries: u32,
    pub flags: u32,
    pub dropped: u32,
    pub array: u32,
    pub resv1: u32,
    pub user_addr: u64,
}

/// Field offsets of the completion ring, relative to the CQ mapping.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CqRingOffsets {
    pub head: u32,
    pub tail: u32,
    pub ring_mask: u32,
    pub ring_entries: u32,
    pub overflow: u32,
    pub cqes: u32,
    pub flags: u32,
    pub resv1: u32,
    pub user_addr: u64,
}

/// `struct io_uring_params` - filled in by the kernel during setup.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoUringParams {
    pub sq_entries: u32,
    pub cq_entries: u32,
    pub flags: u32,
    pub sq_thread_cpu: u32,
    pub sq_thread_idle: u32,
    pub features: u32,
    pub wq_fd: u32,
    pub resv: [u32; 3],
    pub sq_off: SqRingOffsets,
    pub cq_off: CqRingOffsets,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn test_abi_sizes() {
        assert_eq!(size_of::<SqRingOffsets>(), 40);
        assert_eq!(size_of::<CqRingOffsets>(), 40);
        assert_eq!(size_of::<IoUringParams>(), 120);
    }

    #[test]
    fn test_offsets_are_page_aligned() {
        assert_eq!(OFF_CQ_RING % 4096, 0);
        assert_eq!(OFF_SQES % 4096, 0);
        assert!(OFF_SQES > OFF_CQ_RING);
    }
}

//! Submission and completion entry types.
//!
//! These are the exact kernel records (`struct io_uring_sqe`,
//! `struct io_uring_cqe`). The submission entry is written in place into
//! the shared SQE array; the completion entry is copied out of the CQ ring.

use crate::opcode::{fsync_flags, Opcode};

/// A 64-byte submission entry.
///
/// Unions from the C header are flattened to their first member:
/// `off` doubles as `addr2`, `addr` as `splice_off_in`, `op_flags` as
/// `rw_flags` / `fsync_flags` / `poll_events` / ..., `buf_index` as
/// `buf_group`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitEntry {
    pub opcode: u8,
    pub flags: u8,
    pub ioprio: u16,
    pub fd: i32,
    pub off: u64,
    pub addr: u64,
    pub len: u32,
    pub op_flags: u32,
    /// Caller-chosen identifier echoed back in the completion.
    pub user_data: u64,
    pub buf_index: u16,
    pub personality: u16,
    pub splice_fd_in: i32,
    pub _pad: [u64; 2],
}

impl SubmitEntry {
    pub fn zeroed() -> Self {
        Self::default()
    }

    /// A no-op; completes with result 0.
    pub fn nop(user_data: u64) -> Self {
        Self {
            opcode: Opcode::Nop.as_u8(),
            fd: -1,
            user_data,
            ..Self::default()
        }
    }

    /// Positional read into `buf` (offset `u64::MAX` = current file position).
    pub fn read(fd: i32, buf: *mut u8, len: u32, offset: u64, user_data: u64) -> Self {
        Self {
            opcode: Opcode::Read.as_u8(),
            fd,
            off: offset,
            addr: buf as u64,
            len,
            user_data,
            ..Self::default()
        }
    }

    /// Positional write from `buf`.
    pub fn write(fd: i32, buf: *const u8, len: u32, offset: u64, user_data: u64) -> Self {
        Self {
            opcode: Opcode::Write.as_u8(),
            fd,
            off: offset,
            addr: buf as u64,
            len,
            user_data,
            ..Self::default()
        }
    }

    /// fsync / fdatasync.
    pub fn fsync(fd: i32, datasync: bool, user_data: u64) -> Self {
        Self {
            opcode: Opcode::Fsync.as_u8(),
            fd,
            op_flags: if datasync { fsync_flags::DATASYNC } else { 0 },
            user_data,
            ..Self::default()
        }
    }

    #[inline]
    pub fn opcode(&self) -> Option<Opcode> {
        Opcode::from_u8(self.opcode)
    }

    /// OR in `IOSQE_*` bits.
    #[inline]
    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags |= flags;
        self
    }
}

/// A 16-byte completion entry.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletionEntry {
    /// Matches the submission's `user_data`.
    pub user_data: u64,
    /// Return value, or negative errno.
    pub res: i32,
    pub flags: u32,
}

impl CompletionEntry {
    #[inline]
    pub fn is_err(&self) -> bool {
        self.res < 0
    }

    /// The errno carried by a failed completion.
    #[inline]
    pub fn errno(&self) -> Option<i32> {
        if self.res < 0 {
            Some(-self.res)
        } else {
            None
        }
    }
}

pub const SQE_SIZE: usize = std::mem::size_of::<SubmitEntry>();
pub const CQE_SIZE: usize = std::mem::size_of::<CompletionEntry>();

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::sqe_flags;

    #[test]
    fn test_entry_sizes_match_kernel() {
        assert_eq!(SQE_SIZE, 64);
        assert_eq!(CQE_SIZE, 16);
        assert_eq!(SQE_SIZE, std::mem::size_of::<io_uring::squeue::Entry>());
        assert_eq!(CQE_SIZE, std::mem::size_of::<io_uring::cqueue::Entry>());
    }

    #[test]
    fn test_entry_alignment() {
        assert_eq!(std::mem::align_of::<SubmitEntry>(), 8);
        assert_eq!(std::mem::align_of::<CompletionEntry>(), 8);
    }

    #[test]
    fn test_builders() {
        let e = SubmitEntry::nop(7);
        assert_eq!(e.opcode(), Some(Opcode::Nop));
        assert_eq!(e.user_data, 7);

        let e = SubmitEntry::fsync(3, true, 1).with_flags(sqe_flags::IO_DRAIN);
        assert_eq!(e.opcode(), Some(Opcode::Fsync));
        assert_eq!(e.op_flags, fsync_flags::DATASYNC);
        assert_eq!(e.flags, sqe_flags::IO_DRAIN);

        let mut buf = [0u8; 16];
        let e = SubmitEntry::read(5, buf.as_mut_ptr(), 16, 0, 9);
        assert_eq!(e.addr, buf.as_ptr() as u64);
        assert_eq!(e.len, 16);
    }

    #[test]
    fn test_completion_errno() {
        let ok = CompletionEntry { user_data: 1, res: 12, flags: 0 };
        assert!(!ok.is_err());
        assert_eq!(ok.errno(), None);

        let bad = CompletionEntry { user_data: 1, res: -9, flags: 0 };
        assert!(bad.is_err());
        assert_eq!(bad.errno(), Some(9));
    }
}

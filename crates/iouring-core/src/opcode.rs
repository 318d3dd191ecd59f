//! Opcode and flag vocabulary.
//!
//! Values are the kernel's (`IORING_OP_*`, `IOSQE_*`, ...). This module is
//! data only; nothing here has behavior beyond conversion.

/// Operation code carried in byte 0 of every submission entry.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Nop = 0,
    Readv = 1,
    Writev = 2,
    Fsync = 3,
    ReadFixed = 4,
    WriteFixed = 5,
    PollAdd = 6,
    PollRemove = 7,
    SyncFileRange = 8,
    SendMsg = 9,
    RecvMsg = 10,
    Timeout = 11,
    TimeoutRemove = 12,
    Accept = 13,
    AsyncCancel = 14,
    LinkTimeout = 15,
    Connect = 16,
    Fallocate = 17,
    OpenAt = 18,
    Close = 19,
    FilesUpdate = 20,
    Statx = 21,
    Read = 22,
    Write = 23,
    Fadvise = 24,
    Madvise = 25,
    Send = 26,
    Recv = 27,
    OpenAt2 = 28,
    EpollCtl = 29,
    Splice = 30,
    ProvideBuffers = 31,
    RemoveBuffers = 32,
}

impl Opcode {
    /// Every opcode, in kernel order.
    pub const ALL: [Opcode; 33] = [
        Opcode::Nop,
        Opcode::Readv,
        Opcode::Writev,
        Opcode::Fsync,
        Opcode::ReadFixed,
        Opcode::WriteFixed,
        Opcode::PollAdd,
        Opcode::PollRemove,
        Opcode::SyncFileRange,
        Opcode::SendMsg,
        Opcode::RecvMsg,
        Opcode::Timeout,
        Opcode::TimeoutRemove,
        Opcode::Accept,
        Opcode::AsyncCancel,
        Opcode::LinkTimeout,
        Opcode::Connect,
        Opcode::Fallocate,
        Opcode::OpenAt,
        Opcode::Close,
        Opcode::FilesUpdate,
        Opcode::Statx,
        Opcode::Read,
        Opcode::Write,
        Opcode::Fadvise,
        Opcode::Madvise,
        Opcode::Send,
        Opcode::Recv,
        Opcode::OpenAt2,
        Opcode::EpollCtl,
        Opcode::Splice,
        Opcode::ProvideBuffers,
        Opcode::RemoveBuffers,
    ];

    #[inline]
    pub fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.get(v as usize).copied()
    }

    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// `io_uring_params.features`
pub mod feat {
    pub const SINGLE_MMAP: u32 = 1 << 0;
    pub const NODROP: u32 = 1 << 1;
    pub const SUBMIT_STABLE: u32 = 1 << 2;
    pub const RW_CUR_POS: u32 = 1 << 3;
    pub const CUR_PERSONALITY: u32 = 1 << 4;
}

/// `io_uring_setup(2)` flags
pub mod setup {
    /// io_context is polled
    pub const IOPOLL: u32 = 1 << 0;
    /// Kernel-side SQ poll thread
    pub const SQPOLL: u32 = 1 << 1;
    /// `sq_thread_cpu` is valid
    pub const SQ_AFF: u32 = 1 << 2;
    /// App defines CQ size
    pub const CQSIZE: u32 = 1 << 3;
    /// Clamp SQ/CQ ring sizes
    pub const CLAMP: u32 = 1 << 4;
    /// Attach to existing wq
    pub const ATTACH_WQ: u32 = 1 << 5;
}

/// `sqe->flags`
pub mod sqe_flags {
    /// Use fixed fileset
    pub const FIXED_FILE: u8 = 1 << 0;
    /// Issue after inflight IO
    pub const IO_DRAIN: u8 = 1 << 1;
    /// Links next sqe
    pub const IO_LINK: u8 = 1 << 2;
    /// Like LINK, but stronger
    pub const IO_HARDLINK: u8 = 1 << 3;
    /// Always go async
    pub const ASYNC: u8 = 1 << 4;
    /// Select buffer from `buf_group`
    pub const BUFFER_SELECT: u8 = 1 << 5;
}

/// `sqe->fsync_flags`
pub mod fsync_flags {
    pub const DATASYNC: u32 = 1 << 0;
}

/// `sq_ring->flags`
pub mod sq_flags {
    /// Poll thread is asleep; `enter` must pass `enter::SQ_WAKEUP`
    pub const NEED_WAKEUP: u32 = 1 << 0;
    pub const CQ_OVERFLOW: u32 = 1 << 1;
}

/// `io_uring_enter(2)` flags
pub mod enter {
    pub const GETEVENTS: u32 = 1 << 0;
    pub const SQ_WAKEUP: u32 = 1 << 1;
}

/// `io_uring_register(2)` opcodes
pub mod register {
    pub const REGISTER_BUFFERS: u32 = 0;
    pub const UNREGISTER_BUFFERS: u32 = 1;
    pub const REGISTER_FILES: u32 = 2;
    pub const UNREGISTER_FILES: u32 = 3;
    pub const REGISTER_EVENTFD: u32 = 4;
    pub const UNREGISTER_EVENTFD: u32 = 5;
}

#[cfg(test)]
mod tests {
    use super::*;
    use io_uring::opcode;

    #[test]
    fn test_from_u8_roundtrips_table() {
        for (i, op) in Opcode::ALL.iter().enumerate() {
            assert_eq!(op.as_u8() as usize, i);
            assert_eq!(Opcode::from_u8(i as u8), Some(*op));
        }
        assert_eq!(Opcode::from_u8(33), None);
    }

    #[test]
    fn test_opcodes_match_kernel_values() {
        assert_eq!(Opcode::Nop.as_u8(), opcode::Nop::CODE);
        assert_eq!(Opcode::Readv.as_u8(), opcode::Readv::CODE);
        assert_eq!(Opcode::Writev.as_u8(), opcode::Writev::CODE);
        assert_eq!(Opcode::Fsync.as_u8(), opcode::Fsync::CODE);
        assert_eq!(Opcode::ReadFixed.as_u8(), opcode::ReadFixed::CODE);
        assert_eq!(Opcode::WriteFixed.as_u8(), opcode::WriteFixed::CODE);
        assert_eq!(Opcode::PollAdd.as_u8(), opcode::PollAdd::CODE);
        assert_eq!(Opcode::PollRemove.as_u8(), opcode::PollRemove::CODE);
        assert_eq!(Opcode::SyncFileRange.as_u8(), opcode::SyncFileRange::CODE);
        assert_eq!(Opcode::SendMsg.as_u8(), opcode::SendMsg::CODE);
        assert_eq!(Opcode::RecvMsg.as_u8(), opcode::RecvMsg::CODE);
        assert_eq!(Opcode::Timeout.as_u8(), opcode::Timeout::CODE);
        assert_eq!(Opcode::TimeoutRemove.as_u8(), opcode::TimeoutRemove::CODE);
        assert_eq!(Opcode::Accept.as_u8(), opcode::Accept::CODE);
        assert_eq!(Opcode::AsyncCancel.as_u8(), opcode::AsyncCancel::CODE);
        assert_eq!(Opcode::LinkTimeout.as_u8(), opcode::LinkTimeout::CODE);
        assert_eq!(Opcode::Connect.as_u8(), opcode::Connect::CODE);
        assert_eq!(Opcode::Fallocate.as_u8(), opcode::Fallocate::CODE);
        assert_eq!(Opcode::OpenAt.as_u8(), opcode::OpenAt::CODE);
        assert_eq!(Opcode::Close.as_u8(), opcode::Close::CODE);
        assert_eq!(Opcode::FilesUpdate.as_u8(), opcode::FilesUpdate::CODE);
        assert_eq!(Opcode::Statx.as_u8(), opcode::Statx::CODE);
        assert_eq!(Opcode::Read.as_u8(), opcode::Read::CODE);
        assert_eq!(Opcode::Write.as_u8(), opcode::Write::CODE);
        assert_eq!(Opcode::Fadvise.as_u8(), opcode::Fadvise::CODE);
        assert_eq!(Opcode::Madvise.as_u8(), opcode::Madvise::CODE);
        assert_eq!(Opcode::Send.as_u8(), opcode::Send::CODE);
        assert_eq!(Opcode::Recv.as_u8(), opcode::Recv::CODE);
        assert_eq!(Opcode::OpenAt2.as_u8(), opcode::OpenAt2::CODE);
        assert_eq!(Opcode::EpollCtl.as_u8(), opcode::EpollCtl::CODE);
        assert_eq!(Opcode::Splice.as_u8(), opcode::Splice::CODE);
        assert_eq!(Opcode::ProvideBuffers.as_u8(), opcode::ProvideBuffers::CODE);
        assert_eq!(Opcode::RemoveBuffers.as_u8(), opcode::RemoveBuffers::CODE);
    }

    #[test]
    fn test_flag_bits_distinct() {
        assert_eq!(sqe_flags::FIXED_FILE & sqe_flags::IO_DRAIN, 0);
        assert_eq!(enter::GETEVENTS & enter::SQ_WAKEUP, 0);
        assert_eq!(feat::SINGLE_MMAP, 1);
    }
}

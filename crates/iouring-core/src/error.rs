//! Ring error types.
//!
//! Every kernel-boundary failure carries the raw errno unchanged so callers
//! can decide what is transient (`EINTR`, `EAGAIN`) and what is fatal.

use std::fmt;

/// Which mapping an mmap/munmap error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    SqRing,
    CqRing,
    Sqes,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Region::SqRing => write!(f, "sq ring"),
            Region::CqRing => write!(f, "cq ring"),
            Region::Sqes => write!(f, "sqe array"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RingError {
    /// Configuration rejected before reaching the kernel.
    Config(&'static str),
    /// `io_uring_setup` failed.
    Setup(i32),
    /// Mapping a ring region failed.
    Mmap { region: Region, errno: i32 },
    /// Unmapping a ring region failed.
    Munmap { region: Region, errno: i32 },
    /// Closing the ring descriptor failed.
    Close(i32),
    /// `io_uring_enter` failed.
    Enter(i32),
    /// `io_uring_register` failed.
    Register(i32),
    /// The ring has been (or is being) torn down.
    Closed,
    /// io_uring is not available on this platform.
    Unsupported,
}

impl RingError {
    /// The errno behind this error, if it came from the kernel.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Setup(e)
            | Self::Close(e)
            | Self::Enter(e)
            | Self::Register(e)
            | Self::Mmap { errno: e, .. }
            | Self::Munmap { errno: e, .. } => Some(*e),
            Self::Config(_) | Self::Closed | Self::Unsupported => None,
        }
    }

    /// Classify a failed `io_uring_setup`. `ENOSYS` means the kernel was
    /// built without io_uring (or the platform has none at all).
    pub fn setup(errno: i32) -> Self {
        if errno == ENOSYS {
            Self::Unsupported
        } else {
            Self::Setup(errno)
        }
    }

    /// True for an interrupted `enter` that the caller may simply retry.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Enter(e) if *e == EINTR)
    }
}

// Linux errno values used without pulling in libc.
const EINTR: i32 = 4;
const EBADF: i32 = 9;
const ENOSYS: i32 = 38;

impl fmt::Display for RingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "invalid ring config: {}", msg),
            Self::Setup(e) => write!(f, "io_uring setup: errno {}", e),
            Self::Mmap { region, errno } => write!(f, "mmap {} failed: errno {}", region, errno),
            Self::Munmap { region, errno } => {
                write!(f, "munmap {} failed: errno {}", region, errno)
            }
            Self::Close(e) => write!(f, "close ring fd: errno {}", e),
            Self::Enter(e) => write!(f, "io_uring enter: errno {}", e),
            Self::Register(e) => write!(f, "io_uring register: errno {}", e),
            Self::Closed => write!(f, "ring closed"),
            Self::Unsupported => write!(f, "io_uring not supported on this platform"),
        }
    }
}

impl std::error::Error for RingError {}

impl From<RingError> for std::io::Error {
    fn from(err: RingError) -> Self {
        match err {
            RingError::Closed => std::io::Error::from_raw_os_error(EBADF),
            RingError::Unsupported => std::io::Error::from_raw_os_error(ENOSYS),
            RingError::Config(msg) => std::io::Error::new(std::io::ErrorKind::InvalidInput, msg),
            other => match other.raw_os_error() {
                Some(errno) => std::io::Error::from_raw_os_error(errno),
                None => std::io::Error::new(std::io::ErrorKind::Other, other),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, RingError>;

//! The kernel boundary.
//!
//! Every crossing into the kernel the ring makes goes through
//! `KernelBoundary`. `Syscalls` is the real thing; tests plug in a
//! simulated kernel that works on anonymous memory.

use std::os::unix::io::RawFd;

use iouring_core::abi::IoUringParams;
use nix::sys::signal::SigSet;

use crate::region::MappedRegion;
use crate::sys;

/// Kernel primitives used by the ring. Errors are raw errno values.
pub trait KernelBoundary: Send + Sync {
    /// `io_uring_setup`: negotiate sizes/features, fill `params`, return the ring fd.
    fn setup(&self, entries: u32, params: &mut IoUringParams) -> Result<RawFd, i32>;

    /// Map `len` bytes of the ring fd at one of the magic offsets.
    fn map(&self, fd: RawFd, len: usize, offset: u64) -> Result<MappedRegion, i32>;

    /// Release a mapping obtained from `map`.
    fn unmap(&self, region: MappedRegion) -> Result<(), i32> {
        region.unmap()
    }

    /// `io_uring_enter`: returns the number of entries consumed.
    fn enter(
        &self,
        fd: RawFd,
        to_submit: u32,
        min_complete: u32,
        flags: u32,
        sigmask: Option<&SigSet>,
    ) -> Result<u32, i32>;

    /// `io_uring_register`.
    ///
    /// # Safety
    /// `arg` must point to `nargs` elements of whatever `opcode` expects,
    /// valid for as long as the kernel holds the registration.
    unsafe fn register(
        &self,
        fd: RawFd,
        opcode: u32,
        arg: *const libc::c_void,
        nargs: u32,
    ) -> Result<(), i32>;

    /// Close the ring fd.
    fn close(&self, fd: RawFd) -> Result<(), i32>;
}

/// The running kernel.
#[derive(Debug, Clone, Copy, Default)]
pub struct Syscalls;

impl KernelBoundary for Syscalls {
    fn setup(&self, entries: u32, params: &mut IoUringParams) -> Result<RawFd, i32> {
        sys::io_uring_setup(entries, params)
    }

    fn map(&self, fd: RawFd, len: usize, offset: u64) -> Result<MappedRegion, i32> {
        MappedRegion::map_shared(fd, len, offset)
    }

    fn enter(
        &self,
        fd: RawFd,
        to_submit: u32,
        min_complete: u32,
        flags: u32,
        sigmask: Option<&SigSet>,
    ) -> Result<u32, i32> {
        let mask = sigmask.map_or(std::ptr::null(), |s| s.as_ref() as *const libc::sigset_t);
        sys::io_uring_enter(fd, to_submit, min_complete, flags, mask)
    }

    unsafe fn register(
        &self,
        fd: RawFd,
        opcode: u32,
        arg: *const libc::c_void,
        nargs: u32,
    ) -> Result<(), i32> {
        sys::io_uring_register(fd, opcode, arg, nargs)
    }

    fn close(&self, fd: RawFd) -> Result<(), i32> {
        nix::unistd::close(fd).map_err(|e| e as i32)
    }
}

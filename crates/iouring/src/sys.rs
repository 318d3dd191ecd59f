//! Raw `io_uring_setup` / `io_uring_enter` / `io_uring_register` syscalls.
//!
//! Thin wrappers: one syscall each, errno returned verbatim. Everything
//! above this file goes through `boundary::KernelBoundary`.

use std::os::unix::io::RawFd;

use iouring_core::abi::IoUringParams;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        use nix::errno::Errno;

        /// Kernel `_NSIG / 8`, the only sigset size `io_uring_enter` accepts.
        #[cfg(any(target_arch = "mips", target_arch = "mips64"))]
        pub const KERNEL_SIGSET_SIZE: usize = 16;
        #[cfg(not(any(target_arch = "mips", target_arch = "mips64")))]
        pub const KERNEL_SIGSET_SIZE: usize = 8;

        pub fn io_uring_setup(entries: u32, params: &mut IoUringParams) -> Result<RawFd, i32> {
            let ret = unsafe {
                libc::syscall(
                    libc::SYS_io_uring_setup,
                    entries as libc::c_long,
                    params as *mut IoUringParams,
                )
            };
            Errno::result(ret).map(|fd| fd as RawFd).map_err(|e| e as i32)
        }

        /// `sigmask` is passed through as-is; null means "leave the mask alone".
        pub fn io_uring_enter(
            fd: RawFd,
            to_submit: u32,
            min_complete: u32,
            flags: u32,
            sigmask: *const libc::sigset_t,
        ) -> Result<u32, i32> {
            let sigsz = if sigmask.is_null() { 0 } else { KERNEL_SIGSET_SIZE };
            let ret = unsafe {
                libc::syscall(
                    libc::SYS_io_uring_enter,
                    fd as libc::c_long,
                    to_submit as libc::c_long,
                    min_complete as libc::c_long,
                    flags as libc::c_long,
                    sigmask,
                    sigsz,
                )
            };
            Errno::result(ret).map(|n| n as u32).map_err(|e| e as i32)
        }

        /// # Safety
        /// `arg` must point to `nargs` elements of whatever `opcode` expects.
        pub unsafe fn io_uring_register(
            fd: RawFd,
            opcode: u32,
            arg: *const libc::c_void,
            nargs: u32,
        ) -> Result<(), i32> {
            let ret = libc::syscall(
                libc::SYS_io_uring_register,
                fd as libc::c_long,
                opcode as libc::c_long,
                arg,
                nargs as libc::c_long,
            );
            Errno::result(ret).map(drop).map_err(|e| e as i32)
        }
    } else {
        pub const KERNEL_SIGSET_SIZE: usize = 8;

        pub fn io_uring_setup(_entries: u32, _params: &mut IoUringParams) -> Result<RawFd, i32> {
            Err(libc::ENOSYS)
        }

        pub fn io_uring_enter(
            _fd: RawFd,
            _to_submit: u32,
            _min_complete: u32,
            _flags: u32,
            _sigmask: *const libc::sigset_t,
        ) -> Result<u32, i32> {
            Err(libc::ENOSYS)
        }

        /// # Safety
        /// Always fails; kept for signature parity.
        pub unsafe fn io_uring_register(
            _fd: RawFd,
            _opcode: u32,
            _arg: *const libc::c_void,
            _nargs: u32,
        ) -> Result<(), i32> {
            Err(libc::ENOSYS)
        }
    }
}

//! `MappedRegion` - an owned view over one shared mapping.
//!
//! The ring descriptors never do pointer arithmetic on their own; they ask
//! the region for typed pointers at a byte offset once, at construction, and
//! cache the result.

use std::num::NonZeroUsize;
use std::os::unix::io::{BorrowedFd, RawFd};
use std::ptr::NonNull;
use std::sync::atomic::AtomicU32;

use nix::sys::mman::{self, MapFlags, ProtFlags};

pub struct MappedRegion {
    base: NonNull<u8>,
    len: usize,
}

// Safety: the region is plain shared memory. Concurrent access to its
// contents is governed by the atomics the queue descriptors place in it.
unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Map `len` bytes of `fd` at `offset`, shared and read/write.
    pub fn map_shared(fd: RawFd, len: usize, offset: u64) -> Result<Self, i32> {
        let length = NonZeroUsize::new(len).ok_or(libc::EINVAL)?;
        cfg_if::cfg_if! {
            if #[cfg(any(target_os = "linux", target_os = "android"))] {
                let flags = MapFlags::MAP_SHARED | MapFlags::MAP_POPULATE;
            } else {
                let flags = MapFlags::MAP_SHARED;
            }
        }
        let ptr = unsafe {
            let fd = BorrowedFd::borrow_raw(fd);
            mman::mmap(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                flags,
                fd,
                offset as libc::off_t,
            )
        }
        .map_err(|e| e as i32)?;
        Ok(Self { base: ptr.cast(), len })
    }

    /// Private anonymous zero-filled mapping.
    pub fn anonymous(len: usize) -> Result<Self, i32> {
        let length = NonZeroUsize::new(len).ok_or(libc::EINVAL)?;
        let ptr = unsafe {
            mman::mmap_anonymous(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS,
            )
        }
        .map_err(|e| e as i32)?;
        Ok(Self { base: ptr.cast(), len })
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Typed pointer at `offset`. Panics if a `T` there would overrun the
    /// mapping or be misaligned; offsets come from the kernel, so this only
    /// fires on a corrupt parameter block.
    pub fn ptr_at<T>(&self, offset: usize) -> *mut T {
        assert!(
            offset + std::mem::size_of::<T>() <= self.len,
            "offset {} out of {}-byte region",
            offset,
            self.len
        );
        let p = unsafe { self.base.as_ptr().add(offset) } as *mut T;
        assert_eq!(p as usize % std::mem::align_of::<T>(), 0, "misaligned offset {}", offset);
        p
    }

    /// `AtomicU32` living at `offset`.
    #[inline]
    pub fn atomic_u32(&self, offset: usize) -> *const AtomicU32 {
        self.ptr_at::<AtomicU32>(offset)
    }

    /// One-shot read of a kernel-written constant (mask, entry count).
    #[inline]
    pub fn read_u32(&self, offset: usize) -> u32 {
        unsafe { std::ptr::read_volatile(self.ptr_at::<u32>(offset)) }
    }

    /// `count` consecutive `T`s starting at `offset`.
    pub fn array_at<T>(&self, offset: usize, count: usize) -> *mut T {
        assert!(
            offset + count * std::mem::size_of::<T>() <= self.len,
            "array of {} at {} overruns {}-byte region",
            count,
            offset,
            self.len
        );
        self.ptr_at::<T>(offset)
    }

    /// Unmap now, reporting failure. The region is gone either way.
    pub fn unmap(self) -> Result<(), i32> {
        let this = std::mem::ManuallyDrop::new(self);
        unsafe { mman::munmap(this.base.cast(), this.len) }.map_err(|e| e as i32)
    }
}

impl std::fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedRegion")
            .field("base", &self.base)
            .field("len", &self.len)
            .finish()
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        unsafe {
            let _ = mman::munmap(self.base.cast(), self.len);
        }
    }
}

//! `RingFile` - `std::io` over a ring.
//!
//! Each call submits one entry and waits for its completion, so the
//! caller's buffer is borrowed for exactly as long as the kernel may touch
//! it. Any number of `RingFile`s may share a ring: completions are routed
//! through `Ring::wait_for`.

use std::fs::File;
use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;

use iouring_core::SubmitEntry;

use crate::boundary::{KernelBoundary, Syscalls};
use crate::ring::Ring;

pub struct RingFile<'r, B: KernelBoundary = Syscalls> {
    ring: &'r Ring<B>,
    file: File,
    pos: u64,
}

impl<'r, B: KernelBoundary> RingFile<'r, B> {
    pub(crate) fn new(ring: &'r Ring<B>, file: File) -> Self {
        Self { ring, file, pos: 0 }
    }

    /// Read at `offset` without moving the cursor.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let len = clamp_len(buf.len());
        let entry = SubmitEntry::read(self.file.as_raw_fd(), buf.as_mut_ptr(), len, offset, 0);
        self.execute(entry).map(|n| n as usize)
    }

    /// Write at `offset` without moving the cursor.
    pub fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        let len = clamp_len(buf.len());
        let entry = SubmitEntry::write(self.file.as_raw_fd(), buf.as_ptr(), len, offset, 0);
        self.execute(entry).map(|n| n as usize)
    }

    pub fn sync_all(&self) -> io::Result<()> {
        self.execute(SubmitEntry::fsync(self.file.as_raw_fd(), false, 0)).map(drop)
    }

    pub fn sync_data(&self) -> io::Result<()> {
        self.execute(SubmitEntry::fsync(self.file.as_raw_fd(), true, 0)).map(drop)
    }

    /// Cursor used by `Read`/`Write`.
    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn set_position(&mut self, pos: u64) {
        self.pos = pos;
    }

    pub fn get_ref(&self) -> &File {
        &self.file
    }

    pub fn into_inner(self) -> File {
        self.file
    }

    fn execute(&self, mut entry: SubmitEntry) -> io::Result<i32> {
        let id = self.ring.next_id();
        entry.user_data = id;

        // Safety: the buffer behind `entry` is borrowed by our caller until
        // we return, and we only return once the completion for `id` is in.
        unsafe { self.ring.push(entry)? };

        let cqe = self.ring.wait_for(id)?;
        if cqe.res < 0 {
            Err(io::Error::from_raw_os_error(-cqe.res))
        } else {
            Ok(cqe.res)
        }
    }
}

impl<B: KernelBoundary> Read for RingFile<'_, B> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.read_at(buf, self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<B: KernelBoundary> Write for RingFile<'_, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.write_at(buf, self.pos)?;
        self.pos += n as u64;
        Ok(n)
    }

    /// Nothing is buffered; durability is `sync_all`/`sync_data`.
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<B: KernelBoundary> std::fmt::Debug for RingFile<'_, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingFile")
            .field("ring_fd", &self.ring.fd())
            .field("fd", &self.file.as_raw_fd())
            .field("pos", &self.pos)
            .finish()
    }
}

#[inline]
fn clamp_len(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

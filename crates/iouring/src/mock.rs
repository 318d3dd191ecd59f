//! Simulated kernel for unit tests.
//!
//! Implements `KernelBoundary` on anonymous memory with the same layout
//! rules the real kernel uses. `enter` consumes published entries in order
//! and posts one completion per entry. Nop/Read/Write/Fsync are actually
//! executed (pread/pwrite/fsync on the entry's fd), so file-level behavior
//! can be tested without io_uring support in the host kernel.
//!
//! ```text
//! SQ ring: head@0 tail@4 mask@8 entries@12 flags@16 dropped@20 array@64
//! CQ ring: head tail mask entries overflow flags at +0..+20, cqes at +64
//!          (+0 is the start of the CQ mapping, or the first 64-byte
//!           boundary after the SQ array under single mmap)
//! ```

use std::collections::HashSet;
use std::os::unix::io::RawFd;
use std::ptr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use iouring_core::abi::{
    CqRingOffsets, IoUringParams, SqRingOffsets, OFF_CQ_RING, OFF_SQES, OFF_SQ_RING,
};
use iouring_core::opcode::{feat, fsync_flags, register, setup, sq_flags};
use iouring_core::{CompletionEntry, Opcode, SubmitEntry};
use nix::sys::signal::SigSet;

use crate::boundary::KernelBoundary;
use crate::region::MappedRegion;

const MOCK_MAX_ENTRIES: u32 = 4096;

/// Arguments of one `enter` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EnterCall {
    pub to_submit: u32,
    pub min_complete: u32,
    pub flags: u32,
}

pub(crate) struct MockKernel {
    single_mmap: bool,
    state: Mutex<MockState>,
    live_maps: AtomicUsize,
    enter_calls: AtomicUsize,
}

#[derive(Default)]
struct MockState {
    next_fd: RawFd,
    open: HashSet<RawFd>,
    params: IoUringParams,
    // Base addresses of the live mappings (0 = not mapped).
    sq_ring: usize,
    sqes: usize,
    cq_ring: usize,
    fail_setup: Option<i32>,
    fail_map_at: Option<u64>,
    fail_unmap: Option<i32>,
    fail_enter: Option<i32>,
    submitted: Vec<SubmitEntry>,
    last_enter: Option<EnterCall>,
    registered: Vec<(u32, u32)>,
}

impl MockKernel {
    pub fn new(single_mmap: bool) -> Self {
        Self {
            single_mmap,
            state: Mutex::new(MockState { next_fd: 100, ..Default::default() }),
            live_maps: AtomicUsize::new(0),
            enter_calls: AtomicUsize::new(0),
        }
    }

    fn st(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    // ── Fault injection ──

    pub fn fail_setup(&self, errno: Option<i32>) {
        self.st().fail_setup = errno;
    }

    pub fn fail_map_at(&self, offset: Option<u64>) {
        self.st().fail_map_at = offset;
    }

    pub fn fail_unmap(&self, errno: Option<i32>) {
        self.st().fail_unmap = errno;
    }

    pub fn fail_enter(&self, errno: Option<i32>) {
        self.st().fail_enter = errno;
    }

    // ── Observation ──

    pub fn live_maps(&self) -> usize {
        self.live_maps.load(Ordering::SeqCst)
    }

    pub fn open_fds(&self) -> usize {
        self.st().open.len()
    }

    pub fn enter_calls(&self) -> usize {
        self.enter_calls.load(Ordering::SeqCst)
    }

    pub fn last_enter(&self) -> Option<EnterCall> {
        self.st().last_enter
    }

    /// Every entry consumed so far, in consumption order.
    pub fn submitted(&self) -> Vec<SubmitEntry> {
        self.st().submitted.clone()
    }

    pub fn registered(&self) -> Vec<(u32, u32)> {
        self.st().registered.clone()
    }

    // ── Driving the rings directly ──

    /// Consume everything published, as an `enter` without a syscall would.
    pub fn consume_all(&self) -> u32 {
        self.st().consume(u32::MAX)
    }

    pub fn post_completion(&self, cqe: CompletionEntry) {
        self.st().post(cqe);
    }

    pub fn set_need_wakeup(&self, on: bool) {
        let st = self.st();
        if let Some(flags) = st.sq_atomic(st.params.sq_off.flags) {
            if on {
                flags.fetch_or(sq_flags::NEED_WAKEUP, Ordering::Release);
            } else {
                flags.fetch_and(!sq_flags::NEED_WAKEUP, Ordering::Release);
            }
        }
    }
}

impl KernelBoundary for MockKernel {
    fn setup(&self, entries: u32, params: &mut IoUringParams) -> Result<RawFd, i32> {
        if let Some(errno) = self.st().fail_setup {
            return Err(errno);
        }
        let clamp = params.flags & setup::CLAMP != 0;
        let entries = match entries {
            0 => return Err(libc::EINVAL),
            n if n > MOCK_MAX_ENTRIES && clamp => MOCK_MAX_ENTRIES,
            n if n > MOCK_MAX_ENTRIES => return Err(libc::EINVAL),
            n => n,
        };

        let n = entries.next_power_of_two();
        let cq_n = if params.flags & setup::CQSIZE != 0 {
            params.cq_entries.next_power_of_two()
        } else {
            2 * n
        };
        params.sq_entries = n;
        params.cq_entries = cq_n;
        params.features = feat::NODROP | if self.single_mmap { feat::SINGLE_MMAP } else { 0 };

        params.sq_off = SqRingOffsets {
            head: 0,
            tail: 4,
            ring_mask: 8,
            ring_entries: 12,
            flags: 16,
            dropped: 20,
            array: 64,
            ..Default::default()
        };
        let cq_base = if self.single_mmap { (64 + n * 4 + 63) & !63 } else { 0 };
        params.cq_off = CqRingOffsets {
            head: cq_base,
            tail: cq_base + 4,
            ring_mask: cq_base + 8,
            ring_entries: cq_base + 12,
            overflow: cq_base + 16,
            flags: cq_base + 20,
            cqes: cq_base + 64,
            ..Default::default()
        };

        let mut st = self.st();
        let fd = st.next_fd;
        st.next_fd += 1;
        st.open.insert(fd);
        st.params = *params;
        Ok(fd)
    }

    fn map(&self, fd: RawFd, len: usize, offset: u64) -> Result<MappedRegion, i32> {
        let mut st = self.st();
        if !st.open.contains(&fd) {
            return Err(libc::EBADF);
        }
        if st.fail_map_at == Some(offset) {
            return Err(libc::ENOMEM);
        }

        let region = MappedRegion::anonymous(len)?;
        let p = st.params;
        let addr = region.as_ptr() as usize;
        let put = |off: u32, v: u32| unsafe { region.ptr_at::<u32>(off as usize).write(v) };

        match offset {
            OFF_SQ_RING => {
                put(p.sq_off.ring_mask, p.sq_entries - 1);
                put(p.sq_off.ring_entries, p.sq_entries);
                st.sq_ring = addr;
                if self.single_mmap {
                    put(p.cq_off.ring_mask, p.cq_entries - 1);
                    put(p.cq_off.ring_entries, p.cq_entries);
                    st.cq_ring = addr;
                }
            }
            OFF_CQ_RING => {
                put(p.cq_off.ring_mask, p.cq_entries - 1);
                put(p.cq_off.ring_entries, p.cq_entries);
                st.cq_ring = addr;
            }
            OFF_SQES => st.sqes = addr,
            _ => return Err(libc::EINVAL),
        }

        self.live_maps.fetch_add(1, Ordering::SeqCst);
        Ok(region)
    }

    fn unmap(&self, region: MappedRegion) -> Result<(), i32> {
        let mut st = self.st();
        let addr = region.as_ptr() as usize;
        if st.sq_ring == addr {
            st.sq_ring = 0;
        }
        if st.cq_ring == addr {
            st.cq_ring = 0;
        }
        if st.sqes == addr {
            st.sqes = 0;
        }
        self.live_maps.fetch_sub(1, Ordering::SeqCst);

        match st.fail_unmap {
            // The memory still goes away (Drop); only the report fails.
            Some(errno) => {
                drop(region);
                Err(errno)
            }
            None => region.unmap(),
        }
    }

    fn enter(
        &self,
        fd: RawFd,
        to_submit: u32,
        min_complete: u32,
        flags: u32,
        _sigmask: Option<&SigSet>,
    ) -> Result<u32, i32> {
        self.enter_calls.fetch_add(1, Ordering::SeqCst);
        let mut st = self.st();
        if !st.open.contains(&fd) {
            return Err(libc::EBADF);
        }
        st.last_enter = Some(EnterCall { to_submit, min_complete, flags });
        if let Some(errno) = st.fail_enter {
            return Err(errno);
        }
        Ok(st.consume(to_submit))
    }

    unsafe fn register(
        &self,
        fd: RawFd,
        opcode: u32,
        _arg: *const libc::c_void,
        nargs: u32,
    ) -> Result<(), i32> {
        let mut st = self.st();
        if !st.open.contains(&fd) {
            return Err(libc::EBADF);
        }
        if opcode > register::UNREGISTER_EVENTFD {
            return Err(libc::EINVAL);
        }
        st.registered.push((opcode, nargs));
        Ok(())
    }

    fn close(&self, fd: RawFd) -> Result<(), i32> {
        if self.st().open.remove(&fd) {
            Ok(())
        } else {
            Err(libc::EBADF)
        }
    }
}

impl MockState {
    fn sq_atomic(&self, off: u32) -> Option<&AtomicU32> {
        (self.sq_ring != 0).then(|| unsafe { &*((self.sq_ring + off as usize) as *const AtomicU32) })
    }

    fn cq_atomic(&self, off: u32) -> Option<&AtomicU32> {
        (self.cq_ring != 0).then(|| unsafe { &*((self.cq_ring + off as usize) as *const AtomicU32) })
    }

    fn consume(&mut self, limit: u32) -> u32 {
        if self.sq_ring == 0 || self.sqes == 0 || self.cq_ring == 0 {
            return 0;
        }
        let p = self.params;
        let mask = p.sq_entries - 1;
        let array = (self.sq_ring + p.sq_off.array as usize) as *const u32;
        let sqes = self.sqes as *const SubmitEntry;

        let (h, n) = {
            let (Some(head), Some(tail)) = (self.sq_atomic(p.sq_off.head), self.sq_atomic(p.sq_off.tail))
            else {
                return 0;
            };
            let h = head.load(Ordering::Relaxed);
            (h, tail.load(Ordering::Acquire).wrapping_sub(h).min(limit))
        };

        for i in 0..n {
            let seq = h.wrapping_add(i);
            let idx = unsafe { ptr::read_volatile(array.add((seq & mask) as usize)) };
            if idx >= p.sq_entries {
                if let Some(dropped) = self.sq_atomic(p.sq_off.dropped) {
                    dropped.fetch_add(1, Ordering::Release);
                }
                continue;
            }
            let sqe = unsafe { ptr::read_volatile(sqes.add(idx as usize)) };
            let res = execute(&sqe);
            self.submitted.push(sqe);
            self.post(CompletionEntry { user_data: sqe.user_data, res, flags: 0 });
        }

        if let Some(head) = self.sq_atomic(p.sq_off.head) {
            head.store(h.wrapping_add(n), Ordering::Release);
        }
        n
    }

    fn post(&self, cqe: CompletionEntry) {
        let p = self.params;
        let (Some(head), Some(tail)) = (self.cq_atomic(p.cq_off.head), self.cq_atomic(p.cq_off.tail))
        else {
            return;
        };
        let h = head.load(Ordering::Acquire);
        let t = tail.load(Ordering::Relaxed);
        if t.wrapping_sub(h) >= p.cq_entries {
            if let Some(overflow) = self.cq_atomic(p.cq_off.overflow) {
                overflow.fetch_add(1, Ordering::Release);
            }
            return;
        }
        let slot = (t & (p.cq_entries - 1)) as usize;
        let cqes = (self.cq_ring + p.cq_off.cqes as usize) as *mut CompletionEntry;
        unsafe { ptr::write_volatile(cqes.add(slot), cqe) };
        tail.store(t.wrapping_add(1), Ordering::Release);
    }
}

/// Perform the operation an entry describes; kernel-style result.
fn execute(sqe: &SubmitEntry) -> i32 {
    let ret: isize = unsafe {
        match sqe.opcode() {
            Some(Opcode::Nop) => 0,
            Some(Opcode::Read) => libc::pread(
                sqe.fd,
                sqe.addr as *mut libc::c_void,
                sqe.len as usize,
                sqe.off as libc::off_t,
            ),
            Some(Opcode::Write) => libc::pwrite(
                sqe.fd,
                sqe.addr as *const libc::c_void,
                sqe.len as usize,
                sqe.off as libc::off_t,
            ),
            Some(Opcode::Fsync) if sqe.op_flags & fsync_flags::DATASYNC != 0 => {
                libc::fdatasync(sqe.fd) as isize
            }
            Some(Opcode::Fsync) => libc::fsync(sqe.fd) as isize,
            _ => return -libc::EINVAL,
        }
    };
    if ret < 0 {
        -std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO)
    } else {
        ret as i32
    }
}

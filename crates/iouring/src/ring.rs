//! `Ring` - the user-facing controller.
//!
//! ```text
//!  producer threads                        kernel
//!  ────────────────                        ──────
//!  next_id()       ─► unique user_data
//!  allocate_slot() ─► Slot{seq,index}      (waits while every slot in flight)
//!  fill_slot()     ─► SQE[index] = entry
//!  publish(slot)   ─► array[seq&mask]=index, tail=seq+1 (in seq order)
//!  drop(slot)      ─► NOP in its place when its turn comes
//!  submit()/enter()─► barrier, io_uring_enter ──► consumes head..tail
//!  reap()          ◄─────────────────────────────  CQE ring
//! ```
//!
//! # Teardown
//!
//! The queue views sit behind `RwLock<Option<_>>`. Hot-path calls take
//! the read side with `try_read` and answer `Closed` instead of blocking;
//! `close` takes the write side, detaches the views, then unmaps. No
//! caller can observe a dangling ring pointer.
//!
//! Lock order is always SQ then CQ.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, TryLockError};

use iouring_core::opcode::enter as enter_flags;
use iouring_core::{
    kdebug, ktrace, kwarn, CompletionEntry, Region, Result, RingError, RingParams, RingState,
    SubmitEntry,
};
use nix::sys::signal::SigSet;

use crate::boundary::{KernelBoundary, Syscalls};
use crate::config::RingConfig;
use crate::cqueue::CompletionQueue;
use crate::file::RingFile;
use crate::mapping;
use crate::squeue::{Acquire, Slot, SubmissionQueue, RETIRED_USER_DATA};

/// Busy-spin iterations before yielding the CPU while waiting on the ring.
const SPIN_LIMIT: u32 = 64;

pub struct Ring<B: KernelBoundary = Syscalls> {
    fd: RawFd,
    fd_open: AtomicBool,
    params: RingParams,
    sq: RwLock<Option<SubmissionQueue>>,
    cq: RwLock<Option<CompletionQueue>>,
    next_id: AtomicU64,
    /// Completions reaped by `wait_for` on behalf of another waiter.
    parked: Mutex<HashMap<u64, CompletionEntry>>,
    boundary: B,
}

impl Ring<Syscalls> {
    /// Ring with `size` submission entries and default options.
    pub fn new(size: u32) -> Result<Self> {
        Self::with_config(RingConfig::new(size))
    }

    pub fn with_config(config: RingConfig) -> Result<Self> {
        Self::with_boundary(Syscalls, config)
    }
}

impl<B: KernelBoundary> Ring<B> {
    /// Ring over an arbitrary kernel boundary.
    pub fn with_boundary(boundary: B, config: RingConfig) -> Result<Self> {
        let est = mapping::establish(&boundary, &config)?;
        kdebug!("ring fd={} up: {:?} {:?}", est.fd, est.sq, est.cq);
        Ok(Self {
            fd: est.fd,
            fd_open: AtomicBool::new(true),
            params: est.params,
            sq: RwLock::new(Some(est.sq)),
            cq: RwLock::new(Some(est.cq)),
            next_id: AtomicU64::new(0),
            parked: Mutex::new(HashMap::new()),
            boundary,
        })
    }

    // ── Accessors ──

    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    #[inline]
    pub fn params(&self) -> &RingParams {
        &self.params
    }

    #[inline]
    pub fn boundary(&self) -> &B {
        &self.boundary
    }

    /// Unique, increasing identifier for correlating submissions with
    /// completions. The first call returns 1.
    #[inline]
    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    pub fn is_closed(&self) -> bool {
        !self.fd_open.load(Ordering::Acquire)
    }

    // ── Lock plumbing ──

    /// Non-blocking read access for the submission hot path.
    fn sq_hot(&self) -> Result<RwLockReadGuard<'_, Option<SubmissionQueue>>> {
        match self.sq.try_read() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::Poisoned(p)) => Ok(p.into_inner()),
            Err(TryLockError::WouldBlock) => Err(RingError::Closed),
        }
    }

    fn with_sq_hot<R>(&self, f: impl FnOnce(&SubmissionQueue) -> R) -> Result<R> {
        let guard = self.sq_hot()?;
        guard.as_ref().map(f).ok_or(RingError::Closed)
    }

    fn with_sq<R>(&self, f: impl FnOnce(&SubmissionQueue) -> R) -> Result<R> {
        let guard = self.sq.read().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().map(f).ok_or(RingError::Closed)
    }

    fn with_cq<R>(&self, f: impl FnOnce(&CompletionQueue) -> R) -> Result<R> {
        let guard = self.cq.read().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().map(f).ok_or(RingError::Closed)
    }

    // ── Submission ──

    /// Claim a free submission slot, waiting while every slot is in flight.
    ///
    /// Waiting does not enter the kernel: another thread (or the SQ poll
    /// thread) must submit for a slot to come free.
    pub fn allocate_slot(&self) -> Result<Slot> {
        let mut spins = 0u32;
        loop {
            match self.with_sq_hot(|sq| sq.try_acquire())? {
                Acquire::Acquired(slot) => {
                    ktrace!("slot seq={} index={}", slot.seq(), slot.index());
                    return Ok(slot);
                }
                Acquire::Contended => std::hint::spin_loop(),
                Acquire::Full => backoff(&mut spins),
            }
        }
    }

    /// Claim a slot if one is free right now.
    pub fn try_allocate_slot(&self) -> Result<Option<Slot>> {
        loop {
            match self.with_sq_hot(|sq| sq.try_acquire())? {
                Acquire::Acquired(slot) => return Ok(Some(slot)),
                Acquire::Contended => std::hint::spin_loop(),
                Acquire::Full => return Ok(None),
            }
        }
    }

    /// Write `entry` into the slot's SQE.
    ///
    /// # Safety
    /// Memory referenced by `entry` must remain valid until its completion
    /// is reaped.
    pub unsafe fn fill_slot(&self, slot: &Slot, entry: SubmitEntry) -> Result<()> {
        self.with_sq_hot(|sq| sq.fill(slot, entry))
    }

    /// Make a filled slot visible to the kernel. Publication follows
    /// allocation order, so this waits until every earlier slot has been
    /// published or dropped.
    pub fn publish(&self, mut slot: Slot) -> Result<()> {
        let mut spins = 0u32;
        while !self.with_sq_hot(|sq| sq.try_publish(&mut slot))? {
            backoff(&mut spins);
        }
        Ok(())
    }

    /// Allocate, fill and publish in one step. Returns the slot index.
    ///
    /// # Safety
    /// Same contract as `fill_slot`.
    pub unsafe fn push(&self, entry: SubmitEntry) -> Result<u32> {
        let slot = self.allocate_slot()?;
        let index = slot.index();
        self.fill_slot(&slot, entry)?;
        self.publish(slot)?;
        Ok(index)
    }

    // ── Introspection ──

    /// Kernel consumption point of the submission ring.
    pub fn submit_head(&self) -> Result<u32> {
        self.with_sq(|sq| sq.head())
    }

    /// Published tail of the submission ring.
    pub fn submit_tail(&self) -> Result<u32> {
        self.with_sq(|sq| sq.tail())
    }

    pub fn ring_state(&self) -> Result<RingState> {
        self.with_sq(|sq| sq.state())
    }

    /// Published entries the kernel has not consumed yet.
    pub fn pending(&self) -> Result<u32> {
        self.with_sq(|sq| sq.pending())
    }

    /// Invalid entries the kernel skipped.
    pub fn dropped(&self) -> Result<u32> {
        self.with_sq(|sq| sq.dropped())
    }

    pub fn completion_head(&self) -> Result<u32> {
        self.with_cq(|cq| cq.head())
    }

    pub fn completion_tail(&self) -> Result<u32> {
        self.with_cq(|cq| cq.tail())
    }

    pub fn completions_ready(&self) -> Result<u32> {
        self.with_cq(|cq| cq.ready())
    }

    /// Completions lost to a full completion ring.
    pub fn overflow(&self) -> Result<u32> {
        self.with_cq(|cq| cq.overflow())
    }

    // ── Kernel entry ──

    /// Raw `io_uring_enter` after the submit barrier.
    ///
    /// On success the ring returns to `Empty`. On failure the errno is
    /// returned unchanged and the state is left as it was.
    pub fn enter(
        &self,
        fd: RawFd,
        to_submit: u32,
        min_complete: u32,
        flags: u32,
        sigmask: Option<&SigSet>,
    ) -> Result<u32> {
        self.with_sq_hot(|sq| sq.submit_barrier())?;
        ktrace!(
            "enter fd={} to_submit={} min_complete={} flags={:#x}",
            fd,
            to_submit,
            min_complete,
            flags
        );
        let consumed = self
            .boundary
            .enter(fd, to_submit, min_complete, flags, sigmask)
            .map_err(RingError::Enter)?;
        // A close that raced the syscall already detached the queue.
        if let Ok(guard) = self.sq_hot() {
            if let Some(sq) = guard.as_ref() {
                sq.mark_empty();
            }
        }
        Ok(consumed)
    }

    /// Hand every published entry to the kernel without waiting.
    pub fn submit(&self) -> Result<u32> {
        self.submit_and_wait(0)
    }

    /// Hand every published entry to the kernel and wait for at least
    /// `want` completions.
    pub fn submit_and_wait(&self, want: u32) -> Result<u32> {
        let (pending, need_wakeup) = self.with_sq_hot(|sq| {
            sq.retire_abandoned();
            sq.submit_barrier();
            (sq.pending(), sq.need_wakeup())
        })?;

        let mut flags = 0;
        if self.params.sqpoll() {
            if need_wakeup {
                flags |= enter_flags::SQ_WAKEUP;
            } else if want == 0 {
                // The poll thread is awake and will pick up the new tail.
                self.with_sq_hot(|sq| sq.mark_empty())?;
                return Ok(pending);
            }
        }
        if want > 0 {
            flags |= enter_flags::GETEVENTS;
        }
        self.enter(self.fd, pending, want, flags, None)
    }

    /// `io_uring_register` on this ring.
    ///
    /// # Safety
    /// `arg` must point to `nargs` elements of whatever `opcode` expects and
    /// stay valid while the kernel holds the registration.
    pub unsafe fn register(&self, opcode: u32, arg: *const libc::c_void, nargs: u32) -> Result<()> {
        if self.is_closed() {
            return Err(RingError::Closed);
        }
        self.boundary
            .register(self.fd, opcode, arg, nargs)
            .map_err(RingError::Register)
    }

    // ── Completion ──

    /// Take the oldest completion, if one is ready. Completions of retired
    /// slots are discarded.
    pub fn reap(&self) -> Result<Option<CompletionEntry>> {
        self.with_cq(|cq| loop {
            match cq.pop() {
                Some(cqe) if cqe.user_data == RETIRED_USER_DATA => continue,
                other => return other,
            }
        })
    }

    /// Submit and wait until the completion tagged `id` arrives. The entry
    /// must already be published.
    ///
    /// Completions for other ids are parked on the ring, where their own
    /// `wait_for` picks them up, so any number of threads may wait on one
    /// ring. Reaping, parking and the blocking enter all happen under one
    /// lock: a waiter never sleeps in the kernel on a completion someone
    /// else already took. Mixing this with plain `reap` on the same ids is
    /// the caller's problem.
    pub fn wait_for(&self, id: u64) -> Result<CompletionEntry> {
        let mut parked = self.parked.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(cqe) = parked.remove(&id) {
                return Ok(cqe);
            }
            while let Some(cqe) = self.reap()? {
                if cqe.user_data == id {
                    return Ok(cqe);
                }
                ktrace!("parking completion user_data={} res={}", cqe.user_data, cqe.res);
                parked.insert(cqe.user_data, cqe);
            }
            match self.submit_and_wait(1) {
                Ok(_) => {}
                Err(e) if e.is_interrupted() => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Completions reaped by `wait_for` that their waiter has not collected.
    pub fn parked(&self) -> usize {
        self.parked.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Drive a file through this ring.
    pub fn file(&self, file: std::fs::File) -> RingFile<'_, B> {
        RingFile::new(self, file)
    }

    // ── Teardown ──

    /// Unmap both rings and the entry array, then close the descriptor.
    ///
    /// Every step is attempted even if an earlier one fails; the first
    /// failure is returned. Closing twice is a no-op; every other operation
    /// on a closed ring returns `Closed`.
    pub fn close(&self) -> Result<()> {
        let mut first: Option<RingError> = None;

        if let Err(e) = self.close_sq() {
            first.get_or_insert(e);
        }
        if let Err(e) = self.close_cq() {
            first.get_or_insert(e);
        }
        if self.fd_open.swap(false, Ordering::AcqRel) {
            if let Err(errno) = self.boundary.close(self.fd) {
                first.get_or_insert(RingError::Close(errno));
            }
            kdebug!("ring fd={} closed", self.fd);
        }

        match first {
            Some(err) => {
                kwarn!("ring fd={} close: {}", self.fd, err);
                Err(err)
            }
            None => Ok(()),
        }
    }

    fn close_sq(&self) -> Result<()> {
        let mut sq_guard = self.sq.write().unwrap_or_else(PoisonError::into_inner);
        let Some(sq) = sq_guard.take() else {
            return Ok(());
        };

        if self.params.single_mmap() {
            // The CQ view points into the SQ mapping; detach it first.
            let mut cq_guard = self.cq.write().unwrap_or_else(PoisonError::into_inner);
            cq_guard.take();
        }

        let (ring, sqes) = sq.into_regions();
        let mut first = None;
        if let Err(errno) = self.boundary.unmap(ring) {
            first = Some(RingError::Munmap { region: Region::SqRing, errno });
        }
        if let Err(errno) = self.boundary.unmap(sqes) {
            first.get_or_insert(RingError::Munmap { region: Region::Sqes, errno });
        }
        first.map_or(Ok(()), Err)
    }

    fn close_cq(&self) -> Result<()> {
        let mut guard = self.cq.write().unwrap_or_else(PoisonError::into_inner);
        match guard.take().and_then(CompletionQueue::into_region) {
            Some(region) => self
                .boundary
                .unmap(region)
                .map_err(|errno| RingError::Munmap { region: Region::CqRing, errno }),
            None => Ok(()),
        }
    }
}

impl<B: KernelBoundary> Drop for Ring<B> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl<B: KernelBoundary> std::fmt::Debug for Ring<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ring")
            .field("fd", &self.fd)
            .field("sq_entries", &self.params.sq_entries)
            .field("cq_entries", &self.params.cq_entries)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[inline]
fn backoff(spins: &mut u32) {
    if *spins < SPIN_LIMIT {
        *spins += 1;
        std::hint::spin_loop();
    } else {
        std::thread::yield_now();
    }
}

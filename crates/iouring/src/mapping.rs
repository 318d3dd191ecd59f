//! Ring bring-up: setup syscall, then map the shared regions.
//!
//! ```text
//!   setup ──► map SQ ring ──► map SQEs ──► map CQ ring (separate only)
//!     │           │               │               │
//!     ▼           ▼               ▼               ▼
//!   error     close fd      unmap SQ ring    unmap SQEs, SQ ring
//!                                close fd       close fd
//! ```
//!
//! A failure at any step releases everything acquired before it in
//! reverse order, so nothing leaks out of a failed construction.

use std::os::unix::io::RawFd;

use iouring_core::abi::{OFF_CQ_RING, OFF_SQES, OFF_SQ_RING};
use iouring_core::{kdebug, kwarn, Region, Result, RingError, RingParams};

use crate::boundary::KernelBoundary;
use crate::config::RingConfig;
use crate::cqueue::CompletionQueue;
use crate::region::MappedRegion;
use crate::squeue::SubmissionQueue;

#[derive(Debug)]
pub(crate) struct Established {
    pub fd: RawFd,
    pub params: RingParams,
    pub sq: SubmissionQueue,
    pub cq: CompletionQueue,
}

pub(crate) fn establish<B: KernelBoundary>(boundary: &B, config: &RingConfig) -> Result<Established> {
    config.validate().map_err(RingError::Config)?;

    let mut raw = config.to_params();
    let fd = boundary.setup(config.entries, &mut raw).map_err(RingError::setup)?;
    let params = RingParams::new(raw);
    kdebug!(
        "setup fd={} sq_entries={} cq_entries={} features={:#x} flags={:#x}",
        fd,
        params.sq_entries,
        params.cq_entries,
        params.features,
        params.flags
    );

    let (sq_ring, sqes, cq_ring) = match map_regions(boundary, fd, &params) {
        Ok(maps) => maps,
        Err(err) => {
            if let Err(errno) = boundary.close(fd) {
                kwarn!("close fd {} after failed mapping: errno {}", fd, errno);
            }
            return Err(err);
        }
    };

    let cq = match cq_ring {
        Some(region) => CompletionQueue::owned(region, &params),
        None => CompletionQueue::shared(&sq_ring, &params),
    };
    let sq = SubmissionQueue::new(sq_ring, sqes, &params);

    Ok(Established { fd, params, sq, cq })
}

fn map_regions<B: KernelBoundary>(
    boundary: &B,
    fd: RawFd,
    params: &RingParams,
) -> Result<(MappedRegion, MappedRegion, Option<MappedRegion>)> {
    let sq_ring = boundary
        .map(fd, params.sq_map_size(), OFF_SQ_RING)
        .map_err(|errno| RingError::Mmap { region: Region::SqRing, errno })?;

    let sqes = match boundary.map(fd, params.sqes_size(), OFF_SQES) {
        Ok(region) => region,
        Err(errno) => {
            release(boundary, vec![(Region::SqRing, sq_ring)]);
            return Err(RingError::Mmap { region: Region::Sqes, errno });
        }
    };

    if params.single_mmap() {
        return Ok((sq_ring, sqes, None));
    }

    match boundary.map(fd, params.cq_ring_size(), OFF_CQ_RING) {
        Ok(cq_ring) => Ok((sq_ring, sqes, Some(cq_ring))),
        Err(errno) => {
            release(boundary, vec![(Region::Sqes, sqes), (Region::SqRing, sq_ring)]);
            Err(RingError::Mmap { region: Region::CqRing, errno })
        }
    }
}

/// Best-effort unmap during unwind; the original error is what the caller sees.
fn release<B: KernelBoundary>(boundary: &B, regions: Vec<(Region, MappedRegion)>) {
    for (which, region) in regions {
        if let Err(errno) = boundary.unmap(region) {
            kwarn!("unmap {} during unwind: errno {}", which, errno);
        }
    }
}

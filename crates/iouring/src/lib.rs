//! # iouring - shared-memory io_uring rings
//!
//! A `Ring` owns one io_uring instance: the descriptor from
//! `io_uring_setup`, the submission ring, the SQE array and the completion
//! ring (one mapping or two, depending on `FEAT_SINGLE_MMAP`).
//!
//! ## Layers
//!
//! | Module     | Role                                                      |
//! |------------|-----------------------------------------------------------|
//! | `sys`      | raw setup / enter / register syscalls                     |
//! | `region`   | owned mmap views with typed offset accessors              |
//! | `boundary` | `KernelBoundary` trait; `Syscalls` is the real kernel     |
//! | `mapping`  | setup + map with reverse-order unwind on failure          |
//! | `squeue`   | submission ring and the lock-free slot allocator          |
//! | `cqueue`   | completion ring                                           |
//! | `ring`     | `Ring` controller: ids, slots, enter, reap, close         |
//! | `file`     | `RingFile`: `Read`/`Write` over a ring                    |
//! | `config`   | `RingConfig` builder, env overrides                       |
//!
//! ## Usage
//!
//! ```no_run
//! use iouring::{Ring, SubmitEntry};
//!
//! let ring = Ring::new(64)?;
//! let id = ring.next_id();
//! let slot = ring.allocate_slot()?;
//! unsafe { ring.fill_slot(&slot, SubmitEntry::nop(id))? };
//! ring.publish(slot)?;
//! ring.submit_and_wait(1)?;
//! let cqe = ring.reap()?.expect("completion");
//! assert_eq!(cqe.user_data, id);
//! ring.close()?;
//! # Ok::<(), iouring::RingError>(())
//! ```

pub mod boundary;
pub mod config;
pub mod cqueue;
pub mod file;
mod mapping;
pub mod region;
pub mod ring;
pub mod squeue;
pub mod sys;

#[cfg(test)]
pub(crate) mod mock;

pub use boundary::{KernelBoundary, Syscalls};
pub use config::RingConfig;
pub use file::RingFile;
pub use region::MappedRegion;
pub use ring::Ring;
pub use squeue::{Slot, RETIRED_USER_DATA};

pub use iouring_core::{
    CompletionEntry, Opcode, Region, Result, RingError, RingParams, RingState, SubmitEntry,
};

//! # iouring-core
//!
//! Platform-agnostic types shared by the ring implementation:
//!
//! - `abi` - `io_uring_params` and the SQ/CQ offset tables, mmap magic offsets
//! - `entry` - 64-byte submission entry, 16-byte completion entry
//! - `opcode` - opcode enum and `IORING_*` / `IOSQE_*` flag values
//! - `params` - negotiated ring parameters and region sizing
//! - `state` - Empty/Filling/Full submission state
//! - `error` - error taxonomy (errno preserved verbatim)
//! - `kprint` - leveled stderr logging macros
//! - `env` - environment variable helpers
//!
//! No OS calls live here; see the `iouring` crate.

pub mod abi;
pub mod entry;
pub mod env;
pub mod error;
pub mod kprint;
pub mod opcode;
pub mod params;
pub mod state;

pub use entry::{CompletionEntry, SubmitEntry};
pub use error::{Region, Result, RingError};
pub use opcode::Opcode;
pub use params::RingParams;
pub use state::{AtomicRingState, RingState};

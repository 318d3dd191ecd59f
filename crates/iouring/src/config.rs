//! Ring configuration.
//!
//! Defaults are overridable through the environment (`from_env`) or the
//! builder methods. `Ring::new(n)` is shorthand for `RingConfig::new(n)`.

use iouring_core::abi::{IoUringParams, MAX_ENTRIES};
use iouring_core::env::{env_get, env_get_bool, env_get_opt};
use iouring_core::opcode::setup;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingConfig {
    /// Requested submission entries; the kernel rounds up to a power of two.
    pub entries: u32,
    /// Completion ring size; default is twice the submission size.
    pub cq_entries: Option<u32>,
    /// Kernel SQ polling thread with this idle timeout.
    pub sqpoll_idle_ms: Option<u32>,
    /// Pin the SQ polling thread to this CPU.
    pub sqpoll_cpu: Option<u32>,
    /// Busy-poll for completions (O_DIRECT files only).
    pub iopoll: bool,
    /// Let the kernel clamp oversized ring sizes instead of failing.
    pub clamp: bool,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self::new(128)
    }
}

impl RingConfig {
    pub fn new(entries: u32) -> Self {
        Self {
            entries,
            cq_entries: None,
            sqpoll_idle_ms: None,
            sqpoll_cpu: None,
            iopoll: false,
            clamp: false,
        }
    }

    /// Config from environment variables:
    ///
    /// | Variable | Meaning |
    /// |---|---|
    /// | `IOURING_ENTRIES` | submission entries |
    /// | `IOURING_CQ_ENTRIES` | completion entries |
    /// | `IOURING_SQPOLL_IDLE_MS` | enable SQPOLL with idle timeout |
    /// | `IOURING_SQPOLL_CPU` | SQPOLL CPU affinity |
    /// | `IOURING_IOPOLL` | busy-poll completions |
    pub fn from_env(default_entries: u32) -> Self {
        Self::from_env_prefixed("IOURING", default_entries)
    }

    /// `from_env` with `prefix` in place of `IOURING`, for running several
    /// differently configured rings in one process.
    pub fn from_env_prefixed(prefix: &str, default_entries: u32) -> Self {
        let key = |name: &str| format!("{}_{}", prefix, name);
        Self {
            entries: env_get(&key("ENTRIES"), default_entries),
            cq_entries: env_get_opt(&key("CQ_ENTRIES")),
            sqpoll_idle_ms: env_get_opt(&key("SQPOLL_IDLE_MS")),
            sqpoll_cpu: env_get_opt(&key("SQPOLL_CPU")),
            iopoll: env_get_bool(&key("IOPOLL"), false),
            clamp: false,
        }
    }

    // Builder pattern

    pub fn entries(mut self, n: u32) -> Self {
        self.entries = n;
        self
    }

    pub fn cq_entries(mut self, n: u32) -> Self {
        self.cq_entries = Some(n);
        self
    }

    pub fn sqpoll(mut self, idle_ms: u32) -> Self {
        self.sqpoll_idle_ms = Some(idle_ms);
        self
    }

    pub fn sqpoll_cpu(mut self, cpu: u32) -> Self {
        self.sqpoll_cpu = Some(cpu);
        self
    }

    pub fn iopoll(mut self, on: bool) -> Self {
        self.iopoll = on;
        self
    }

    pub fn clamp(mut self, on: bool) -> Self {
        self.clamp = on;
        self
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.entries == 0 {
            return Err("entries must be at least 1");
        }
        if self.entries > MAX_ENTRIES && !self.clamp {
            return Err("entries exceeds 32768 (enable clamp)");
        }
        if let Some(cq) = self.cq_entries {
            if cq < self.entries {
                return Err("cq_entries must be >= entries");
            }
        }
        if self.sqpoll_cpu.is_some() && self.sqpoll_idle_ms.is_none() {
            return Err("sqpoll_cpu requires sqpoll");
        }
        Ok(())
    }

    /// Setup flags derived from the options.
    pub fn setup_flags(&self) -> u32 {
        let mut flags = 0;
        if self.iopoll {
            flags |= setup::IOPOLL;
        }
        if self.sqpoll_idle_ms.is_some() {
            flags |= setup::SQPOLL;
        }
        if self.sqpoll_cpu.is_some() {
            flags |= setup::SQ_AFF;
        }
        if self.cq_entries.is_some() {
            flags |= setup::CQSIZE;
        }
        if self.clamp {
            flags |= setup::CLAMP;
        }
        flags
    }

    /// Parameter block to hand to `io_uring_setup`.
    pub fn to_params(&self) -> IoUringParams {
        IoUringParams {
            flags: self.setup_flags(),
            cq_entries: self.cq_entries.unwrap_or(0),
            sq_thread_idle: self.sqpoll_idle_ms.unwrap_or(0),
            sq_thread_cpu: self.sqpoll_cpu.unwrap_or(0),
            ..Default::default()
        }
    }
}

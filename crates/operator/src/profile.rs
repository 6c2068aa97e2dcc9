//! Scheduling profile counters
//!
//! One `ProfileManager` per resource domain. Counters use relaxed ordering;
//! they are only read for reporting. Switching profiling on starts a fresh
//! measurement window.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use tracing::info;

use bqs_protocol::{BqsStatus, StatusResult};

/// Profiling switch carried by UPDATE_PROFILING
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ProfilingMode {
    Close = 0,
    Open = 1,
}

impl ProfilingMode {
    pub fn from_value(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Close),
            1 => Some(Self::Open),
            _ => None,
        }
    }
}

/// Point-in-time copy of the profile counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfileSnapshot {
    pub enqueue_events: u64,
    pub f2nf_events: u64,
    pub hccl_sends: u64,
    pub hccl_recvs: u64,
}

#[derive(Debug)]
pub struct ProfileManager {
    mode: AtomicU32,
    enqueue_events: AtomicU64,
    f2nf_events: AtomicU64,
    hccl_sends: AtomicU64,
    hccl_recvs: AtomicU64,
}

impl Default for ProfileManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileManager {
    #[inline]
    pub const fn new() -> Self {
        Self {
            mode: AtomicU32::new(ProfilingMode::Close as u32),
            enqueue_events: AtomicU64::new(0),
            f2nf_events: AtomicU64::new(0),
            hccl_sends: AtomicU64::new(0),
            hccl_recvs: AtomicU64::new(0),
        }
    }

    /// Apply a raw profiling mode value
    pub fn update_mode(&self, value: u32) -> StatusResult {
        let mode = ProfilingMode::from_value(value).ok_or(BqsStatus::ParamInvalid)?;
        self.mode.store(mode as u32, Ordering::Relaxed);
        if mode == ProfilingMode::Open {
            self.reset();
        }
        info!(mode = ?mode, "updated profiling mode");
        Ok(())
    }

    pub fn mode(&self) -> ProfilingMode {
        match self.mode.load(Ordering::Relaxed) {
            1 => ProfilingMode::Open,
            _ => ProfilingMode::Close,
        }
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.mode() == ProfilingMode::Open
    }

    #[inline]
    pub fn record_enqueue_event(&self) {
        self.enqueue_events.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_f2nf_event(&self) {
        self.f2nf_events.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_hccl_send(&self) {
        self.hccl_sends.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_hccl_recv(&self) {
        self.hccl_recvs.fetch_add(1, Ordering::Relaxed);
    }

    /// Zero every counter, keeping the mode
    pub fn reset(&self) {
        self.enqueue_events.store(0, Ordering::Relaxed);
        self.f2nf_events.store(0, Ordering::Relaxed);
        self.hccl_sends.store(0, Ordering::Relaxed);
        self.hccl_recvs.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProfileSnapshot {
        ProfileSnapshot {
            enqueue_events: self.enqueue_events.load(Ordering::Relaxed),
            f2nf_events: self.f2nf_events.load(Ordering::Relaxed),
            hccl_sends: self.hccl_sends.load(Ordering::Relaxed),
            hccl_recvs: self.hccl_recvs.load(Ordering::Relaxed),
        }
    }
}

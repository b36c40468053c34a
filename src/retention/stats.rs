use std::sync::atomic::{AtomicI64, AtomicU8, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::worker::SweepResult;

/// Where the remover is in its sleep/scan/delete cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RemoverState {
    NotStarted = 0,
    Sleeping = 1,
    Scanning = 2,
    Deleting = 3,
    Stopped = 4,
    Failed = 5,
}

impl RemoverState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => RemoverState::Sleeping,
            2 => RemoverState::Scanning,
            3 => RemoverState::Deleting,
            4 => RemoverState::Stopped,
            5 => RemoverState::Failed,
            _ => RemoverState::NotStarted,
        }
    }
}

impl std::fmt::Display for RemoverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemoverState::NotStarted => write!(f, "not_started"),
            RemoverState::Sleeping => write!(f, "sleeping"),
            RemoverState::Scanning => write!(f, "scanning"),
            RemoverState::Deleting => write!(f, "deleting"),
            RemoverState::Stopped => write!(f, "stopped"),
            RemoverState::Failed => write!(f, "failed"),
        }
    }
}

const NO_CUTOFF: i64 = i64::MIN;

/// Cumulative counters for the expired change remover, shared with its task.
#[derive(Debug)]
pub struct RemoverStats {
    state: AtomicU8,
    passes: AtomicU64,
    documents_deleted: AtomicU64,
    tenants_reaped: AtomicU64,
    tenant_failures: AtomicU64,
    last_tenants_scanned: AtomicU64,
    last_cutoff_us: AtomicI64,
    last_pass_duration_ms: AtomicU64,
}

impl Default for RemoverStats {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(RemoverState::NotStarted as u8),
            passes: AtomicU64::new(0),
            documents_deleted: AtomicU64::new(0),
            tenants_reaped: AtomicU64::new(0),
            tenant_failures: AtomicU64::new(0),
            last_tenants_scanned: AtomicU64::new(0),
            last_cutoff_us: AtomicI64::new(NO_CUTOFF),
            last_pass_duration_ms: AtomicU64::new(0),
        }
    }
}

impl RemoverStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RemoverState {
        RemoverState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: RemoverState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Fold a completed sweep into the totals.
    pub(crate) fn record_sweep(&self, result: &SweepResult) {
        self.passes.fetch_add(1, Ordering::Relaxed);
        self.documents_deleted
            .fetch_add(result.documents_deleted, Ordering::Relaxed);
        self.tenants_reaped
            .fetch_add(result.tenants_reaped, Ordering::Relaxed);
        self.tenant_failures
            .fetch_add(result.tenants_failed, Ordering::Relaxed);
        self.last_tenants_scanned
            .store(result.tenants_scanned, Ordering::Relaxed);
        if let Some(cutoff) = result.cutoff {
            self.last_cutoff_us
                .store(cutoff.timestamp_micros(), Ordering::Relaxed);
        }
        self.last_pass_duration_ms
            .store(result.duration_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RemoverStatsSnapshot {
        let last_cutoff = match self.last_cutoff_us.load(Ordering::Relaxed) {
            NO_CUTOFF => None,
            us => DateTime::<Utc>::from_timestamp_micros(us),
        };
        RemoverStatsSnapshot {
            state: self.state(),
            passes: self.passes.load(Ordering::Relaxed),
            documents_deleted: self.documents_deleted.load(Ordering::Relaxed),
            tenants_reaped: self.tenants_reaped.load(Ordering::Relaxed),
            tenant_failures: self.tenant_failures.load(Ordering::Relaxed),
            last_tenants_scanned: self.last_tenants_scanned.load(Ordering::Relaxed),
            last_cutoff,
            last_pass_duration_ms: self.last_pass_duration_ms.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`RemoverStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoverStatsSnapshot {
    pub state: RemoverState,
    /// Sweeps that ran to completion or were interrupted by shutdown.
    pub passes: u64,
    pub documents_deleted: u64,
    pub tenants_reaped: u64,
    pub tenant_failures: u64,
    /// Tenants the most recent sweep started reaping.
    pub last_tenants_scanned: u64,
    /// Cutoff used by the most recent sweep that computed one.
    pub last_cutoff: Option<DateTime<Utc>>,
    pub last_pass_duration_ms: u64,
}

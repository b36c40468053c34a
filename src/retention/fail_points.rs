//! Runtime-toggleable instrumentation hooks for the expired change remover.
//!
//! Fail points are inert unless enabled. Tests use them to hold a sweep at a
//! known point or to substitute the wall time a sweep computes its cutoff
//! from, and to wait until the remover has actually reached them.

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// A named hook carrying optional data while enabled.
///
/// Every time the remover passes through an enabled fail point it bumps the
/// hit counter, which callers can wait on.
#[derive(Debug)]
pub struct FailPoint<T = ()> {
    name: &'static str,
    state: watch::Sender<Option<T>>,
    hits: watch::Sender<u64>,
}

impl<T> FailPoint<T>
where
    T: Clone + Send + Sync,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: watch::Sender::new(None),
            hits: watch::Sender::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Enable the fail point with `data`, returning the hit count at enable time.
    pub fn enable_with(&self, data: T) -> u64 {
        self.state.send_replace(Some(data));
        tracing::info!(fail_point = self.name, "Fail point enabled");
        self.hits()
    }

    pub fn disable(&self) {
        if self.state.send_replace(None).is_some() {
            tracing::info!(fail_point = self.name, "Fail point disabled");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.state.borrow().is_some()
    }

    pub fn hits(&self) -> u64 {
        *self.hits.borrow()
    }

    /// Resolve once the hit counter exceeds `after`.
    pub async fn wait_for_hit(&self, after: u64) {
        let mut rx = self.hits.subscribe();
        // The sender lives in `self`, so the channel cannot close under us
        let _ = rx.wait_for(|hits| *hits > after).await;
    }

    /// Take the data out of an enabled fail point, disabling it.
    ///
    /// Counts as a hit when something was taken.
    pub fn take(&self) -> Option<T> {
        let mut taken = None;
        self.state.send_if_modified(|state| {
            taken = state.take();
            taken.is_some()
        });
        if taken.is_some() {
            self.record_hit();
        }
        taken
    }

    fn record_hit(&self) {
        self.hits.send_modify(|hits| *hits += 1);
        tracing::info!(fail_point = self.name, "Fail point hit");
    }
}

impl FailPoint<()> {
    /// Enable the fail point, returning the hit count at enable time.
    pub fn enable(&self) -> u64 {
        self.enable_with(())
    }

    /// Block while the fail point is enabled.
    ///
    /// Records a hit on entry. Returns as soon as the fail point is disabled
    /// or `cancel` fires; returns `false` immediately if it was not enabled.
    pub async fn pause_while_enabled(&self, cancel: &CancellationToken) -> bool {
        let mut rx = self.state.subscribe();
        if rx.borrow_and_update().is_none() {
            return false;
        }

        self.record_hit();
        tokio::select! {
            _ = rx.wait_for(|state| state.is_none()) => {}
            _ = cancel.cancelled() => {
                tracing::debug!(fail_point = self.name, "Pause released by shutdown");
            }
        }
        true
    }
}

/// Fail points owned by the expired change remover.
#[derive(Debug)]
pub struct RemoverFailPoints {
    /// Pauses a sweep after the retention window is read and before the
    /// cutoff is computed.
    pub hang_before_removing: FailPoint,
    /// Wall time used for the next cutoff computation in place of the clock.
    /// Consumed by that computation.
    pub inject_current_wall_time: FailPoint<DateTime<Utc>>,
}

impl RemoverFailPoints {
    pub const HANG_BEFORE_REMOVING: &'static str = "hangBeforeRemovingExpiredChanges";
    pub const INJECT_CURRENT_WALL_TIME: &'static str =
        "injectCurrentWallTimeForRemovingExpiredDocuments";

    pub fn new() -> Self {
        Self {
            hang_before_removing: FailPoint::new(Self::HANG_BEFORE_REMOVING),
            inject_current_wall_time: FailPoint::new(Self::INJECT_CURRENT_WALL_TIME),
        }
    }
}

impl Default for RemoverFailPoints {
    fn default() -> Self {
        Self::new()
    }
}

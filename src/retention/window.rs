//! Expiry boundary computation.

use chrono::{DateTime, TimeDelta, Utc};

/// How long change collection documents are kept after their wall time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionWindow {
    /// Expiry is off: nothing is ever deleted.
    Disabled,
    /// Documents expire once they are older than this.
    After(TimeDelta),
}

impl RetentionWindow {
    /// Interpret the `expireAfterSeconds` cluster parameter.
    ///
    /// Unset, zero and negative values all disable expiry. A value too large
    /// to represent keeps everything, which is what an underflowing cutoff
    /// produces anyway.
    pub fn from_expire_after_seconds(seconds: Option<i64>) -> Self {
        match seconds {
            Some(s) if s > 0 => {
                RetentionWindow::After(TimeDelta::try_seconds(s).unwrap_or(TimeDelta::MAX))
            }
            _ => RetentionWindow::Disabled,
        }
    }

    pub fn is_disabled(&self) -> bool {
        matches!(self, RetentionWindow::Disabled)
    }

    /// Window length in whole seconds, `None` when disabled.
    pub fn seconds(&self) -> Option<i64> {
        match self {
            RetentionWindow::Disabled => None,
            RetentionWindow::After(d) => Some(d.num_seconds()),
        }
    }
}

/// Latest wall time that counts as expired at `now`.
///
/// Returns `None` when expiry is disabled, or when `now - window` falls
/// outside the representable range (nothing can be that old).
pub fn cutoff(now: DateTime<Utc>, window: RetentionWindow) -> Option<DateTime<Utc>> {
    match window {
        RetentionWindow::Disabled => None,
        RetentionWindow::After(d) => now.checked_sub_signed(d),
    }
}

/// Whether a document written at `wall_time` is expired under `cutoff`.
pub fn is_expired(wall_time: DateTime<Utc>, cutoff: DateTime<Utc>) -> bool {
    wall_time <= cutoff
}

//! Expired change removal for per-tenant change collections.
//!
//! A single background job periodically:
//! 1. Reads the retention window from the `changeStreams` cluster parameter
//! 2. Computes one cutoff wall time for the sweep
//! 3. Deletes documents at or before the cutoff from every tenant's collection
//!
//! All deletion operations are batched to avoid holding up concurrent writers
//! and support dry-run mode for testing retention settings.

pub mod clock;
pub mod fail_points;
mod reaper;
mod stats;
pub mod window;
mod worker;

pub use clock::{ManualClock, SystemClock, WallClock};
pub use fail_points::{FailPoint, RemoverFailPoints};
pub use reaper::{ReapOutcome, TenantReaper};
pub use stats::{RemoverState, RemoverStats, RemoverStatsSnapshot};
pub use window::RetentionWindow;
pub use worker::{
    ExpiredChangeRemover, RemoverContext, RemoverError, RemoverHandle, RemoverParameters,
    SweepResult,
};

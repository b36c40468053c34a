use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    config::RemoverConfig,
    db::{ChangeCollectionRepo, DbError, DbResult},
    models::TenantId,
};

/// What happened to one tenant's change collection during a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReapOutcome {
    /// The collection does not exist (change streams disabled, or dropped
    /// before anything was deleted).
    Missing,
    /// Expired documents were deleted. `truncated` means the per-tenant cap
    /// was reached and more expired documents may remain.
    Reaped { deleted: u64, truncated: bool },
    /// Dry run: `expired` documents would have been deleted.
    DryRun { expired: u64 },
}

impl ReapOutcome {
    pub fn deleted(&self) -> u64 {
        match self {
            ReapOutcome::Reaped { deleted, .. } => *deleted,
            ReapOutcome::Missing | ReapOutcome::DryRun { .. } => 0,
        }
    }
}

/// Deletes expired documents from one tenant's change collection at a time.
///
/// Deletion happens in bounded batches, each an independent storage call, so
/// the capture pipeline and readers interleave with the reaper instead of
/// waiting for a whole collection to be cleared. Interrupting between
/// batches loses nothing: the next sweep picks up whatever is still expired.
pub struct TenantReaper {
    collections: Arc<dyn ChangeCollectionRepo>,
    batch_size: u64,
    max_deletes: u64,
    dry_run: bool,
}

impl TenantReaper {
    pub fn new(collections: Arc<dyn ChangeCollectionRepo>, config: &RemoverConfig) -> Self {
        Self {
            collections,
            batch_size: config.batch_size.max(1),
            max_deletes: config.max_deletes(),
            dry_run: config.dry_run,
        }
    }

    /// Delete every document in `tenant`'s collection with wall time at or
    /// before `cutoff`, up to the per-tenant cap.
    pub async fn reap(&self, tenant: &TenantId, cutoff: DateTime<Utc>) -> DbResult<ReapOutcome> {
        if !self.collections.collection_exists(tenant).await? {
            return Ok(ReapOutcome::Missing);
        }

        if self.dry_run {
            return match self.collections.count_expired(tenant, cutoff).await {
                Ok(expired) => Ok(ReapOutcome::DryRun { expired }),
                Err(DbError::CollectionNotFound(_)) => Ok(ReapOutcome::Missing),
                Err(e) => Err(e),
            };
        }

        let mut deleted: u64 = 0;
        loop {
            if deleted >= self.max_deletes {
                return Ok(ReapOutcome::Reaped {
                    deleted,
                    truncated: true,
                });
            }

            let limit = std::cmp::min(self.batch_size, self.max_deletes - deleted);
            let batch = match self
                .collections
                .delete_expired(tenant, cutoff, limit)
                .await
            {
                Ok(n) => n,
                // Dropped while we were working on it
                Err(DbError::CollectionNotFound(_)) if deleted == 0 => {
                    return Ok(ReapOutcome::Missing);
                }
                Err(DbError::CollectionNotFound(_)) => break,
                Err(e) => return Err(e),
            };

            deleted += batch;
            if batch < limit {
                break;
            }

            tracing::trace!(tenant = %tenant, deleted, "Deleted batch of expired changes");
            tokio::task::yield_now().await;
        }

        Ok(ReapOutcome::Reaped {
            deleted,
            truncated: false,
        })
    }
}

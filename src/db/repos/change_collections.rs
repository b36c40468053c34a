use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    db::error::DbResult,
    models::{ChangeDocument, TenantId},
};

/// Enumerates the tenants that currently have a change collection.
///
/// The listing reflects the state at call time only. A tenant absent from
/// one call may appear in the next (change streams enabled) and vice versa
/// (collection dropped). An empty set is a valid answer.
#[async_trait]
pub trait TenantRegistry: Send + Sync {
    async fn list_tenants(&self) -> DbResult<BTreeSet<TenantId>>;
}

#[async_trait]
pub trait ChangeCollectionRepo: Send + Sync {
    // ==================== Capture Operations ====================

    /// Materialize the change collection for a tenant.
    ///
    /// Returns `false` if the collection already existed.
    async fn create_collection(&self, tenant: &TenantId) -> DbResult<bool>;

    /// Drop the change collection for a tenant along with all its documents.
    ///
    /// Returns `false` if there was no collection to drop.
    async fn drop_collection(&self, tenant: &TenantId) -> DbResult<bool>;

    /// Append a document to the tenant's change collection.
    ///
    /// Fails with `DbError::CollectionNotFound` if change streams are not
    /// enabled for the tenant.
    async fn insert(&self, tenant: &TenantId, document: ChangeDocument) -> DbResult<()>;

    /// All documents of the tenant's collection, ordered by wall time.
    ///
    /// Returns `None` if the collection does not exist.
    async fn list_documents(&self, tenant: &TenantId) -> DbResult<Option<Vec<ChangeDocument>>>;

    // ==================== Retention Operations ====================

    /// Check whether the tenant's change collection exists.
    async fn collection_exists(&self, tenant: &TenantId) -> DbResult<bool>;

    /// Count documents whose wall time is at or before `cutoff`.
    async fn count_expired(&self, tenant: &TenantId, cutoff: DateTime<Utc>) -> DbResult<u64>;

    /// Delete up to `limit` documents whose wall time is at or before `cutoff`.
    ///
    /// Each call is a single bounded storage operation so that concurrent
    /// inserts and reads are never blocked for longer than one batch.
    /// Returns the number of documents deleted.
    async fn delete_expired(
        &self,
        tenant: &TenantId,
        cutoff: DateTime<Utc>,
        limit: u64,
    ) -> DbResult<u64>;
}

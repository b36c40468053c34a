use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::{
    db::{
        error::{DbError, DbResult},
        repos::{ChangeCollectionRepo, TenantRegistry},
    },
    models::{ChangeDocument, TenantId},
    retention::window,
};

/// Documents keyed by (wall time, insertion sequence).
///
/// The sequence number disambiguates documents sharing a wall time and keeps
/// insertion order among them.
#[derive(Default)]
struct ChangeCollection {
    documents: BTreeMap<(DateTime<Utc>, u64), ChangeDocument>,
}

/// In-memory change collections, one per tenant.
///
/// Each tenant's collection sits behind its own lock, so tenants never
/// contend with each other. Locks are only taken inside synchronous sections
/// and are never held across an `.await`; a delete batch and a concurrent
/// insert simply serialize on the tenant's lock.
///
/// Suitable for tests and embedding. Nothing is persisted.
#[derive(Default)]
pub struct InMemoryChangeCollections {
    collections: DashMap<TenantId, Arc<RwLock<ChangeCollection>>>,
    next_seq: AtomicU64,
}

impl InMemoryChangeCollections {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a tenant's collection without holding the map shard lock.
    fn collection(&self, tenant: &TenantId) -> Option<Arc<RwLock<ChangeCollection>>> {
        self.collections
            .get(tenant)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Number of documents in a tenant's collection, `None` if it does not exist.
    pub fn len(&self, tenant: &TenantId) -> Option<usize> {
        self.collection(tenant)
            .map(|collection| collection.read().documents.len())
    }
}

#[async_trait]
impl TenantRegistry for InMemoryChangeCollections {
    async fn list_tenants(&self) -> DbResult<BTreeSet<TenantId>> {
        Ok(self
            .collections
            .iter()
            .map(|entry| entry.key().clone())
            .collect())
    }
}

#[async_trait]
impl ChangeCollectionRepo for InMemoryChangeCollections {
    async fn create_collection(&self, tenant: &TenantId) -> DbResult<bool> {
        let mut created = false;
        self.collections.entry(tenant.clone()).or_insert_with(|| {
            created = true;
            Arc::new(RwLock::new(ChangeCollection::default()))
        });
        Ok(created)
    }

    async fn drop_collection(&self, tenant: &TenantId) -> DbResult<bool> {
        Ok(self.collections.remove(tenant).is_some())
    }

    async fn insert(&self, tenant: &TenantId, document: ChangeDocument) -> DbResult<()> {
        let collection = self
            .collection(tenant)
            .ok_or_else(|| DbError::CollectionNotFound(tenant.clone()))?;
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        collection
            .write()
            .documents
            .insert((document.wall_time, seq), document);
        Ok(())
    }

    async fn list_documents(&self, tenant: &TenantId) -> DbResult<Option<Vec<ChangeDocument>>> {
        Ok(self
            .collection(tenant)
            .map(|collection| collection.read().documents.values().cloned().collect()))
    }

    async fn collection_exists(&self, tenant: &TenantId) -> DbResult<bool> {
        Ok(self.collections.contains_key(tenant))
    }

    async fn count_expired(&self, tenant: &TenantId, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let collection = self
            .collection(tenant)
            .ok_or_else(|| DbError::CollectionNotFound(tenant.clone()))?;
        let count = collection
            .read()
            .documents
            .keys()
            .take_while(|(wall_time, _)| window::is_expired(*wall_time, cutoff))
            .count();
        Ok(count as u64)
    }

    async fn delete_expired(
        &self,
        tenant: &TenantId,
        cutoff: DateTime<Utc>,
        limit: u64,
    ) -> DbResult<u64> {
        let collection = self
            .collection(tenant)
            .ok_or_else(|| DbError::CollectionNotFound(tenant.clone()))?;

        let mut guard = collection.write();
        let mut deleted = 0;
        while deleted < limit {
            let Some(entry) = guard.documents.first_entry() else {
                break;
            };
            // Keys are ordered by wall time, so the first unexpired key ends the batch
            if !window::is_expired(entry.key().0, cutoff) {
                break;
            }
            entry.remove();
            deleted += 1;
        }
        Ok(deleted)
    }
}

//! Expired change remover.
//!
//! Background job that periodically deletes expired documents from every
//! tenant's change collection. Each cycle sleeps, reads the retention window
//! from the `changeStreams` cluster parameter, computes a single cutoff and
//! applies it to every tenant in turn. Failures for one tenant are logged
//! and retried on the next cycle; nothing short of shutdown stops the loop.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;

use super::{
    clock::{SystemClock, WallClock},
    fail_points::RemoverFailPoints,
    reaper::{ReapOutcome, TenantReaper},
    stats::{RemoverState, RemoverStats, RemoverStatsSnapshot},
    window::{self, RetentionWindow},
};
use crate::{
    config::RemoverConfig,
    db::{
        ChangeCollectionRepo, ClusterParameterRepo, DbError, DbPool, TenantRegistry,
        memory::{InMemoryChangeCollections, InMemoryClusterParameters},
    },
    observability::metrics,
};

/// Storage and time sources the remover works against.
pub struct RemoverContext {
    pub collections: Arc<dyn ChangeCollectionRepo>,
    pub tenants: Arc<dyn TenantRegistry>,
    pub cluster_parameters: Arc<dyn ClusterParameterRepo>,
    pub clock: Arc<dyn WallClock>,
}

impl RemoverContext {
    pub fn from_db(db: &DbPool) -> Self {
        Self {
            collections: db.change_collections(),
            tenants: db.tenants(),
            cluster_parameters: db.cluster_parameters(),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn in_memory(
        store: Arc<InMemoryChangeCollections>,
        parameters: Arc<InMemoryClusterParameters>,
    ) -> Self {
        Self {
            collections: store.clone(),
            tenants: store,
            cluster_parameters: parameters,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn WallClock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Remover settings that can change while the job runs.
///
/// Read at the start of every cycle, so updates apply from the next sweep.
#[derive(Debug)]
pub struct RemoverParameters {
    config: RwLock<RemoverConfig>,
}

impl RemoverParameters {
    pub fn new(config: RemoverConfig) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    pub fn get(&self) -> RemoverConfig {
        self.config.read().clone()
    }

    pub fn update(&self, config: RemoverConfig) {
        *self.config.write() = config;
    }

    pub fn set_sleep_secs(&self, sleep_secs: u64) {
        self.config.write().sleep_secs = sleep_secs;
    }
}

/// Sweep-level failures. Logged by the loop, never fatal to it.
#[derive(Debug, Error)]
pub enum RemoverError {
    #[error("Failed to read retention window: {0}")]
    Policy(#[source] DbError),

    #[error("Failed to list tenants: {0}")]
    Registry(#[source] DbError),
}

/// Results from a single sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepResult {
    /// Retention window in effect, `None` when expiry is disabled.
    pub expire_after_seconds: Option<i64>,
    /// Cutoff applied to every tenant, `None` if the sweep never got that far.
    pub cutoff: Option<DateTime<Utc>>,
    pub dry_run: bool,
    /// Tenants the sweep started reaping.
    pub tenants_scanned: u64,
    pub tenants_reaped: u64,
    /// Tenants whose collection was gone by the time they were reaped.
    pub tenants_missing: u64,
    pub tenants_failed: u64,
    /// Tenants that hit the per-tenant delete cap.
    pub tenants_truncated: u64,
    pub documents_deleted: u64,
    /// Documents a dry run would have deleted.
    pub documents_expired: u64,
    /// Shutdown cut the sweep short.
    pub interrupted: bool,
    pub duration_ms: u64,
}

impl SweepResult {
    /// Check if any documents were deleted.
    pub fn has_deletions(&self) -> bool {
        self.documents_deleted > 0
    }
}

/// Deletes expired documents from per-tenant change collections.
pub struct ExpiredChangeRemover {
    ctx: RemoverContext,
    parameters: Arc<RemoverParameters>,
    fail_points: Arc<RemoverFailPoints>,
    stats: Arc<RemoverStats>,
}

impl ExpiredChangeRemover {
    pub fn new(ctx: RemoverContext, config: RemoverConfig) -> Self {
        Self {
            ctx,
            parameters: Arc::new(RemoverParameters::new(config)),
            fail_points: Arc::new(RemoverFailPoints::new()),
            stats: Arc::new(RemoverStats::new()),
        }
    }

    pub fn parameters(&self) -> Arc<RemoverParameters> {
        Arc::clone(&self.parameters)
    }

    pub fn fail_points(&self) -> Arc<RemoverFailPoints> {
        Arc::clone(&self.fail_points)
    }

    pub fn stats(&self) -> Arc<RemoverStats> {
        Arc::clone(&self.stats)
    }

    /// Run one complete sweep over all tenants.
    ///
    /// The retention window is read once and a single cutoff is applied to
    /// every tenant. When `cancel` fires the sweep stops before the next
    /// tenant; the tenant being reaped is finished first.
    pub async fn run_sweep(&self, cancel: &CancellationToken) -> Result<SweepResult, RemoverError> {
        let start = Instant::now();
        let config = self.parameters.get();
        self.stats.set_state(RemoverState::Scanning);

        let expire_after_seconds = self
            .ctx
            .cluster_parameters
            .expire_after_seconds()
            .await
            .map_err(RemoverError::Policy)?;
        let window = RetentionWindow::from_expire_after_seconds(expire_after_seconds);

        let mut result = SweepResult {
            expire_after_seconds: window.seconds(),
            dry_run: config.dry_run,
            ..Default::default()
        };

        if window.is_disabled() {
            tracing::debug!("Change collection expiry disabled, skipping sweep");
            return Ok(self.finish(result, start));
        }

        self.fail_points
            .hang_before_removing
            .pause_while_enabled(cancel)
            .await;
        if cancel.is_cancelled() {
            result.interrupted = true;
            return Ok(self.finish(result, start));
        }

        let now = self
            .fail_points
            .inject_current_wall_time
            .take()
            .unwrap_or_else(|| self.ctx.clock.now());
        let Some(cutoff) = window::cutoff(now, window) else {
            tracing::debug!(now = %now, "Retention window reaches past the earliest time, nothing to expire");
            return Ok(self.finish(result, start));
        };
        result.cutoff = Some(cutoff);

        let tenants = self
            .ctx
            .tenants
            .list_tenants()
            .await
            .map_err(RemoverError::Registry)?;

        self.stats.set_state(RemoverState::Deleting);
        let reaper = TenantReaper::new(Arc::clone(&self.ctx.collections), &config);

        for tenant in &tenants {
            if cancel.is_cancelled() {
                result.interrupted = true;
                break;
            }
            result.tenants_scanned += 1;

            match reaper.reap(tenant, cutoff).await {
                Ok(ReapOutcome::Missing) => {
                    result.tenants_missing += 1;
                    tracing::debug!(tenant = %tenant, "Change collection no longer exists, skipping");
                }
                Ok(ReapOutcome::Reaped { deleted, truncated }) => {
                    result.tenants_reaped += 1;
                    result.documents_deleted += deleted;
                    if truncated {
                        result.tenants_truncated += 1;
                    }
                    if deleted > 0 {
                        tracing::debug!(
                            tenant = %tenant,
                            deleted = deleted,
                            truncated = truncated,
                            cutoff = %cutoff,
                            "Removed expired changes"
                        );
                        metrics::record_remover_deletion(deleted);
                    }
                }
                Ok(ReapOutcome::DryRun { expired }) => {
                    result.documents_expired += expired;
                    if expired > 0 {
                        tracing::info!(
                            tenant = %tenant,
                            expired = expired,
                            cutoff = %cutoff,
                            "DRY RUN: Would remove expired changes"
                        );
                    }
                }
                Err(e) => {
                    result.tenants_failed += 1;
                    tracing::warn!(
                        tenant = %tenant,
                        error = %e,
                        "Failed to remove expired changes for tenant"
                    );
                    metrics::record_remover_tenant_failure();
                }
            }
        }

        Ok(self.finish(result, start))
    }

    fn finish(&self, mut result: SweepResult, start: Instant) -> SweepResult {
        let elapsed = start.elapsed();
        result.duration_ms = elapsed.as_millis() as u64;
        self.stats.record_sweep(&result);
        metrics::record_remover_pass(elapsed.as_secs_f64(), result.interrupted);
        result
    }

    /// Run the sleep/sweep loop on a dedicated task until `cancel` fires.
    ///
    /// A panic inside the loop is contained: the job is marked
    /// [`RemoverState::Failed`] and the caller is unaffected.
    pub fn spawn(self, cancel: CancellationToken) -> RemoverHandle {
        let stats = self.stats();
        let fail_points = self.fail_points();
        let parameters = self.parameters();

        let worker = tokio::spawn(self.run(cancel.clone()));
        let task = {
            let stats = Arc::clone(&stats);
            tokio::spawn(async move {
                if let Err(e) = worker.await {
                    stats.set_state(RemoverState::Failed);
                    tracing::error!(error = %e, "Expired change remover terminated abnormally");
                }
            })
        };

        RemoverHandle {
            cancel,
            task,
            stats,
            fail_points,
            parameters,
        }
    }

    async fn run(self, cancel: CancellationToken) {
        let config = self.parameters.get();
        let dry_run_msg = if config.dry_run { " (DRY RUN)" } else { "" };

        tracing::info!(
            sleep_secs = config.sleep_secs,
            batch_size = config.batch_size,
            max_deletes_per_tenant = config.max_deletes_per_tenant,
            dry_run = config.dry_run,
            "Starting expired change remover{}",
            dry_run_msg
        );

        loop {
            self.stats.set_state(RemoverState::Sleeping);
            let sleep_interval = self.parameters.get().sleep_interval();

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(sleep_interval) => {}
            }

            // Re-read so a change made during the sleep applies to this cycle
            if !self.parameters.get().enabled {
                tracing::debug!("Expired change remover disabled, skipping sweep");
                continue;
            }

            match self.run_sweep(&cancel).await {
                Ok(result) => {
                    if result.has_deletions() {
                        tracing::info!(
                            tenants = result.tenants_scanned,
                            deleted = result.documents_deleted,
                            failed = result.tenants_failed,
                            truncated = result.tenants_truncated,
                            duration_ms = result.duration_ms,
                            "Expired change removal complete"
                        );
                    } else {
                        tracing::debug!(
                            tenants = result.tenants_scanned,
                            failed = result.tenants_failed,
                            "Expired change removal complete, nothing to delete"
                        );
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Error removing expired changes");
                }
            }

            if cancel.is_cancelled() {
                break;
            }
        }

        self.stats.set_state(RemoverState::Stopped);
        tracing::info!("Expired change remover stopped");
    }
}

/// Handle to a spawned remover task.
pub struct RemoverHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    stats: Arc<RemoverStats>,
    fail_points: Arc<RemoverFailPoints>,
    parameters: Arc<RemoverParameters>,
}

impl RemoverHandle {
    /// Ask the remover to stop. Returns immediately; use [`join`](Self::join)
    /// to wait for it.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub async fn join(self) -> Result<(), tokio::task::JoinError> {
        self.task.await
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn stats(&self) -> RemoverStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn fail_points(&self) -> &Arc<RemoverFailPoints> {
        &self.fail_points
    }

    pub fn parameters(&self) -> &Arc<RemoverParameters> {
        &self.parameters
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeSet, time::Duration};

    use async_trait::async_trait;
    use chrono::{TimeDelta, TimeZone};
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::{
        db::DbResult,
        models::{ChangeDocument, TenantId},
        retention::clock::ManualClock,
    };

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn tenant(id: &str) -> TenantId {
        id.parse().unwrap()
    }

    struct Fixture {
        store: Arc<InMemoryChangeCollections>,
        params: Arc<InMemoryClusterParameters>,
        clock: Arc<ManualClock>,
    }

    impl Fixture {
        fn new(expire_after_seconds: Option<i64>) -> Self {
            let params = Arc::new(InMemoryClusterParameters::new());
            params.set_expire_after_seconds(expire_after_seconds);
            Self {
                store: Arc::new(InMemoryChangeCollections::new()),
                params,
                clock: Arc::new(ManualClock::new(base_time())),
            }
        }

        fn context(&self) -> RemoverContext {
            RemoverContext::in_memory(self.store.clone(), self.params.clone())
                .with_clock(self.clock.clone())
        }

        fn remover(&self, config: RemoverConfig) -> ExpiredChangeRemover {
            ExpiredChangeRemover::new(self.context(), config)
        }

        /// Create `id`'s collection with one document per offset (seconds from base).
        async fn seed(&self, id: &str, offsets: &[i64]) -> TenantId {
            let t = tenant(id);
            self.store.create_collection(&t).await.unwrap();
            for (i, offset) in offsets.iter().enumerate() {
                self.store
                    .insert(
                        &t,
                        ChangeDocument::insert(
                            "test.coll",
                            json!({"_id": i}),
                            base_time() + TimeDelta::seconds(*offset),
                        ),
                    )
                    .await
                    .unwrap();
            }
            t
        }
    }

    /// Collection store that fails every delete for one tenant.
    struct FailingTenantRepo {
        inner: Arc<InMemoryChangeCollections>,
        failing: TenantId,
    }

    #[async_trait]
    impl ChangeCollectionRepo for FailingTenantRepo {
        async fn create_collection(&self, tenant: &TenantId) -> DbResult<bool> {
            self.inner.create_collection(tenant).await
        }
        async fn drop_collection(&self, tenant: &TenantId) -> DbResult<bool> {
            self.inner.drop_collection(tenant).await
        }
        async fn insert(&self, tenant: &TenantId, document: ChangeDocument) -> DbResult<()> {
            self.inner.insert(tenant, document).await
        }
        async fn list_documents(&self, tenant: &TenantId) -> DbResult<Option<Vec<ChangeDocument>>> {
            self.inner.list_documents(tenant).await
        }
        async fn collection_exists(&self, tenant: &TenantId) -> DbResult<bool> {
            self.inner.collection_exists(tenant).await
        }
        async fn count_expired(&self, tenant: &TenantId, cutoff: DateTime<Utc>) -> DbResult<u64> {
            self.inner.count_expired(tenant, cutoff).await
        }
        async fn delete_expired(
            &self,
            tenant: &TenantId,
            cutoff: DateTime<Utc>,
            limit: u64,
        ) -> DbResult<u64> {
            if *tenant == self.failing {
                return Err(DbError::Internal("disk on fire".into()));
            }
            self.inner.delete_expired(tenant, cutoff, limit).await
        }
    }

    struct BrokenRegistry;

    #[async_trait]
    impl TenantRegistry for BrokenRegistry {
        async fn list_tenants(&self) -> DbResult<BTreeSet<TenantId>> {
            Err(DbError::Internal("catalog unavailable".into()))
        }
    }

    struct PanickingRegistry;

    #[async_trait]
    impl TenantRegistry for PanickingRegistry {
        async fn list_tenants(&self) -> DbResult<BTreeSet<TenantId>> {
            panic!("registry exploded");
        }
    }

    struct BrokenParameters;

    #[async_trait]
    impl ClusterParameterRepo for BrokenParameters {
        async fn expire_after_seconds(&self) -> DbResult<Option<i64>> {
            Err(DbError::Internal("parameters unavailable".into()))
        }
    }

    fn fast_config() -> RemoverConfig {
        RemoverConfig {
            sleep_secs: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_sweep_result_has_deletions() {
        let empty = SweepResult::default();
        assert!(!empty.has_deletions());

        let dry = SweepResult {
            documents_expired: 10,
            ..Default::default()
        };
        assert!(!dry.has_deletions());

        let with_deletions = SweepResult {
            documents_deleted: 1,
            ..Default::default()
        };
        assert!(with_deletions.has_deletions());
    }

    #[test]
    fn test_parameters_update() {
        let params = RemoverParameters::new(RemoverConfig::default());
        params.set_sleep_secs(3);
        assert_eq!(params.get().sleep_secs, 3);

        params.update(RemoverConfig {
            dry_run: true,
            ..Default::default()
        });
        let config = params.get();
        assert!(config.dry_run);
        assert_eq!(config.sleep_secs, 10);
    }

    #[rstest]
    #[case::unset(None)]
    #[case::zero(Some(0))]
    #[case::negative(Some(-5))]
    #[tokio::test]
    async fn test_disabled_window_is_noop(#[case] expire_after_seconds: Option<i64>) {
        let fx = Fixture::new(expire_after_seconds);
        let t = fx.seed("t1", &[-1000, -500]).await;
        let remover = fx.remover(RemoverConfig::default());

        // Would block the sweep if it were ever reached
        remover.fail_points().hang_before_removing.enable();

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            remover.run_sweep(&CancellationToken::new()),
        )
        .await
        .expect("disabled sweep must not pause")
        .unwrap();

        assert_eq!(result.expire_after_seconds, None);
        assert_eq!(result.cutoff, None);
        assert_eq!(result.tenants_scanned, 0);
        assert_eq!(fx.store.len(&t), Some(2));
        assert_eq!(remover.fail_points().hang_before_removing.hits(), 0);
    }

    #[tokio::test]
    async fn test_sweep_deletes_expired_across_tenants() {
        let fx = Fixture::new(Some(60));
        let a = fx.seed("tenant-a", &[0, 30, 90]).await;
        let b = fx.seed("tenant-b", &[10, 200]).await;
        fx.clock.set(base_time() + TimeDelta::seconds(100));
        let remover = fx.remover(RemoverConfig::default());

        let result = remover.run_sweep(&CancellationToken::new()).await.unwrap();

        assert_eq!(result.expire_after_seconds, Some(60));
        assert_eq!(result.cutoff, Some(base_time() + TimeDelta::seconds(40)));
        assert_eq!(result.tenants_scanned, 2);
        assert_eq!(result.tenants_reaped, 2);
        assert_eq!(result.documents_deleted, 3);
        assert!(!result.interrupted);

        let remaining = fx.store.list_documents(&a).await.unwrap().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].wall_time, base_time() + TimeDelta::seconds(90));
        assert_eq!(fx.store.len(&b), Some(1));

        let stats = remover.stats().snapshot();
        assert_eq!(stats.passes, 1);
        assert_eq!(stats.documents_deleted, 3);
        assert_eq!(stats.tenants_reaped, 2);
        assert_eq!(stats.last_cutoff, result.cutoff);
    }

    #[tokio::test]
    async fn test_window_is_reread_every_sweep() {
        let fx = Fixture::new(Some(3600));
        let t = fx.seed("t1", &[0]).await;
        fx.clock.set(base_time() + TimeDelta::seconds(10));
        let remover = fx.remover(RemoverConfig::default());

        let result = remover.run_sweep(&CancellationToken::new()).await.unwrap();
        assert_eq!(result.documents_deleted, 0);

        fx.params.set_expire_after_seconds(Some(5));
        let result = remover.run_sweep(&CancellationToken::new()).await.unwrap();
        assert_eq!(result.documents_deleted, 1);
        assert_eq!(fx.store.len(&t), Some(0));
    }

    #[tokio::test]
    async fn test_injected_wall_time_used_for_one_sweep() {
        let fx = Fixture::new(Some(10));
        let t = fx.seed("t1", &[0, 100]).await;
        let remover = fx.remover(RemoverConfig::default());
        let fp = remover.fail_points();

        let hits = fp
            .inject_current_wall_time
            .enable_with(base_time() + TimeDelta::seconds(50));
        let result = remover.run_sweep(&CancellationToken::new()).await.unwrap();
        assert_eq!(result.cutoff, Some(base_time() + TimeDelta::seconds(40)));
        assert_eq!(result.documents_deleted, 1);
        assert_eq!(fp.inject_current_wall_time.hits(), hits + 1);

        // Back on the manual clock, which still reads the base time
        let result = remover.run_sweep(&CancellationToken::new()).await.unwrap();
        assert_eq!(result.cutoff, Some(base_time() - TimeDelta::seconds(10)));
        assert_eq!(result.documents_deleted, 0);
        assert_eq!(fx.store.len(&t), Some(1));
    }

    #[tokio::test]
    async fn test_missing_tenant_is_skipped() {
        let fx = Fixture::new(Some(1));
        fx.seed("t1", &[0]).await;
        fx.clock.set(base_time() + TimeDelta::seconds(10));

        // Registry lists a tenant whose collection is absent from the store
        struct StaleRegistry;
        #[async_trait]
        impl TenantRegistry for StaleRegistry {
            async fn list_tenants(&self) -> DbResult<BTreeSet<TenantId>> {
                Ok(["t1", "gone"].iter().map(|s| s.parse().unwrap()).collect())
            }
        }
        let mut ctx = fx.context();
        ctx.tenants = Arc::new(StaleRegistry);

        let remover = ExpiredChangeRemover::new(ctx, RemoverConfig::default());
        let result = remover.run_sweep(&CancellationToken::new()).await.unwrap();
        assert_eq!(result.tenants_scanned, 2);
        assert_eq!(result.tenants_missing, 1);
        assert_eq!(result.tenants_reaped, 1);
        assert_eq!(result.documents_deleted, 1);
    }

    #[tokio::test]
    async fn test_tenant_failure_does_not_abort_sweep() {
        let fx = Fixture::new(Some(1));
        let a = fx.seed("tenant-a", &[0]).await;
        let bad = fx.seed("tenant-b", &[0]).await;
        let c = fx.seed("tenant-c", &[0]).await;
        fx.clock.set(base_time() + TimeDelta::seconds(10));

        let mut ctx = fx.context();
        ctx.collections = Arc::new(FailingTenantRepo {
            inner: fx.store.clone(),
            failing: bad.clone(),
        });
        let remover = ExpiredChangeRemover::new(ctx, RemoverConfig::default());

        let result = remover.run_sweep(&CancellationToken::new()).await.unwrap();
        assert_eq!(result.tenants_scanned, 3);
        assert_eq!(result.tenants_failed, 1);
        assert_eq!(result.tenants_reaped, 2);
        assert_eq!(result.documents_deleted, 2);

        assert_eq!(fx.store.len(&a), Some(0));
        assert_eq!(fx.store.len(&bad), Some(1));
        assert_eq!(fx.store.len(&c), Some(0));
        assert_eq!(remover.stats().snapshot().tenant_failures, 1);
    }

    #[tokio::test]
    async fn test_registry_error_abandons_sweep() {
        let fx = Fixture::new(Some(1));
        let mut ctx = fx.context();
        ctx.tenants = Arc::new(BrokenRegistry);
        let remover = ExpiredChangeRemover::new(ctx, RemoverConfig::default());

        let err = remover
            .run_sweep(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RemoverError::Registry(_)));
        assert_eq!(remover.stats().snapshot().passes, 0);
    }

    #[tokio::test]
    async fn test_policy_error_abandons_sweep() {
        let fx = Fixture::new(Some(1));
        let mut ctx = fx.context();
        ctx.cluster_parameters = Arc::new(BrokenParameters);
        let remover = ExpiredChangeRemover::new(ctx, RemoverConfig::default());

        let err = remover
            .run_sweep(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RemoverError::Policy(_)));
        assert!(err.to_string().contains("parameters unavailable"));
    }

    #[tokio::test]
    async fn test_cancelled_sweep_deletes_nothing() {
        let fx = Fixture::new(Some(1));
        let t = fx.seed("t1", &[0]).await;
        fx.clock.set(base_time() + TimeDelta::seconds(10));
        let remover = fx.remover(RemoverConfig::default());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = remover.run_sweep(&cancel).await.unwrap();

        assert!(result.interrupted);
        assert_eq!(result.tenants_scanned, 0);
        assert_eq!(fx.store.len(&t), Some(1));
    }

    #[tokio::test]
    async fn test_dry_run_sweep() {
        let fx = Fixture::new(Some(1));
        let t = fx.seed("t1", &[0, 1, 2]).await;
        fx.clock.set(base_time() + TimeDelta::seconds(10));
        let remover = fx.remover(RemoverConfig {
            dry_run: true,
            ..Default::default()
        });

        let result = remover.run_sweep(&CancellationToken::new()).await.unwrap();
        assert!(result.dry_run);
        assert_eq!(result.documents_expired, 3);
        assert_eq!(result.documents_deleted, 0);
        assert_eq!(fx.store.len(&t), Some(3));
    }

    #[tokio::test]
    async fn test_hang_fail_point_holds_sweep_before_cutoff() {
        let fx = Fixture::new(Some(1));
        let t = fx.seed("t1", &[0, 100]).await;
        let remover = Arc::new(fx.remover(RemoverConfig::default()));
        let fp = remover.fail_points();

        let hits = fp.hang_before_removing.enable();
        let sweep = {
            let remover = remover.clone();
            tokio::spawn(async move { remover.run_sweep(&CancellationToken::new()).await })
        };

        fp.hang_before_removing.wait_for_hit(hits).await;
        assert_eq!(fx.store.len(&t), Some(2));

        // Injected while paused, so this sweep's cutoff uses it
        fp.inject_current_wall_time
            .enable_with(base_time() + TimeDelta::seconds(50));
        fp.hang_before_removing.disable();

        let result = tokio::time::timeout(Duration::from_secs(5), sweep)
            .await
            .expect("sweep should resume once disabled")
            .unwrap()
            .unwrap();
        assert_eq!(result.cutoff, Some(base_time() + TimeDelta::seconds(49)));
        assert_eq!(result.documents_deleted, 1);
        assert_eq!(fx.store.len(&t), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_sweeps_after_each_sleep() {
        let fx = Fixture::new(Some(1));
        let t = fx.seed("t1", &[0]).await;
        fx.clock.set(base_time() + TimeDelta::seconds(10));

        let handle = fx
            .remover(RemoverConfig {
                sleep_secs: 5,
                ..Default::default()
            })
            .spawn(CancellationToken::new());

        // Nothing happens before the first sleep elapses
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(fx.store.len(&t), Some(1));
        assert_eq!(handle.stats().state, RemoverState::Sleeping);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fx.store.len(&t), Some(0));
        assert_eq!(handle.stats().passes, 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(handle.stats().passes, 2);

        handle.shutdown();
        let stats = handle.stats.clone();
        handle.join().await.unwrap();
        assert_eq!(stats.state(), RemoverState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_interval_is_hot_reloadable() {
        let fx = Fixture::new(Some(1));
        let handle = fx
            .remover(RemoverConfig {
                sleep_secs: 100,
                ..Default::default()
            })
            .spawn(CancellationToken::new());

        tokio::time::sleep(Duration::from_secs(101)).await;
        assert_eq!(handle.stats().passes, 1);

        // Takes effect from the next sleep
        handle.parameters().set_sleep_secs(2);
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(handle.stats().passes, 2);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(handle.stats().passes, 3);

        handle.shutdown();
        handle.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_during_sleep_is_prompt() {
        let fx = Fixture::new(Some(1));
        let handle = fx
            .remover(RemoverConfig {
                sleep_secs: 3600,
                ..Default::default()
            })
            .spawn(CancellationToken::new());

        handle.shutdown();
        let stats = handle.stats.clone();
        tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .expect("shutdown should interrupt the sleep")
            .unwrap();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.state, RemoverState::Stopped);
        assert_eq!(snapshot.passes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_pause() {
        let fx = Fixture::new(Some(1));
        let t = fx.seed("t1", &[0]).await;
        fx.clock.set(base_time() + TimeDelta::seconds(10));

        let handle = fx.remover(fast_config()).spawn(CancellationToken::new());
        let fp = handle.fail_points().clone();
        let hits = fp.hang_before_removing.enable();

        fp.hang_before_removing.wait_for_hit(hits).await;
        assert_eq!(handle.stats().state, RemoverState::Scanning);

        handle.shutdown();
        let stats = handle.stats.clone();
        handle.join().await.unwrap();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.state, RemoverState::Stopped);
        assert_eq!(snapshot.documents_deleted, 0);
        assert_eq!(fx.store.len(&t), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_remover_never_sweeps() {
        let fx = Fixture::new(Some(1));
        let t = fx.seed("t1", &[0]).await;
        fx.clock.set(base_time() + TimeDelta::seconds(10));

        let handle = fx
            .remover(RemoverConfig {
                enabled: false,
                ..fast_config()
            })
            .spawn(CancellationToken::new());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(handle.stats().passes, 0);
        assert_eq!(fx.store.len(&t), Some(1));

        handle.shutdown();
        handle.join().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabling_during_sleep_skips_next_sweep() {
        let fx = Fixture::new(Some(1));
        let t = fx.seed("t1", &[0]).await;
        fx.clock.set(base_time() + TimeDelta::seconds(10));

        let handle = fx
            .remover(RemoverConfig {
                sleep_secs: 5,
                ..Default::default()
            })
            .spawn(CancellationToken::new());

        tokio::time::sleep(Duration::from_secs(2)).await;
        handle.parameters().update(RemoverConfig {
            enabled: false,
            sleep_secs: 5,
            ..Default::default()
        });

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(handle.stats().passes, 0);
        assert_eq!(fx.store.len(&t), Some(1));

        // Re-enabling takes effect at the next wake-up
        handle.parameters().update(RemoverConfig {
            sleep_secs: 5,
            ..Default::default()
        });
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(handle.stats().passes, 1);
        assert_eq!(fx.store.len(&t), Some(0));

        handle.shutdown();
        handle.join().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_errors_do_not_stop_loop() {
        let fx = Fixture::new(Some(1));
        let mut ctx = fx.context();
        ctx.tenants = Arc::new(BrokenRegistry);

        let handle = ExpiredChangeRemover::new(ctx, fast_config()).spawn(CancellationToken::new());
        tokio::time::sleep(Duration::from_millis(10_500)).await;

        assert!(!handle.is_finished());
        assert_eq!(handle.stats().state, RemoverState::Sleeping);

        handle.shutdown();
        handle.join().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_panic_marks_remover_failed() {
        let fx = Fixture::new(Some(1));
        let mut ctx = fx.context();
        ctx.tenants = Arc::new(PanickingRegistry);

        let handle = ExpiredChangeRemover::new(ctx, fast_config()).spawn(CancellationToken::new());
        let stats = handle.stats.clone();

        // The supervising task absorbs the panic
        handle.join().await.unwrap();
        assert_eq!(stats.state(), RemoverState::Failed);
    }
}

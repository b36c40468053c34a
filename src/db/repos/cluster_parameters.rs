use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::db::error::DbResult;

/// Name of the cluster parameter holding change-stream options.
pub const CHANGE_STREAMS_PARAMETER: &str = "changeStreams";

/// Value of the `changeStreams` cluster parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeStreamsParameter {
    /// Seconds after which change collection documents expire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_after_seconds: Option<i64>,
}

/// Read access to cluster-wide parameters.
///
/// The expired-change remover only ever reads; writes belong to the
/// administrative command surface.
#[async_trait]
pub trait ClusterParameterRepo: Send + Sync {
    /// Current `changeStreams.expireAfterSeconds`, or `None` if unset.
    async fn expire_after_seconds(&self) -> DbResult<Option<i64>>;
}

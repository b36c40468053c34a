use async_trait::async_trait;
use parking_lot::RwLock;

use crate::db::{
    error::DbResult,
    repos::{ChangeStreamsParameter, ClusterParameterRepo},
};

/// In-memory cluster parameter store.
///
/// `set_expire_after_seconds` stands in for the administrative command that
/// changes the retention window; readers observe the new value on their
/// next read.
#[derive(Default)]
pub struct InMemoryClusterParameters {
    change_streams: RwLock<ChangeStreamsParameter>,
}

impl InMemoryClusterParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_expire_after_seconds(seconds: i64) -> Self {
        let params = Self::new();
        params.set_expire_after_seconds(Some(seconds));
        params
    }

    pub fn set_expire_after_seconds(&self, seconds: Option<i64>) {
        self.change_streams.write().expire_after_seconds = seconds;
    }
}

#[async_trait]
impl ClusterParameterRepo for InMemoryClusterParameters {
    async fn expire_after_seconds(&self) -> DbResult<Option<i64>> {
        Ok(self.change_streams.read().expire_after_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unset_by_default() {
        let params = InMemoryClusterParameters::new();
        assert_eq!(params.expire_after_seconds().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_is_visible_to_next_read() {
        let params = InMemoryClusterParameters::with_expire_after_seconds(3600);
        assert_eq!(params.expire_after_seconds().await.unwrap(), Some(3600));

        params.set_expire_after_seconds(Some(1));
        assert_eq!(params.expire_after_seconds().await.unwrap(), Some(1));

        params.set_expire_after_seconds(None);
        assert_eq!(params.expire_after_seconds().await.unwrap(), None);
    }
}

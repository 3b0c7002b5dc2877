//! ResultStore port: per-URL records keyed by (owner, property, url).

use async_trait::async_trait;

use crate::domain::{OwnerId, PropertyId, ResultKey, ResultRecord};
use crate::ports::StoreError;

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Insert or overwrite every record by identity, all or nothing.
    /// Returns the number of records written.
    async fn upsert_batch(&self, records: Vec<ResultRecord>) -> Result<usize, StoreError>;

    async fn get(&self, key: &ResultKey) -> Result<Option<ResultRecord>, StoreError>;

    async fn list_for_property(
        &self,
        owner: &OwnerId,
        property: &PropertyId,
    ) -> Result<Vec<ResultRecord>, StoreError>;
}

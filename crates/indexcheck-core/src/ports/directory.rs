//! Account and property directories (owned by other workflows).

use async_trait::async_trait;

use crate::domain::{CredentialBundle, OwnerId, PropertyId, PropertySummary, StoredCredential};
use crate::ports::StoreError;

#[async_trait]
pub trait CredentialDirectory: Send + Sync {
    /// `None` when the account has no credential document at all.
    async fn credential(&self, owner: &OwnerId) -> Result<Option<StoredCredential>, StoreError>;

    async fn save_refreshed_credential(
        &self,
        owner: &OwnerId,
        bundle: &CredentialBundle,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait PropertyDirectory: Send + Sync {
    async fn resolve_property(
        &self,
        owner: &OwnerId,
        canonical_url: &str,
    ) -> Result<Option<PropertyId>, StoreError>;

    /// `StoreError::NotFound` if the property is unknown.
    async fn update_property_summary(
        &self,
        property: &PropertyId,
        summary: PropertySummary,
    ) -> Result<(), StoreError>;
}

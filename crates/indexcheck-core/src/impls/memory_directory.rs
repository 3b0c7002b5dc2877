//! In-memory account and property directory.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{CredentialBundle, OwnerId, PropertyId, PropertySummary, StoredCredential};
use crate::ports::{CredentialDirectory, PropertyDirectory, StoreError};

#[derive(Debug, Default)]
struct Directory {
    credentials: HashMap<OwnerId, StoredCredential>,
    properties: HashMap<(OwnerId, String), PropertyId>,
    summaries: HashMap<PropertyId, Option<PropertySummary>>,
}

#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    inner: Mutex<Directory>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_credential(&self, owner: OwnerId, credential: StoredCredential) {
        self.inner.lock().await.credentials.insert(owner, credential);
    }

    pub async fn register_property(
        &self,
        owner: OwnerId,
        canonical_url: impl Into<String>,
        property: PropertyId,
    ) {
        let mut inner = self.inner.lock().await;
        inner.summaries.insert(property.clone(), None);
        inner.properties.insert((owner, canonical_url.into()), property);
    }

    /// Remove a property; later summary updates report `NotFound`.
    pub async fn remove_property(&self, property: &PropertyId) {
        let mut inner = self.inner.lock().await;
        inner.summaries.remove(property);
        inner.properties.retain(|_, p| p != property);
    }

    pub async fn summary(&self, property: &PropertyId) -> Option<PropertySummary> {
        self.inner.lock().await.summaries.get(property).cloned().flatten()
    }

    pub async fn stored_credential(&self, owner: &OwnerId) -> Option<StoredCredential> {
        self.inner.lock().await.credentials.get(owner).cloned()
    }
}

#[async_trait]
impl CredentialDirectory for InMemoryDirectory {
    async fn credential(&self, owner: &OwnerId) -> Result<Option<StoredCredential>, StoreError> {
        Ok(self.inner.lock().await.credentials.get(owner).cloned())
    }

    async fn save_refreshed_credential(
        &self,
        owner: &OwnerId,
        bundle: &CredentialBundle,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let stored = inner.credentials.entry(owner.clone()).or_default();
        let previous_refresh = stored.refresh_token.take();
        *stored = bundle.to_stored();
        // keep the old refresh token when the endpoint did not rotate it
        if stored.refresh_token.is_none() {
            stored.refresh_token = previous_refresh;
        }
        Ok(())
    }
}

#[async_trait]
impl PropertyDirectory for InMemoryDirectory {
    async fn resolve_property(
        &self,
        owner: &OwnerId,
        canonical_url: &str,
    ) -> Result<Option<PropertyId>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .properties
            .get(&(owner.clone(), canonical_url.to_string()))
            .cloned())
    }

    async fn update_property_summary(
        &self,
        property: &PropertyId,
        summary: PropertySummary,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let slot = inner
            .summaries
            .get_mut(property)
            .ok_or_else(|| StoreError::NotFound(format!("property {property}")))?;
        *slot = Some(summary);
        Ok(())
    }
}

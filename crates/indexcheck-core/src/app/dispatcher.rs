//! Dispatcher: the synchronous entry point of a check or reindex request.
//!
//! validate -> resolve property -> credential -> client -> url set ->
//! precheck -> job record (pending) -> task message -> enqueue.
//!
//! Nothing is persisted before the precheck passes. Credits are not taken
//! here; the worker debits when it picks the task up.

use std::sync::Arc;

use serde::Serialize;

use super::auth::Authenticator;
use super::collector::{Collected, UrlCollector};
use super::ledger::CreditLedger;
use crate::domain::{
    CredentialBundle, JobAction, JobId, JobRecord, NewJob, OwnerId, PipelineError, PropertyId,
    TaskMessage,
};
use crate::ports::{
    AuthError, Clock, CredentialDirectory, IdGenerator, JobStore, MessageQueue,
    PropertyDirectory, ResultStore, SearchConsole,
};

/// Caller request. `caller` is `None` when the request was not authenticated.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub caller: Option<OwnerId>,
    pub property_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartStatus {
    Pending,
    NoUrlsFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub status: StartStatus,
    pub job_id: Option<JobId>,
    pub urls_queued: u32,
    pub estimated_credits: u64,
    pub message: String,
}

impl StartResponse {
    fn no_urls(message: &str) -> Self {
        Self {
            status: StartStatus::NoUrlsFound,
            job_id: None,
            urls_queued: 0,
            estimated_credits: 0,
            message: message.to_string(),
        }
    }
}

/// Credits per URL for each action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pricing {
    pub unit_cost: u64,
    pub reindex_unit_cost: u64,
}

impl Pricing {
    pub fn estimate(&self, action: JobAction, urls: u32) -> u64 {
        let unit = match action {
            JobAction::Check => self.unit_cost,
            JobAction::Reindex => self.reindex_unit_cost,
        };
        u64::from(urls).saturating_mul(unit)
    }
}

/// Everything resolved before the url set is known.
struct Prepared {
    owner: OwnerId,
    property_id: PropertyId,
    property_url: String,
    bundle: CredentialBundle,
    client: Arc<dyn SearchConsole>,
}

pub struct Dispatcher {
    pub(crate) credentials: Arc<dyn CredentialDirectory>,
    pub(crate) properties: Arc<dyn PropertyDirectory>,
    pub(crate) authenticator: Arc<Authenticator>,
    pub(crate) collector: UrlCollector,
    pub(crate) ledger: Arc<CreditLedger>,
    pub(crate) jobs: Arc<dyn JobStore>,
    pub(crate) results: Arc<dyn ResultStore>,
    pub(crate) queue: Arc<dyn MessageQueue>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) pricing: Pricing,
    pub(crate) topic: String,
}

impl Dispatcher {
    /// Inspect every discovered URL of a property.
    pub async fn start_check(&self, request: StartRequest) -> Result<StartResponse, PipelineError> {
        let prepared = self.prepare(&request).await?;

        let urls = match self
            .collector
            .collect(prepared.client.as_ref(), &prepared.property_url)
            .await
        {
            Collected::Urls(urls) => urls,
            Collected::Empty => {
                tracing::info!(owner = %prepared.owner, property_url = %prepared.property_url, "no urls found");
                return Ok(StartResponse::no_urls(
                    "No URLs were found for this property. Nothing was charged.",
                ));
            }
        };

        self.enqueue(prepared, JobAction::Check, urls).await
    }

    /// Request re-indexing of every URL whose last verdict was not passing.
    pub async fn start_reindex(&self, request: StartRequest) -> Result<StartResponse, PipelineError> {
        let prepared = self.prepare(&request).await?;

        let urls: Vec<String> = self
            .results
            .list_for_property(&prepared.owner, &prepared.property_id)
            .await?
            .into_iter()
            .filter(|r| r.status.needs_reindex())
            .map(|r| r.url)
            .collect();

        if urls.is_empty() {
            tracing::info!(owner = %prepared.owner, property_url = %prepared.property_url, "nothing to reindex");
            return Ok(StartResponse::no_urls(
                "No URLs currently need re-indexing. Nothing was charged.",
            ));
        }

        self.enqueue(prepared, JobAction::Reindex, urls).await
    }

    async fn prepare(&self, request: &StartRequest) -> Result<Prepared, PipelineError> {
        let owner = request.caller.clone().ok_or_else(|| {
            PipelineError::Unauthenticated(
                "The function must be called while authenticated.".to_string(),
            )
        })?;
        let property_url = request.property_url.trim();
        if property_url.is_empty() {
            return Err(PipelineError::InvalidArgument(
                "The function must be called with a valid property URL.".to_string(),
            ));
        }

        let property_id = self
            .properties
            .resolve_property(&owner, property_url)
            .await?
            .ok_or_else(|| {
                PipelineError::NotFound(
                    "Property not found or you do not have permission to access it.".to_string(),
                )
            })?;

        let stored = self.credentials.credential(&owner).await?.ok_or_else(|| {
            PipelineError::FailedPrecondition(
                AuthError::InvalidCredential(String::new())
                    .user_message()
                    .to_string(),
            )
        })?;
        let bundle = CredentialBundle::from_stored(stored).inspect_err(|err| {
            tracing::warn!(owner = %owner, error = %err, "stored credential incomplete");
        })?;

        let authenticated = self.authenticator.authenticate(&bundle).await.inspect_err(|err| {
            tracing::warn!(owner = %owner, error = %err, "authentication failed");
        })?;
        let bundle = match authenticated.refreshed {
            Some(refreshed) => {
                if let Err(err) = self
                    .credentials
                    .save_refreshed_credential(&owner, &refreshed)
                    .await
                {
                    tracing::warn!(owner = %owner, error = %err, "could not persist refreshed credential");
                }
                refreshed
            }
            None => bundle,
        };

        Ok(Prepared {
            owner,
            property_id,
            property_url: property_url.to_string(),
            bundle,
            client: authenticated.client,
        })
    }

    async fn enqueue(
        &self,
        prepared: Prepared,
        action: JobAction,
        urls: Vec<String>,
    ) -> Result<StartResponse, PipelineError> {
        let url_count = u32::try_from(urls.len())
            .map_err(|_| PipelineError::Internal(format!("too many urls: {}", urls.len())))?;
        let estimated = self.pricing.estimate(action, url_count);

        self.ledger.precheck(&prepared.owner, estimated).await?;

        let now = self.clock.now();
        let mut record = JobRecord::pending(
            NewJob {
                id: self.ids.generate_job_id(),
                owner_id: prepared.owner.clone(),
                property_id: prepared.property_id.clone(),
                property_url: prepared.property_url.clone(),
                action,
                requested_url_count: url_count,
                estimated_credits: estimated,
            },
            now,
        );
        let job_id = record.id;
        self.jobs.insert(record.clone()).await?;

        let message = TaskMessage {
            job_id,
            owner_id: prepared.owner.clone(),
            property_id: prepared.property_id,
            property_url: prepared.property_url,
            action,
            urls,
            auth: prepared.bundle,
            credits_to_charge: estimated,
        };

        let published = match message.encode() {
            Ok(bytes) => self.queue.publish(&self.topic, bytes).await.map_err(|e| e.to_string()),
            Err(err) => Err(err.to_string()),
        };

        if let Err(reason) = published {
            tracing::error!(job_id = %job_id, owner = %prepared.owner, error = %reason, "enqueue failed");
            match record.fail(format!("enqueue_failed: {reason}"), self.clock.now()) {
                Ok(()) => {
                    if let Err(err) = self.jobs.save(&record).await {
                        tracing::error!(job_id = %job_id, error = %err, "could not mark job failed");
                    }
                }
                Err(err) => {
                    tracing::error!(job_id = %job_id, error = %err, "could not mark job failed");
                }
            }
            return Err(PipelineError::Internal(format!(
                "Failed to queue the job: {reason}"
            )));
        }

        tracing::info!(
            job_id = %job_id,
            owner = %prepared.owner,
            action = action.as_str(),
            urls = url_count,
            estimated_credits = estimated,
            "job queued"
        );
        Ok(StartResponse {
            status: StartStatus::Pending,
            job_id: Some(job_id),
            urls_queued: url_count,
            estimated_credits: estimated,
            message: format!(
                "Queued {url_count} URLs. Up to {estimated} credits will be charged when processing starts."
            ),
        })
    }
}

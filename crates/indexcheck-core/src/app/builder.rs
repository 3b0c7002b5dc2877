//! PipelineBuilder: wires ports into a [`Pipeline`].
//!
//! Fail-fast: `build()` lists every missing collaborator at once instead of
//! failing on the first one, and validates the configuration before any
//! component is constructed.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::auth::Authenticator;
use super::collector::UrlCollector;
use super::consumer::ConsumerGroup;
use super::dispatcher::{Dispatcher, Pricing};
use super::ledger::CreditLedger;
use super::purchase::PurchaseService;
use super::reconciler::Reconciler;
use super::status::JobStatusQuery;
use super::worker::TaskWorker;
use crate::config::{ConfigError, PipelineConfig};
use crate::impls::{SerialDelay, TokenBucket};
use crate::ports::{
    ClientFactory, Clock, CredentialDirectory, IdGenerator, JobStore, LedgerStore, MessageQueue,
    Pacing, PaymentGateway, PropertyDirectory, ResultStore, SystemClock, TokenEndpoint,
    UlidGenerator,
};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing components: {0:?}. These must be provided before build().")]
    MissingComponents(Vec<&'static str>),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Default)]
pub struct PipelineBuilder {
    config: PipelineConfig,
    ledger: Option<Arc<dyn LedgerStore>>,
    jobs: Option<Arc<dyn JobStore>>,
    results: Option<Arc<dyn ResultStore>>,
    credentials: Option<Arc<dyn CredentialDirectory>>,
    properties: Option<Arc<dyn PropertyDirectory>>,
    queue: Option<Arc<dyn MessageQueue>>,
    tokens: Option<Arc<dyn TokenEndpoint>>,
    clients: Option<Arc<dyn ClientFactory>>,
    payments: Option<Arc<dyn PaymentGateway>>,
    pacing: Option<Arc<dyn Pacing>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn ledger(mut self, ledger: Arc<dyn LedgerStore>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn jobs(mut self, jobs: Arc<dyn JobStore>) -> Self {
        self.jobs = Some(jobs);
        self
    }

    pub fn results(mut self, results: Arc<dyn ResultStore>) -> Self {
        self.results = Some(results);
        self
    }

    pub fn credentials(mut self, credentials: Arc<dyn CredentialDirectory>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn properties(mut self, properties: Arc<dyn PropertyDirectory>) -> Self {
        self.properties = Some(properties);
        self
    }

    pub fn queue(mut self, queue: Arc<dyn MessageQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn token_endpoint(mut self, tokens: Arc<dyn TokenEndpoint>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn client_factory(mut self, clients: Arc<dyn ClientFactory>) -> Self {
        self.clients = Some(clients);
        self
    }

    /// Optional; without it the pipeline has no purchase service.
    pub fn payment_gateway(mut self, payments: Arc<dyn PaymentGateway>) -> Self {
        self.payments = Some(payments);
        self
    }

    /// Optional; defaults to the configured delay or token bucket.
    pub fn pacing(mut self, pacing: Arc<dyn Pacing>) -> Self {
        self.pacing = Some(pacing);
        self
    }

    /// Optional; defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Optional; defaults to a [`UlidGenerator`] on the pipeline clock.
    pub fn ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    fn default_pacing(config: &PipelineConfig) -> Arc<dyn Pacing> {
        match config.rate_per_second.and_then(TokenBucket::per_second) {
            Some(bucket) => Arc::new(bucket),
            None => Arc::new(SerialDelay(config.pacing_delay())),
        }
    }

    pub fn build(self) -> Result<Pipeline, BuildError> {
        self.config.validate()?;

        let mut missing = Vec::new();
        if self.ledger.is_none() {
            missing.push("ledger");
        }
        if self.jobs.is_none() {
            missing.push("jobs");
        }
        if self.results.is_none() {
            missing.push("results");
        }
        if self.credentials.is_none() {
            missing.push("credentials");
        }
        if self.properties.is_none() {
            missing.push("properties");
        }
        if self.queue.is_none() {
            missing.push("queue");
        }
        if self.tokens.is_none() {
            missing.push("token_endpoint");
        }
        if self.clients.is_none() {
            missing.push("client_factory");
        }
        let (
            Some(ledger),
            Some(jobs),
            Some(results),
            Some(credentials),
            Some(properties),
            Some(queue),
            Some(tokens),
            Some(clients),
        ) = (
            self.ledger,
            self.jobs,
            self.results,
            self.credentials,
            self.properties,
            self.queue,
            self.tokens,
            self.clients,
        )
        else {
            return Err(BuildError::MissingComponents(missing));
        };

        let config = self.config;
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())));
        let pacing = self
            .pacing
            .unwrap_or_else(|| Self::default_pacing(&config));

        let ledger = Arc::new(CreditLedger::new(ledger, clock.clone()));
        let authenticator = Arc::new(Authenticator::new(
            tokens,
            clients,
            clock.clone(),
            config.token_safety_margin(),
        ));

        let dispatcher = Arc::new(Dispatcher {
            credentials: credentials.clone(),
            properties: properties.clone(),
            authenticator: authenticator.clone(),
            collector: UrlCollector::new(config.max_urls),
            ledger: ledger.clone(),
            jobs: jobs.clone(),
            results: results.clone(),
            queue: queue.clone(),
            ids,
            clock: clock.clone(),
            pricing: Pricing {
                unit_cost: config.unit_cost,
                reindex_unit_cost: config.reindex_unit_cost,
            },
            topic: config.topic.clone(),
        });

        let worker = Arc::new(TaskWorker {
            jobs: jobs.clone(),
            results,
            properties,
            credentials,
            ledger: ledger.clone(),
            authenticator,
            pacing,
            clock: clock.clone(),
            deadline: config.run_deadline(),
            heartbeat: config.heartbeat(),
        });

        let reconciler = Arc::new(Reconciler::new(
            jobs.clone(),
            ledger.clone(),
            clock,
            config.stale_job_after(),
        ));

        let purchases = self.payments.map(|gateway| {
            Arc::new(PurchaseService::new(
                gateway,
                ledger.clone(),
                config.packages.clone(),
            ))
        });

        Ok(Pipeline {
            dispatcher,
            worker,
            reconciler,
            purchases,
            status: Arc::new(JobStatusQuery::new(jobs)),
            ledger,
            queue,
            config,
        })
    }
}

/// Wired pipeline. Cheap to clone.
#[derive(Clone)]
pub struct Pipeline {
    pub dispatcher: Arc<Dispatcher>,
    pub worker: Arc<TaskWorker>,
    pub reconciler: Arc<Reconciler>,
    pub purchases: Option<Arc<PurchaseService>>,
    pub status: Arc<JobStatusQuery>,
    pub ledger: Arc<CreditLedger>,
    pub queue: Arc<dyn MessageQueue>,
    pub config: PipelineConfig,
}

impl Pipeline {
    /// Start `config.consumers` consumers on the configured topic.
    pub fn spawn_consumers(&self) -> ConsumerGroup {
        ConsumerGroup::spawn(
            self.config.consumers,
            self.queue.clone(),
            self.config.topic.clone(),
            self.worker.clone(),
            self.config.receive_wait(),
        )
    }

    /// Run the reconciler every `config.reconcile_interval()` until shutdown.
    pub fn spawn_reconciler(&self, shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let reconciler = Arc::clone(&self.reconciler);
        tokio::spawn(reconciler.run(self.config.reconcile_interval(), shutdown_rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{
        InMemoryDirectory, InMemoryJobStore, InMemoryLedger, InMemoryQueue, InMemoryResultStore,
        ScriptedClientFactory, ScriptedConsole, ScriptedTokenEndpoint,
    };
    use crate::ports::AuthError;

    fn complete() -> PipelineBuilder {
        let directory = Arc::new(InMemoryDirectory::new());
        PipelineBuilder::new()
            .ledger(Arc::new(InMemoryLedger::new()))
            .jobs(Arc::new(InMemoryJobStore::new()))
            .results(Arc::new(InMemoryResultStore::new()))
            .credentials(directory.clone())
            .properties(directory)
            .queue(Arc::new(InMemoryQueue::new(Arc::new(UlidGenerator::new(SystemClock)))))
            .token_endpoint(Arc::new(ScriptedTokenEndpoint::failing(AuthError::MissingRefreshToken)))
            .client_factory(Arc::new(ScriptedClientFactory::new(Arc::new(ScriptedConsole::new()))))
    }

    #[test]
    fn build_success() {
        let pipeline = complete().build().unwrap();
        assert!(pipeline.purchases.is_none());
        assert_eq!(pipeline.config.topic, "index-check-tasks");
    }

    #[test]
    fn build_lists_every_missing_component() {
        let result = PipelineBuilder::new()
            .ledger(Arc::new(InMemoryLedger::new()))
            .build();
        let Err(BuildError::MissingComponents(missing)) = result else {
            panic!("expected MissingComponents");
        };
        assert_eq!(
            missing,
            vec![
                "jobs",
                "results",
                "credentials",
                "properties",
                "queue",
                "token_endpoint",
                "client_factory"
            ]
        );
    }

    #[test]
    fn invalid_config_fails_before_wiring() {
        let config = PipelineConfig {
            consumers: 0,
            ..PipelineConfig::default()
        };
        let result = complete().config(config).build();
        assert!(matches!(result, Err(BuildError::Config(_))));
    }
}

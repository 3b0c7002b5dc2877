//! Scripted stand-ins for the external API, the token endpoint and the
//! payment gateway. Used by tests and the demo binary.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::domain::Verdict;
use crate::ports::{
    ApiError, AuthError, ClientFactory, DiscoverySource, PaymentError, PaymentGateway,
    RefreshedToken, SearchConsole, TokenEndpoint,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

/// What the scripted API answers for one inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    Verdict(Verdict),
    NoVerdict,
    /// The API answers with this error status.
    HttpError(u16),
    /// The call fails before any status is received.
    TransportError,
}

impl ScriptedReply {
    fn into_result(self) -> Result<Option<Verdict>, ApiError> {
        match self {
            ScriptedReply::Verdict(v) => Ok(Some(v)),
            ScriptedReply::NoVerdict => Ok(None),
            ScriptedReply::HttpError(status) => Err(ApiError::Http {
                status,
                message: "scripted failure".to_string(),
            }),
            ScriptedReply::TransportError => {
                Err(ApiError::Other("connection reset".to_string()))
            }
        }
    }
}

#[derive(Debug)]
struct Script {
    default_reply: ScriptedReply,
    replies: HashMap<String, ScriptedReply>,
    candidates: HashMap<DiscoverySource, Result<Vec<String>, ApiError>>,
    reindex_failures: HashSet<String>,
    fail_every: Option<u32>,
}

#[derive(Debug, Default)]
struct Calls {
    inspected: Vec<String>,
    reindexed: Vec<String>,
}

/// Inspection API fake driven by a per-URL script.
#[derive(Debug)]
pub struct ScriptedConsole {
    script: Mutex<Script>,
    calls: Mutex<Calls>,
    inspections: AtomicU32,
}

impl Default for ScriptedConsole {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedConsole {
    /// Every URL passes, no discovery source returns anything.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script {
                default_reply: ScriptedReply::Verdict(Verdict::Pass),
                replies: HashMap::new(),
                candidates: HashMap::new(),
                reindex_failures: HashSet::new(),
                fail_every: None,
            }),
            calls: Mutex::new(Calls::default()),
            inspections: AtomicU32::new(0),
        }
    }

    pub fn with_default_reply(self, reply: ScriptedReply) -> Self {
        lock(&self.script).default_reply = reply;
        self
    }

    pub fn with_reply(self, url: impl Into<String>, reply: ScriptedReply) -> Self {
        lock(&self.script).replies.insert(url.into(), reply);
        self
    }

    pub fn with_candidates(self, source: DiscoverySource, urls: Vec<String>) -> Self {
        lock(&self.script).candidates.insert(source, Ok(urls));
        self
    }

    pub fn with_failing_source(self, source: DiscoverySource) -> Self {
        lock(&self.script).candidates.insert(
            source,
            Err(ApiError::Http {
                status: 500,
                message: format!("{} unavailable", source.as_str()),
            }),
        );
        self
    }

    /// Every `n`th inspection answers 429, regardless of the URL.
    pub fn with_fail_every(self, n: u32) -> Self {
        lock(&self.script).fail_every = (n > 0).then_some(n);
        self
    }

    pub fn with_reindex_failure(self, url: impl Into<String>) -> Self {
        lock(&self.script).reindex_failures.insert(url.into());
        self
    }

    pub fn inspected(&self) -> Vec<String> {
        lock(&self.calls).inspected.clone()
    }

    pub fn reindexed(&self) -> Vec<String> {
        lock(&self.calls).reindexed.clone()
    }
}

#[async_trait]
impl SearchConsole for ScriptedConsole {
    async fn inspect(&self, url: &str, _property_url: &str) -> Result<Option<Verdict>, ApiError> {
        lock(&self.calls).inspected.push(url.to_string());
        let n = self.inspections.fetch_add(1, Ordering::SeqCst) + 1;

        let script = lock(&self.script);
        if script.fail_every.is_some_and(|every| n % every == 0) {
            return ScriptedReply::HttpError(429).into_result();
        }
        script
            .replies
            .get(url)
            .cloned()
            .unwrap_or_else(|| script.default_reply.clone())
            .into_result()
    }

    async fn list_candidates(
        &self,
        source: DiscoverySource,
        _property_url: &str,
    ) -> Result<Vec<String>, ApiError> {
        lock(&self.script)
            .candidates
            .get(&source)
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn request_reindex(&self, url: &str) -> Result<(), ApiError> {
        if lock(&self.script).reindex_failures.contains(url) {
            return Err(ApiError::Http {
                status: 403,
                message: "permission denied".to_string(),
            });
        }
        lock(&self.calls).reindexed.push(url.to_string());
        Ok(())
    }
}

/// Hands out the same scripted console for any token.
#[derive(Debug)]
pub struct ScriptedClientFactory {
    console: Arc<ScriptedConsole>,
    tokens: Mutex<Vec<String>>,
    refuse: AtomicBool,
}

impl ScriptedClientFactory {
    pub fn new(console: Arc<ScriptedConsole>) -> Self {
        Self {
            console,
            tokens: Mutex::new(Vec::new()),
            refuse: AtomicBool::new(false),
        }
    }

    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Access tokens clients were built with, in order.
    pub fn tokens_seen(&self) -> Vec<String> {
        lock(&self.tokens).clone()
    }
}

impl ClientFactory for ScriptedClientFactory {
    fn connect(&self, access_token: &str) -> Result<Arc<dyn SearchConsole>, ApiError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ApiError::Other("client construction refused".to_string()));
        }
        lock(&self.tokens).push(access_token.to_string());
        Ok(self.console.clone())
    }
}

/// Token endpoint that always answers the same way.
#[derive(Debug)]
pub struct ScriptedTokenEndpoint {
    outcome: Mutex<Result<RefreshedToken, AuthError>>,
    calls: AtomicU32,
}

impl ScriptedTokenEndpoint {
    pub fn succeeding(token: RefreshedToken) -> Self {
        Self::answering(Ok(token))
    }

    pub fn failing(err: AuthError) -> Self {
        Self::answering(Err(err))
    }

    pub fn answering(outcome: Result<RefreshedToken, AuthError>) -> Self {
        Self {
            outcome: Mutex::new(outcome),
            calls: AtomicU32::new(0),
        }
    }

    pub fn set_outcome(&self, outcome: Result<RefreshedToken, AuthError>) {
        *lock(&self.outcome) = outcome;
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenEndpoint for ScriptedTokenEndpoint {
    async fn refresh(&self, _refresh_token: &str) -> Result<RefreshedToken, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.outcome).clone()
    }
}

/// Payment gateway that approves a fixed set of (order, payment, signature).
#[derive(Debug, Default)]
pub struct InMemoryPaymentGateway {
    approved: Mutex<HashSet<(String, String, String)>>,
    unavailable: AtomicBool,
}

impl InMemoryPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn approve(&self, order_id: &str, payment_id: &str, signature: &str) {
        lock(&self.approved).insert((
            order_id.to_string(),
            payment_id.to_string(),
            signature.to_string(),
        ));
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn verify_signature(
        &self,
        order_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> Result<bool, PaymentError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PaymentError("gateway unreachable".to_string()));
        }
        Ok(lock(&self.approved).contains(&(
            order_id.to_string(),
            payment_id.to_string(),
            signature.to_string(),
        )))
    }
}

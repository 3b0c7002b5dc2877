//! Credential refresh and client construction.

use std::sync::Arc;

use chrono::Duration;

use crate::domain::CredentialBundle;
use crate::ports::{AuthError, ClientFactory, Clock, SearchConsole, TokenEndpoint};

/// A ready client, plus the refreshed credential when a refresh happened.
/// The caller decides whether and where to persist it.
pub struct AuthenticatedClient {
    pub client: Arc<dyn SearchConsole>,
    pub refreshed: Option<CredentialBundle>,
}

pub struct Authenticator {
    tokens: Arc<dyn TokenEndpoint>,
    clients: Arc<dyn ClientFactory>,
    clock: Arc<dyn Clock>,
    safety_margin: Duration,
}

impl Authenticator {
    pub fn new(
        tokens: Arc<dyn TokenEndpoint>,
        clients: Arc<dyn ClientFactory>,
        clock: Arc<dyn Clock>,
        safety_margin: Duration,
    ) -> Self {
        Self {
            tokens,
            clients,
            clock,
            safety_margin,
        }
    }

    /// `Ok(None)` when the bundle is still good for longer than the margin.
    pub async fn ensure_fresh(
        &self,
        bundle: &CredentialBundle,
    ) -> Result<Option<CredentialBundle>, AuthError> {
        if !bundle.needs_refresh(self.clock.now(), self.safety_margin) {
            return Ok(None);
        }
        let refresh_token = bundle
            .refresh_token
            .as_deref()
            .ok_or(AuthError::MissingRefreshToken)?;

        tracing::info!(expires_at = %bundle.expires_at, "access token expired or expiring; refreshing");
        let token = self.tokens.refresh(refresh_token).await.inspect_err(|err| {
            tracing::warn!(error = %err, reauth = err.requires_reauthentication(), "token refresh failed");
        })?;

        Ok(Some(CredentialBundle {
            access_token: token.access_token,
            expires_at: token.expires_at,
            refresh_token: token.refresh_token.or_else(|| bundle.refresh_token.clone()),
        }))
    }

    pub async fn authenticate(&self, bundle: &CredentialBundle) -> Result<AuthenticatedClient, AuthError> {
        let refreshed = self.ensure_fresh(bundle).await?;
        let token = refreshed
            .as_ref()
            .map_or(bundle.access_token.as_str(), |b| b.access_token.as_str());
        let client = self
            .clients
            .connect(token)
            .map_err(|e| AuthError::Client(e.to_string()))?;
        Ok(AuthenticatedClient { client, refreshed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{ScriptedClientFactory, ScriptedConsole, ScriptedTokenEndpoint};
    use crate::ports::{FixedClock, RefreshedToken};
    use chrono::{DateTime, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn bundle(expires_in_minutes: i64, refresh: Option<&str>) -> CredentialBundle {
        CredentialBundle {
            access_token: "old".into(),
            expires_at: t0() + Duration::minutes(expires_in_minutes),
            refresh_token: refresh.map(str::to_string),
        }
    }

    fn authenticator(tokens: Arc<ScriptedTokenEndpoint>) -> (Authenticator, Arc<ScriptedClientFactory>) {
        let factory = Arc::new(ScriptedClientFactory::new(Arc::new(ScriptedConsole::new())));
        let auth = Authenticator::new(
            tokens,
            factory.clone(),
            Arc::new(FixedClock::new(t0())),
            Duration::minutes(5),
        );
        (auth, factory)
    }

    fn fresh_token() -> RefreshedToken {
        RefreshedToken {
            access_token: "new".into(),
            expires_at: t0() + Duration::hours(1),
            refresh_token: None,
        }
    }

    #[tokio::test]
    async fn valid_token_is_used_as_is() {
        let tokens = Arc::new(ScriptedTokenEndpoint::succeeding(fresh_token()));
        let (auth, factory) = authenticator(tokens.clone());

        let client = auth.authenticate(&bundle(30, Some("r"))).await.unwrap();
        assert!(client.refreshed.is_none());
        assert_eq!(tokens.calls(), 0);
        assert_eq!(factory.tokens_seen(), vec!["old".to_string()]);
    }

    #[tokio::test]
    async fn token_inside_margin_is_refreshed_and_returned() {
        let tokens = Arc::new(ScriptedTokenEndpoint::succeeding(fresh_token()));
        let (auth, factory) = authenticator(tokens.clone());

        let client = auth.authenticate(&bundle(4, Some("r"))).await.unwrap();
        let refreshed = client.refreshed.unwrap();
        assert_eq!(refreshed.access_token, "new");
        // endpoint did not rotate it, so the old one is kept
        assert_eq!(refreshed.refresh_token.as_deref(), Some("r"));
        assert_eq!(factory.tokens_seen(), vec!["new".to_string()]);
    }

    #[tokio::test]
    async fn expired_without_refresh_token_needs_reauthentication() {
        let tokens = Arc::new(ScriptedTokenEndpoint::succeeding(fresh_token()));
        let (auth, _) = authenticator(tokens.clone());

        let err = auth.authenticate(&bundle(-1, None)).await.err().unwrap();
        assert_eq!(err, AuthError::MissingRefreshToken);
        assert!(err.requires_reauthentication());
        assert_eq!(tokens.calls(), 0);
    }

    #[tokio::test]
    async fn invalid_grant_is_propagated() {
        let tokens = Arc::new(ScriptedTokenEndpoint::failing(AuthError::InvalidGrant(
            "revoked".into(),
        )));
        let (auth, _) = authenticator(tokens);

        let err = auth.authenticate(&bundle(-10, Some("r"))).await.err().unwrap();
        assert!(matches!(err, AuthError::InvalidGrant(_)));
        assert!(err.user_message().contains("re-authenticate"));
    }

    #[tokio::test]
    async fn client_construction_failure_is_a_client_error() {
        let tokens = Arc::new(ScriptedTokenEndpoint::succeeding(fresh_token()));
        let (auth, factory) = authenticator(tokens);
        factory.set_refuse(true);

        let err = auth.authenticate(&bundle(30, Some("r"))).await.err().unwrap();
        assert!(matches!(err, AuthError::Client(_)));
    }
}

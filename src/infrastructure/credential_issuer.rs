use crate::domain::models::OAuthToken;
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::error::{AuthError, CredentialError, InfraError, OAuthError};
use crate::infrastructure::oauth_client::{
    OAuthHttpClient, OAuthRefreshRequest, OAuthTokenResponse, DEFAULT_TOKEN_ENDPOINT,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCredential {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn refresh(&self) -> Result<IssuedCredential, CredentialError>;

    fn cached(&self) -> Option<IssuedCredential> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_endpoint: String,
}

impl OAuthClientConfig {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_endpoint: DEFAULT_TOKEN_ENDPOINT.to_string(),
        }
    }

    pub fn with_token_endpoint(mut self, token_endpoint: impl Into<String>) -> Self {
        self.token_endpoint = token_endpoint.into();
        self
    }
}

pub struct OAuthCredentialIssuer<S, C>
where
    S: CredentialStore,
    C: OAuthHttpClient,
{
    config: OAuthClientConfig,
    credential_store: Arc<S>,
    oauth_client: Arc<C>,
    now_provider: NowProvider,
}

impl<S, C> OAuthCredentialIssuer<S, C>
where
    S: CredentialStore,
    C: OAuthHttpClient,
{
    pub fn new(config: OAuthClientConfig, credential_store: Arc<S>, oauth_client: Arc<C>) -> Self {
        Self {
            config,
            credential_store,
            oauth_client,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    fn token_from_response(
        &self,
        response: OAuthTokenResponse,
        fallback_refresh_token: Option<String>,
    ) -> OAuthToken {
        let expires_at = (self.now_provider)() + Duration::seconds(response.expires_in.max(0));
        OAuthToken {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(fallback_refresh_token),
            expires_at,
            token_type: response.token_type.unwrap_or_else(|| "Bearer".to_string()),
            scope: response.scope,
        }
    }
}

fn store_error(error: InfraError) -> CredentialError {
    CredentialError::Rejected(AuthError::new(error.to_string()))
}

fn exchange_error(error: OAuthError) -> CredentialError {
    if error.is_transient() {
        CredentialError::Unavailable(error.to_string())
    } else {
        CredentialError::Rejected(AuthError::new(error.to_string()))
    }
}

#[async_trait]
impl<S, C> CredentialIssuer for OAuthCredentialIssuer<S, C>
where
    S: CredentialStore,
    C: OAuthHttpClient,
{
    async fn refresh(&self) -> Result<IssuedCredential, CredentialError> {
        let Some(refresh_token) = self.credential_store.refresh_token().map_err(store_error)? else {
            return Err(AuthError::new(
                "no refresh token stored; interactive authentication required",
            )
            .into());
        };

        let response = self
            .oauth_client
            .refresh_access_token(OAuthRefreshRequest {
                token_endpoint: self.config.token_endpoint.clone(),
                client_id: self.config.client_id.clone(),
                client_secret: self.config.client_secret.clone(),
                refresh_token: refresh_token.clone(),
            })
            .await
            .map_err(exchange_error)?;

        let token = self.token_from_response(response, Some(refresh_token));
        self.credential_store.save_token(&token).map_err(store_error)?;
        Ok(IssuedCredential {
            access_token: token.access_token,
            expires_at: token.expires_at,
        })
    }

    fn cached(&self) -> Option<IssuedCredential> {
        let token = self.credential_store.load_token().ok().flatten()?;
        if !token.is_valid_at((self.now_provider)(), 0) {
            return None;
        }
        Some(IssuedCredential {
            access_token: token.access_token,
            expires_at: token.expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::credential_store::InMemoryCredentialStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Debug)]
    struct FakeOAuthHttpClient {
        response: Mutex<Result<OAuthTokenResponse, OAuthError>>,
        refresh_calls: AtomicUsize,
        last_refresh_token: Mutex<Option<String>>,
    }

    impl FakeOAuthHttpClient {
        fn succeeding(access_token: &str, refresh_token: Option<&str>) -> Self {
            Self {
                response: Mutex::new(Ok(OAuthTokenResponse {
                    access_token: access_token.to_string(),
                    refresh_token: refresh_token.map(ToOwned::to_owned),
                    expires_in: 3600,
                    token_type: Some("Bearer".to_string()),
                    scope: None,
                })),
                refresh_calls: AtomicUsize::new(0),
                last_refresh_token: Mutex::new(None),
            }
        }

        fn failing(error: OAuthError) -> Self {
            Self {
                response: Mutex::new(Err(error)),
                refresh_calls: AtomicUsize::new(0),
                last_refresh_token: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl OAuthHttpClient for FakeOAuthHttpClient {
        async fn refresh_access_token(
            &self,
            request: OAuthRefreshRequest,
        ) -> Result<OAuthTokenResponse, OAuthError> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_refresh_token.lock().expect("refresh token lock") =
                Some(request.refresh_token);
            self.response.lock().expect("response lock").clone()
        }
    }

    fn fixed_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-16T00:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn stored_token(refresh_token: Option<&str>, expires_at: DateTime<Utc>) -> OAuthToken {
        OAuthToken {
            access_token: "stored-access".to_string(),
            refresh_token: refresh_token.map(ToOwned::to_owned),
            expires_at,
            token_type: "Bearer".to_string(),
            scope: None,
        }
    }

    fn issuer(
        store: Arc<InMemoryCredentialStore>,
        client: Arc<FakeOAuthHttpClient>,
    ) -> OAuthCredentialIssuer<InMemoryCredentialStore, FakeOAuthHttpClient> {
        OAuthCredentialIssuer::new(OAuthClientConfig::new("client-id", "client-secret"), store, client)
            .with_now_provider(Arc::new(fixed_time))
    }

    #[tokio::test]
    async fn refresh_keeps_previous_refresh_token_when_none_returned() {
        let store = Arc::new(InMemoryCredentialStore::with_token(stored_token(
            Some("refresh-1"),
            fixed_time() - Duration::seconds(60),
        )));
        let client = Arc::new(FakeOAuthHttpClient::succeeding("new-access", None));

        let issued = issuer(Arc::clone(&store), Arc::clone(&client))
            .refresh()
            .await
            .expect("refresh succeeds");

        assert_eq!(issued.access_token, "new-access");
        assert_eq!(issued.expires_at, fixed_time() + Duration::seconds(3600));
        let saved = store.load_token().expect("load").expect("token saved");
        assert_eq!(saved.refresh_token, Some("refresh-1".to_string()));
        assert_eq!(
            client.last_refresh_token.lock().expect("lock").clone(),
            Some("refresh-1".to_string())
        );
    }

    #[tokio::test]
    async fn refresh_without_refresh_token_fails_without_network() {
        let store = Arc::new(InMemoryCredentialStore::with_token(stored_token(
            None,
            fixed_time(),
        )));
        let client = Arc::new(FakeOAuthHttpClient::succeeding("unused", None));

        let result = issuer(store, Arc::clone(&client)).refresh().await;

        assert!(result.is_err());
        assert_eq!(client.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn token_endpoint_error_becomes_auth_error() {
        let store = Arc::new(InMemoryCredentialStore::with_token(stored_token(
            Some("refresh-1"),
            fixed_time(),
        )));
        let client = Arc::new(FakeOAuthHttpClient::failing(OAuthError::Endpoint {
            status: 400,
            code: "invalid_grant".to_string(),
            detail: String::new(),
        }));

        let error = issuer(store, client).refresh().await.expect_err("refresh fails");

        match error {
            CredentialError::Rejected(error) => assert!(error.message.contains("invalid_grant")),
            other => panic!("expected rejected grant, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_token_endpoint_is_unavailable_not_rejected() {
        let store = Arc::new(InMemoryCredentialStore::with_token(stored_token(
            Some("refresh-1"),
            fixed_time() - Duration::seconds(60),
        )));
        let client = Arc::new(FakeOAuthHttpClient::failing(OAuthError::Transport(
            "connection refused".to_string(),
        )));

        let error = issuer(Arc::clone(&store), client)
            .refresh()
            .await
            .expect_err("refresh fails");

        assert!(matches!(error, CredentialError::Unavailable(_)));
        let kept = store.load_token().expect("load").expect("token kept");
        assert_eq!(kept.refresh_token.as_deref(), Some("refresh-1"));
    }

    #[test]
    fn cached_returns_only_unexpired_stored_token() {
        let client = Arc::new(FakeOAuthHttpClient::succeeding("unused", None));
        let valid = Arc::new(InMemoryCredentialStore::with_token(stored_token(
            Some("refresh-1"),
            fixed_time() + Duration::seconds(600),
        )));
        let expired = Arc::new(InMemoryCredentialStore::with_token(stored_token(
            Some("refresh-1"),
            fixed_time() - Duration::seconds(1),
        )));

        assert!(issuer(valid, Arc::clone(&client)).cached().is_some());
        assert!(issuer(expired, client).cached().is_none());
    }
}

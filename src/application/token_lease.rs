use crate::infrastructure::credential_issuer::{CredentialIssuer, IssuedCredential};
use crate::infrastructure::error::CredentialError;
use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;
type RefreshFuture = Shared<BoxFuture<'static, Result<IssuedCredential, CredentialError>>>;

pub const DEFAULT_LEEWAY_SECONDS: i64 = 60;

pub struct TokenLease<I>
where
    I: CredentialIssuer + 'static,
{
    issuer: Arc<I>,
    persistent: bool,
    leeway: Duration,
    now_provider: NowProvider,
    credential: Arc<Mutex<Option<IssuedCredential>>>,
    in_flight: tokio::sync::Mutex<Option<RefreshFuture>>,
}

impl<I> TokenLease<I>
where
    I: CredentialIssuer + 'static,
{
    pub fn new(issuer: Arc<I>) -> Self {
        let cached = issuer.cached();
        Self {
            issuer,
            persistent: false,
            leeway: Duration::seconds(DEFAULT_LEEWAY_SECONDS),
            now_provider: Arc::new(Utc::now),
            credential: Arc::new(Mutex::new(cached)),
            in_flight: tokio::sync::Mutex::new(None),
        }
    }

    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn current(&self) -> Option<IssuedCredential> {
        self.credential
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn seed(&self, credential: IssuedCredential) {
        *self
            .credential
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(credential);
    }

    pub fn invalidate(&self) {
        *self
            .credential
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }

    pub fn is_refreshing(&self) -> bool {
        match self.in_flight.try_lock() {
            Ok(guard) => guard
                .as_ref()
                .is_some_and(|refresh| refresh.peek().is_none()),
            Err(_) => true,
        }
    }

    fn is_fresh(&self, credential: &IssuedCredential) -> bool {
        !credential.access_token.trim().is_empty()
            && credential.expires_at > (self.now_provider)() + self.leeway
    }

    pub async fn ensure_valid(&self) -> Result<IssuedCredential, CredentialError> {
        if let Some(credential) = self.current().filter(|credential| self.is_fresh(credential)) {
            return Ok(credential);
        }
        self.force_refresh().await
    }

    pub async fn force_refresh(&self) -> Result<IssuedCredential, CredentialError> {
        let refresh = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.as_ref() {
                // A completed future left behind by abandoned callers is stale.
                Some(existing) if existing.peek().is_none() => {
                    debug!("joining in-flight credential refresh");
                    existing.clone()
                }
                _ => {
                    let refresh = self.start_refresh();
                    *in_flight = Some(refresh.clone());
                    refresh
                }
            }
        };

        let result = refresh.clone().await;

        let mut in_flight = self.in_flight.lock().await;
        if in_flight
            .as_ref()
            .is_some_and(|current| current.ptr_eq(&refresh))
        {
            *in_flight = None;
        }
        result
    }

    fn start_refresh(&self) -> RefreshFuture {
        let issuer = Arc::clone(&self.issuer);
        let credential = Arc::clone(&self.credential);
        let persistent = self.persistent;

        async move {
            info!(persistent, "refreshing access credential");
            match issuer.refresh().await {
                Ok(issued) => {
                    *credential
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(issued.clone());
                    info!(expires_at = %issued.expires_at, "access credential refreshed");
                    Ok(issued)
                }
                Err(CredentialError::Rejected(error)) => {
                    warn!(persistent, error = %error, "access credential rejected");
                    Err(CredentialError::Rejected(error.with_persistent(persistent)))
                }
                Err(error) => {
                    warn!(error = %error, "access credential refresh unavailable");
                    Err(error)
                }
            }
        }
        .boxed()
        .shared()
    }
}

use crate::domain::models::OAuthToken;
use crate::infrastructure::error::InfraError;
use std::sync::Mutex;

const KEYCHAIN_SERVICE: &str = "dashsync.oauth.google";

pub trait CredentialStore: Send + Sync {
    fn load_token(&self) -> Result<Option<OAuthToken>, InfraError>;
    fn save_token(&self, token: &OAuthToken) -> Result<(), InfraError>;

    fn refresh_token(&self) -> Result<Option<String>, InfraError> {
        Ok(self
            .load_token()?
            .and_then(|token| token.refresh_token)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyringCredentialStore {
    service: String,
    account: String,
}

impl KeyringCredentialStore {
    // One keychain entry per OAuth client, so switching clients never reuses a grant.
    pub fn for_client(client_id: &str) -> Self {
        let account = match client_id.trim() {
            "" => "default".to_string(),
            trimmed => trimmed.to_string(),
        };
        Self {
            service: KEYCHAIN_SERVICE.to_string(),
            account,
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    fn entry(&self) -> Result<keyring::Entry, InfraError> {
        keyring::Entry::new(&self.service, &self.account)
            .map_err(|error| InfraError::Credential(format!("open keychain entry {}: {error}", self.account)))
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn load_token(&self) -> Result<Option<OAuthToken>, InfraError> {
        match self.entry()?.get_password() {
            Ok(payload) => decode_stored_token(&payload),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(error) => Err(InfraError::Credential(format!("read keychain: {error}"))),
        }
    }

    fn save_token(&self, token: &OAuthToken) -> Result<(), InfraError> {
        let payload = serde_json::to_string(token)?;
        self.entry()?
            .set_password(&payload)
            .map_err(|error| InfraError::Credential(format!("write keychain: {error}")))
    }
}

pub fn decode_stored_token(payload: &str) -> Result<Option<OAuthToken>, InfraError> {
    if payload.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str::<OAuthToken>(payload)
        .map(Some)
        .map_err(|error| InfraError::Credential(format!("stored token is unreadable: {error}")))
}

#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    token: Mutex<Option<OAuthToken>>,
}

impl InMemoryCredentialStore {
    pub fn with_token(token: OAuthToken) -> Self {
        Self {
            token: Mutex::new(Some(token)),
        }
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn load_token(&self) -> Result<Option<OAuthToken>, InfraError> {
        Ok(self
            .token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }

    fn save_token(&self, token: &OAuthToken) -> Result<(), InfraError> {
        *self
            .token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(token.clone());
        Ok(())
    }
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Credential store error: {0}")]
    Credential(String),
    #[error("Store error: {0}")]
    Store(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unauthorized: http {status}")]
    Unauthorized { status: u16 },
    #[error("request rejected: http {status}; {message}")]
    Rejected { status: u16, message: String },
    #[error("not found: http {status}")]
    NotFound { status: u16 },
    #[error("server error: http {status}; {message}")]
    Server { status: u16, message: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

// A persistent session degrades silently; a non-persistent one needs interactive sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("authentication failed: {message}")]
pub struct AuthError {
    pub message: String,
    pub persistent: bool,
}

impl AuthError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            persistent: false,
        }
    }

    pub fn with_persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn requires_interactive_reauth(&self) -> bool {
        !self.persistent
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OAuthError {
    #[error("token endpoint unreachable: {0}")]
    Transport(String),
    #[error("token endpoint error: http {status}; {code}; {detail}")]
    Endpoint {
        status: u16,
        code: String,
        detail: String,
    },
    #[error("malformed token response: {0}")]
    Malformed(String),
}

impl OAuthError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Malformed(_) => true,
            Self::Endpoint { status, .. } => *status == 429 || *status >= 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("credential refresh unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Rejected(#[from] AuthError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("network error: {0}")]
    Network(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("server error: {0}")]
    Server(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Server(_))
    }
}

impl From<ApiError> for GatewayError {
    fn from(error: ApiError) -> Self {
        match error {
            ApiError::Transport(message) => Self::Network(message),
            ApiError::Unauthorized { status } => {
                Self::Auth(AuthError::new(format!("remote rejected credential: http {status}")))
            }
            ApiError::Rejected { status, message } => {
                Self::Validation(format!("http {status}; {message}"))
            }
            ApiError::NotFound { status } => Self::Validation(format!("http {status}; not found")),
            ApiError::Server { status, message } => Self::Server(format!("http {status}; {message}")),
            ApiError::Malformed(message) => Self::Server(message),
        }
    }
}

impl From<CredentialError> for GatewayError {
    fn from(error: CredentialError) -> Self {
        match error {
            CredentialError::Unavailable(message) => Self::Network(message),
            CredentialError::Rejected(error) => Self::Auth(error),
        }
    }
}

impl From<crate::domain::models::ValidationError> for GatewayError {
    fn from(error: crate::domain::models::ValidationError) -> Self {
        Self::Validation(error.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error(transparent)]
    Validation(#[from] crate::domain::models::ValidationError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("store error: {0}")]
    Store(String),
    #[error("sync task aborted: {0}")]
    Aborted(String),
}

impl From<InfraError> for SyncError {
    fn from(error: InfraError) -> Self {
        Self::Store(error.to_string())
    }
}

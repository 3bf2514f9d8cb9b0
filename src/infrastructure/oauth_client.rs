use crate::infrastructure::error::OAuthError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};

pub const DEFAULT_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";

#[derive(Debug, Clone)]
pub struct OAuthRefreshRequest {
    pub token_endpoint: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthTokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    pub token_type: Option<String>,
    pub scope: Option<String>,
}

#[async_trait]
pub trait OAuthHttpClient: Send + Sync {
    async fn refresh_access_token(
        &self,
        request: OAuthRefreshRequest,
    ) -> Result<OAuthTokenResponse, OAuthError>;
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestOAuthClient {
    client: Client,
}

#[derive(Debug, serde::Deserialize)]
struct TokenEndpointBody {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    token_type: Option<String>,
    scope: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl ReqwestOAuthClient {
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

// Google answers both success and failure with a JSON body; a 5xx may carry an
// HTML page instead, which still has to classify by status.
pub fn parse_token_response(status: StatusCode, body: &str) -> Result<OAuthTokenResponse, OAuthError> {
    let parsed = serde_json::from_str::<TokenEndpointBody>(body);

    if !status.is_success() {
        let (code, detail) = match parsed {
            Ok(parsed) => (
                parsed.error.unwrap_or_else(|| format!("http_{}", status.as_u16())),
                parsed.error_description.unwrap_or_default(),
            ),
            Err(_) => (format!("http_{}", status.as_u16()), body.trim().to_string()),
        };
        return Err(OAuthError::Endpoint {
            status: status.as_u16(),
            code,
            detail,
        });
    }

    let parsed = parsed.map_err(|error| OAuthError::Malformed(error.to_string()))?;
    if let Some(code) = parsed.error {
        return Err(OAuthError::Endpoint {
            status: status.as_u16(),
            code,
            detail: parsed.error_description.unwrap_or_default(),
        });
    }

    let access_token = parsed
        .access_token
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| OAuthError::Malformed("access_token missing".to_string()))?;

    Ok(OAuthTokenResponse {
        access_token,
        refresh_token: parsed.refresh_token,
        expires_in: parsed.expires_in.unwrap_or(0).max(0),
        token_type: parsed.token_type,
        scope: parsed.scope,
    })
}

#[async_trait]
impl OAuthHttpClient for ReqwestOAuthClient {
    async fn refresh_access_token(
        &self,
        request: OAuthRefreshRequest,
    ) -> Result<OAuthTokenResponse, OAuthError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("client_id", request.client_id.as_str()),
            ("client_secret", request.client_secret.as_str()),
            ("refresh_token", request.refresh_token.as_str()),
        ];
        let response = self
            .client
            .post(&request.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|error| OAuthError::Transport(error.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| OAuthError::Transport(format!("reading token response: {error}")))?;
        parse_token_response(status, &body)
    }
}

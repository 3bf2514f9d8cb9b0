use crate::infrastructure::credential_issuer::OAuthClientConfig;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::remote_api::{
    EventWindow, RemoteApiConfig, DEFAULT_CALENDAR_API_BASE, DEFAULT_TASKS_API_BASE,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const SYNC_JSON: &str = "sync.json";
const SUPPORTED_SCHEMA: u64 = 1;

fn default_sync_config() -> serde_json::Value {
    serde_json::json!({
        "schema": 1,
        "tasksApiBaseUrl": DEFAULT_TASKS_API_BASE,
        "calendarApiBaseUrl": DEFAULT_CALENDAR_API_BASE,
        "taskListId": "@default",
        "calendarId": "primary",
        "eventWindow": {
            "pastDays": 30,
            "futureDays": 90
        },
        "syncIntervalSecs": 300,
        "requestTimeoutSecs": 30,
        "tokenLeewaySecs": 60,
        "persistentSession": true
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    pub schema: u8,
    #[serde(default = "default_tasks_api_base_url")]
    pub tasks_api_base_url: String,
    #[serde(default = "default_calendar_api_base_url")]
    pub calendar_api_base_url: String,
    #[serde(default = "default_task_list_id")]
    pub task_list_id: String,
    #[serde(default = "default_calendar_id")]
    pub calendar_id: String,
    #[serde(default)]
    pub event_window: EventWindow,
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_token_leeway_secs")]
    pub token_leeway_secs: i64,
    #[serde(default = "default_persistent_session")]
    pub persistent_session: bool,
}

fn default_tasks_api_base_url() -> String {
    DEFAULT_TASKS_API_BASE.to_string()
}

fn default_calendar_api_base_url() -> String {
    DEFAULT_CALENDAR_API_BASE.to_string()
}

fn default_task_list_id() -> String {
    "@default".to_string()
}

fn default_calendar_id() -> String {
    "primary".to_string()
}

fn default_sync_interval_secs() -> u64 {
    300
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_token_leeway_secs() -> i64 {
    60
}

fn default_persistent_session() -> bool {
    true
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            schema: 1,
            tasks_api_base_url: default_tasks_api_base_url(),
            calendar_api_base_url: default_calendar_api_base_url(),
            task_list_id: default_task_list_id(),
            calendar_id: default_calendar_id(),
            event_window: EventWindow::default(),
            sync_interval_secs: default_sync_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            token_leeway_secs: default_token_leeway_secs(),
            persistent_session: default_persistent_session(),
        }
    }
}

impl SyncConfig {
    pub fn remote_api_config(&self) -> RemoteApiConfig {
        RemoteApiConfig {
            tasks_base_url: self.tasks_api_base_url.clone(),
            calendar_base_url: self.calendar_api_base_url.clone(),
            task_list_id: self.task_list_id.clone(),
            calendar_id: self.calendar_id.clone(),
            request_timeout_secs: self.request_timeout_secs,
        }
    }

    fn validate(&self, path: &Path) -> Result<(), InfraError> {
        if self.task_list_id.trim().is_empty() {
            return Err(InfraError::InvalidConfig(format!(
                "taskListId must not be empty in {}",
                path.display()
            )));
        }
        if self.calendar_id.trim().is_empty() {
            return Err(InfraError::InvalidConfig(format!(
                "calendarId must not be empty in {}",
                path.display()
            )));
        }
        if self.sync_interval_secs == 0 {
            return Err(InfraError::InvalidConfig(format!(
                "syncIntervalSecs must be positive in {}",
                path.display()
            )));
        }
        if self.event_window.past_days < 0 || self.event_window.future_days < 0 {
            return Err(InfraError::InvalidConfig(format!(
                "eventWindow days must not be negative in {}",
                path.display()
            )));
        }
        if self.token_leeway_secs < 0 {
            return Err(InfraError::InvalidConfig(format!(
                "tokenLeewaySecs must not be negative in {}",
                path.display()
            )));
        }
        Ok(())
    }
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(SYNC_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&default_sync_config())?;
        fs::write(path, format!("{formatted}\n"))?;
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != SUPPORTED_SCHEMA {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_sync_config(config_dir: &Path) -> Result<SyncConfig, InfraError> {
    let path = config_dir.join(SYNC_JSON);
    let parsed = read_config(&path)?;
    let config: SyncConfig = serde_json::from_value(parsed).map_err(|error| {
        InfraError::InvalidConfig(format!("invalid {}: {error}", path.display()))
    })?;
    config.validate(&path)?;
    Ok(config)
}

pub fn load_oauth_config_from_env() -> Result<OAuthClientConfig, InfraError> {
    load_oauth_config_from_lookup(|key| std::env::var(key).ok())
}

pub fn load_oauth_config_from_lookup<F>(lookup: F) -> Result<OAuthClientConfig, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let client_id = required_lookup_value(
        &lookup,
        &["DASHSYNC_GOOGLE_CLIENT_ID", "GOOGLE_CLIENT_ID"],
        "google client id",
    )?;
    let client_secret = required_lookup_value(
        &lookup,
        &["DASHSYNC_GOOGLE_CLIENT_SECRET", "GOOGLE_CLIENT_SECRET"],
        "google client secret",
    )?;

    let config = OAuthClientConfig::new(client_id, client_secret);
    Ok(
        match optional_lookup_value(
            &lookup,
            &["DASHSYNC_GOOGLE_TOKEN_ENDPOINT", "GOOGLE_TOKEN_ENDPOINT"],
        ) {
            Some(endpoint) => config.with_token_endpoint(endpoint),
            None => config,
        },
    )
}

fn required_lookup_value<F>(
    lookup: &F,
    keys: &[&str],
    field_name: &str,
) -> Result<String, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    optional_lookup_value(lookup, keys).ok_or_else(|| {
        InfraError::InvalidConfig(format!(
            "missing {} (set one of: {})",
            field_name,
            keys.join(", ")
        ))
    })
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    keys.iter()
        .filter_map(|key| lookup(key))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

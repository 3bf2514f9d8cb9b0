use crate::infrastructure::error::{ApiError, InfraError};
use crate::infrastructure::wire::{GoogleCalendarEvent, GoogleTask};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration as StdDuration;
use url::Url;

pub const DEFAULT_TASKS_API_BASE: &str = "https://tasks.googleapis.com/tasks/v1/";
pub const DEFAULT_CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3/";
const TASKS_PAGE_SIZE: &str = "100";
const EVENTS_PAGE_SIZE: &str = "2500";

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventWindow {
    pub past_days: i64,
    pub future_days: i64,
}

impl Default for EventWindow {
    fn default() -> Self {
        Self {
            past_days: 30,
            future_days: 90,
        }
    }
}

impl EventWindow {
    pub fn bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            now - Duration::days(self.past_days.max(0)),
            now + Duration::days(self.future_days.max(0)),
        )
    }
}

#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn list_tasks(&self, access_token: &str) -> Result<Vec<GoogleTask>, ApiError>;

    async fn create_task(&self, access_token: &str, task: &GoogleTask)
    -> Result<GoogleTask, ApiError>;

    async fn update_task(
        &self,
        access_token: &str,
        task_id: &str,
        patch: &serde_json::Value,
    ) -> Result<GoogleTask, ApiError>;

    async fn delete_task(&self, access_token: &str, task_id: &str) -> Result<(), ApiError>;

    async fn move_task(
        &self,
        access_token: &str,
        task_id: &str,
        parent: Option<&str>,
    ) -> Result<GoogleTask, ApiError>;

    async fn list_events(
        &self,
        access_token: &str,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> Result<Vec<GoogleCalendarEvent>, ApiError>;

    async fn create_event(
        &self,
        access_token: &str,
        event: &GoogleCalendarEvent,
    ) -> Result<GoogleCalendarEvent, ApiError>;

    async fn update_event(
        &self,
        access_token: &str,
        event_id: &str,
        patch: &serde_json::Value,
    ) -> Result<GoogleCalendarEvent, ApiError>;

    async fn delete_event(&self, access_token: &str, event_id: &str) -> Result<(), ApiError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteApiConfig {
    pub tasks_base_url: String,
    pub calendar_base_url: String,
    pub task_list_id: String,
    pub calendar_id: String,
    pub request_timeout_secs: u64,
}

impl Default for RemoteApiConfig {
    fn default() -> Self {
        Self {
            tasks_base_url: DEFAULT_TASKS_API_BASE.to_string(),
            calendar_base_url: DEFAULT_CALENDAR_API_BASE.to_string(),
            task_list_id: "@default".to_string(),
            calendar_id: "primary".to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReqwestRemoteApi {
    client: Client,
    tasks_base: Url,
    calendar_base: Url,
    task_list_id: String,
    calendar_id: String,
}

#[derive(Debug, serde::Deserialize)]
struct TasksPageResponse {
    items: Option<Vec<GoogleTask>>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct EventsPageResponse {
    items: Option<Vec<GoogleCalendarEvent>>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

pub fn http_client(request_timeout_secs: u64) -> Result<Client, InfraError> {
    Client::builder()
        .timeout(StdDuration::from_secs(request_timeout_secs.max(1)))
        .build()
        .map_err(|error| InfraError::InvalidConfig(format!("failed to build http client: {error}")))
}

impl ReqwestRemoteApi {
    pub fn new(config: &RemoteApiConfig) -> Result<Self, InfraError> {
        Self::with_client(http_client(config.request_timeout_secs)?, config)
    }

    pub fn with_client(client: Client, config: &RemoteApiConfig) -> Result<Self, InfraError> {
        Self::ensure_non_empty(&config.task_list_id, "task list id")?;
        Self::ensure_non_empty(&config.calendar_id, "calendar id")?;
        Ok(Self {
            client,
            tasks_base: Self::parse_base(&config.tasks_base_url, "tasks")?,
            calendar_base: Self::parse_base(&config.calendar_base_url, "calendar")?,
            task_list_id: config.task_list_id.trim().to_string(),
            calendar_id: config.calendar_id.trim().to_string(),
        })
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), InfraError> {
        if value.trim().is_empty() {
            return Err(InfraError::InvalidConfig(format!("{field} must not be empty")));
        }
        Ok(())
    }

    fn parse_base(value: &str, name: &str) -> Result<Url, InfraError> {
        let url = Url::parse(value.trim())
            .map_err(|error| InfraError::InvalidConfig(format!("invalid {name} api base url: {error}")))?;
        if url.cannot_be_a_base() {
            return Err(InfraError::InvalidConfig(format!(
                "{name} api base url cannot be a base: {value}"
            )));
        }
        Ok(url)
    }

    fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| ApiError::Transport("api base url cannot be a base".to_string()))?;
            path.pop_if_empty();
            for segment in segments {
                path.push(segment);
            }
        }
        Ok(url)
    }

    fn tasks_endpoint(&self) -> Result<Url, ApiError> {
        Self::endpoint(&self.tasks_base, &["lists", &self.task_list_id, "tasks"])
    }

    fn task_endpoint(&self, task_id: &str) -> Result<Url, ApiError> {
        Self::endpoint(&self.tasks_base, &["lists", &self.task_list_id, "tasks", task_id])
    }

    fn task_move_endpoint(&self, task_id: &str) -> Result<Url, ApiError> {
        Self::endpoint(
            &self.tasks_base,
            &["lists", &self.task_list_id, "tasks", task_id, "move"],
        )
    }

    fn events_endpoint(&self) -> Result<Url, ApiError> {
        Self::endpoint(&self.calendar_base, &["calendars", &self.calendar_id, "events"])
    }

    fn event_endpoint(&self, event_id: &str) -> Result<Url, ApiError> {
        Self::endpoint(
            &self.calendar_base,
            &["calendars", &self.calendar_id, "events", event_id],
        )
    }

    fn ensure_id(value: &str, field: &str) -> Result<(), ApiError> {
        if value.trim().is_empty() {
            return Err(ApiError::Rejected {
                status: 0,
                message: format!("{field} must not be empty"),
            });
        }
        Ok(())
    }

    async fn send(request: RequestBuilder, action: &str) -> Result<String, ApiError> {
        let response = request
            .send()
            .await
            .map_err(|error| ApiError::Transport(format!("network error while {action}: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| ApiError::Transport(format!("failed reading response while {action}: {error}")))?;

        if !status.is_success() {
            return Err(classify_status(status, &body));
        }
        Ok(body)
    }

    async fn send_json<T: DeserializeOwned>(request: RequestBuilder, action: &str) -> Result<T, ApiError> {
        let body = Self::send(request, action).await?;
        serde_json::from_str(&body)
            .map_err(|error| ApiError::Malformed(format!("invalid payload while {action}: {error}; body={body}")))
    }
}

// 429 counts as a server condition so queued work is kept.
pub fn classify_status(status: StatusCode, body: &str) -> ApiError {
    let code = status.as_u16();
    let message = if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("no response body")
            .to_string()
    } else {
        body.trim().to_string()
    };
    match code {
        401 | 403 => ApiError::Unauthorized { status: code },
        404 | 410 => ApiError::NotFound { status: code },
        429 => ApiError::Server {
            status: code,
            message,
        },
        400..=499 => ApiError::Rejected {
            status: code,
            message,
        },
        _ => ApiError::Server {
            status: code,
            message,
        },
    }
}

#[async_trait]
impl RemoteApi for ReqwestRemoteApi {
    async fn list_tasks(&self, access_token: &str) -> Result<Vec<GoogleTask>, ApiError> {
        let endpoint = self.tasks_endpoint()?;
        let mut page_token: Option<String> = None;
        let mut tasks = Vec::new();

        loop {
            let mut req = self
                .client
                .get(endpoint.clone())
                .bearer_auth(access_token)
                .query(&[
                    ("showCompleted", "true"),
                    ("showHidden", "true"),
                    ("maxResults", TASKS_PAGE_SIZE),
                ]);
            if let Some(page_token) = page_token.as_deref() {
                req = req.query(&[("pageToken", page_token)]);
            }

            let mut parsed: TasksPageResponse = Self::send_json(req, "listing tasks").await?;
            tasks.extend(parsed.items.take().unwrap_or_default());

            match parsed.next_page_token.take() {
                Some(next_page_token) => page_token = Some(next_page_token),
                None => break,
            }
        }

        Ok(tasks)
    }

    async fn create_task(
        &self,
        access_token: &str,
        task: &GoogleTask,
    ) -> Result<GoogleTask, ApiError> {
        let mut req = self
            .client
            .post(self.tasks_endpoint()?)
            .bearer_auth(access_token)
            .json(task);
        if let Some(parent) = task.parent.as_deref() {
            req = req.query(&[("parent", parent)]);
        }
        Self::send_json(req, "creating task").await
    }

    async fn update_task(
        &self,
        access_token: &str,
        task_id: &str,
        patch: &serde_json::Value,
    ) -> Result<GoogleTask, ApiError> {
        Self::ensure_id(task_id, "task id")?;
        let req = self
            .client
            .patch(self.task_endpoint(task_id)?)
            .bearer_auth(access_token)
            .json(patch);
        Self::send_json(req, "updating task").await
    }

    async fn delete_task(&self, access_token: &str, task_id: &str) -> Result<(), ApiError> {
        Self::ensure_id(task_id, "task id")?;
        let req = self
            .client
            .delete(self.task_endpoint(task_id)?)
            .bearer_auth(access_token);
        Self::send(req, "deleting task").await.map(|_| ())
    }

    async fn move_task(
        &self,
        access_token: &str,
        task_id: &str,
        parent: Option<&str>,
    ) -> Result<GoogleTask, ApiError> {
        Self::ensure_id(task_id, "task id")?;
        let mut req = self
            .client
            .post(self.task_move_endpoint(task_id)?)
            .bearer_auth(access_token);
        if let Some(parent) = parent {
            req = req.query(&[("parent", parent)]);
        }
        Self::send_json(req, "moving task").await
    }

    async fn list_events(
        &self,
        access_token: &str,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> Result<Vec<GoogleCalendarEvent>, ApiError> {
        let endpoint = self.events_endpoint()?;
        let mut page_token: Option<String> = None;
        let mut events = Vec::new();

        loop {
            let mut req = self
                .client
                .get(endpoint.clone())
                .bearer_auth(access_token)
                .query(&[("singleEvents", "true"), ("maxResults", EVENTS_PAGE_SIZE)])
                .query(&[
                    ("timeMin", time_min.to_rfc3339()),
                    ("timeMax", time_max.to_rfc3339()),
                ]);
            if let Some(page_token) = page_token.as_deref() {
                req = req.query(&[("pageToken", page_token)]);
            }

            let mut parsed: EventsPageResponse = Self::send_json(req, "listing calendar events").await?;
            events.extend(parsed.items.take().unwrap_or_default());

            match parsed.next_page_token.take() {
                Some(next_page_token) => page_token = Some(next_page_token),
                None => break,
            }
        }

        Ok(events)
    }

    async fn create_event(
        &self,
        access_token: &str,
        event: &GoogleCalendarEvent,
    ) -> Result<GoogleCalendarEvent, ApiError> {
        let req = self
            .client
            .post(self.events_endpoint()?)
            .bearer_auth(access_token)
            .json(event);
        Self::send_json(req, "creating event").await
    }

    async fn update_event(
        &self,
        access_token: &str,
        event_id: &str,
        patch: &serde_json::Value,
    ) -> Result<GoogleCalendarEvent, ApiError> {
        Self::ensure_id(event_id, "event id")?;
        let req = self
            .client
            .patch(self.event_endpoint(event_id)?)
            .bearer_auth(access_token)
            .json(patch);
        Self::send_json(req, "updating event").await
    }

    async fn delete_event(&self, access_token: &str, event_id: &str) -> Result<(), ApiError> {
        Self::ensure_id(event_id, "event id")?;
        let req = self
            .client
            .delete(self.event_endpoint(event_id)?)
            .bearer_auth(access_token);
        Self::send(req, "deleting event").await.map(|_| ())
    }
}

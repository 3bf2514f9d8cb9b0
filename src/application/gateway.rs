use crate::application::token_lease::TokenLease;
use crate::domain::models::{
    Entity, EntityKind, EntityPatch, EntityPayload, EventPatch, EventPayload, TaskPatch,
    TaskPayload,
};
use crate::infrastructure::credential_issuer::CredentialIssuer;
use crate::infrastructure::error::{ApiError, GatewayError};
use crate::infrastructure::remote_api::{EventWindow, RemoteApi};
use crate::infrastructure::wire::{
    decode_event, decode_task, encode_event, encode_event_patch, encode_task, encode_task_patch,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[async_trait]
pub trait RemoteGateway: Send + Sync {
    async fn list_tasks(&self) -> Result<Vec<Entity>, GatewayError>;
    async fn create_task(&self, payload: &TaskPayload) -> Result<Entity, GatewayError>;
    async fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<Entity, GatewayError>;
    async fn delete_task(&self, id: &str) -> Result<(), GatewayError>;

    async fn list_events(&self) -> Result<Vec<Entity>, GatewayError>;
    async fn create_event(&self, payload: &EventPayload) -> Result<Entity, GatewayError>;
    async fn update_event(&self, id: &str, patch: &EventPatch) -> Result<Entity, GatewayError>;
    async fn delete_event(&self, id: &str) -> Result<(), GatewayError>;

    async fn list(&self, kind: EntityKind) -> Result<Vec<Entity>, GatewayError> {
        match kind {
            EntityKind::Task => self.list_tasks().await,
            EntityKind::Event => self.list_events().await,
        }
    }

    async fn create(&self, payload: &EntityPayload) -> Result<Entity, GatewayError> {
        match payload {
            EntityPayload::Task(task) => self.create_task(task).await,
            EntityPayload::Event(event) => self.create_event(event).await,
        }
    }

    async fn update(&self, id: &str, patch: &EntityPatch) -> Result<Entity, GatewayError> {
        match patch {
            EntityPatch::Task(patch) => self.update_task(id, patch).await,
            EntityPatch::Event(patch) => self.update_event(id, patch).await,
        }
    }

    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), GatewayError> {
        match kind {
            EntityKind::Task => self.delete_task(id).await,
            EntityKind::Event => self.delete_event(id).await,
        }
    }
}

pub struct AuthenticatedGateway<A, I>
where
    A: RemoteApi,
    I: CredentialIssuer + 'static,
{
    api: Arc<A>,
    lease: Arc<TokenLease<I>>,
    event_window: EventWindow,
    now_provider: NowProvider,
}

impl<A, I> AuthenticatedGateway<A, I>
where
    A: RemoteApi,
    I: CredentialIssuer + 'static,
{
    pub fn new(api: Arc<A>, lease: Arc<TokenLease<I>>) -> Self {
        Self {
            api,
            lease,
            event_window: EventWindow::default(),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_event_window(mut self, event_window: EventWindow) -> Self {
        self.event_window = event_window;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn lease(&self) -> &Arc<TokenLease<I>> {
        &self.lease
    }

    async fn authorized<T, F, Fut>(&self, operation: &'static str, call: F) -> Result<T, GatewayError>
    where
        F: Fn(String) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, ApiError>> + Send,
        T: Send,
    {
        let credential = self.lease.ensure_valid().await?;
        let rejected_token = credential.access_token.clone();

        let status = match call(credential.access_token).await {
            Err(ApiError::Unauthorized { status }) => status,
            other => return other.map_err(|error| self.gateway_error(error)),
        };

        warn!(operation, status, "credential rejected; refreshing once and retrying");
        // Another caller may already have replaced the rejected credential.
        let credential = match self.lease.current() {
            Some(current) if current.access_token != rejected_token => current,
            _ => self.lease.force_refresh().await?,
        };

        let result = call(credential.access_token).await;
        if matches!(result, Err(ApiError::Unauthorized { .. })) {
            self.lease.invalidate();
        }
        result.map_err(|error| self.gateway_error(error))
    }

    fn gateway_error(&self, error: ApiError) -> GatewayError {
        match GatewayError::from(error) {
            GatewayError::Auth(error) => {
                GatewayError::Auth(error.with_persistent(self.lease.is_persistent()))
            }
            other => other,
        }
    }

    fn expect_entity(entity: Option<Entity>, operation: &str) -> Result<Entity, GatewayError> {
        entity.ok_or_else(|| GatewayError::Server(format!("{operation} response did not include a live entity")))
    }
}

fn decode_listing<T>(
    items: &[T],
    decode: fn(&T) -> Result<Option<Entity>, ApiError>,
    id_of: fn(&T) -> Option<String>,
    item_kind: &'static str,
) -> Vec<Entity> {
    let mut entities = Vec::with_capacity(items.len());
    for item in items {
        match decode(item) {
            Ok(Some(entity)) => entities.push(entity),
            Ok(None) => {}
            Err(error) => {
                warn!(item_kind, id = ?id_of(item), error = %error, "skipping undecodable remote item");
            }
        }
    }
    entities
}

fn already_absent_is_deleted(result: Result<(), ApiError>, id: &str) -> Result<(), ApiError> {
    match result {
        Err(ApiError::NotFound { status }) => {
            debug!(id, status, "remote entity already absent");
            Ok(())
        }
        other => other,
    }
}

#[async_trait]
impl<A, I> RemoteGateway for AuthenticatedGateway<A, I>
where
    A: RemoteApi,
    I: CredentialIssuer + 'static,
{
    async fn list_tasks(&self) -> Result<Vec<Entity>, GatewayError> {
        let tasks = self
            .authorized("list_tasks", |token| async move { self.api.list_tasks(&token).await })
            .await?;
        Ok(decode_listing(&tasks, decode_task, |task| task.id.clone(), "task"))
    }

    async fn create_task(&self, payload: &TaskPayload) -> Result<Entity, GatewayError> {
        payload.validate()?;
        let body = encode_task(payload);
        let created = self
            .authorized("create_task", |token| {
                let body = &body;
                async move { self.api.create_task(&token, body).await }
            })
            .await?;
        Self::expect_entity(decode_task(&created)?, "create_task")
    }

    async fn update_task(&self, id: &str, patch: &TaskPatch) -> Result<Entity, GatewayError> {
        let body = encode_task_patch(patch);
        let mut updated = None;
        if body.as_object().is_some_and(|fields| !fields.is_empty()) {
            updated = Some(
                self.authorized("update_task", |token| {
                    let body = &body;
                    async move { self.api.update_task(&token, id, body).await }
                })
                .await?,
            );
        }
        // Reparenting is its own endpoint; an empty parent moves to the top level.
        if let Some(parent) = patch.parent.as_deref() {
            let parent = Some(parent.trim()).filter(|parent| !parent.is_empty());
            updated = Some(
                self.authorized("move_task", |token| async move {
                    self.api.move_task(&token, id, parent).await
                })
                .await?,
            );
        }
        let updated = updated
            .ok_or_else(|| GatewayError::Validation("task patch has no fields to send".to_string()))?;
        Self::expect_entity(decode_task(&updated)?, "update_task")
    }

    async fn delete_task(&self, id: &str) -> Result<(), GatewayError> {
        self.authorized("delete_task", |token| async move {
            already_absent_is_deleted(self.api.delete_task(&token, id).await, id)
        })
        .await
    }

    async fn list_events(&self) -> Result<Vec<Entity>, GatewayError> {
        let (time_min, time_max) = self.event_window.bounds((self.now_provider)());
        let events = self
            .authorized("list_events", |token| async move {
                self.api.list_events(&token, time_min, time_max).await
            })
            .await?;
        Ok(decode_listing(&events, decode_event, |event| event.id.clone(), "event"))
    }

    async fn create_event(&self, payload: &EventPayload) -> Result<Entity, GatewayError> {
        payload.validate()?;
        let body = encode_event(payload);
        let created = self
            .authorized("create_event", |token| {
                let body = &body;
                async move { self.api.create_event(&token, body).await }
            })
            .await?;
        Self::expect_entity(decode_event(&created)?, "create_event")
    }

    async fn update_event(&self, id: &str, patch: &EventPatch) -> Result<Entity, GatewayError> {
        let body = encode_event_patch(patch);
        let updated = self
            .authorized("update_event", |token| {
                let body = &body;
                async move { self.api.update_event(&token, id, body).await }
            })
            .await?;
        Self::expect_entity(decode_event(&updated)?, "update_event")
    }

    async fn delete_event(&self, id: &str) -> Result<(), GatewayError> {
        self.authorized("delete_event", |token| async move {
            already_absent_is_deleted(self.api.delete_event(&token, id).await, id)
        })
        .await
    }
}

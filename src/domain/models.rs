use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

pub const TEMP_ID_PREFIX: &str = "temp-";

static NEXT_TEMP_ID: AtomicU64 = AtomicU64::new(1);

pub fn new_temp_id() -> String {
    let sequence = NEXT_TEMP_ID.fetch_add(1, Ordering::Relaxed);
    format!("{TEMP_ID_PREFIX}{}-{sequence}", Utc::now().timestamp_millis())
}

pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("validation failed: {0}")]
pub struct ValidationError(pub String);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Task,
    Event,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::Task, EntityKind::Event];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Event => "event",
        }
    }

    pub fn collection_name(self) -> &'static str {
        match self {
            Self::Task => "tasks",
            Self::Event => "events",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Synced,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntitySource {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    NeedsAction,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskPayload {
    pub title: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl TaskPayload {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            status: TaskStatus::NeedsAction,
            notes: None,
            due: None,
            parent: None,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_non_empty(&self.title, "task.title")?;
        if let Some(parent) = self.parent.as_deref() {
            validate_non_empty(parent, "task.parent")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventPayload {
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl EventPayload {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_non_empty(&self.summary, "event.summary")?;
        if self.end <= self.start {
            return Err(ValidationError(
                "event.end must be after event.start".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "fields", rename_all = "snake_case")]
pub enum EntityPayload {
    Task(TaskPayload),
    Event(EventPayload),
}

impl EntityPayload {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Task(_) => EntityKind::Task,
            Self::Event(_) => EntityKind::Event,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Task(task) => task.validate(),
            Self::Event(event) => event.validate(),
        }
    }

    pub fn apply(&mut self, patch: &EntityPatch) -> Result<(), ValidationError> {
        match (self, patch) {
            (Self::Task(task), EntityPatch::Task(patch)) => {
                patch.apply_to(task);
                Ok(())
            }
            (Self::Event(event), EntityPatch::Event(patch)) => {
                patch.apply_to(event);
                Ok(())
            }
            (payload, patch) => Err(ValidationError(format!(
                "cannot apply {} patch to {} payload",
                patch.kind(),
                payload.kind()
            ))),
        }
    }
}

// `Some("")` clears `notes`; for `parent` it moves the task to the top level.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl TaskPatch {
    fn apply_to(&self, task: &mut TaskPayload) {
        if let Some(title) = self.title.as_deref() {
            task.title = title.trim().to_string();
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(notes) = self.notes.as_deref() {
            let notes = notes.trim();
            task.notes = if notes.is_empty() {
                None
            } else {
                Some(notes.to_string())
            };
        }
        if let Some(due) = self.due {
            task.due = Some(due);
        }
        if let Some(parent) = self.parent.as_deref() {
            let parent = parent.trim();
            task.parent = if parent.is_empty() {
                None
            } else {
                Some(parent.to_string())
            };
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct EventPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl EventPatch {
    fn apply_to(&self, event: &mut EventPayload) {
        if let Some(summary) = self.summary.as_deref() {
            event.summary = summary.trim().to_string();
        }
        if let Some(description) = self.description.as_deref() {
            let description = description.trim();
            event.description = if description.is_empty() {
                None
            } else {
                Some(description.to_string())
            };
        }
        if let Some(start) = self.start {
            event.start = start;
        }
        if let Some(end) = self.end {
            event.end = end;
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "fields", rename_all = "snake_case")]
pub enum EntityPatch {
    Task(TaskPatch),
    Event(EventPatch),
}

impl EntityPatch {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Task(_) => EntityKind::Task,
            Self::Event(_) => EntityKind::Event,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Task(patch) => patch.is_empty(),
            Self::Event(patch) => patch.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entity {
    pub id: String,
    pub kind: EntityKind,
    pub payload: EntityPayload,
    pub sync_status: SyncStatus,
    pub source: EntitySource,
}

impl Entity {
    pub fn local(id: impl Into<String>, payload: EntityPayload) -> Self {
        Self {
            id: id.into(),
            kind: payload.kind(),
            payload,
            sync_status: SyncStatus::Pending,
            source: EntitySource::Local,
        }
    }

    pub fn remote(id: impl Into<String>, payload: EntityPayload) -> Self {
        Self {
            id: id.into(),
            kind: payload.kind(),
            payload,
            sync_status: SyncStatus::Synced,
            source: EntitySource::Remote,
        }
    }

    pub fn is_temporary(&self) -> bool {
        is_temp_id(&self.id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationAction {
    Create,
    Update,
    Delete,
}

impl OperationAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", content = "data", rename_all = "snake_case")]
pub enum OperationData {
    Create(EntityPayload),
    Update(EntityPatch),
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingOperation {
    #[serde(default)]
    pub seq: u64,
    pub kind: EntityKind,
    pub temp_id: String,
    pub entity_id: String,
    #[serde(flatten)]
    pub data: OperationData,
    pub enqueued_at: DateTime<Utc>,
}

impl PendingOperation {
    pub fn create(temp_id: impl Into<String>, payload: EntityPayload, now: DateTime<Utc>) -> Self {
        let temp_id = temp_id.into();
        Self {
            seq: 0,
            kind: payload.kind(),
            entity_id: temp_id.clone(),
            temp_id,
            data: OperationData::Create(payload),
            enqueued_at: now,
        }
    }

    pub fn update(entity_id: impl Into<String>, patch: EntityPatch, now: DateTime<Utc>) -> Self {
        let entity_id = entity_id.into();
        Self {
            seq: 0,
            kind: patch.kind(),
            temp_id: entity_id.clone(),
            entity_id,
            data: OperationData::Update(patch),
            enqueued_at: now,
        }
    }

    pub fn delete(kind: EntityKind, entity_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        let entity_id = entity_id.into();
        Self {
            seq: 0,
            kind,
            temp_id: entity_id.clone(),
            entity_id,
            data: OperationData::Delete,
            enqueued_at: now,
        }
    }

    pub fn action(&self) -> OperationAction {
        match self.data {
            OperationData::Create(_) => OperationAction::Create,
            OperationData::Update(_) => OperationAction::Update,
            OperationData::Delete => OperationAction::Delete,
        }
    }

    pub fn targets_temp_id(&self) -> bool {
        is_temp_id(&self.entity_id)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_non_empty(&self.temp_id, "operation.temp_id")?;
        validate_non_empty(&self.entity_id, "operation.entity_id")?;
        match &self.data {
            OperationData::Create(payload) => {
                if payload.kind() != self.kind {
                    return Err(ValidationError(format!(
                        "create payload kind {} does not match operation kind {}",
                        payload.kind(),
                        self.kind
                    )));
                }
                payload.validate()
            }
            OperationData::Update(patch) => {
                if patch.kind() != self.kind {
                    return Err(ValidationError(format!(
                        "update patch kind {} does not match operation kind {}",
                        patch.kind(),
                        self.kind
                    )));
                }
                if patch.is_empty() {
                    return Err(ValidationError("update patch must not be empty".to_string()));
                }
                Ok(())
            }
            OperationData::Delete => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub token_type: String,
    pub scope: Option<String>,
}

impl OAuthToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>, leeway_seconds: i64) -> bool {
        self.expires_at > now + chrono::Duration::seconds(leeway_seconds)
            && !self.access_token.trim().is_empty()
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError(format!("{field_name} must not be empty")));
    }
    Ok(())
}

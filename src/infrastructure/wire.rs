use crate::domain::models::{
    Entity, EntityPayload, EventPatch, EventPayload, TaskPatch, TaskPayload, TaskStatus,
};
use crate::infrastructure::error::ApiError;
use chrono::{DateTime, NaiveDate, Utc};

const TASK_STATUS_NEEDS_ACTION: &str = "needsAction";
const TASK_STATUS_COMPLETED: &str = "completed";
const EVENT_STATUS_CANCELLED: &str = "cancelled";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
pub struct GoogleTask {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due: Option<String>,
    // Sent as a query parameter on insert and move; never part of a body.
    #[serde(default, skip_serializing)]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
pub struct CalendarEventDateTime {
    #[serde(rename = "dateTime", skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(rename = "timeZone", skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
pub struct GoogleCalendarEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<CalendarEventDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<CalendarEventDateTime>,
}

pub fn encode_task(task: &TaskPayload) -> GoogleTask {
    GoogleTask {
        id: None,
        title: Some(task.title.trim().to_string()),
        status: Some(task_status_to_string(task.status).to_string()),
        notes: task.notes.clone(),
        due: task.due.map(|due| due.to_rfc3339()),
        parent: task.parent.clone(),
        deleted: false,
    }
}

pub fn encode_task_patch(patch: &TaskPatch) -> serde_json::Value {
    let mut body = serde_json::Map::new();
    if let Some(title) = patch.title.as_deref() {
        body.insert("title".to_string(), title.trim().into());
    }
    if let Some(status) = patch.status {
        body.insert("status".to_string(), task_status_to_string(status).into());
        if status == TaskStatus::NeedsAction {
            body.insert("completed".to_string(), serde_json::Value::Null);
        }
    }
    if let Some(notes) = patch.notes.as_deref() {
        let notes = notes.trim();
        let value = if notes.is_empty() {
            serde_json::Value::Null
        } else {
            notes.into()
        };
        body.insert("notes".to_string(), value);
    }
    if let Some(due) = patch.due {
        body.insert("due".to_string(), due.to_rfc3339().into());
    }
    serde_json::Value::Object(body)
}

pub fn decode_task(task: &GoogleTask) -> Result<Option<Entity>, ApiError> {
    if task.deleted {
        return Ok(None);
    }
    let Some(id) = non_empty(task.id.as_deref()) else {
        return Ok(None);
    };

    let status = match task.status.as_deref() {
        Some(TASK_STATUS_COMPLETED) => TaskStatus::Completed,
        Some(TASK_STATUS_NEEDS_ACTION) | None => TaskStatus::NeedsAction,
        Some(other) => {
            return Err(ApiError::Malformed(format!("invalid task status: {other}")));
        }
    };
    let due = task
        .due
        .as_deref()
        .map(|value| parse_rfc3339_utc(value, "task.due"))
        .transpose()?;

    Ok(Some(Entity::remote(
        id,
        EntityPayload::Task(TaskPayload {
            title: task.title.clone().unwrap_or_default(),
            status,
            notes: non_empty(task.notes.as_deref()),
            due,
            parent: non_empty(task.parent.as_deref()),
        }),
    )))
}

pub fn encode_event(event: &EventPayload) -> GoogleCalendarEvent {
    GoogleCalendarEvent {
        id: None,
        summary: Some(event.summary.trim().to_string()),
        description: event.description.clone(),
        status: Some("confirmed".to_string()),
        start: Some(date_time(event.start)),
        end: Some(date_time(event.end)),
    }
}

pub fn encode_event_patch(patch: &EventPatch) -> serde_json::Value {
    let mut body = serde_json::Map::new();
    if let Some(summary) = patch.summary.as_deref() {
        body.insert("summary".to_string(), summary.trim().into());
    }
    if let Some(description) = patch.description.as_deref() {
        let description = description.trim();
        let value = if description.is_empty() {
            serde_json::Value::Null
        } else {
            description.into()
        };
        body.insert("description".to_string(), value);
    }
    if let Some(start) = patch.start {
        body.insert("start".to_string(), serde_json::json!({ "dateTime": start.to_rfc3339() }));
    }
    if let Some(end) = patch.end {
        body.insert("end".to_string(), serde_json::json!({ "dateTime": end.to_rfc3339() }));
    }
    serde_json::Value::Object(body)
}

pub fn decode_event(event: &GoogleCalendarEvent) -> Result<Option<Entity>, ApiError> {
    let is_cancelled = event
        .status
        .as_deref()
        .map(|status| status.eq_ignore_ascii_case(EVENT_STATUS_CANCELLED))
        .unwrap_or(false);
    if is_cancelled {
        return Ok(None);
    }
    let Some(id) = non_empty(event.id.as_deref()) else {
        return Ok(None);
    };

    let start = parse_event_time(event.start.as_ref(), "start")?;
    let end = parse_event_time(event.end.as_ref(), "end")?;

    Ok(Some(Entity::remote(
        id,
        EntityPayload::Event(EventPayload {
            summary: event.summary.clone().unwrap_or_default(),
            description: non_empty(event.description.as_deref()),
            start,
            end,
        }),
    )))
}

fn date_time(value: DateTime<Utc>) -> CalendarEventDateTime {
    CalendarEventDateTime {
        date_time: Some(value.to_rfc3339()),
        date: None,
        time_zone: None,
    }
}

fn parse_event_time(
    value: Option<&CalendarEventDateTime>,
    field_name: &str,
) -> Result<DateTime<Utc>, ApiError> {
    let Some(value) = value else {
        return Err(ApiError::Malformed(format!("calendar event is missing {field_name}")));
    };
    if let Some(date_time) = value.date_time.as_deref() {
        return parse_rfc3339_utc(date_time, field_name);
    }
    if let Some(date) = value.date.as_deref() {
        // All-day events carry a bare date.
        let parsed = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|error| {
            ApiError::Malformed(format!("invalid calendar event {field_name}.date '{date}': {error}"))
        })?;
        let midnight = parsed
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| ApiError::Malformed(format!("invalid calendar event {field_name}.date")))?;
        return Ok(midnight.and_utc());
    }
    Err(ApiError::Malformed(format!(
        "calendar event {field_name} has neither dateTime nor date"
    )))
}

fn parse_rfc3339_utc(value: &str, field_name: &str) -> Result<DateTime<Utc>, ApiError> {
    DateTime::parse_from_rfc3339(value)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| ApiError::Malformed(format!("invalid {field_name} '{value}': {error}")))
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn task_status_to_string(value: TaskStatus) -> &'static str {
    match value {
        TaskStatus::NeedsAction => TASK_STATUS_NEEDS_ACTION,
        TaskStatus::Completed => TASK_STATUS_COMPLETED,
    }
}

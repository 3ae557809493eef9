//! Progress and outcome events streamed to import subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event channel name, used as the SSE `event:` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Regular status message for a file.
    Message,
    /// Upload attempt `k` of `N` started.
    RetryEvent,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::RetryEvent => "retry_event",
        }
    }
}

/// Status values carried by `message` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Staging,
    Started,
    Uploading,
    Progress,
    Importing,
    Success,
    Duplicate,
    UnsupportedFormat,
    Error,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Staging => "staging",
            Self::Started => "started",
            Self::Uploading => "uploading",
            Self::Progress => "progress",
            Self::Importing => "importing",
            Self::Success => "success",
            Self::Duplicate => "duplicate",
            Self::UnsupportedFormat => "unsupported_format",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "staging" => Some(Self::Staging),
            "started" => Some(Self::Started),
            "uploading" => Some(Self::Uploading),
            "progress" => Some(Self::Progress),
            "importing" => Some(Self::Importing),
            "success" => Some(Self::Success),
            "duplicate" => Some(Self::Duplicate),
            "unsupported_format" => Some(Self::UnsupportedFormat),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// No further events for the file follow a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Duplicate | Self::UnsupportedFormat | Self::Error
        )
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An event before the bus has assigned its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDraft {
    pub event_type: EventType,
    pub file_name: String,
    pub status: String,
    pub message: String,
}

impl EventDraft {
    pub fn message(file_name: &str, status: EventStatus, message: impl Into<String>) -> Self {
        Self {
            event_type: EventType::Message,
            file_name: file_name.to_string(),
            status: status.as_str().to_string(),
            message: message.into(),
        }
    }

    pub fn staging(file_name: &str, percent: u8) -> Self {
        Self::message(file_name, EventStatus::Staging, format!("{}%", percent))
    }

    pub fn started(file_name: &str) -> Self {
        Self::message(file_name, EventStatus::Started, "preparing file...")
    }

    pub fn uploading(file_name: &str) -> Self {
        Self::message(file_name, EventStatus::Uploading, "Uploading file")
    }

    pub fn progress(file_name: &str, percent: u8) -> Self {
        Self::message(file_name, EventStatus::Progress, percent.to_string())
    }

    pub fn importing(file_name: &str) -> Self {
        Self::message(file_name, EventStatus::Importing, "Verifying upload")
    }

    /// Retry notification: status carries the attempt, message the configured maximum.
    pub fn retry(file_name: &str, attempt: u32, max_attempts: u32) -> Self {
        Self {
            event_type: EventType::RetryEvent,
            file_name: file_name.to_string(),
            status: attempt.to_string(),
            message: max_attempts.to_string(),
        }
    }

    pub fn success(file_name: &str, destination: &str, image_ids: &[i64]) -> Self {
        let ids: Vec<String> = image_ids.iter().map(|id| id.to_string()).collect();
        Self::message(
            file_name,
            EventStatus::Success,
            format!("Image id: {}, stored at {}", ids.join(", "), destination),
        )
    }

    pub fn duplicate(file_name: &str) -> Self {
        Self::message(file_name, EventStatus::Duplicate, "File already in current group")
    }

    pub fn unsupported(file_name: &str, message: impl Into<String>) -> Self {
        Self::message(file_name, EventStatus::UnsupportedFormat, message)
    }

    pub fn error(file_name: &str, message: impl Into<String>) -> Self {
        Self::message(file_name, EventStatus::Error, message)
    }
}

/// An immutable, published event. Ids strictly increase per bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub id: u64,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub file_name: String,
    pub status: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn from_draft(id: u64, draft: EventDraft) -> Self {
        Self {
            id,
            event_type: draft.event_type,
            file_name: draft.file_name,
            status: draft.status,
            message: draft.message,
            timestamp: Utc::now(),
        }
    }

    /// Parsed status for `message` events; `None` for retry events.
    pub fn status(&self) -> Option<EventStatus> {
        match self.event_type {
            EventType::Message => EventStatus::parse(&self.status),
            EventType::RetryEvent => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_some_and(|s| s.is_terminal())
    }
}

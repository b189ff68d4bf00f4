//! Event types for the run ledger.
//!
//! Every permission decision and execution step is recorded as an immutable
//! event appended to its run. Event ids are assigned by the run and start at 1.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single entry in a run's append-only event list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Position in the run, starting at 1
    pub id: u64,

    /// When this event was recorded (ISO 8601, UTC)
    pub timestamp: DateTime<Utc>,

    /// Type of event
    #[serde(rename = "type")]
    pub event_type: EventType,

    /// Structured payload (scrubbed before it reaches disk)
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Event {
    /// Create an event with the current timestamp
    pub fn new(id: u64, event_type: EventType, payload: serde_json::Value) -> Self {
        Self {
            id,
            timestamp: Utc::now(),
            event_type,
            payload,
        }
    }
}

/// Types of events that can be recorded against a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// The permission registry approved a tool
    #[serde(rename = "tool.approved")]
    ToolApproved,

    /// The permission registry denied a tool
    #[serde(rename = "tool.denied")]
    ToolDenied,

    /// Safety preflight blocked a tool call
    #[serde(rename = "tool.blocked")]
    ToolBlocked,

    /// A tool call started executing
    #[serde(rename = "tool.invoked")]
    ToolInvoked,

    /// A tool call returned successfully
    #[serde(rename = "tool.completed")]
    ToolCompleted,

    /// A tool call failed after resilience handling
    #[serde(rename = "tool.failed")]
    ToolFailed,

    /// A top-level operation started
    #[serde(rename = "operation.started")]
    OperationStarted,

    /// A top-level operation attempt failed and will be retried
    #[serde(rename = "operation.retrying")]
    OperationRetrying,

    /// A top-level operation completed
    #[serde(rename = "operation.completed")]
    OperationCompleted,

    /// A top-level operation failed permanently
    #[serde(rename = "operation.failed")]
    OperationFailed,
}

impl EventType {
    /// Wire name of this event type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToolApproved => "tool.approved",
            Self::ToolDenied => "tool.denied",
            Self::ToolBlocked => "tool.blocked",
            Self::ToolInvoked => "tool.invoked",
            Self::ToolCompleted => "tool.completed",
            Self::ToolFailed => "tool.failed",
            Self::OperationStarted => "operation.started",
            Self::OperationRetrying => "operation.retrying",
            Self::OperationCompleted => "operation.completed",
            Self::OperationFailed => "operation.failed",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

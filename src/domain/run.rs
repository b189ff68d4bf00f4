//! Run state as persisted by the run ledger.
//!
//! A Run is one unit of audited work: a permission check, a tool call, or a
//! top-level operation such as building an outline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{Event, EventType};

/// A ledger run with its ordered events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    /// Unique identifier for this run
    pub run_id: Uuid,

    /// What kind of work this run records (e.g. "build_outline")
    pub kind: String,

    /// Parameters the run was started with
    #[serde(default)]
    pub params: serde_json::Value,

    /// Current status of the run
    pub status: RunStatus,

    /// When the run was created
    pub created_at: DateTime<Utc>,

    /// When the run was last rewritten
    pub updated_at: DateTime<Utc>,

    /// Append-only event list
    #[serde(default)]
    pub events: Vec<Event>,
}

impl Run {
    /// Create a new running run
    pub fn new(kind: impl Into<String>, params: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            kind: kind.into(),
            params,
            status: RunStatus::Running,
            created_at: now,
            updated_at: now,
            events: Vec::new(),
        }
    }

    /// Id the next appended event will receive
    pub fn next_event_id(&self) -> u64 {
        self.events.last().map(|e| e.id + 1).unwrap_or(1)
    }

    /// Append an event, assigning the next id
    pub fn push_event(&mut self, event_type: EventType, payload: serde_json::Value) -> &Event {
        let event = Event::new(self.next_event_id(), event_type, payload);
        self.updated_at = event.timestamp;
        self.events.push(event);
        &self.events[self.events.len() - 1]
    }

    /// Set the run status
    pub fn set_status(&mut self, status: RunStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Check if the run is still in progress
    pub fn is_running(&self) -> bool {
        self.status == RunStatus::Running
    }

    /// Events of a specific type, in order
    pub fn events_of_type(&self, event_type: EventType) -> impl Iterator<Item = &Event> {
        self.events.iter().filter(move |e| e.event_type == event_type)
    }
}

/// Status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Still accepting events
    Running,

    /// Finished successfully
    Completed,

    /// Finished with an error
    Failed,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Running
    }
}

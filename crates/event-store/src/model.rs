use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use runplane_core_types::{OwnerId, RunId};

/// Event type written as the final event of a successful run.
pub const TERMINAL_EVENT_COMPLETE: &str = "complete";
/// Event type written as the final event of a failed or timed-out run.
pub const TERMINAL_EVENT_ERROR: &str = "error";

/// Lifecycle status of a run. Terminal states are one-way.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Error,
    Timeout,
}

impl RunStatus {
    pub const fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Error => "error",
            RunStatus::Timeout => "timeout",
        }
    }

    /// Type of the event that closes a run ending in this status.
    pub const fn terminal_event_type(self) -> &'static str {
        match self {
            RunStatus::Completed => TERMINAL_EVENT_COMPLETE,
            _ => TERMINAL_EVENT_ERROR,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a run's append-only event sequence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: RunId,
    /// Gap-free, strictly increasing per run, starting at 0.
    pub sequence: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl RunEvent {
    pub fn is_terminal(&self) -> bool {
        self.kind == TERMINAL_EVENT_COMPLETE || self.kind == TERMINAL_EVENT_ERROR
    }

    /// Flattened wire form: `{type, ...payload fields, timestamp, sequence}`.
    ///
    /// Non-object payloads are carried under `data`.
    pub fn to_wire(&self) -> serde_json::Value {
        let mut map = match &self.payload {
            serde_json::Value::Object(fields) => fields.clone(),
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("data".into(), other.clone());
                map
            }
        };
        map.insert("type".into(), serde_json::Value::String(self.kind.clone()));
        map.insert(
            "timestamp".into(),
            serde_json::Value::String(self.timestamp.to_rfc3339()),
        );
        map.insert("sequence".into(), serde_json::Value::from(self.sequence));
        serde_json::Value::Object(map)
    }
}

/// Read-only view of a run's bookkeeping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub owner: OwnerId,
    pub status: RunStatus,
    pub event_count: u64,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_form_flattens_object_payloads() {
        let event = RunEvent {
            run_id: RunId::from("r1"),
            sequence: 4,
            kind: "tool_call".into(),
            payload: json!({"tool": "browser.task", "type": "ignored"}),
            timestamp: Utc::now(),
        };
        let wire = event.to_wire();
        assert_eq!(wire["type"], "tool_call");
        assert_eq!(wire["tool"], "browser.task");
        assert_eq!(wire["sequence"], 4);
        assert!(wire["timestamp"].is_string());
    }

    #[test]
    fn wire_form_wraps_scalars() {
        let event = RunEvent {
            run_id: RunId::from("r1"),
            sequence: 0,
            kind: "message".into(),
            payload: json!("hello"),
            timestamp: Utc::now(),
        };
        assert_eq!(event.to_wire()["data"], "hello");
    }

    #[test]
    fn terminal_statuses() {
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert_eq!(RunStatus::Timeout.terminal_event_type(), "error");
        assert_eq!(RunStatus::Completed.terminal_event_type(), "complete");
    }
}

//! Lifecycle events emitted while an execution runs.
//!
//! On the wire an event is `{"eventName": "...", "timestamp": "...",
//! "payload": {...}}`. Node-scoped events must carry `payload.nodeName`.
//! Event names this crate does not know decode to [`EventKind::Unknown`] and
//! are ignored by recovery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::fmt;

const NODE_PREFIX: &str = "node.";
const WORKFLOW_PREFIX: &str = "workflow.";

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A node began executing.
    NodeStarted { node_name: String },
    /// A node finished executing.
    NodeFinished { node_name: String },
    WorkflowStarted,
    WorkflowSuccess,
    WorkflowFailed,
    WorkflowCrashed,
    /// An event this crate has no use for.
    Unknown {
        event_name: String,
        payload: JsonValue,
    },
}

impl EventKind {
    /// The dot-namespaced wire name.
    #[must_use]
    pub fn event_name(&self) -> &str {
        match self {
            Self::NodeStarted { .. } => "node.started",
            Self::NodeFinished { .. } => "node.finished",
            Self::WorkflowStarted => "workflow.started",
            Self::WorkflowSuccess => "workflow.success",
            Self::WorkflowFailed => "workflow.failed",
            Self::WorkflowCrashed => "workflow.crashed",
            Self::Unknown { event_name, .. } => event_name,
        }
    }
}

/// One immutable entry of an execution's event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireEvent", into = "WireEvent")]
pub struct EventMessage {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
}

impl EventMessage {
    #[must_use]
    pub fn new(kind: EventKind, timestamp: DateTime<Utc>) -> Self {
        Self { kind, timestamp }
    }

    /// A `node.started` event.
    #[must_use]
    pub fn node_started(node_name: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::new(
            EventKind::NodeStarted {
                node_name: node_name.into(),
            },
            timestamp,
        )
    }

    /// A `node.finished` event.
    #[must_use]
    pub fn node_finished(node_name: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::new(
            EventKind::NodeFinished {
                node_name: node_name.into(),
            },
            timestamp,
        )
    }

    #[must_use]
    pub fn event_name(&self) -> &str {
        self.kind.event_name()
    }

    /// True for every `node.*` event, known or not.
    #[must_use]
    pub fn is_node_event(&self) -> bool {
        self.event_name().starts_with(NODE_PREFIX)
    }

    /// True for every `workflow.*` event, known or not.
    #[must_use]
    pub fn is_workflow_event(&self) -> bool {
        self.event_name().starts_with(WORKFLOW_PREFIX)
    }
}

/// Why a wire event could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedEvent {
    pub event_name: String,
}

impl fmt::Display for MalformedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' event has no payload.nodeName", self.event_name)
    }
}

impl std::error::Error for MalformedEvent {}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    event_name: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    payload: JsonValue,
}

impl TryFrom<WireEvent> for EventMessage {
    type Error = MalformedEvent;

    fn try_from(wire: WireEvent) -> Result<Self, Self::Error> {
        let node_name = || {
            wire.payload
                .get("nodeName")
                .and_then(JsonValue::as_str)
                .map(str::to_string)
                .ok_or_else(|| MalformedEvent {
                    event_name: wire.event_name.clone(),
                })
        };

        let kind = match wire.event_name.as_str() {
            "node.started" => EventKind::NodeStarted {
                node_name: node_name()?,
            },
            "node.finished" => EventKind::NodeFinished {
                node_name: node_name()?,
            },
            "workflow.started" => EventKind::WorkflowStarted,
            "workflow.success" => EventKind::WorkflowSuccess,
            "workflow.failed" => EventKind::WorkflowFailed,
            "workflow.crashed" => EventKind::WorkflowCrashed,
            _ => EventKind::Unknown {
                event_name: wire.event_name.clone(),
                payload: wire.payload.clone(),
            },
        };

        Ok(Self {
            kind,
            timestamp: wire.timestamp,
        })
    }
}

impl From<EventMessage> for WireEvent {
    fn from(event: EventMessage) -> Self {
        let event_name = event.event_name().to_string();
        let payload = match event.kind {
            EventKind::NodeStarted { node_name } | EventKind::NodeFinished { node_name } => {
                json!({ "nodeName": node_name })
            }
            EventKind::Unknown { payload, .. } => payload,
            _ => JsonValue::Null,
        };
        Self {
            event_name,
            timestamp: event.timestamp,
            payload,
        }
    }
}

//! Execution records as kept by the execution store.

use chrono::{DateTime, Utc};
use flotilla_core::{ExecutionId, WorkflowId};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    New,
    Running,
    Waiting,
    Success,
    Error,
    Crashed,
    Canceled,
}

impl ExecutionStatus {
    /// Returns true for statuses a normal run ends in.
    ///
    /// `crashed` is left out: a crashed record may still be missing the
    /// results recovery can reconstruct.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Canceled)
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Success => "success",
            Self::Error => "error",
            Self::Crashed => "crashed",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node of the workflow definition, as far as recovery cares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub name: String,
}

impl WorkflowNode {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// The workflow definition snapshot stored with an execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowData {
    /// Nodes in definition order.
    pub nodes: Vec<WorkflowNode>,
}

/// An error attached to a node result or to the run as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionError {
    /// The process running the node or workflow went away.
    Crashed { message: String },
    /// The node or workflow reported a failure.
    Failed { message: String },
}

impl ExecutionError {
    /// Marker for a node that started but never finished.
    #[must_use]
    pub fn node_crashed() -> Self {
        Self::Crashed {
            message: "node execution did not finish, possibly due to a crash".to_string(),
        }
    }

    /// Marker for a run containing a crashed node.
    #[must_use]
    pub fn workflow_crashed() -> Self {
        Self::Crashed {
            message: "workflow did not finish, possibly due to a crash".to_string(),
        }
    }
}

/// Outcome of one node run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Success,
    Crashed,
}

/// Result of running one node once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskData {
    pub start_time: DateTime<Utc>,
    pub execution_status: TaskStatus,
    /// Duration in milliseconds; `-1` when unknown.
    pub execution_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

/// Per-node results of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunData {
    /// Results keyed by node name.
    pub result_data: BTreeMap<String, Vec<TaskData>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_node_executed: Option<String>,
}

impl RunData {
    /// Returns true if `node` already has at least one result.
    #[must_use]
    pub fn has_result_for(&self, node: &str) -> bool {
        self.result_data.get(node).is_some_and(|runs| !runs.is_empty())
    }

    /// Appends a result for `node` and marks it as last executed.
    pub fn push(&mut self, node: &str, task: TaskData) {
        self.result_data
            .entry(node.to_string())
            .or_default()
            .push(task);
        self.last_node_executed = Some(node.to_string());
    }
}

/// One run of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub status: ExecutionStatus,
    pub workflow_data: WorkflowData,
    #[serde(default)]
    pub data: Option<RunData>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stopped_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub wait_till: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    /// Creates a `new` record with no results.
    #[must_use]
    pub fn new(id: ExecutionId, workflow_id: WorkflowId, workflow_data: WorkflowData) -> Self {
        Self {
            id,
            workflow_id,
            status: ExecutionStatus::New,
            workflow_data,
            data: None,
            started_at: None,
            stopped_at: None,
            wait_till: None,
        }
    }

    /// Returns true if any node has a recorded result.
    #[must_use]
    pub fn has_result_data(&self) -> bool {
        self.data
            .as_ref()
            .is_some_and(|data| data.result_data.values().any(|runs| !runs.is_empty()))
    }
}

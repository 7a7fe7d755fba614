//! Reconstructing executions interrupted by a crash.
//!
//! When a worker dies mid-run its execution record is left `running` (or
//! `waiting`, or half-finished) with no results for the nodes it was working
//! on. The lifecycle events emitted before the crash are usually enough to
//! rebuild what happened: a node with both `node.started` and `node.finished`
//! ran to completion, a node with only `node.started` was cut off.
//!
//! [`ExecutionRecovery::recover`] does that rebuild, persists the amended
//! record, replays the after-execution hooks and tells the next live client
//! about it. Every collaborator failure aborts the whole thing and is
//! returned to the caller; the stored record is then left as it was.

use crate::error::RecoveryError;
use crate::event::{EventKind, EventMessage};
use crate::execution::{ExecutionError, ExecutionRecord, ExecutionStatus, TaskData, TaskStatus};
use crate::leadership::Leadership;
use crate::push::PushMessage;
use crate::store::{EventLog, ExecutionStore, FindOptions, LifecycleHooks, LiveNotifier};
use chrono::{DateTime, Utc};
use flotilla_core::ExecutionId;
use rootcause::prelude::Report;
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Tuning for recovery.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryConfig {
    /// Output attached to nodes that finished but whose real output is lost.
    pub placeholder: JsonValue,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            placeholder: json!({ "recovered": true }),
        }
    }
}

/// What a call to [`ExecutionRecovery::recover`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryOutcome {
    /// This instance is a follower; nothing was touched.
    NotLeader,
    /// The execution does not exist.
    NothingToDo,
    /// No events were available; the record was marked `crashed` as is.
    MarkedCrashed,
    /// There were events but none about nodes, so nothing can be rebuilt.
    Unrecoverable,
    /// The run already finished with results; left untouched.
    AlreadyComplete,
    /// The record was rebuilt and persisted.
    Recovered(Box<ExecutionRecord>),
}

/// Rebuilds crashed executions from their event logs.
pub struct ExecutionRecovery {
    store: Arc<dyn ExecutionStore>,
    hooks: Arc<dyn LifecycleHooks>,
    notifier: Arc<dyn LiveNotifier>,
    leadership: Arc<dyn Leadership>,
    config: RecoveryConfig,
}

impl ExecutionRecovery {
    #[must_use]
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        hooks: Arc<dyn LifecycleHooks>,
        notifier: Arc<dyn LiveNotifier>,
        leadership: Arc<dyn Leadership>,
    ) -> Self {
        Self {
            store,
            hooks,
            notifier,
            leadership,
            config: RecoveryConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: RecoveryConfig) -> Self {
        self.config = config;
        self
    }

    /// Recovers `id` from the given events.
    ///
    /// Events may arrive in any order; they are looked up by name, not
    /// consumed positionally.
    ///
    /// # Errors
    ///
    /// Returns the first collaborator failure. Nothing after the failing
    /// call is attempted.
    #[instrument(skip(self, events), fields(execution_id = %id, events = events.len()))]
    pub async fn recover(
        &self,
        id: ExecutionId,
        events: &[EventMessage],
    ) -> Result<RecoveryOutcome, Report<RecoveryError>> {
        if !self.leadership.is_leader() {
            debug!("not the leader, skipping recovery");
            return Ok(RecoveryOutcome::NotLeader);
        }

        if events.is_empty() {
            if !self.store.exists(id).await? {
                debug!("execution not found");
                return Ok(RecoveryOutcome::NothingToDo);
            }
            self.store.mark_crashed(id).await?;
            info!("no events recorded, execution marked crashed");
            return Ok(RecoveryOutcome::MarkedCrashed);
        }

        let (node_events, workflow_events): (Vec<&EventMessage>, Vec<&EventMessage>) = events
            .iter()
            .filter(|event| event.is_node_event() || event.is_workflow_event())
            .partition(|event| event.is_node_event());

        if node_events.is_empty() {
            warn!("no node events recorded, execution cannot be recovered");
            return Ok(RecoveryOutcome::Unrecoverable);
        }

        let Some(record) = self
            .store
            .find_execution(id, FindOptions::with_data())
            .await?
        else {
            debug!("execution not found");
            return Ok(RecoveryOutcome::NothingToDo);
        };

        if record.status.is_terminal() && record.has_result_data() {
            debug!(status = %record.status, "execution already complete");
            return Ok(RecoveryOutcome::AlreadyComplete);
        }

        let amended = amend(record, &node_events, &workflow_events, &self.config.placeholder);

        self.store.update(id, &amended).await?;
        self.hooks.run_after_execution(&amended).await?;

        let notifier = Arc::clone(&self.notifier);
        self.notifier.on_next_client_connect(Box::new(move || {
            notifier.broadcast(PushMessage::ExecutionRecovered { execution_id: id });
        }));

        info!(
            status = %amended.status,
            last_node = amended
                .data
                .as_ref()
                .and_then(|data| data.last_node_executed.as_deref())
                .unwrap_or_default(),
            "execution recovered"
        );
        Ok(RecoveryOutcome::Recovered(Box::new(amended)))
    }

    /// Loads `id`'s events from `log`, then recovers it.
    ///
    /// # Errors
    ///
    /// Fails if the log cannot be read or if [`recover`](Self::recover) fails.
    pub async fn recover_from_log(
        &self,
        log: &dyn EventLog,
        id: ExecutionId,
    ) -> Result<RecoveryOutcome, Report<RecoveryError>> {
        if !self.leadership.is_leader() {
            return Ok(RecoveryOutcome::NotLeader);
        }
        let events = log.load_events(id).await?;
        self.recover(id, &events).await
    }
}

fn started_at<'a>(events: &[&'a EventMessage], node: &str) -> Option<&'a EventMessage> {
    events.iter().copied().find(|event| {
        matches!(&event.kind, EventKind::NodeStarted { node_name } if node_name == node)
    })
}

fn finished_at<'a>(events: &[&'a EventMessage], node: &str) -> Option<&'a EventMessage> {
    events.iter().copied().find(|event| {
        matches!(&event.kind, EventKind::NodeFinished { node_name } if node_name == node)
    })
}

/// Milliseconds between two instants, or `-1` if they are out of order.
fn duration_ms(started: DateTime<Utc>, finished: DateTime<Utc>) -> i64 {
    let elapsed = (finished - started).num_milliseconds();
    if elapsed < 0 { -1 } else { elapsed }
}

/// Fills in results for nodes that ran but were never recorded, then settles
/// the record's status and stop time.
fn amend(
    mut record: ExecutionRecord,
    node_events: &[&EventMessage],
    workflow_events: &[&EventMessage],
    placeholder: &JsonValue,
) -> ExecutionRecord {
    let mut data = record.data.take().unwrap_or_default();
    let mut end_times = Vec::new();

    for node in &record.workflow_data.nodes {
        if data.has_result_for(&node.name) {
            continue;
        }
        let Some(started) = started_at(node_events, &node.name) else {
            continue;
        };

        let task = match finished_at(node_events, &node.name) {
            Some(finished) => {
                end_times.push(finished.timestamp);
                TaskData {
                    start_time: started.timestamp,
                    execution_status: TaskStatus::Success,
                    execution_time: duration_ms(started.timestamp, finished.timestamp),
                    error: None,
                    data: Some(placeholder.clone()),
                }
            }
            None => {
                end_times.push(started.timestamp);
                data.error = Some(ExecutionError::workflow_crashed());
                TaskData {
                    start_time: started.timestamp,
                    execution_status: TaskStatus::Crashed,
                    execution_time: 0,
                    error: Some(ExecutionError::node_crashed()),
                    data: None,
                }
            }
        };
        data.push(&node.name, task);
    }

    record.data = Some(data);
    record.status = if record.status == ExecutionStatus::Error {
        ExecutionStatus::Error
    } else {
        ExecutionStatus::Crashed
    };
    record.stopped_at = end_times
        .into_iter()
        .max()
        .or_else(|| {
            workflow_events
                .iter()
                .find(|event| {
                    matches!(
                        event.kind,
                        EventKind::WorkflowSuccess
                            | EventKind::WorkflowCrashed
                            | EventKind::WorkflowFailed
                    )
                })
                .map(|event| event.timestamp)
        })
        .or_else(|| {
            workflow_events
                .iter()
                .find(|event| event.kind == EventKind::WorkflowStarted)
                .map(|event| event.timestamp)
        });
    record.wait_till = None;
    record
}

//! Crash recovery for workflow executions.
//!
//! This crate provides:
//!
//! - **Execution model**: the records, statuses and per-node results the
//!   execution store keeps
//! - **Event model**: the lifecycle events workers emit while a run executes
//! - **Recovery**: rebuilding a crashed run's final state from its events
//! - **Collaborators**: the store, hook, push and event-log seams recovery
//!   works through, with a leader guard, an in-process push hub and a NATS
//!   JetStream event log

pub mod error;
pub mod event;
pub mod execution;
pub mod leadership;
pub mod nats;
pub mod push;
pub mod recovery;
pub mod store;

pub use error::RecoveryError;
pub use event::{EventKind, EventMessage, MalformedEvent};
pub use execution::{
    ExecutionError, ExecutionRecord, ExecutionStatus, RunData, TaskData, TaskStatus, WorkflowData,
    WorkflowNode,
};
pub use leadership::{LeaderFlag, Leadership};
pub use nats::{NatsConfig, NatsEventLog};
pub use push::{DeferredQueue, PushHub, PushMessage};
pub use recovery::{ExecutionRecovery, RecoveryConfig, RecoveryOutcome};
pub use store::{ConnectCallback, EventLog, ExecutionStore, FindOptions, LifecycleHooks, LiveNotifier};

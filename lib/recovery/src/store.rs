//! Collaborators recovery reads from and writes to.
//!
//! Each is a trait so the orchestrator can plug in its own persistence and
//! hook machinery, and tests can plug in in-memory fakes.

use crate::error::RecoveryError;
use crate::event::EventMessage;
use crate::execution::ExecutionRecord;
use crate::push::PushMessage;
use async_trait::async_trait;
use flotilla_core::ExecutionId;
use rootcause::prelude::Report;

/// Options for [`ExecutionStore::find_execution`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FindOptions {
    /// Load per-node result data along with the record.
    pub include_data: bool,
}

impl FindOptions {
    /// Load the record with its result data.
    #[must_use]
    pub const fn with_data() -> Self {
        Self { include_data: true }
    }
}

/// Persistent storage of execution records.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Loads a record, or `None` if it does not exist.
    async fn find_execution(
        &self,
        id: ExecutionId,
        options: FindOptions,
    ) -> Result<Option<ExecutionRecord>, Report<RecoveryError>>;

    /// Returns true if a record with this id exists.
    async fn exists(&self, id: ExecutionId) -> Result<bool, Report<RecoveryError>>;

    /// Sets the record's status to `crashed` without touching anything else.
    async fn mark_crashed(&self, id: ExecutionId) -> Result<(), Report<RecoveryError>>;

    /// Replaces the stored record.
    async fn update(
        &self,
        id: ExecutionId,
        record: &ExecutionRecord,
    ) -> Result<(), Report<RecoveryError>>;
}

/// Post-execution hooks a normal run fires on completion.
#[async_trait]
pub trait LifecycleHooks: Send + Sync {
    /// Runs the `afterExecution` hooks for a finished record.
    async fn run_after_execution(
        &self,
        record: &ExecutionRecord,
    ) -> Result<(), Report<RecoveryError>>;
}

/// Callback queued until the next live client connects.
pub type ConnectCallback = Box<dyn FnOnce() + Send + 'static>;

/// Push channel to connected UI clients.
pub trait LiveNotifier: Send + Sync {
    /// Runs `callback` once, when the next client connects.
    fn on_next_client_connect(&self, callback: ConnectCallback);

    /// Sends `message` to every connected client.
    fn broadcast(&self, message: PushMessage);
}

/// Durable log of the lifecycle events of each execution.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Loads every event recorded for `id`, in log order.
    async fn load_events(&self, id: ExecutionId) -> Result<Vec<EventMessage>, Report<RecoveryError>>;
}

//! Core domain types shared across the flotilla workspace.
//!
//! Flotilla is the fleet-coordination and crash-recovery layer of the
//! workflow platform: a service registry with discovery, and recovery of
//! executions interrupted by a worker crash.

pub mod error;
pub mod id;

pub use error::{Report, Result};
pub use id::{ExecutionId, ParseIdError, ServiceId, WorkflowId};

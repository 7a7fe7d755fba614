//! Error types for execution recovery.

use std::fmt;

/// Failures of the collaborators recovery depends on.
///
/// These are surfaced to the caller of `recover` as-is; recovery never
/// retries or swallows them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryError {
    /// The execution store failed to read or write.
    StoreFailed { message: String },
    /// The after-execution lifecycle hook failed.
    HookFailed { message: String },
    /// The event log could not be reached or read.
    EventLogFailed { message: String },
}

impl fmt::Display for RecoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StoreFailed { message } => write!(f, "execution store failed: {message}"),
            Self::HookFailed { message } => write!(f, "lifecycle hook failed: {message}"),
            Self::EventLogFailed { message } => write!(f, "event log failed: {message}"),
        }
    }
}

impl std::error::Error for RecoveryError {}

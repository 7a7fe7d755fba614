//! Error types for the registry crate.
//!
//! - `RegistryError`: catalog operations (register, lookup, health check)
//! - `DiscoveryError`: resolving a service name to one instance
//!
//! Probe failures are deliberately absent: they are recorded as data in
//! [`HealthCheckResult`](crate::HealthCheckResult) and never raised.

use flotilla_core::ServiceId;
use std::fmt;

/// Errors from registry operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No service with this id is registered.
    NotFound { id: ServiceId },
    /// A service with this id is already registered.
    AlreadyRegistered { id: ServiceId },
    /// The name pattern is not a valid regular expression.
    InvalidPattern { pattern: String, reason: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { id } => write!(f, "service not found: {id}"),
            Self::AlreadyRegistered { id } => write!(f, "service already registered: {id}"),
            Self::InvalidPattern { pattern, reason } => {
                write!(f, "invalid service name pattern '{pattern}': {reason}")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// Errors from discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    /// No registered instance matches the requested name, healthy or not.
    NotFound { name: String },
    /// The requested name is not a valid pattern.
    InvalidPattern { pattern: String, reason: String },
    /// The strategy name is not one of the supported strategies.
    UnknownStrategy { name: String },
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { name } => write!(f, "no instances of service '{name}'"),
            Self::InvalidPattern { pattern, reason } => {
                write!(f, "invalid service name pattern '{pattern}': {reason}")
            }
            Self::UnknownStrategy { name } => write!(f, "unknown discovery strategy '{name}'"),
        }
    }
}

impl std::error::Error for DiscoveryError {}

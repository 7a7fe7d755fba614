//! Strongly-typed identifiers.
//!
//! Execution and workflow ids are ULIDs minted by the platform. Service ids
//! are chosen by the registering process (typically `<name>-<host>`), so they
//! are opaque strings instead.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Error returned when parsing an ID from a string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse.
    pub id_type: &'static str,
    /// The reason for the parse failure.
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {}: {}", self.id_type, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

/// Generates a prefixed ULID id type, e.g. `exec_01J...`.
macro_rules! define_ulid_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Creates a new ID with a randomly generated ULID.
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// Creates an ID from a ULID.
            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            /// Returns the underlying ULID.
            #[must_use]
            pub const fn as_ulid(&self) -> Ulid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ulid::from_str(raw).map(Self).map_err(|e| ParseIdError {
                    id_type: stringify!($name),
                    reason: e.to_string(),
                })
            }
        }
    };
}

define_ulid_id!(
    /// Unique identifier for one execution (run) of a workflow.
    ExecutionId,
    "exec"
);

define_ulid_id!(
    /// Unique identifier for a workflow definition.
    WorkflowId,
    "wf"
);

/// Identifier of one registered service instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceId(String);

impl ServiceId {
    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ServiceId {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_string())
    }
}

impl TryFrom<String> for ServiceId {
    type Error = ParseIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ParseIdError {
                id_type: "ServiceId",
                reason: "must not be blank".to_string(),
            });
        }
        if trimmed.len() != value.len() {
            return Err(ParseIdError {
                id_type: "ServiceId",
                reason: "must not have surrounding whitespace".to_string(),
            });
        }
        Ok(Self(value))
    }
}

impl From<ServiceId> for String {
    fn from(id: ServiceId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_id_display_format() {
        let id = ExecutionId::new();
        assert!(id.to_string().starts_with("exec_"));
    }

    #[test]
    fn parse_with_and_without_prefix() {
        let id = WorkflowId::new();
        let parsed: WorkflowId = id.to_string().parse().expect("should parse");
        assert_eq!(id, parsed);

        let raw: WorkflowId = id.as_ulid().to_string().parse().expect("should parse");
        assert_eq!(id, raw);
    }

    #[test]
    fn parse_invalid_ulid() {
        let err = "exec_nope".parse::<ExecutionId>().unwrap_err();
        assert_eq!(err.id_type, "ExecutionId");
    }

    #[test]
    fn service_id_rejects_blank() {
        assert!("".parse::<ServiceId>().is_err());
        assert!("   ".parse::<ServiceId>().is_err());
        assert!(" scheduler-1".parse::<ServiceId>().is_err());
        let id: ServiceId = "scheduler-1".parse().expect("should parse");
        assert_eq!(id.as_str(), "scheduler-1");
    }

    #[test]
    fn service_id_serde_validates() {
        let id: ServiceId = serde_json::from_str("\"rag-2\"").expect("deserialize");
        assert_eq!(id.to_string(), "rag-2");
        assert!(serde_json::from_str::<ServiceId>("\"\"").is_err());
        assert_eq!(serde_json::to_string(&id).expect("serialize"), "\"rag-2\"");
    }
}

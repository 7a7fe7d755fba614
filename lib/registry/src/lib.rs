//! Fleet membership for the flotilla platform.
//!
//! This crate provides:
//!
//! - **Registry**: the catalog of running service instances and their health
//! - **Health probes**: bounded-timeout HTTP liveness checks
//! - **Health sweep**: the periodic, cancellable probe loop
//! - **Discovery**: picking one instance of a service by load-balancing strategy

pub mod discovery;
pub mod error;
pub mod event;
pub mod probe;
pub mod record;
pub mod registry;
pub mod sweep;

pub use discovery::{Discovery, RoutingCounters, Strategy};
pub use error::{DiscoveryError, RegistryError};
pub use event::{RegistryEvent, Subscription, SubscriptionId};
pub use probe::{HealthProbe, HttpHealthProbe};
pub use record::{
    HealthCheckResult, ProbeFailure, RegistryStatistics, ServiceRecord, ServiceRegistration,
    ServiceStatus,
};
pub use registry::{RegistryConfig, ServiceRegistry};
pub use sweep::{HealthSweep, SweepHandle};

//! Coordinator configuration.
//!
//! Loaded via the `config` crate from environment variables prefixed with
//! `FLOTILLA_`; nested keys use `__`, e.g.
//! `FLOTILLA_REGISTRY__HEALTH_CHECK_INTERVAL_SECONDS=10`.

use flotilla_core::ServiceId;
use flotilla_registry::{RegistryConfig, ServiceRegistration};
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

const ENV_PREFIX: &str = "FLOTILLA";

/// Coordinator configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CoordinatorConfig {
    /// Address the management API listens on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Health checking configuration.
    #[serde(default)]
    pub registry: RegistrySettings,

    /// When set, the coordinator registers itself on boot.
    #[serde(default)]
    pub self_registration: Option<SelfRegistration>,
}

/// Health checking configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrySettings {
    /// Interval between health sweeps, in seconds.
    #[serde(default = "default_health_check_interval_seconds")]
    pub health_check_interval_seconds: u64,

    /// Upper bound on a single health probe, in seconds.
    #[serde(default = "default_probe_timeout_seconds")]
    pub probe_timeout_seconds: u64,
}

/// The coordinator's own catalog entry.
#[derive(Debug, Clone, Deserialize)]
pub struct SelfRegistration {
    pub id: ServiceId,
    pub name: String,
    pub version: String,
    pub base_url: String,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8500))
}

fn default_health_check_interval_seconds() -> u64 {
    30
}

fn default_probe_timeout_seconds() -> u64 {
    5
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            health_check_interval_seconds: default_health_check_interval_seconds(),
            probe_timeout_seconds: default_probe_timeout_seconds(),
        }
    }
}

impl RegistrySettings {
    #[must_use]
    pub fn to_registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            health_check_interval: Duration::from_secs(self.health_check_interval_seconds),
            probe_timeout: Duration::from_secs(self.probe_timeout_seconds),
        }
    }
}

impl SelfRegistration {
    #[must_use]
    pub fn to_registration(&self) -> ServiceRegistration {
        ServiceRegistration::new(
            self.id.clone(),
            self.name.clone(),
            self.version.clone(),
            self.base_url.clone(),
        )
    }
}

impl CoordinatorConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_environment(config::Environment::with_prefix(ENV_PREFIX))
    }

    fn from_environment(environment: config::Environment) -> Result<Self, config::ConfigError> {
        let config: Self = config::Config::builder()
            .add_source(
                environment
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.registry.validate()?;
        Ok(config)
    }
}

impl RegistrySettings {
    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.health_check_interval_seconds == 0 {
            return Err(config::ConfigError::Message(
                "registry.health_check_interval_seconds must be at least 1".to_string(),
            ));
        }
        if self.probe_timeout_seconds == 0 {
            return Err(config::ConfigError::Message(
                "registry.probe_timeout_seconds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

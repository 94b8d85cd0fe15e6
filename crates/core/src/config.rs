//! Layered configuration: built-in defaults, an optional TOML file, then
//! environment overrides for the bind address.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Port used when neither the config file nor `PORT` names one.
pub const DEFAULT_PORT: u16 = 22057;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VigilConfig {
    pub server: ServerSection,
    pub supervisor: SupervisorSection,
    pub events: EventsSection,
    pub sandbox: SandboxSection,
}

/// HTTP / WebSocket listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Address to bind to (e.g., "0.0.0.0:22057").
    pub bind_address: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_address: format!("0.0.0.0:{DEFAULT_PORT}"),
        }
    }
}

/// Timing and health policy for every reconciliation loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSection {
    /// Floor applied to every requested cadence.
    pub min_cadence_secs: u64,
    /// Cadence used when a request omits one (or sends zero).
    pub default_cadence_secs: u64,
    /// Fixed delay used once failures exceed `failure_threshold`.
    pub retry_delay_secs: u64,
    /// Consecutive failures tolerated before switching to `retry_delay_secs`.
    pub failure_threshold: u32,
    /// Upper bound on a remote state fetch.
    pub fetch_timeout_secs: u64,
    /// Upper bound on a single name or label correction.
    pub action_timeout_secs: u64,
    /// Upper bound on the credential exchange.
    pub auth_timeout_secs: u64,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            min_cadence_secs: 5,
            default_cadence_secs: 7,
            retry_delay_secs: 15,
            failure_threshold: 3,
            fetch_timeout_secs: 20,
            action_timeout_secs: 20,
            auth_timeout_secs: 30,
        }
    }
}

/// Event fan-out settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsSection {
    /// Bounded queue length per connected observer.
    pub observer_capacity: usize,
    /// Consecutive discarded events before a slow observer is evicted.
    pub max_consecutive_drops: u32,
}

impl Default for EventsSection {
    fn default() -> Self {
        Self {
            observer_capacity: 256,
            max_consecutive_drops: 5,
        }
    }
}

/// Seed data for the in-memory remote backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    /// Credentials the sandbox accepts. Empty accepts any non-empty payload.
    pub accepted_credentials: Vec<String>,
    /// Targets that exist when the process starts.
    pub targets: Vec<SandboxTarget>,
}

/// One seeded sandbox target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxTarget {
    pub id: String,
    pub name: String,
    pub members: Vec<String>,
}

impl VigilConfig {
    /// Load configuration from an optional file, then apply process
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, fails to parse, or the
    /// resulting values are invalid.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config_read_failed(path, e.to_string()))?;
        debug!(path = %path.display(), "Loaded config file");
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML for this schema.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::toml_parse_failed(e.to_string()))
    }

    /// Render the effective configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::TomlSerializeFailed {
            reason: e.to_string(),
        })
    }

    /// Apply environment overrides through `lookup`.
    ///
    /// `VIGIL_BIND` replaces the whole bind address. Otherwise `PORT` binds
    /// all interfaces on that port.
    ///
    /// # Errors
    ///
    /// Returns an error if `PORT` is not a valid port number.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup("VIGIL_BIND").filter(|v| !v.trim().is_empty()) {
            self.server.bind_address = bind.trim().to_string();
            return Ok(());
        }

        if let Some(port) = lookup("PORT").filter(|v| !v.trim().is_empty()) {
            let port: u16 = port
                .trim()
                .parse()
                .map_err(|_| Error::invalid_config(format!("PORT '{port}' is not a valid port")))?;
            self.server.bind_address = format!("0.0.0.0:{port}");
        }

        Ok(())
    }

    /// Reject values that would stall or spin the supervisor.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field found.
    pub fn validate(&self) -> Result<()> {
        let sup = &self.supervisor;
        let positive = [
            ("min_cadence_secs", sup.min_cadence_secs),
            ("retry_delay_secs", sup.retry_delay_secs),
            ("fetch_timeout_secs", sup.fetch_timeout_secs),
            ("action_timeout_secs", sup.action_timeout_secs),
            ("auth_timeout_secs", sup.auth_timeout_secs),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(Error::invalid_config(format!(
                "supervisor.{name} must be positive"
            )));
        }

        if self.events.observer_capacity == 0 {
            return Err(Error::invalid_config(
                "events.observer_capacity must be positive",
            ));
        }

        if self.server.bind_address.trim().is_empty() {
            return Err(Error::invalid_config("server.bind_address is empty"));
        }

        Ok(())
    }
}

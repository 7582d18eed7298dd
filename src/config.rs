//! # Configuration Module
//!
//! The routing configuration: broker address, topic prefixes and the mDNS
//! service name, persisted as a TOML file and editable at runtime.
//!
//! This module handles:
//! - Compiled-in defaults used on first boot or when storage is unreadable
//! - A validity marker distinguishing our file from stale/foreign content
//! - Applying field changes with validation and synchronous persistence
//! - Reporting which side effects (reconnect, re-register) a change requires

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::error::{EmonBridgeError, Result};

/// Validity marker written alongside the configuration
///
/// ASCII "EMON". A stored file without this exact value was not written by
/// this software (or predates it) and is ignored in favor of the defaults.
pub const CONFIG_MAGIC: u32 = 0x454D_4F4E;

/// Routing configuration
///
/// Invariant: all fields are non-empty. [`Config::validate`] enforces this
/// at load and on every apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Broker address as `host` or `host:port`
    #[serde(default = "default_server_address")]
    pub server_address: String,

    /// Prefix for per-field measurement topics (e.g. `emon/emontx/power1`)
    #[serde(default = "default_measurement_topic_prefix")]
    pub measurement_topic_prefix: String,

    /// Prefix for bridge status topics (e.g. `emond1/status`)
    #[serde(default = "default_status_topic_prefix")]
    pub status_topic_prefix: String,

    /// mDNS service instance name
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_server_address() -> String { "emonpi.local:1883".to_string() }
fn default_measurement_topic_prefix() -> String { "emon/emontx/".to_string() }
fn default_status_topic_prefix() -> String { "emond1/".to_string() }
fn default_service_name() -> String { "emond1".to_string() }

impl Default for Config {
    fn default() -> Self {
        Self {
            server_address: default_server_address(),
            measurement_topic_prefix: default_measurement_topic_prefix(),
            status_topic_prefix: default_status_topic_prefix(),
            service_name: default_service_name(),
        }
    }
}

impl Config {
    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any field is empty.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("server_address", &self.server_address),
            ("measurement_topic_prefix", &self.measurement_topic_prefix),
            ("status_topic_prefix", &self.status_topic_prefix),
            ("service_name", &self.service_name),
        ] {
            if value.is_empty() {
                return Err(EmonBridgeError::Config(format!("{} cannot be empty", name)));
            }
        }
        Ok(())
    }
}

/// A partial edit submitted by the external configuration interface
///
/// `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigUpdate {
    pub server_address: Option<String>,
    pub measurement_topic_prefix: Option<String>,
    pub status_topic_prefix: Option<String>,
    pub service_name: Option<String>,
}

/// Side effects the caller must run after a successful apply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// The broker address changed; reconnect via `apply_new_server`
    pub server_changed: bool,
    /// The service name changed; re-register with mDNS
    pub service_name_changed: bool,
}

/// Configuration persistence collaborator
///
/// Abstracted so tests can run against an in-memory store and so the storage
/// backend (filesystem here, flash on the original device) stays swappable.
pub trait ConfigPersistence: Send {
    /// Load the stored configuration, `None` when absent or marker-mismatched
    fn load(&self) -> Result<Option<Config>>;

    /// Persist the configuration together with the validity marker
    fn save(&self, config: &Config) -> Result<()>;
}

/// On-disk representation: the configuration plus the validity marker
#[derive(Debug, Serialize, Deserialize)]
struct StoredConfig {
    magic: u32,
    #[serde(flatten)]
    config: Config,
}

/// TOML-file persistence backend
#[derive(Debug)]
pub struct TomlFileStore {
    path: PathBuf,
}

impl TomlFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigPersistence for TomlFileStore {
    fn load(&self) -> Result<Option<Config>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(EmonBridgeError::Persistence(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let stored: StoredConfig = toml::from_str(&contents)
            .map_err(|e| EmonBridgeError::Persistence(format!("failed to parse config: {}", e)))?;

        if stored.magic != CONFIG_MAGIC {
            warn!(
                "Stored configuration has marker {:#010x}, expected {:#010x}; ignoring it",
                stored.magic, CONFIG_MAGIC
            );
            return Ok(None);
        }

        Ok(Some(stored.config))
    }

    fn save(&self, config: &Config) -> Result<()> {
        let stored = StoredConfig {
            magic: CONFIG_MAGIC,
            config: config.clone(),
        };
        let contents = toml::to_string_pretty(&stored)
            .map_err(|e| EmonBridgeError::Persistence(format!("failed to serialize config: {}", e)))?;
        fs::write(&self.path, contents).map_err(|e| {
            EmonBridgeError::Persistence(format!("failed to write {}: {}", self.path.display(), e))
        })
    }
}

/// Owns the live configuration and its persistence backend
pub struct ConfigStore {
    config: Config,
    persistence: Box<dyn ConfigPersistence>,
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ConfigStore {
    /// Load persisted configuration, falling back to compiled-in defaults
    ///
    /// A missing file, a marker mismatch, an unreadable/corrupt file or a
    /// stored configuration that fails validation all yield the defaults;
    /// none of them are fatal.
    pub fn open(persistence: Box<dyn ConfigPersistence>) -> Self {
        let config = match persistence.load() {
            Ok(Some(config)) => match config.validate() {
                Ok(()) => {
                    info!("Loaded persisted configuration");
                    config
                }
                Err(e) => {
                    warn!("Stored configuration is invalid ({}); using defaults", e);
                    Config::default()
                }
            },
            Ok(None) => {
                info!("No persisted configuration; using defaults");
                Config::default()
            }
            Err(e) => {
                warn!("Failed to load configuration ({}); using defaults", e);
                Config::default()
            }
        };

        Self { config, persistence }
    }

    /// The current configuration
    pub fn current(&self) -> &Config {
        &self.config
    }

    /// Apply a partial edit, persist, and report required side effects
    ///
    /// Validation failure leaves the configuration untouched. A save failure
    /// is logged but not returned: the in-memory configuration stays
    /// authoritative until the next successful save.
    ///
    /// # Errors
    ///
    /// Returns error if the edited configuration fails validation.
    pub fn apply(&mut self, update: ConfigUpdate) -> Result<ApplyOutcome> {
        let mut candidate = self.config.clone();
        if let Some(server_address) = update.server_address {
            candidate.server_address = server_address;
        }
        if let Some(prefix) = update.measurement_topic_prefix {
            candidate.measurement_topic_prefix = prefix;
        }
        if let Some(prefix) = update.status_topic_prefix {
            candidate.status_topic_prefix = prefix;
        }
        if let Some(service_name) = update.service_name {
            candidate.service_name = service_name;
        }
        candidate.validate()?;

        let outcome = ApplyOutcome {
            server_changed: candidate.server_address != self.config.server_address,
            service_name_changed: candidate.service_name != self.config.service_name,
        };
        self.config = candidate;

        if let Err(e) = self.persistence.save(&self.config) {
            warn!("Failed to persist configuration: {}; keeping in-memory value", e);
        }

        Ok(outcome)
    }
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// In-memory persistence for tests, with a failure switch
    #[derive(Clone, Default)]
    pub struct MemoryStore {
        pub stored: Arc<Mutex<Option<Config>>>,
        pub fail_save: Arc<Mutex<bool>>,
    }

    impl ConfigPersistence for MemoryStore {
        fn load(&self) -> Result<Option<Config>> {
            Ok(self.stored.lock().unwrap().clone())
        }

        fn save(&self, config: &Config) -> Result<()> {
            if *self.fail_save.lock().unwrap() {
                return Err(EmonBridgeError::Persistence("mock save failure".into()));
            }
            *self.stored.lock().unwrap() = Some(config.clone());
            Ok(())
        }
    }
}

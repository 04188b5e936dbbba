//! Driver-wide configuration.
//!
//! Loaded once (usually from TOML) and handed immutably to the driver; no
//! lifecycle code reads ambient or global state.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse TOML configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration to TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Credentials for one registry in the driver-wide table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry host, optionally with scheme and path (`https://index.docker.io/v1/`)
    pub registry: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_token: Option<String>,
}

/// Driver configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Daemon socket (`unix://...`); local Docker/Podman defaults when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_host: Option<String>,

    /// Classifier label value; labels are only attached when non-empty
    pub container_label_tag: String,

    /// Identity of this driver instance; a fresh UUID when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,

    /// Container hostname; the kernel hostname when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    /// Inode cap for /tmp tmpfs mounts, 0 for none
    pub max_tmpfs_inodes: u64,

    /// Force a read-only root filesystem (and a writable /tmp)
    pub enable_read_only_rootfs: bool,

    /// Pre-created container ids for the prefork pool
    pub prefork_pool: Vec<String>,

    /// Pre-created network names for the network pool
    pub networks: Vec<String>,

    /// Track image usage in the shared image cache
    pub image_cache: bool,

    /// Registry credential table
    pub registries: Vec<RegistryConfig>,
}

impl DriverConfig {
    /// Load configuration from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: DriverConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Convert configuration to a TOML string
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject configurations that would let two tasks share a lease.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(dup) = first_duplicate(&self.prefork_pool) {
            return Err(ConfigError::Invalid(format!(
                "prefork pool id '{}' listed twice",
                dup
            )));
        }
        if let Some(dup) = first_duplicate(&self.networks) {
            return Err(ConfigError::Invalid(format!(
                "network '{}' listed twice",
                dup
            )));
        }
        if let Some(empty) = self.registries.iter().position(|r| r.registry.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "registry entry {} has no registry host",
                empty
            )));
        }
        Ok(())
    }

    /// Instance id, or a newly generated one.
    pub fn resolve_instance_id(&self) -> String {
        self.instance_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }

    /// Hostname, or the kernel's.
    pub fn resolve_hostname(&self) -> String {
        self.hostname.clone().unwrap_or_else(kernel_hostname)
    }
}

fn first_duplicate(items: &[String]) -> Option<&str> {
    let mut seen = HashSet::new();
    items
        .iter()
        .find(|item| !seen.insert(item.as_str()))
        .map(String::as_str)
}

#[cfg(target_os = "linux")]
fn kernel_hostname() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(not(target_os = "linux"))]
fn kernel_hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

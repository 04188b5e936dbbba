//! Container creation spec.
//!
//! A runtime-neutral rendition of a "create container" request. The driver
//! builds the base spec with [`ContainerSpecBuilder`] and the resource
//! translator then fills in one fragment per task attribute.

use crate::container::{ContainerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Container logging driver settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSpec {
    /// Logging driver name ("none", "syslog", ...)
    pub driver: String,
    /// Driver options
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

/// Host-side settings: resource limits, mounts, isolation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSpec {
    pub memory: Option<i64>,
    pub memory_swap: Option<i64>,
    pub kernel_memory: Option<i64>,
    pub cpu_quota: Option<i64>,
    pub cpu_period: Option<i64>,
    pub storage_opt: Option<BTreeMap<String, String>>,
    pub tmpfs: Option<BTreeMap<String, String>>,
    pub binds: Option<Vec<String>>,
    pub cap_drop: Option<Vec<String>>,
    pub network_mode: Option<String>,
    pub log_config: Option<LogSpec>,
    pub readonly_rootfs: bool,
    pub init: bool,
}

/// Everything needed to create one container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSpec {
    /// Container name
    pub name: String,
    /// Image name
    pub image: String,
    pub cmd: Option<Vec<String>>,
    pub env: Option<Vec<String>>,
    pub working_dir: Option<String>,
    pub hostname: Option<String>,
    pub user: Option<String>,
    pub labels: Option<BTreeMap<String, String>>,
    /// Declared volume paths inside the container
    pub volumes: Option<BTreeSet<String>>,
    pub open_stdin: bool,
    pub stdin_once: bool,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    pub host: HostSpec,
}

impl ContainerSpec {
    /// Create a new spec builder.
    pub fn builder() -> ContainerSpecBuilder {
        ContainerSpecBuilder::new()
    }

    /// Append a host bind (`host:container[:mode]`).
    pub fn push_bind<S: Into<String>>(&mut self, bind: S) {
        self.host.binds.get_or_insert_with(Vec::new).push(bind.into());
    }

    /// Render the spec as pretty JSON for diagnostics.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ContainerError::ConfigError(format!("Failed to render spec: {}", e)))
    }
}

/// Builder for the base of a [`ContainerSpec`].
///
/// Only covers the fields the driver fixes before any task attribute is
/// translated.
#[derive(Debug, Default)]
pub struct ContainerSpecBuilder {
    name: Option<String>,
    image: Option<String>,
    network_mode: Option<String>,
    attach_stdio: bool,
    readonly_rootfs: bool,
    init: bool,
}

impl ContainerSpecBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the container name.
    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the container image.
    pub fn image<S: Into<String>>(mut self, image: S) -> Self {
        self.image = Some(image.into());
        self
    }

    /// Set network mode (e.g. "bridge", "none", "container:<id>").
    pub fn network_mode<S: Into<String>>(mut self, mode: S) -> Self {
        self.network_mode = Some(mode.into());
        self
    }

    /// Open stdin once and attach all three standard streams.
    pub fn attach_stdio(mut self, enable: bool) -> Self {
        self.attach_stdio = enable;
        self
    }

    /// Make root filesystem read-only.
    pub fn readonly_rootfs(mut self, enable: bool) -> Self {
        self.readonly_rootfs = enable;
        self
    }

    /// Run an init process as PID 1.
    pub fn init(mut self, enable: bool) -> Self {
        self.init = enable;
        self
    }

    /// Build the base spec.
    ///
    /// # Errors
    ///
    /// Returns error if the name or image is missing or empty.
    pub fn build(self) -> Result<ContainerSpec> {
        let image = self
            .image
            .filter(|image| !image.is_empty())
            .ok_or_else(|| ContainerError::ConfigError("Image is required".to_string()))?;
        let name = self
            .name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ContainerError::ConfigError("Container name is required".to_string()))?;

        Ok(ContainerSpec {
            name,
            image,
            open_stdin: self.attach_stdio,
            stdin_once: self.attach_stdio,
            attach_stdin: self.attach_stdio,
            attach_stdout: self.attach_stdio,
            attach_stderr: self.attach_stdio,
            host: HostSpec {
                network_mode: self.network_mode,
                readonly_rootfs: self.readonly_rootfs,
                init: self.init,
                ..Default::default()
            },
            ..Default::default()
        })
    }
}

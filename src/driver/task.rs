//! Task descriptors.
//!
//! [`ContainerTask`] is the read-only view of one function invocation that
//! the driver consumes. [`TaskSpec`] is a plain-data implementation, loadable
//! from TOML, used by the command-line front end and in tests.

use crate::container::RegistryAuth;
use crate::driver::auth::RegistryAuther;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// One `name=value` logging tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagPair {
    pub name: String,
    pub value: String,
}

impl TagPair {
    pub fn new<N: Into<String>, V: Into<String>>(name: N, value: V) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Where container output is shipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Syslog endpoint (`tcp://host:514`); empty disables logging
    pub url: String,
    pub tags: Vec<TagPair>,
}

/// A host directory mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMapping {
    pub host_dir: String,
    pub container_dir: String,
}

impl VolumeMapping {
    pub fn new<H: Into<String>, C: Into<String>>(host_dir: H, container_dir: C) -> Self {
        Self {
            host_dir: host_dir.into(),
            container_dir: container_dir.into(),
        }
    }
}

/// A function invocation, as seen by the driver.
///
/// Zero or empty values mean "not requested".
pub trait ContainerTask: Send + Sync {
    /// Unique call id; also the container name
    fn id(&self) -> &str;
    fn image(&self) -> &str;
    /// Whitespace-separated command line
    fn command(&self) -> &str;
    fn env_vars(&self) -> &BTreeMap<String, String>;
    /// Memory limit in bytes
    fn memory(&self) -> u64;
    /// CPU request in milli-CPUs (1000 = one core)
    fn cpus(&self) -> u64;
    /// Writable layer quota in MB
    fn fs_size(&self) -> u64;
    /// /tmp tmpfs size in MB
    fn tmpfs_size(&self) -> u64;
    fn volumes(&self) -> &[VolumeMapping];
    /// Host-side unix socket directory to bind in
    fn uds_host_path(&self) -> Option<&str>;
    /// Where the socket directory appears inside the container
    fn uds_container_path(&self) -> &str;
    fn logger_config(&self) -> &LoggerConfig;
    fn work_dir(&self) -> Option<&str>;

    /// Wall-clock limit for a run.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Per-task registry credentials, for tasks that can supply them.
    fn registry_auther(&self) -> Option<&dyn RegistryAuther> {
        None
    }
}

fn default_uds_container_path() -> String {
    "/tmp/iofs".to_string()
}

/// Plain-data task descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(default = "default_task_id")]
    pub id: String,
    pub image: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub memory: u64,
    #[serde(default)]
    pub cpus: u64,
    #[serde(default)]
    pub fs_size_mb: u64,
    #[serde(default)]
    pub tmpfs_size_mb: u64,
    #[serde(default)]
    pub volumes: Vec<VolumeMapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uds_host_path: Option<String>,
    #[serde(default = "default_uds_container_path")]
    pub uds_container_path: String,
    #[serde(default)]
    pub logger: LoggerConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_auth: Option<RegistryAuth>,
}

fn default_task_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl TaskSpec {
    /// A task running `image` with nothing else requested.
    pub fn new<I: Into<String>, S: Into<String>>(id: I, image: S) -> Self {
        Self {
            id: id.into(),
            image: image.into(),
            command: String::new(),
            env: BTreeMap::new(),
            memory: 0,
            cpus: 0,
            fs_size_mb: 0,
            tmpfs_size_mb: 0,
            volumes: Vec::new(),
            uds_host_path: None,
            uds_container_path: default_uds_container_path(),
            logger: LoggerConfig::default(),
            work_dir: None,
            timeout_secs: None,
            registry_auth: None,
        }
    }

    /// Load a task from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        use anyhow::Context;

        let content = std::fs::read_to_string(path).context("Failed to read task file")?;
        toml::from_str(&content).context("Failed to parse task file")
    }
}

impl ContainerTask for TaskSpec {
    fn id(&self) -> &str {
        &self.id
    }

    fn image(&self) -> &str {
        &self.image
    }

    fn command(&self) -> &str {
        &self.command
    }

    fn env_vars(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    fn memory(&self) -> u64 {
        self.memory
    }

    fn cpus(&self) -> u64 {
        self.cpus
    }

    fn fs_size(&self) -> u64 {
        self.fs_size_mb
    }

    fn tmpfs_size(&self) -> u64 {
        self.tmpfs_size_mb
    }

    fn volumes(&self) -> &[VolumeMapping] {
        &self.volumes
    }

    fn uds_host_path(&self) -> Option<&str> {
        self.uds_host_path.as_deref()
    }

    fn uds_container_path(&self) -> &str {
        &self.uds_container_path
    }

    fn logger_config(&self) -> &LoggerConfig {
        &self.logger
    }

    fn work_dir(&self) -> Option<&str> {
        self.work_dir.as_deref()
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    fn registry_auther(&self) -> Option<&dyn RegistryAuther> {
        self.registry_auth
            .as_ref()
            .map(|_| self as &dyn RegistryAuther)
    }
}

#[async_trait]
impl RegistryAuther for TaskSpec {
    async fn registry_auth(&self) -> anyhow::Result<Option<RegistryAuth>> {
        Ok(self.registry_auth.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_task_toml() {
        let task: TaskSpec = toml::from_str(
            r#"
id = "call-42"
image = "fnproject/hello:0.0.1"
command = "./func --fast"
memory = 134217728
cpus = 500
timeout_secs = 30

[env]
FN_FORMAT = "http-stream"

[[volumes]]
host_dir = "/srv/data"
container_dir = "/data"

[logger]
url = "tcp://logs:514"
tags = [{ name = "app", value = "demo" }]
"#,
        )
        .unwrap();

        assert_eq!(task.id(), "call-42");
        assert_eq!(task.memory(), 128 * 1024 * 1024);
        assert_eq!(task.cpus(), 500);
        assert_eq!(task.uds_container_path(), "/tmp/iofs");
        assert_eq!(task.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(task.env_vars()["FN_FORMAT"], "http-stream");
        assert_eq!(task.volumes()[0], VolumeMapping::new("/srv/data", "/data"));
        assert_eq!(task.logger_config().tags[0], TagPair::new("app", "demo"));
        assert!(task.registry_auther().is_none());
    }

    #[test]
    fn test_generated_id() {
        let task: TaskSpec = toml::from_str(r#"image = "alpine""#).unwrap();
        assert!(!task.id().is_empty());
    }

    #[tokio::test]
    async fn test_auther_capability() {
        let mut task = TaskSpec::new("call-1", "ghcr.io/org/app");
        task.registry_auth = Some(RegistryAuth {
            username: Some("bot".to_string()),
            ..Default::default()
        });

        let auther = task.registry_auther().expect("capability present");
        let auth = auther.registry_auth().await.unwrap().unwrap();
        assert_eq!(auth.username.as_deref(), Some("bot"));
    }
}

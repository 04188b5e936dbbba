//! Container driver and per-task lifecycle coordination.
//!
//! A [`DockerDriver`] owns the node-wide collaborators (runtime client,
//! prefork pool, network pool, image cache, credential table) and hands out
//! one [`Cookie`] per task attempt. The cookie drives the task through
//!
//! ```text
//! auth_image -> validate_image -> (pull_image) -> create_container -> run -> close
//! ```
//!
//! with `freeze`/`unfreeze` allowed between `create_container` and `close`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fn_agent::container::ContainerClient;
//! use fn_agent::driver::{DockerDriver, DriverConfig, TaskSpec};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = Arc::new(ContainerClient::new().await?);
//!     let driver = Arc::new(DockerDriver::new(DriverConfig::default(), client)?);
//!
//!     let task = Arc::new(TaskSpec::new("call-1", "alpine:latest"));
//!     let mut cookie = driver.create_cookie(task)?;
//!
//!     let outcome = match cookie.prepare().await {
//!         Ok(()) => cookie.run().await,
//!         Err(e) => Err(e),
//!     };
//!     cookie.close().await?;
//!     println!("{:?}", outcome?);
//!     Ok(())
//! }
//! ```

mod auth;
mod config;
mod cookie;
mod errors;
mod task;
pub mod translate;

pub use auth::{RegistryAuther, RegistryCredentials, normalize_registry};
pub use config::{ConfigError, DriverConfig, RegistryConfig};
pub use cookie::{Cookie, ImageStatus, Stage};
pub use errors::{
    BAD_GATEWAY, CookieError, SERVICE_UNAVAILABLE, UsageViolation, classify_create_error,
    classify_pull_error, registry_message,
};
pub use task::{ContainerTask, LoggerConfig, TagPair, TaskSpec, VolumeMapping};

use crate::container::{
    ContainerRuntime, ContainerSpec, ImageCache, MemoryImageCache, NetworkPool, PreforkPool,
    StaticNetworkPool, StaticPreforkPool,
};
use std::sync::Arc;
use tracing::info;
use translate::Translator;

/// Node-wide state shared by every cookie.
pub struct DockerDriver {
    config: DriverConfig,
    instance_id: String,
    hostname: String,
    credentials: RegistryCredentials,
    runtime: Arc<dyn ContainerRuntime>,
    pool: Option<Arc<dyn PreforkPool>>,
    network: Option<Arc<dyn NetworkPool>>,
    image_cache: Option<Arc<dyn ImageCache>>,
}

impl DockerDriver {
    /// Build a driver, creating in-memory pools and cache as configured.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid.
    pub fn new(config: DriverConfig, runtime: Arc<dyn ContainerRuntime>) -> Result<Self, ConfigError> {
        config.validate()?;

        let pool: Option<Arc<dyn PreforkPool>> = if config.prefork_pool.is_empty() {
            None
        } else {
            Some(Arc::new(StaticPreforkPool::new(config.prefork_pool.clone())))
        };
        let network: Option<Arc<dyn NetworkPool>> = if config.networks.is_empty() {
            None
        } else {
            Some(Arc::new(StaticNetworkPool::new(config.networks.clone())))
        };
        let image_cache: Option<Arc<dyn ImageCache>> = if config.image_cache {
            Some(Arc::new(MemoryImageCache::new()))
        } else {
            None
        };

        let driver = Self {
            instance_id: config.resolve_instance_id(),
            hostname: config.resolve_hostname(),
            credentials: RegistryCredentials::from_configs(&config.registries),
            config,
            runtime,
            pool,
            network,
            image_cache,
        };

        info!(
            "Container driver ready (instance {}, hostname {}, {} registries)",
            driver.instance_id,
            driver.hostname,
            driver.credentials.len()
        );
        Ok(driver)
    }

    /// Replace the prefork pool.
    pub fn with_prefork_pool(mut self, pool: Arc<dyn PreforkPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Replace the network pool.
    pub fn with_network_pool(mut self, network: Arc<dyn NetworkPool>) -> Self {
        self.network = Some(network);
        self
    }

    /// Replace the image cache.
    pub fn with_image_cache(mut self, cache: Arc<dyn ImageCache>) -> Self {
        self.image_cache = Some(cache);
        self
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Translation inputs derived from this driver's configuration.
    pub fn translator(&self) -> Translator<'_> {
        Translator {
            label_tag: &self.config.container_label_tag,
            instance_id: &self.instance_id,
            hostname: &self.hostname,
            max_tmpfs_inodes: self.config.max_tmpfs_inodes,
            read_only_rootfs: self.config.enable_read_only_rootfs,
        }
    }

    /// The base spec every task container starts from.
    pub fn base_spec(&self, task: &dyn ContainerTask) -> Result<ContainerSpec, CookieError> {
        base_spec(&self.config, task)
    }

    /// Start the lifecycle of one task attempt.
    ///
    /// Leases a prefork slot or a network when available and translates the
    /// task into the creation spec. Leases are held until the cookie closes.
    ///
    /// # Errors
    ///
    /// Returns error if the task has no id or image.
    pub fn create_cookie(self: &Arc<Self>, task: Arc<dyn ContainerTask>) -> Result<Cookie, CookieError> {
        Cookie::new(Arc::clone(self), task)
    }
}

fn base_spec(config: &DriverConfig, task: &dyn ContainerTask) -> Result<ContainerSpec, CookieError> {
    Ok(ContainerSpec::builder()
        .name(task.id())
        .image(task.image())
        .attach_stdio(true)
        .readonly_rootfs(config.enable_read_only_rootfs)
        .init(true)
        .build()?)
}

/// Translate `task` under `config` without a runtime or any leases.
pub fn preview_spec(config: &DriverConfig, task: &dyn ContainerTask) -> Result<ContainerSpec, CookieError> {
    let instance_id = config.resolve_instance_id();
    let hostname = config.resolve_hostname();
    let translator = Translator {
        label_tag: &config.container_label_tag,
        instance_id: &instance_id,
        hostname: &hostname,
        max_tmpfs_inodes: config.max_tmpfs_inodes,
        read_only_rootfs: config.enable_read_only_rootfs,
    };

    let mut spec = base_spec(config, task)?;
    translator.apply(&mut spec, task);
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_spec_without_runtime() {
        let config = DriverConfig {
            container_label_tag: "fn-test".to_string(),
            instance_id: Some("instance-7".to_string()),
            hostname: Some("node-b".to_string()),
            enable_read_only_rootfs: true,
            ..Default::default()
        };
        let mut task = TaskSpec::new("call-9", "alpine");
        task.memory = 64 * 1024 * 1024;

        let spec = preview_spec(&config, &task).unwrap();
        assert_eq!(spec.name, "call-9");
        assert!(spec.host.readonly_rootfs);
        assert!(spec.host.init);
        assert_eq!(spec.host.memory, Some(64 * 1024 * 1024));
        assert_eq!(spec.hostname.as_deref(), Some("node-b"));
        assert_eq!(spec.labels.unwrap()[translate::INSTANCE_LABEL], "instance-7");
        assert!(spec.host.network_mode.is_none());
    }

    #[test]
    fn test_preview_spec_rejects_empty_image() {
        let task = TaskSpec::new("call-9", "");
        assert!(preview_spec(&DriverConfig::default(), &task).is_err());
    }
}

//! Docker/Podman client wrapper.
//!
//! Implements [`ContainerRuntime`] on top of the bollard Docker API, with
//! connection fallback from the local Docker defaults to the Podman sockets.

use crate::container::{
    CachedImage, ContainerError, ContainerRuntime, ContainerSpec, RegistryAuth, Result, RunResult,
};
use async_trait::async_trait;
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::container::Config as BollardConfig;
use bollard::service::{HostConfig, HostConfigLogConfig};
use chrono::Utc;
use futures::stream::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Container client configuration.
#[derive(Debug, Clone)]
pub struct ContainerClientConfig {
    /// Explicit daemon socket (`unix://...`); local defaults when unset
    pub docker_host: Option<String>,
    /// Connection timeout in seconds
    pub timeout: u64,
}

impl Default for ContainerClientConfig {
    fn default() -> Self {
        Self {
            docker_host: None,
            timeout: 120,
        }
    }
}

/// Docker/Podman API client.
#[derive(Clone)]
pub struct ContainerClient {
    docker: Arc<Docker>,
}

impl ContainerClient {
    /// Connect with default configuration.
    ///
    /// Attempts Docker first, then falls back to Podman if available.
    ///
    /// # Errors
    ///
    /// Returns error if neither Docker nor Podman are reachable.
    pub async fn new() -> Result<Self> {
        Self::with_config(ContainerClientConfig::default()).await
    }

    /// Connect with custom configuration and verify the daemon answers.
    ///
    /// # Errors
    ///
    /// Returns error if connection to the container runtime fails.
    pub async fn with_config(config: ContainerClientConfig) -> Result<Self> {
        let docker = match &config.docker_host {
            Some(host) => Self::connect_to(host, config.timeout)?,
            None => Self::connect(config.timeout)?,
        };

        let client = Self {
            docker: Arc::new(docker),
        };
        client.ping().await?;

        Ok(client)
    }

    fn connect_to(host: &str, timeout: u64) -> Result<Docker> {
        if !host.starts_with("unix://") {
            return Err(ContainerError::ConfigError(format!(
                "Unsupported docker host '{}': only unix:// sockets are supported",
                host
            )));
        }
        debug!("Connecting to container runtime at {}", host);
        Docker::connect_with_socket(host, timeout, bollard::API_DEFAULT_VERSION)
            .map_err(|e| ContainerError::Transport(format!("Failed to connect to {}: {}", host, e)))
    }

    /// Tries local defaults, then the rootless and system Podman sockets.
    fn connect(timeout: u64) -> Result<Docker> {
        debug!("Attempting to connect to container runtime...");

        match Docker::connect_with_local_defaults() {
            Ok(docker) => {
                info!("Connected to container runtime via local defaults");
                return Ok(docker);
            }
            Err(e) => debug!("Local defaults failed: {}", e),
        }

        let mut sockets = Vec::new();
        if let Ok(home) = std::env::var("HOME") {
            sockets.push(format!("unix://{}/run/podman/podman.sock", home));
        }
        sockets.push("unix:///run/podman/podman.sock".to_string());

        for socket in sockets {
            debug!("Trying Podman socket: {}", socket);
            match Docker::connect_with_socket(&socket, timeout, bollard::API_DEFAULT_VERSION) {
                Ok(docker) => {
                    info!("Connected to Podman via {}", socket);
                    return Ok(docker);
                }
                Err(e) => debug!("Podman socket {} failed: {}", socket, e),
            }
        }

        Err(ContainerError::Transport(
            "Failed to connect to Docker or Podman. Please ensure Docker or Podman is installed and running.".to_string(),
        ))
    }

    /// Ping the container runtime to verify connectivity.
    ///
    /// # Errors
    ///
    /// Returns error if ping fails.
    pub async fn ping(&self) -> Result<()> {
        self.docker.ping().await.map_err(|e| {
            ContainerError::Transport(format!("Failed to ping container runtime: {}", e))
        })?;
        debug!("Container runtime ping successful");
        Ok(())
    }

    async fn wait_exit(&self, name: &str) -> Result<i64> {
        let mut stream = self.docker.wait_container(
            name,
            Some(bollard::container::WaitContainerOptions {
                condition: "not-running",
            }),
        );

        let mut exit_code = 0;
        while let Some(result) = stream.next().await {
            match result {
                Ok(response) => exit_code = response.status_code,
                // bollard reports non-zero exits as errors
                Err(bollard::errors::Error::DockerContainerWaitError { code, .. }) => {
                    exit_code = code
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(exit_code)
    }
}

/// Translate a [`ContainerSpec`] into the bollard create body.
pub(crate) fn bollard_config(spec: &ContainerSpec) -> BollardConfig<String> {
    let host = &spec.host;

    // Kernel memory limits are rejected by current daemons and stay on the spec only.
    let host_config = HostConfig {
        memory: host.memory,
        memory_swap: host.memory_swap,
        cpu_quota: host.cpu_quota,
        cpu_period: host.cpu_period,
        storage_opt: host.storage_opt.as_ref().map(to_hash_map),
        tmpfs: host.tmpfs.as_ref().map(to_hash_map),
        binds: host.binds.clone(),
        cap_drop: host.cap_drop.clone(),
        network_mode: host.network_mode.clone(),
        log_config: host.log_config.as_ref().map(|log| HostConfigLogConfig {
            typ: Some(log.driver.clone()),
            config: if log.options.is_empty() {
                None
            } else {
                Some(to_hash_map(&log.options))
            },
        }),
        readonly_rootfs: Some(host.readonly_rootfs),
        init: Some(host.init),
        ..Default::default()
    };

    BollardConfig {
        image: Some(spec.image.clone()),
        cmd: spec.cmd.clone(),
        env: spec.env.clone(),
        working_dir: spec.working_dir.clone(),
        hostname: spec.hostname.clone(),
        user: spec.user.clone(),
        labels: spec.labels.as_ref().map(to_hash_map),
        volumes: spec.volumes.as_ref().map(|volumes| {
            volumes
                .iter()
                .map(|path| (path.clone(), HashMap::new()))
                .collect()
        }),
        open_stdin: Some(spec.open_stdin),
        stdin_once: Some(spec.stdin_once),
        attach_stdin: Some(spec.attach_stdin),
        attach_stdout: Some(spec.attach_stdout),
        attach_stderr: Some(spec.attach_stderr),
        host_config: Some(host_config),
        ..Default::default()
    }
}

fn to_hash_map<'a, I>(pairs: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

// Create also answers 404 for a missing network or `container:<id>` target.
fn is_missing_image(err: &bollard::errors::Error) -> bool {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message,
        } => message.to_ascii_lowercase().contains("no such image"),
        _ => false,
    }
}

#[async_trait]
impl ContainerRuntime for ContainerClient {
    async fn inspect_image(&self, image: &str) -> Result<CachedImage> {
        match self.docker.inspect_image(image).await {
            Ok(inspect) => Ok(CachedImage {
                id: inspect.id.unwrap_or_default(),
                parent_id: inspect.parent.unwrap_or_default(),
                repo_tags: inspect.repo_tags.unwrap_or_default(),
                size: inspect.size.unwrap_or(0).max(0) as u64,
            }),
            Err(e) if is_not_found(&e) => Err(ContainerError::NoSuchImage(image.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn pull_image(&self, repository: &str, tag: &str, auth: &RegistryAuth) -> Result<()> {
        let credentials = DockerCredentials {
            username: auth.username.clone(),
            password: auth.password.clone(),
            email: auth.email.clone(),
            serveraddress: auth.server_address.clone(),
            identitytoken: auth.identity_token.clone(),
            ..Default::default()
        };

        let mut stream = self.docker.create_image(
            Some(bollard::image::CreateImageOptions {
                from_image: repository,
                tag,
                ..Default::default()
            }),
            None,
            Some(credentials),
        );

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!("Pull {}:{}: {}", repository, tag, status);
                    }
                    if let Some(error) = info.error {
                        return Err(ContainerError::Transport(error));
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!("Pulled image {}:{}", repository, tag);
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let options = bollard::container::CreateContainerOptions {
            name: spec.name.as_str(),
            ..Default::default()
        };

        match self
            .docker
            .create_container(Some(options), bollard_config(spec))
            .await
        {
            Ok(response) => {
                info!("Created container: {} ({})", spec.name, response.id);
                Ok(response.id)
            }
            Err(e) if is_missing_image(&e) => {
                Err(ContainerError::NoSuchImage(spec.image.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        debug!("Removing container: {}", name);

        let result = self
            .docker
            .remove_container(
                name,
                Some(bollard::container::RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await;

        match result {
            Ok(()) => {
                info!("Removed container: {}", name);
                Ok(())
            }
            Err(e) if is_not_found(&e) => {
                debug!("Container {} already gone", name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn pause_container(&self, name: &str) -> Result<()> {
        self.docker.pause_container(name).await?;
        Ok(())
    }

    async fn unpause_container(&self, name: &str) -> Result<()> {
        self.docker.unpause_container(name).await?;
        Ok(())
    }

    async fn run(&self, name: &str, timeout: Option<Duration>) -> Result<RunResult> {
        self.docker
            .start_container(
                name,
                None::<bollard::container::StartContainerOptions<String>>,
            )
            .await?;
        let started_at = Utc::now();
        debug!("Started container: {}", name);

        let Some(limit) = timeout else {
            let exit_code = self.wait_exit(name).await?;
            return Ok(RunResult::exited(exit_code, started_at));
        };

        match tokio::time::timeout(limit, self.wait_exit(name)).await {
            Ok(exit_code) => Ok(RunResult::exited(exit_code?, started_at)),
            Err(_) => {
                warn!("Container {} exceeded {:?}, killing", name, limit);
                if let Err(e) = self
                    .docker
                    .kill_container(
                        name,
                        None::<bollard::container::KillContainerOptions<String>>,
                    )
                    .await
                {
                    warn!("Failed to kill container {}: {}", name, e);
                }
                Ok(RunResult::timed_out(started_at))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::LogSpec;
    use std::collections::BTreeMap;

    fn sample_spec() -> ContainerSpec {
        let mut spec = ContainerSpec::builder()
            .name("call-1")
            .image("alpine:3.19")
            .attach_stdio(true)
            .init(true)
            .build()
            .unwrap();
        spec.host.memory = Some(128 * 1024 * 1024);
        spec.host.kernel_memory = Some(128 * 1024 * 1024);
        spec.host.tmpfs = Some(BTreeMap::from([("/tmp".to_string(), String::new())]));
        spec.host.log_config = Some(LogSpec {
            driver: "none".to_string(),
            options: BTreeMap::new(),
        });
        spec.volumes = Some(["/data".to_string()].into_iter().collect());
        spec
    }

    #[test]
    fn test_bollard_config_mapping() {
        let config = bollard_config(&sample_spec());

        assert_eq!(config.image.as_deref(), Some("alpine:3.19"));
        assert_eq!(config.attach_stdout, Some(true));
        assert!(config.volumes.unwrap().contains_key("/data"));

        let host = config.host_config.unwrap();
        assert_eq!(host.memory, Some(128 * 1024 * 1024));
        assert_eq!(host.init, Some(true));
        assert_eq!(host.tmpfs.unwrap().get("/tmp").map(String::as_str), Some(""));

        let log = host.log_config.unwrap();
        assert_eq!(log.typ.as_deref(), Some("none"));
        assert!(log.config.is_none());
    }

    #[test]
    fn test_only_missing_image_404_is_no_such_image() {
        let missing_image = bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "No such image: alpine:latest".to_string(),
        };
        assert!(is_missing_image(&missing_image));

        let missing_slot = bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "No such container: pf-1".to_string(),
        };
        assert!(!is_missing_image(&missing_slot));
        assert!(matches!(
            ContainerError::from(missing_slot),
            ContainerError::Status { status: 404, .. }
        ));

        let missing_network = bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "network fn-net not found".to_string(),
        };
        assert!(!is_missing_image(&missing_network));

        let conflict = bollard::errors::Error::DockerResponseServerError {
            status_code: 409,
            message: "No such image in conflict text".to_string(),
        };
        assert!(!is_missing_image(&conflict));
    }

    #[tokio::test]
    #[ignore] // Requires Docker/Podman to be running
    async fn test_client_connection() {
        let client = ContainerClient::new().await.unwrap();
        client.ping().await.unwrap();
    }

    #[tokio::test]
    #[ignore]
    async fn test_inspect_missing_image() {
        let client = ContainerClient::new().await.unwrap();
        let result = client.inspect_image("fn-agent/does-not-exist:never").await;
        assert!(matches!(result, Err(ContainerError::NoSuchImage(_))));
    }
}

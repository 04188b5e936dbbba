//! The contract between the lifecycle coordinator and a container runtime.

use crate::container::{CachedImage, ContainerSpec, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Registry credentials handed to the runtime when pulling.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryAuth {
    pub username: Option<String>,
    pub password: Option<String>,
    pub email: Option<String>,
    pub server_address: Option<String>,
    pub identity_token: Option<String>,
}

impl RegistryAuth {
    /// Credentials with no secrets, addressed at `server`.
    pub fn anonymous<S: Into<String>>(server: S) -> Self {
        Self {
            server_address: Some(server.into()),
            ..Default::default()
        }
    }

    /// Whether any secret material is present.
    pub fn is_anonymous(&self) -> bool {
        self.username.is_none() && self.password.is_none() && self.identity_token.is_none()
    }
}

impl fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("email", &self.email)
            .field("server_address", &self.server_address)
            .field(
                "identity_token",
                &self.identity_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// How a container run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Exited with code 0
    Success,
    /// Exited with a non-zero code
    Error,
    /// Killed after exceeding the task timeout
    Timeout,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Success => write!(f, "success"),
            RunStatus::Error => write!(f, "error"),
            RunStatus::Timeout => write!(f, "timeout"),
        }
    }
}

/// Outcome of running a created container to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub status: RunStatus,
    pub exit_code: i64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    /// Classify an exit code observed between `started_at` and now.
    pub fn exited(exit_code: i64, started_at: DateTime<Utc>) -> Self {
        let status = if exit_code == 0 {
            RunStatus::Success
        } else {
            RunStatus::Error
        };

        Self {
            status,
            exit_code,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// A run that was killed for exceeding its deadline.
    pub fn timed_out(started_at: DateTime<Utc>) -> Self {
        Self {
            status: RunStatus::Timeout,
            exit_code: -1,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Operations the lifecycle coordinator issues against a container runtime.
///
/// Missing images are always reported as
/// [`ContainerError::NoSuchImage`](crate::container::ContainerError::NoSuchImage)
/// so callers can tell them apart from other failures. Every call may be
/// cancelled by dropping its future.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Look an image up by name or id.
    async fn inspect_image(&self, image: &str) -> Result<CachedImage>;

    /// Pull `repository:tag` from its registry.
    async fn pull_image(&self, repository: &str, tag: &str, auth: &RegistryAuth) -> Result<()>;

    /// Create (but do not start) a container, returning its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    /// Force-remove a container and its anonymous volumes.
    async fn remove_container(&self, name: &str) -> Result<()>;

    async fn pause_container(&self, name: &str) -> Result<()>;

    async fn unpause_container(&self, name: &str) -> Result<()>;

    /// Start a created container and wait for it to stop.
    async fn run(&self, name: &str, timeout: Option<Duration>) -> Result<RunResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_secrets() {
        let auth = RegistryAuth {
            username: Some("deploy".to_string()),
            password: Some("hunter2".to_string()),
            identity_token: Some("tok".to_string()),
            ..Default::default()
        };

        let rendered = format!("{:?}", auth);
        assert!(rendered.contains("deploy"));
        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("\"tok\""));
    }

    #[test]
    fn test_exit_code_classification() {
        let started = Utc::now();
        assert_eq!(RunResult::exited(0, started).status, RunStatus::Success);
        assert_eq!(RunResult::exited(137, started).status, RunStatus::Error);
        assert_eq!(RunResult::timed_out(started).exit_code, -1);
    }

    #[test]
    fn test_anonymous_auth() {
        let auth = RegistryAuth::anonymous("quay.io");
        assert!(auth.is_anonymous());
        assert_eq!(auth.server_address.as_deref(), Some("quay.io"));
    }
}

//! # fn-agent
//!
//! Container driver for a function-execution agent. Each function invocation
//! runs in its own isolated, resource-limited container whose lifecycle is
//! coordinated by a per-task [`driver::Cookie`].
//!
//! ## Architecture Overview
//!
//! - **[`container`]**: Runtime-neutral container spec, the [`container::ContainerRuntime`]
//!   seam and its Docker/Podman client, image references and cache accounting,
//!   prefork and network pools
//! - **[`driver`]**: Task descriptors, resource translation, registry credentials,
//!   error classification and the lifecycle coordinator
//! - **[`cli`]**: Argument parsing for the `fn-agent` binary
//!
//! ## Quick Start
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
//!     let mut task = TaskSpec::new("call-1", "fnproject/hello");
//!     task.memory = 128 * 1024 * 1024;
//!     task.cpus = 500;
//!
//!     let mut cookie = driver.create_cookie(Arc::new(task))?;
//!     cookie.prepare().await?;
//!     let result = cookie.run().await;
//!     cookie.close().await?;
//!     println!("exit code {}", result?.exit_code);
//!     Ok(())
//! }
//! ```

/// Container runtime abstraction and supporting resources.
///
/// Holds the creation spec the driver fills in, the runtime trait with its
/// bollard-backed implementation, and the pools a task can lease from.
pub mod container;

/// Per-task container lifecycle coordination.
pub mod driver;

// CLI module for command-line interface
pub mod cli;

pub use container::{ContainerError, ContainerRuntime, ContainerSpec, RunResult, RunStatus};
pub use driver::{Cookie, CookieError, DockerDriver, DriverConfig, TaskSpec};

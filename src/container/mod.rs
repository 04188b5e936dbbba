//! Container runtime boundary.
//!
//! Everything the lifecycle coordinator needs from the outside world lives
//! here, behind small traits so that the coordinator never depends on a
//! particular runtime or pool implementation.
//!
//! ## Components
//!
//! - `runtime`: the [`ContainerRuntime`] trait and the values crossing it
//! - `client`: bollard-backed Docker/Podman implementation of the runtime
//! - `config`: the runtime-neutral container creation spec and its builder
//! - `image`: image reference parsing and the shared image reference cache
//! - `pool`: prefork pool leases
//! - `network`: network pool leases
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fn_agent::container::{ContainerClient, ContainerRuntime};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = ContainerClient::new().await?;
//!     let image = client.inspect_image("alpine:latest").await?;
//!     println!("{} ({} bytes)", image.id, image.size);
//!     Ok(())
//! }
//! ```

#[cfg(feature = "containers")]
mod client;
mod config;
mod image;
mod network;
mod pool;
mod runtime;

#[cfg(feature = "containers")]
pub use client::{ContainerClient, ContainerClientConfig};
pub use config::{ContainerSpec, ContainerSpecBuilder, HostSpec, LogSpec};
pub use image::{CachedImage, ImageCache, ImageRef, MemoryImageCache};
pub use network::{NetworkLease, NetworkPool, StaticNetworkPool};
pub use pool::{PoolError, PoolLease, PreforkPool, StaticPreforkPool};
pub use runtime::{ContainerRuntime, RegistryAuth, RunResult, RunStatus};

/// Container runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// The runtime does not know the requested image
    #[error("No such image: {0}")]
    NoSuchImage(String),

    /// The daemon or registry answered with an HTTP status; `message` is the raw body
    #[error("API error ({status}): {message}")]
    Status { status: u16, message: String },

    /// Connection, stream or decoding failure with no status attached
    #[error("Transport error: {0}")]
    Transport(String),

    /// Container configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

#[cfg(feature = "containers")]
impl From<bollard::errors::Error> for ContainerError {
    fn from(err: bollard::errors::Error) -> Self {
        match err {
            bollard::errors::Error::DockerResponseServerError {
                status_code,
                message,
            } => ContainerError::Status {
                status: status_code,
                message,
            },
            other => ContainerError::Transport(other.to_string()),
        }
    }
}

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, ContainerError>;

#[cfg(all(test, feature = "containers"))]
mod tests {
    use super::*;

    #[test]
    fn test_status_errors_keep_code_and_body() {
        let err = ContainerError::from(bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: r#"{"message":"image not found"}"#.to_string(),
        });

        match err {
            ContainerError::Status { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, r#"{"message":"image not found"}"#);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

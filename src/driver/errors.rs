//! Lifecycle errors and the classification of runtime failures.
//!
//! Callers see four kinds of outcome besides success: a misuse of the
//! lifecycle ordering, a permanent client error carrying the registry's 4xx
//! status, a "server busy" signal meaning another placement will likely
//! succeed, and everything else passed through from the runtime.

use crate::container::ContainerError;
use serde::Deserialize;
use std::fmt;

/// HTTP-equivalent code for unclassified upstream failures.
pub const BAD_GATEWAY: u16 = 502;
/// HTTP-equivalent code for retry-elsewhere outcomes.
pub const SERVICE_UNAVAILABLE: u16 = 503;
/// HTTP-equivalent code for everything surfaced unclassified.
pub const INTERNAL_SERVER_ERROR: u16 = 500;

/// A lifecycle operation was invoked out of order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageViolation {
    /// Validate or pull before `auth_image`
    NotAuthenticated,
    /// Create before the image was resolved
    ImageNotValidated,
    /// Run, freeze or unfreeze before `create_container`
    ContainerNotCreated,
    /// Any stage after `close`
    Closed,
}

impl fmt::Display for UsageViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self {
            UsageViolation::NotAuthenticated => "image not authenticated",
            UsageViolation::ImageNotValidated => "image not validated",
            UsageViolation::ContainerNotCreated => "container not created",
            UsageViolation::Closed => "cookie already closed",
        };
        write!(f, "invalid usage: {}", what)
    }
}

/// Errors returned by lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum CookieError {
    /// Caller bug: stages invoked out of order
    #[error("{0}")]
    Usage(UsageViolation),

    /// Classified pull failure; 4xx codes are the registry's own
    #[error("{message}")]
    Api { code: u16, message: String },

    /// The image vanished between resolution and use; retry on another placement
    #[error("Timed out - server too busy")]
    ServerBusy,

    /// The task's own credential supplier failed
    #[error("Registry authentication failed: {0}")]
    Auth(anyhow::Error),

    /// Runtime failure passed through unchanged
    #[error(transparent)]
    Container(#[from] ContainerError),
}

impl From<UsageViolation> for CookieError {
    fn from(violation: UsageViolation) -> Self {
        CookieError::Usage(violation)
    }
}

impl CookieError {
    /// HTTP-equivalent status for reporting to the caller.
    pub fn status_code(&self) -> u16 {
        match self {
            CookieError::Api { code, .. } => *code,
            CookieError::ServerBusy => SERVICE_UNAVAILABLE,
            CookieError::Usage(_) | CookieError::Auth(_) | CookieError::Container(_) => {
                INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Retrying the same request unchanged cannot succeed.
    pub fn is_permanent(&self) -> bool {
        match self {
            CookieError::Usage(_) => true,
            CookieError::Api { code, .. } => (400..500).contains(code),
            _ => false,
        }
    }

    /// Another placement is likely to succeed.
    pub fn retry_elsewhere(&self) -> bool {
        matches!(self, CookieError::ServerBusy)
    }
}

/// Map a pull failure to a client-facing error.
///
/// Registry 4xx statuses pass through unchanged; every other failure becomes
/// a bad gateway.
pub fn classify_pull_error(image: &str, err: ContainerError) -> CookieError {
    let (code, msg) = match err {
        ContainerError::Status { status, message } => {
            let code = if (400..500).contains(&status) {
                status
            } else {
                BAD_GATEWAY
            };
            (code, registry_message(&message))
        }
        other => (BAD_GATEWAY, other.to_string()),
    };

    CookieError::Api {
        code,
        message: format!("Failed to pull image '{}': {}", image, msg),
    }
}

/// A missing image at create time means it was evicted after resolution.
pub fn classify_create_error(err: ContainerError) -> CookieError {
    match err {
        ContainerError::NoSuchImage(_) => CookieError::ServerBusy,
        other => CookieError::Container(other),
    }
}

/// Extract `message` from a JSON error body, falling back to the raw body.
pub fn registry_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.message,
        Err(_) => body.to_string(),
    }
}

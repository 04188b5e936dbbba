//! Registry credential resolution.

use crate::container::RegistryAuth;
use crate::driver::config::RegistryConfig;
use async_trait::async_trait;
use std::collections::HashMap;

const DOCKER_HUB_ALIASES: [&str; 3] = ["docker.io", "index.docker.io", "registry-1.docker.io"];

/// Optional task capability: supply registry credentials per task.
///
/// A `Some` result overrides the driver-wide credential for the image's
/// registry; `None` keeps it.
#[async_trait]
pub trait RegistryAuther: Send + Sync {
    async fn registry_auth(&self) -> anyhow::Result<Option<RegistryAuth>>;
}

/// Driver-wide credential table keyed by normalized registry host.
#[derive(Debug, Clone, Default)]
pub struct RegistryCredentials {
    entries: HashMap<String, RegistryAuth>,
}

impl RegistryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_configs(configs: &[RegistryConfig]) -> Self {
        let mut table = Self::new();
        for config in configs {
            table.insert(
                &config.registry,
                RegistryAuth {
                    username: config.username.clone(),
                    password: config.password.clone(),
                    email: config.email.clone(),
                    server_address: Some(config.registry.clone()),
                    identity_token: config.identity_token.clone(),
                },
            );
        }
        table
    }

    /// Register credentials for `registry` (any of `host`, `host:port`, `https://host/v1/`).
    pub fn insert(&mut self, registry: &str, auth: RegistryAuth) {
        self.entries.insert(normalize_registry(registry), auth);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Base credential for an image registry; anonymous when nothing matches.
    ///
    /// An empty registry means Docker Hub, and every Hub alias matches every
    /// other.
    pub fn lookup(&self, registry: &str) -> RegistryAuth {
        let host = normalize_registry(registry);

        if let Some(auth) = self.entries.get(&host) {
            return auth.clone();
        }

        if host.is_empty() || DOCKER_HUB_ALIASES.contains(&host.as_str()) {
            if let Some(auth) = DOCKER_HUB_ALIASES
                .iter()
                .find_map(|alias| self.entries.get(*alias))
            {
                return auth.clone();
            }
        }

        RegistryAuth::anonymous(host)
    }
}

/// Strip scheme and path: `https://Index.Docker.io/v1/` -> `index.docker.io`.
pub fn normalize_registry(registry: &str) -> String {
    let trimmed = registry.trim();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let host = without_scheme
        .split_once('/')
        .map(|(host, _)| host)
        .unwrap_or(without_scheme);
    host.to_ascii_lowercase()
}

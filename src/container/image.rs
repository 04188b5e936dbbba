//! Image references and the shared image reference cache.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const DEFAULT_TAG: &str = "latest";

/// An image reference split into registry, repository and tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Registry host (empty for the default registry)
    pub registry: String,
    /// Repository path within the registry
    pub repository: String,
    /// Tag or digest, `latest` when omitted
    pub tag: String,
}

impl ImageRef {
    /// Parse `[registry/]repo[:tag|@digest]`.
    ///
    /// The first path component is only a registry when it looks like a host:
    /// it contains `.` or `:`, or is `localhost`.
    pub fn parse(image: &str) -> Self {
        let (name, tag) = match image.split_once('@') {
            Some((name, digest)) => (strip_tag(name).0, digest.to_string()),
            None => {
                let (name, tag) = strip_tag(image);
                (name, tag.unwrap_or(DEFAULT_TAG).to_string())
            }
        };

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_string(), rest.to_string())
            }
            _ => (String::new(), name.to_string()),
        };

        Self {
            registry,
            repository,
            tag,
        }
    }

    /// Repository argument for a pull: `registry/repo`, or `repo` alone.
    pub fn pull_repository(&self) -> String {
        if self.registry.is_empty() {
            self.repository.clone()
        } else {
            format!("{}/{}", self.registry, self.repository)
        }
    }
}

// A colon only separates a tag when no '/' follows it; "localhost:5000/app" has no tag.
fn strip_tag(name: &str) -> (&str, Option<&str>) {
    match name.rfind(':') {
        Some(idx) if !name[idx..].contains('/') => (&name[..idx], Some(&name[idx + 1..])),
        _ => (name, None),
    }
}

/// A locally present image as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedImage {
    /// Runtime-assigned image ID
    pub id: String,
    /// Parent image ID
    pub parent_id: String,
    /// repo:tag aliases
    pub repo_tags: Vec<String>,
    /// Size in bytes
    pub size: u64,
}

/// Shared registry of images in use.
///
/// Implementations must tolerate concurrent, interleaved marks for the same
/// image from many tasks.
pub trait ImageCache: Send + Sync {
    /// Record that a task started using `image`.
    fn mark_busy(&self, image: &CachedImage);

    /// Record that a task stopped using `image`.
    fn mark_free(&self, image: &CachedImage);
}

#[derive(Debug, Clone)]
struct CacheEntry {
    image: CachedImage,
    refs: u64,
    last_used: DateTime<Utc>,
}

/// In-memory reference-counting [`ImageCache`].
///
/// Entries are never evicted here; [`idle_images`](Self::idle_images) lists
/// the candidates an eviction policy may act on.
#[derive(Debug, Default)]
pub struct MemoryImageCache {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current reference count of an image id.
    pub fn references(&self, image_id: &str) -> u64 {
        self.entries.get(image_id).map(|e| e.refs).unwrap_or(0)
    }

    pub fn is_busy(&self, image_id: &str) -> bool {
        self.references(image_id) > 0
    }

    /// Known images with no references, least recently used first.
    pub fn idle_images(&self) -> Vec<CachedImage> {
        let mut idle: Vec<(DateTime<Utc>, CachedImage)> = self
            .entries
            .iter()
            .filter(|e| e.refs == 0)
            .map(|e| (e.last_used, e.image.clone()))
            .collect();
        idle.sort_by_key(|(last_used, _)| *last_used);
        idle.into_iter().map(|(_, image)| image).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ImageCache for MemoryImageCache {
    fn mark_busy(&self, image: &CachedImage) {
        let mut entry = self
            .entries
            .entry(image.id.clone())
            .or_insert_with(|| CacheEntry {
                image: image.clone(),
                refs: 0,
                last_used: Utc::now(),
            });
        entry.refs += 1;
        entry.last_used = Utc::now();
        // Tags may have been added since the entry was first seen.
        entry.image.repo_tags = image.repo_tags.clone();
        debug!("Image {} busy ({} refs)", image.id, entry.refs);
    }

    fn mark_free(&self, image: &CachedImage) {
        match self.entries.get_mut(&image.id) {
            Some(mut entry) => {
                entry.refs = entry.refs.saturating_sub(1);
                entry.last_used = Utc::now();
                debug!("Image {} free ({} refs)", image.id, entry.refs);
            }
            None => warn!("Freeing unknown image {}", image.id),
        }
    }
}

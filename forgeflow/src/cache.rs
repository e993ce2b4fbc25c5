//! Content-addressable artifact cache.
//!
//! Keyed by the canonical spec hash, so a resubmitted spec within the TTL
//! reuses the previously produced artifacts instead of rebuilding. Eviction
//! is lazy: expired entries are treated as absent and dropped on read.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Reference to a produced build artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRef {
    /// Kind of artifact, e.g. "iso" or "docker-image".
    pub file_type: String,
    /// File name as produced.
    pub file_name: String,
    /// Where the artifact can be fetched from.
    pub url: String,
}

impl ArtifactRef {
    /// Creates a new artifact reference.
    #[must_use]
    pub fn new(
        file_type: impl Into<String>,
        file_name: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            file_type: file_type.into(),
            file_name: file_name.into(),
            url: url.into(),
        }
    }
}

/// A cached set of artifacts with its expiry window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The artifacts produced for this spec hash.
    pub artifacts: Vec<ArtifactRef>,
    /// When the entry was stored.
    pub created_at: DateTime<Utc>,
    /// Time-to-live. A hit is honored only while `now < created_at + ttl`.
    pub ttl: Duration,
}

impl CacheEntry {
    /// Creates an entry stamped now.
    #[must_use]
    pub fn new(artifacts: Vec<ArtifactRef>, ttl: Duration) -> Self {
        Self {
            artifacts,
            created_at: Utc::now(),
            ttl,
        }
    }

    /// Returns true if the entry has outlived its TTL.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        let age = Utc::now().signed_duration_since(self.created_at);
        age.to_std().map_or(true, |elapsed| elapsed >= self.ttl)
    }
}

/// Storage backend for the artifact cache.
///
/// In-process for tests; a distributed key-value store in production.
#[async_trait]
pub trait ArtifactCache: Send + Sync {
    /// Looks up artifacts by spec hash. Expired entries read as absent.
    async fn lookup(&self, spec_hash: &str) -> Option<Vec<ArtifactRef>>;

    /// Stores artifacts under a spec hash with the given TTL.
    async fn store(&self, spec_hash: &str, artifacts: Vec<ArtifactRef>, ttl: Duration);
}

/// In-memory artifact cache.
#[derive(Debug, Default)]
pub struct InMemoryArtifactCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl InMemoryArtifactCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, including any not yet lazily evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl ArtifactCache for InMemoryArtifactCache {
    async fn lookup(&self, spec_hash: &str) -> Option<Vec<ArtifactRef>> {
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get(spec_hash) {
            if entry.is_expired() {
                entries.remove(spec_hash);
                return None;
            }
            return Some(entry.artifacts.clone());
        }

        None
    }

    async fn store(&self, spec_hash: &str, artifacts: Vec<ArtifactRef>, ttl: Duration) {
        let entry = CacheEntry::new(artifacts, ttl);
        self.entries.lock().insert(spec_hash.to_string(), entry);
    }
}

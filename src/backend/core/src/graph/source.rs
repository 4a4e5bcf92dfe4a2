//! The artifact source: who wrote an artifact and what it depends on.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::{CascadeError, Result};
use crate::types::ArtifactId;

/// What the source knows about one artifact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<ArtifactId>,
}

/// External collaborator answering per-artifact lookups.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Immediate (depth-1) dependencies declared by the artifact.
    async fn immediate_dependencies(&self, artifact: &ArtifactId) -> Result<Vec<ArtifactId>>;

    /// The artifact's author, if the source knows it.
    async fn author_of(&self, artifact: &ArtifactId) -> Result<Option<String>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// HTTP Source
// ═══════════════════════════════════════════════════════════════════════════════

/// Reads `GET {base}/artifacts/{origin}/{local_id}`.
///
/// A 404 means the source has nothing on the artifact: no author and no
/// dependencies.
pub struct HttpArtifactSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpArtifactSource {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self::with_client(base_url, client))
    }

    /// Set custom HTTP client.
    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn fetch(&self, artifact: &ArtifactId) -> Result<Option<ArtifactRecord>> {
        let url = format!(
            "{}/artifacts/{}/{}",
            self.base_url, artifact.origin, artifact.local_id
        );
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(CascadeError::upstream_unavailable(
                artifact.to_string(),
                format!("GET {} returned {}", url, status),
            ));
        }

        let record = response.json::<ArtifactRecord>().await.map_err(|e| {
            CascadeError::upstream_unavailable(
                artifact.to_string(),
                format!("malformed artifact record: {}", e),
            )
        })?;
        Ok(Some(record))
    }
}

#[async_trait]
impl ArtifactSource for HttpArtifactSource {
    async fn immediate_dependencies(&self, artifact: &ArtifactId) -> Result<Vec<ArtifactId>> {
        Ok(self
            .fetch(artifact)
            .await?
            .map(|record| record.dependencies)
            .unwrap_or_default())
    }

    async fn author_of(&self, artifact: &ArtifactId) -> Result<Option<String>> {
        Ok(self.fetch(artifact).await?.and_then(|record| record.author))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Static Source
// ═══════════════════════════════════════════════════════════════════════════════

/// One line of a catalog file.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    pub origin: String,
    pub local_id: u64,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<ArtifactId>,
}

/// In-memory source for replays and tests.
///
/// Artifacts can be marked failing to simulate an unreachable source.
#[derive(Default)]
pub struct StaticArtifactSource {
    records: RwLock<HashMap<ArtifactId, ArtifactRecord>>,
    failing: RwLock<HashSet<ArtifactId>>,
    lookups: AtomicU64,
}

impl StaticArtifactSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON array of [`CatalogEntry`].
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let entries: Vec<CatalogEntry> = serde_json::from_str(&text)?;
        let source = Self::new();
        for entry in entries {
            let artifact = ArtifactId::new(entry.origin, entry.local_id);
            source.records.write().insert(
                artifact,
                ArtifactRecord {
                    author: entry.author,
                    dependencies: entry.dependencies,
                },
            );
        }
        Ok(source)
    }

    /// Declare an artifact with its author and immediate dependencies.
    pub fn insert(&self, artifact: ArtifactId, author: Option<&str>, dependencies: Vec<ArtifactId>) {
        self.records.write().insert(
            artifact,
            ArtifactRecord {
                author: author.map(str::to_string),
                dependencies,
            },
        );
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with_artifact(
        self,
        artifact: ArtifactId,
        author: Option<&str>,
        dependencies: Vec<ArtifactId>,
    ) -> Self {
        self.insert(artifact, author, dependencies);
        self
    }

    pub fn set_failing(&self, artifact: ArtifactId, failing: bool) {
        let mut set = self.failing.write();
        if failing {
            set.insert(artifact);
        } else {
            set.remove(&artifact);
        }
    }

    /// Number of lookups served, including failed ones.
    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn lookup(&self, artifact: &ArtifactId) -> Result<Option<ArtifactRecord>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        if self.failing.read().contains(artifact) {
            return Err(CascadeError::upstream_unavailable(
                artifact.to_string(),
                "artifact marked failing",
            ));
        }
        Ok(self.records.read().get(artifact).cloned())
    }
}

#[async_trait]
impl ArtifactSource for StaticArtifactSource {
    async fn immediate_dependencies(&self, artifact: &ArtifactId) -> Result<Vec<ArtifactId>> {
        Ok(self
            .lookup(artifact)?
            .map(|record| record.dependencies)
            .unwrap_or_default())
    }

    async fn author_of(&self, artifact: &ArtifactId) -> Result<Option<String>> {
        Ok(self.lookup(artifact)?.and_then(|record| record.author))
    }
}

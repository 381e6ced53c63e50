use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// How long an artifact stays valid after `put` or `refresh`.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Cadence of the background expiry sweep (at most TTL / 5).
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Largest payload accepted by the cache, matching the upload cap.
pub const MAX_ARTIFACT_BYTES: usize = 100 * 1024 * 1024;

/// Namespaces that partition the on-disk layout. Advisory only: a handle
/// alone is enough to locate content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactType {
    Source,
    Binary,
    Input,
    Output,
    Checker,
}

impl ArtifactType {
    pub const ALL: [ArtifactType; 5] = [
        Self::Source,
        Self::Binary,
        Self::Input,
        Self::Output,
        Self::Checker,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Binary => "binary",
            Self::Input => "input",
            Self::Output => "output",
            Self::Checker => "checker",
        }
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source" => Ok(Self::Source),
            "binary" => Ok(Self::Binary),
            "input" => Ok(Self::Input),
            "output" => Ok(Self::Output),
            "checker" => Ok(Self::Checker),
            _ => Err(()),
        }
    }
}

struct CacheEntry {
    artifact_type: ArtifactType,
    file_name: String,
    size: u64,
    created_at: DateTime<Utc>,
    expires_at: Instant,
}

/// Snapshot of a live cache entry handed to callers.
#[derive(Debug, Clone)]
pub struct CachedArtifact {
    pub id: Uuid,
    pub path: PathBuf,
    pub artifact_type: ArtifactType,
    pub file_name: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: Instant,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub count: usize,
    pub total_bytes: u64,
}

/// TTL-bound content store keyed by opaque handles.
///
/// Files live under `<root>/<type>/<handle>`; the in-memory index is the
/// source of truth for liveness. Files are written before the index entry
/// becomes visible and removed after the entry is erased, so a visible
/// handle always has its bytes on disk (barring external tampering, which
/// `get` self-heals).
pub struct ArtifactCache {
    root: PathBuf,
    ttl: Duration,
    index: Mutex<HashMap<Uuid, CacheEntry>>,
}

impl ArtifactCache {
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        Self::with_ttl(root, DEFAULT_TTL)
    }

    /// Creates the cache, its per-type subdirectories, and probes that the
    /// root is writable. A failure here is fatal for the process.
    pub fn with_ttl(root: impl Into<PathBuf>, ttl: Duration) -> anyhow::Result<Self> {
        let root = root.into();
        for artifact_type in ArtifactType::ALL {
            let dir = root.join(artifact_type.as_str());
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create cache directory {}", dir.display()))?;
        }

        let probe = root.join(".probe");
        fs::write(&probe, b"probe")
            .with_context(|| format!("cache root {} is not writable", root.display()))?;
        let _ = fs::remove_file(&probe);

        Ok(Self {
            root,
            ttl,
            index: Mutex::new(HashMap::new()),
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Stores a payload and returns its new handle.
    ///
    /// The file is fully written before the index entry is published, so
    /// concurrent readers never observe a half-written artifact.
    pub fn put(
        &self,
        artifact_type: ArtifactType,
        bytes: &[u8],
        file_name: &str,
    ) -> anyhow::Result<Uuid> {
        if bytes.len() > MAX_ARTIFACT_BYTES {
            bail!(
                "artifact of {} bytes exceeds the {} byte cap",
                bytes.len(),
                MAX_ARTIFACT_BYTES
            );
        }

        let id = Uuid::new_v4();
        let path = self.file_path(artifact_type, id);
        fs::write(&path, bytes)
            .with_context(|| format!("failed to write artifact {}", path.display()))?;

        let entry = CacheEntry {
            artifact_type,
            file_name: file_name.to_string(),
            size: bytes.len() as u64,
            created_at: Utc::now(),
            expires_at: Instant::now() + self.ttl,
        };
        self.index.lock().unwrap().insert(id, entry);

        log::debug!("cached {artifact_type} artifact {id} ({} bytes)", bytes.len());
        Ok(id)
    }

    /// Looks up a handle. Unknown, expired, and missing-on-disk all read as
    /// `None`; a missing backing file also drops the index entry.
    pub fn get(&self, id: Uuid) -> Option<CachedArtifact> {
        let snapshot = {
            let mut index = self.index.lock().unwrap();
            let entry = index.get(&id)?;
            if entry.expires_at < Instant::now() {
                index.remove(&id);
                return None;
            }
            CachedArtifact {
                id,
                path: self.file_path(entry.artifact_type, id),
                artifact_type: entry.artifact_type,
                file_name: entry.file_name.clone(),
                size: entry.size,
                created_at: entry.created_at,
                expires_at: entry.expires_at,
            }
        };

        // Stat outside the lock; self-heal if someone removed the file.
        if !snapshot.path.is_file() {
            log::warn!("artifact {id} lost its backing file, dropping index entry");
            self.index.lock().unwrap().remove(&id);
            return None;
        }

        Some(snapshot)
    }

    /// Like `get` but without touching the filesystem.
    pub fn has(&self, id: Uuid) -> bool {
        let index = self.index.lock().unwrap();
        index
            .get(&id)
            .is_some_and(|entry| entry.expires_at >= Instant::now())
    }

    /// Removes the entry and (best effort) its file.
    pub fn delete(&self, id: Uuid) {
        let removed = self.index.lock().unwrap().remove(&id);
        if let Some(entry) = removed {
            let path = self.file_path(entry.artifact_type, id);
            if let Err(e) = fs::remove_file(&path) {
                log::warn!("failed to remove artifact file {}: {e}", path.display());
            }
        }
    }

    /// Extends the TTL of a live entry; expired or unknown handles are left
    /// untouched and report `false`.
    pub fn refresh(&self, id: Uuid) -> bool {
        let mut index = self.index.lock().unwrap();
        match index.get_mut(&id) {
            Some(entry) if entry.expires_at >= Instant::now() => {
                entry.expires_at = Instant::now() + self.ttl;
                true
            }
            _ => false,
        }
    }

    /// Live-entry count and byte total.
    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let index = self.index.lock().unwrap();
        let mut stats = CacheStats {
            count: 0,
            total_bytes: 0,
        };
        for entry in index.values() {
            if entry.expires_at >= now {
                stats.count += 1;
                stats.total_bytes += entry.size;
            }
        }
        stats
    }

    /// Evicts every expired entry, returning how many were removed.
    ///
    /// The index lock is taken per entry so a large sweep never starves
    /// concurrent `put`/`get` calls.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<(Uuid, ArtifactType)> = {
            let index = self.index.lock().unwrap();
            index
                .iter()
                .filter(|(_, entry)| entry.expires_at < now)
                .map(|(id, entry)| (*id, entry.artifact_type))
                .collect()
        };

        let mut evicted = 0;
        for (id, artifact_type) in expired {
            let still_expired = {
                let mut index = self.index.lock().unwrap();
                // A refresh may have raced the sweep; leave live entries alone.
                let lapsed = matches!(
                    index.get(&id),
                    Some(entry) if entry.expires_at < Instant::now()
                );
                if lapsed {
                    index.remove(&id);
                }
                lapsed
            };
            if still_expired {
                let path = self.file_path(artifact_type, id);
                let _ = fs::remove_file(&path);
                log::debug!("swept expired artifact {id}");
                evicted += 1;
            }
        }
        evicted
    }

    fn file_path(&self, artifact_type: ArtifactType, id: Uuid) -> PathBuf {
        self.root.join(artifact_type.as_str()).join(id.to_string())
    }
}

/// Background eviction loop; runs until the shutdown token fires.
pub async fn sweep_loop(cache: std::sync::Arc<ArtifactCache>, token: CancellationToken) {
    sweep_loop_every(cache, SWEEP_INTERVAL, token).await;
}

pub async fn sweep_loop_every(
    cache: std::sync::Arc<ArtifactCache>,
    interval: Duration,
    token: CancellationToken,
) {
    log::info!("cache sweeper started (every {}s)", interval.as_secs());
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                log::info!("cache sweeper received shutdown signal, stopping");
                break;
            }
            _ = tokio::time::sleep(interval) => {
                let evicted = cache.sweep();
                if evicted > 0 {
                    log::info!("cache sweep evicted {evicted} expired artifacts");
                }
            }
        }
    }
}

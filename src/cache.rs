//! On-disk cache for expensive catalog snapshots.
//!
//! Each artifact is a JSON envelope holding the crate version that wrote it,
//! when it was written, which server it came from, and the snapshot itself.
//! Artifacts are only trusted by the exact same crate version. There is no
//! staleness check unless a TTL is configured; otherwise a cached catalog
//! stays valid until [`MetadataCache::invalidate`] removes it.

use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::catalog::OrgUnitSnapshot;
use crate::error::HmisError;

pub const ORG_UNITS_ARTIFACT: &str = "orgunits";

const CACHE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// A snapshot that can be written to and read back from the cache.
pub trait CacheArtifact: Serialize + DeserializeOwned {
    const NAME: &'static str;

    fn server_url(&self) -> &str;
}

impl CacheArtifact for OrgUnitSnapshot {
    const NAME: &'static str = ORG_UNITS_ARTIFACT;

    fn server_url(&self) -> &str {
        &self.server_url
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    version: &'a str,
    created_at: DateTime<Utc>,
    server_url: &'a str,
    payload: &'a T,
}

#[derive(Deserialize)]
struct Envelope<T> {
    version: String,
    created_at: DateTime<Utc>,
    server_url: String,
    payload: T,
}

#[derive(Debug, Clone)]
pub struct MetadataCache {
    dir: Utf8PathBuf,
    ttl: Option<Duration>,
    server_url: Option<String>,
}

impl MetadataCache {
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ttl: None,
            server_url: None,
        }
    }

    /// Artifacts older than `ttl` are treated as missing.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// Artifacts written for a different server are treated as missing.
    pub fn for_server(mut self, server_url: impl Into<String>) -> Self {
        self.server_url = Some(server_url.into());
        self
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    pub fn artifact_path(&self, name: &str) -> Utf8PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    /// `Ok(None)` on a plain miss, `Err(CacheCorrupt)` when the artifact is
    /// present but unusable.
    pub fn read<T: CacheArtifact>(&self) -> Result<Option<T>, HmisError> {
        let path = self.artifact_path(T::NAME);
        if !path.as_std_path().exists() {
            return Ok(None);
        }
        let bytes = fs::read(path.as_std_path()).map_err(|err| corrupt(&path, err))?;
        let envelope: Envelope<T> =
            serde_json::from_slice(&bytes).map_err(|err| corrupt(&path, err))?;

        if envelope.version != CACHE_VERSION {
            return Err(corrupt(
                &path,
                format!("written by version {}, expected {CACHE_VERSION}", envelope.version),
            ));
        }
        if let Some(expected) = &self.server_url {
            if &envelope.server_url != expected || envelope.payload.server_url() != expected {
                info!(
                    %path,
                    cached = envelope.server_url.as_str(),
                    expected = expected.as_str(),
                    "cache belongs to another server"
                );
                return Ok(None);
            }
        }
        if let Some(ttl) = self.ttl {
            let age = Utc::now().signed_duration_since(envelope.created_at);
            if age > ttl {
                info!(%path, age_hours = age.num_hours(), "cache expired");
                return Ok(None);
            }
        }
        Ok(Some(envelope.payload))
    }

    /// Writes through a temp file in the cache directory and renames it into
    /// place, so readers never observe a partial artifact.
    pub fn write<T: CacheArtifact>(&self, payload: &T) -> Result<Utf8PathBuf, HmisError> {
        let path = self.artifact_path(T::NAME);
        fs::create_dir_all(self.dir.as_std_path())
            .map_err(|err| HmisError::Filesystem(format!("create {}: {err}", self.dir)))?;
        let envelope = EnvelopeRef {
            version: CACHE_VERSION,
            created_at: Utc::now(),
            server_url: payload.server_url(),
            payload,
        };
        let content =
            serde_json::to_vec(&envelope).map_err(|err| HmisError::Filesystem(err.to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix(&format!(".{}", T::NAME))
            .suffix(".tmp")
            .tempfile_in(self.dir.as_std_path())
            .map_err(|err| HmisError::Filesystem(err.to_string()))?;
        temp.write_all(&content)
            .map_err(|err| HmisError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| HmisError::Filesystem(err.to_string()))?;
        debug!(%path, bytes = content.len(), "wrote cache artifact");
        Ok(path)
    }

    /// Returns the cached artifact, or builds, stores and returns a fresh
    /// one. A corrupt artifact is logged and rebuilt; builder errors are
    /// returned as-is.
    pub fn load_or_build<T, F>(&self, builder: F) -> Result<T, HmisError>
    where
        T: CacheArtifact,
        F: FnOnce() -> Result<T, HmisError>,
    {
        match self.read::<T>() {
            Ok(Some(payload)) => {
                info!(artifact = T::NAME, dir = %self.dir, "loaded from cache");
                return Ok(payload);
            }
            Ok(None) => debug!(artifact = T::NAME, dir = %self.dir, "cache miss"),
            Err(err) => warn!(%err, "discarding cache artifact, rebuilding"),
        }

        let payload = builder()?;
        if let Err(err) = self.write(&payload) {
            warn!(%err, artifact = T::NAME, "failed to write cache artifact");
        }
        Ok(payload)
    }

    /// Deletes the artifact. Returns whether there was one.
    pub fn invalidate(&self, name: &str) -> Result<bool, HmisError> {
        let path = self.artifact_path(name);
        if !path.as_std_path().exists() {
            return Ok(false);
        }
        fs::remove_file(path.as_std_path())
            .map_err(|err| HmisError::Filesystem(format!("remove {path}: {err}")))?;
        info!(%path, "cache artifact removed");
        Ok(true)
    }
}

/// Cached org-unit snapshot under `cache_dir`, built with `builder` on a
/// miss.
pub fn load_or_build<F>(cache_dir: &Utf8Path, builder: F) -> Result<OrgUnitSnapshot, HmisError>
where
    F: FnOnce() -> Result<OrgUnitSnapshot, HmisError>,
{
    MetadataCache::new(cache_dir).load_or_build(builder)
}

fn corrupt(path: &Utf8Path, err: impl ToString) -> HmisError {
    HmisError::CacheCorrupt {
        path: path.to_string(),
        message: err.to_string(),
    }
}

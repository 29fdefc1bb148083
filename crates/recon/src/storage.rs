//! Evidence storage backends behind one `put_object` capability.
//!
//! The backend is chosen once per job by [`from_settings`]. Writes are
//! single-shot; callers hand over fully redacted bytes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use log::{debug, warn};
use serde::Deserialize;
use thiserror::Error;

use crate::config::{StorageBackend, StorageSettings};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid object key '{0}'")]
    InvalidKey(String),
    #[error("filesystem write failed for {path}: {source}")]
    Fs {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {0}: {1}")]
    Http(u16, String),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

pub trait EvidenceStorage {
    /// Store `bytes` under `key` and return a URI that locates them.
    fn put_object(&self, key: &str, bytes: &[u8], content_type: &str, ttl_sec: u64) -> Result<String, StorageError>;

    fn backend_name(&self) -> &'static str;
}

/// Keys are relative, `/`-separated, and never climb out of their root.
fn check_key(key: &str) -> Result<(), StorageError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

// ── Memory ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub ttl_sec: u64,
}

/// Keeps objects in process memory and counts every put.
#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    puts: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().ok().and_then(|o| o.get(key).cloned())
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl EvidenceStorage for MemoryStorage {
    fn put_object(&self, key: &str, bytes: &[u8], content_type: &str, ttl_sec: u64) -> Result<String, StorageError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        check_key(key)?;
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| StorageError::Unavailable("memory storage lock poisoned".into()))?;
        objects.insert(
            key.to_string(),
            StoredObject {
                bytes: bytes.to_vec(),
                content_type: content_type.to_string(),
                ttl_sec,
            },
        );
        Ok(format!("memory://{key}"))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

// ── Filesystem ──────────────────────────────────────────────────────

/// Writes objects under a root directory, with a `<name>.ttl` sidecar
/// holding the TTL in seconds.
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn write(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        std::fs::write(path, bytes).map_err(|source| StorageError::Fs {
            path: path.display().to_string(),
            source,
        })
    }
}

impl EvidenceStorage for FsStorage {
    fn put_object(&self, key: &str, bytes: &[u8], _content_type: &str, ttl_sec: u64) -> Result<String, StorageError> {
        check_key(key)?;
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::Fs {
                path: parent.display().to_string(),
                source,
            })?;
        }
        Self::write(&path, bytes)?;

        let mut sidecar = path.clone().into_os_string();
        sidecar.push(".ttl");
        Self::write(Path::new(&sidecar), format!("{ttl_sec}\n").as_bytes())?;

        let abs = std::fs::canonicalize(&path).unwrap_or(path);
        Ok(format!("file://{}", abs.display()))
    }

    fn backend_name(&self) -> &'static str {
        "fs"
    }
}

// ── Object store ────────────────────────────────────────────────────

/// Object store reached over HTTP: `PUT {endpoint}/{bucket}/{key}`, then
/// `POST {endpoint}/presign` for a time-limited download URL.
///
/// A failed presign is not fatal: the object is already written, so the raw
/// `object://{bucket}/{key}` URI is returned instead.
pub struct ObjectStorage {
    http: reqwest::blocking::Client,
    endpoint: String,
    bucket: String,
    token: Option<String>,
}

#[derive(Deserialize)]
struct PresignResponse {
    url: String,
}

impl ObjectStorage {
    pub fn new(endpoint: &str, bucket: &str, token: Option<String>) -> Result<Self, StorageError> {
        let http = reqwest::blocking::Client::builder()
            .user_agent(format!("vra/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            token,
        })
    }

    fn raw_uri(&self, key: &str) -> String {
        format!("object://{}/{}", self.bucket, key)
    }

    fn presign(&self, key: &str, ttl_sec: u64) -> Result<String, StorageError> {
        let mut req = self.http.post(format!("{}/presign", self.endpoint)).json(&serde_json::json!({
            "bucket": self.bucket,
            "key": key,
            "expires_in": ttl_sec,
        }));
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let response = req.send().map_err(|e| StorageError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().unwrap_or_default();
            return Err(StorageError::Http(status, body));
        }
        let parsed: PresignResponse = response
            .json()
            .map_err(|e| StorageError::Network(format!("presign response: {e}")))?;
        Ok(parsed.url)
    }
}

impl EvidenceStorage for ObjectStorage {
    fn put_object(&self, key: &str, bytes: &[u8], content_type: &str, ttl_sec: u64) -> Result<String, StorageError> {
        check_key(key)?;
        let url = format!("{}/{}/{}", self.endpoint, self.bucket, key);
        let mut req = self
            .http
            .put(&url)
            .header("Content-Type", content_type)
            .header("X-Object-Ttl-Seconds", ttl_sec.to_string());
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let response = req
            .body(bytes.to_vec())
            .send()
            .map_err(|e| StorageError::Network(e.to_string()))?;
        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().unwrap_or_default();
            return Err(StorageError::Http(status, body));
        }
        debug!("object stored bucket={} key={}", self.bucket, key);

        match self.presign(key, ttl_sec) {
            Ok(signed) => Ok(signed),
            Err(e) => {
                warn!("presign failed for {key}, returning raw URI: {e}");
                Ok(self.raw_uri(key))
            }
        }
    }

    fn backend_name(&self) -> &'static str {
        "object"
    }
}

// ── Factory ─────────────────────────────────────────────────────────

pub fn from_settings(settings: &StorageSettings) -> Result<Box<dyn EvidenceStorage>, StorageError> {
    match settings.backend {
        StorageBackend::Memory => Ok(Box::new(MemoryStorage::new())),
        StorageBackend::Fs => Ok(Box::new(FsStorage::new(settings.fs_root.clone()))),
        StorageBackend::Object => {
            let endpoint = settings
                .object_endpoint
                .as_deref()
                .ok_or_else(|| StorageError::Unavailable("object endpoint not configured".into()))?;
            let bucket = settings
                .object_bucket
                .as_deref()
                .ok_or_else(|| StorageError::Unavailable("object bucket not configured".into()))?;
            Ok(Box::new(ObjectStorage::new(endpoint, bucket, settings.object_token.clone())?))
        }
    }
}

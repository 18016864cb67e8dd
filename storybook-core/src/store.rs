//! Durable storage for generated asset records.
//!
//! The cache only needs `get` and `put`. [`MemoryStore`] keeps records for the
//! life of the process; [`FileStore`] writes one JSON document per key.

use crate::asset::{AssetRecord, CacheKey};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::warn;

/// Hex characters of the key digest appended to each file name.
const KEY_DIGEST_LEN: usize = 12;

/// Errors from an asset store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Key-value storage for asset records.
#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<AssetRecord>, StoreError>;

    /// Store a record. Writing the same record twice is harmless.
    async fn put(&self, key: &CacheKey, record: &AssetRecord) -> Result<(), StoreError>;
}

/// In-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<CacheKey, AssetRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl AssetStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<AssetRecord>, StoreError> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn put(&self, key: &CacheKey, record: &AssetRecord) -> Result<(), StoreError> {
        self.records.write().await.insert(key.clone(), record.clone());
        Ok(())
    }
}

/// Directory-backed store, one `<key>.json` file per record.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the record for `key`.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(key)))
    }
}

/// Key rendered with everything outside `[A-Za-z0-9_-]` replaced by `_`,
/// followed by a digest of the raw key so distinct keys never share a file.
fn file_stem(key: &CacheKey) -> String {
    let sanitize = |s: &str| {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect::<String>()
    };
    let readable = match key.fingerprint() {
        Some(fp) => format!("{}__{}", sanitize(key.scene_id()), sanitize(fp)),
        None => sanitize(key.scene_id()),
    };
    format!("{readable}.{}", key_digest(key))
}

fn key_digest(key: &CacheKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update((key.scene_id().len() as u64).to_le_bytes());
    hasher.update(key.scene_id().as_bytes());
    if let Some(fp) = key.fingerprint() {
        hasher.update([1u8]);
        hasher.update(fp.as_bytes());
    }
    let mut encoded = hex::encode(hasher.finalize());
    encoded.truncate(KEY_DIGEST_LEN);
    encoded
}

#[async_trait]
impl AssetStore for FileStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<AssetRecord>, StoreError> {
        match fs::read_to_string(self.path_for(key)).await {
            Ok(content) => {
                let record: AssetRecord = serde_json::from_str(&content)?;
                if record.scene_id != key.scene_id() {
                    warn!(
                        expected = %key.scene_id(),
                        found = %record.scene_id,
                        "Ignoring record stored for another scene"
                    );
                    return Ok(None);
                }
                Ok(Some(record))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &CacheKey, record: &AssetRecord) -> Result<(), StoreError> {
        let path = self.path_for(key);
        let content = serde_json::to_vec_pretty(record)?;

        // Skip the write if the same record is already on disk
        if let Ok(existing) = fs::read(&path).await {
            if existing == content {
                return Ok(());
            }
        }

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &content).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

//! The local content cache.
//!
//! Maps workbook content (by hash) and workbook location (by path) to the remote file id and
//! revision the service already holds for it. Both keys are scoped by the API base URL so that
//! identities from different deployments never mix.
//!
//! The cache is persisted as a single JSON document, `cache.json`, in the first writable
//! directory from: the OS temp directory (`<tmp>/witan`), then `.witan` in the working
//! directory. When neither can be written the cache lives in memory for the life of the process.
//! A missing, unreadable or malformed cache file is treated as empty; the cache is an
//! optimization and never a reason to fail.
//!
//! There is no locking across processes. Concurrent CLI invocations may overwrite each other's
//! entries, which costs at most a redundant upload.

use crate::api::FileResponse;
use crate::{fs, Result};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

const CACHE_DIR_NAME: &str = "witan";
const LOCAL_CACHE_DIR_NAME: &str = ".witan";
const CACHE_FILE_NAME: &str = "cache.json";
const CACHE_VERSION: u32 = 2;

/// What the service holds for one workbook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    file_id: String,
    revision_id: String,
    #[serde(default)]
    bytes: u64,
    #[serde(default)]
    filename: String,
}

impl CacheEntry {
    pub fn new(
        file_id: impl Into<String>,
        revision_id: impl Into<String>,
        bytes: u64,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            file_id: file_id.into(),
            revision_id: revision_id.into(),
            bytes,
            filename: filename.into(),
        }
    }

    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    pub fn revision_id(&self) -> &str {
        &self.revision_id
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }
}

impl From<FileResponse> for CacheEntry {
    fn from(r: FileResponse) -> Self {
        Self::new(r.id, r.revision_id, r.bytes, r.filename)
    }
}

/// The on-disk document. `files` is keyed by content key, `known` by identity key.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct CacheData {
    #[serde(rename = "v", default)]
    version: u32,
    #[serde(default)]
    files: BTreeMap<String, CacheEntry>,
    #[serde(default)]
    known: BTreeMap<String, CacheEntry>,
}

impl CacheData {
    fn empty() -> Self {
        Self {
            version: CACHE_VERSION,
            ..Default::default()
        }
    }

    /// Parses a persisted document. Anything unreadable or from an unknown version is discarded.
    fn parse(bytes: &[u8]) -> Option<Self> {
        let mut data: CacheData = serde_json::from_slice(bytes).ok()?;
        if data.version == 0 || data.version > CACHE_VERSION {
            return None;
        }
        data.version = CACHE_VERSION;
        Some(data)
    }
}

/// The content cache. Safe to share between tasks; every mutation is persisted before the call
/// returns.
#[derive(Debug)]
pub struct ContentCache {
    dir: Option<PathBuf>,
    data: Mutex<CacheData>,
}

impl ContentCache {
    /// Opens the cache in the first writable default location, falling back to memory.
    pub fn probe() -> Self {
        let mut candidates = vec![std::env::temp_dir().join(CACHE_DIR_NAME)];
        if let Ok(cwd) = std::env::current_dir() {
            candidates.push(cwd.join(LOCAL_CACHE_DIR_NAME));
        }
        for dir in candidates {
            match fs::probe_writable(&dir) {
                Ok(()) => return Self::load(dir),
                Err(e) => debug!("Cache directory {} is not usable: {e:#}", dir.display()),
            }
        }
        warn!("No writable cache directory found, caching uploads in memory only");
        Self::in_memory()
    }

    /// Opens the cache in `dir`, falling back to memory when `dir` is not writable.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        match fs::probe_writable(&dir) {
            Ok(()) => Self::load(dir),
            Err(e) => {
                debug!("Cache directory {} is not usable: {e:#}", dir.display());
                Self::in_memory()
            }
        }
    }

    /// A cache that is never persisted.
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            data: Mutex::new(CacheData::empty()),
        }
    }

    fn load(dir: PathBuf) -> Self {
        let path = dir.join(CACHE_FILE_NAME);
        let data = match fs::read(&path) {
            Ok(bytes) => CacheData::parse(&bytes).unwrap_or_else(|| {
                debug!("Ignoring unreadable cache file {}", path.display());
                CacheData::empty()
            }),
            Err(_) => CacheData::empty(),
        };
        debug!("Using cache directory {}", dir.display());
        Self {
            dir: Some(dir),
            data: Mutex::new(data),
        }
    }

    /// The directory the cache persists to, or `None` when it lives in memory.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Looks up an entry by content key.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        self.lock().files.get(key).cloned()
    }

    /// Stores an entry under a content key.
    pub fn put(&self, key: &str, entry: CacheEntry) {
        let mut data = self.lock();
        data.files.insert(key.to_string(), entry);
        self.save(&data);
    }

    /// Removes the entry for a content key.
    pub fn evict(&self, key: &str) {
        let mut data = self.lock();
        if data.files.remove(key).is_some() {
            self.save(&data);
        }
    }

    /// Looks up the last entry known for the workbook at `path`.
    pub fn get_known(&self, path: &Path, base_url: &str) -> Option<CacheEntry> {
        let key = identity_key(path, base_url);
        self.lock().known.get(&key).cloned()
    }

    /// Remembers `entry` as the latest state of the workbook at `path`.
    pub fn put_known(&self, path: &Path, base_url: &str, entry: CacheEntry) {
        let key = identity_key(path, base_url);
        let mut data = self.lock();
        data.known.insert(key, entry);
        self.save(&data);
    }

    /// Forgets the workbook at `path`.
    pub fn evict_known(&self, path: &Path, base_url: &str) {
        let key = identity_key(path, base_url);
        let mut data = self.lock();
        if data.known.remove(&key).is_some() {
            self.save(&data);
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rewrites the whole document. Failures are logged and otherwise ignored.
    fn save(&self, data: &CacheData) {
        let Some(dir) = &self.dir else {
            return;
        };
        let path = dir.join(CACHE_FILE_NAME);
        let result = serde_json::to_vec_pretty(data)
            .context("Unable to serialize the cache")
            .and_then(|bytes| fs::write_all(&path, bytes));
        if let Err(e) = result {
            debug!("Unable to persist the cache: {e:#}");
        }
    }
}

/// The content key of the workbook at `path`: `sha256:<hex>@<base_url>`. Two files with identical
/// bytes share a content key no matter where they live.
pub fn content_key(path: &Path, base_url: &str) -> Result<String> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("Unable to open {} for hashing", path.display()))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)
        .with_context(|| format!("Unable to hash {}", path.display()))?;
    Ok(format!(
        "sha256:{}@{base_url}",
        hex::encode(hasher.finalize())
    ))
}

/// The identity key of the workbook at `path`: `path:<absolute path>@<base_url>`.
pub fn identity_key(path: &Path, base_url: &str) -> String {
    format!("path:{}@{base_url}", absolute_path(path).display())
}

/// Canonical when possible, otherwise absolute, otherwise as given.
fn absolute_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const BASE: &str = "https://api.witanlabs.com";

    fn entry(file_id: &str, revision_id: &str) -> CacheEntry {
        CacheEntry::new(file_id, revision_id, 42, "book.xlsx")
    }

    #[test]
    fn test_content_key_ignores_location() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a.xlsx");
        let b = tmp.path().join("nested").join("b.xlsx");
        std::fs::create_dir_all(b.parent().unwrap()).unwrap();
        std::fs::write(&a, b"same bytes").unwrap();
        std::fs::write(&b, b"same bytes").unwrap();

        let key_a = content_key(&a, BASE).unwrap();
        let key_b = content_key(&b, BASE).unwrap();
        assert_eq!(key_a, key_b);
        assert!(key_a.starts_with("sha256:"));
        assert!(key_a.ends_with("@https://api.witanlabs.com"));

        std::fs::write(&b, b"different bytes").unwrap();
        assert_ne!(key_a, content_key(&b, BASE).unwrap());
    }

    #[test]
    fn test_keys_are_scoped_by_base_url() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a.xlsx");
        std::fs::write(&a, b"bytes").unwrap();
        assert_ne!(
            content_key(&a, BASE).unwrap(),
            content_key(&a, "http://localhost:8080").unwrap()
        );
        assert_ne!(
            identity_key(&a, BASE),
            identity_key(&a, "http://localhost:8080")
        );
    }

    #[test]
    fn test_identity_key_is_absolute() {
        let key = identity_key(Path::new("relative/book.xlsx"), BASE);
        let path = key
            .strip_prefix("path:")
            .unwrap()
            .strip_suffix("@https://api.witanlabs.com")
            .unwrap();
        assert!(Path::new(path).is_absolute());
        assert!(path.ends_with("book.xlsx"));
    }

    #[test]
    fn test_content_key_missing_file() {
        assert!(content_key(Path::new("/definitely/not/here.xlsx"), BASE).is_err());
    }

    #[test]
    fn test_put_get_evict() {
        let cache = ContentCache::in_memory();
        assert_eq!(cache.dir(), None);
        assert_eq!(cache.get("k"), None);
        cache.put("k", entry("f1", "r1"));
        assert_eq!(cache.get("k"), Some(entry("f1", "r1")));
        cache.evict("k");
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn test_known_entries() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("book.xlsx");
        std::fs::write(&path, b"bytes").unwrap();

        let cache = ContentCache::in_memory();
        cache.put_known(&path, BASE, entry("f1", "r1"));
        assert_eq!(cache.get_known(&path, BASE), Some(entry("f1", "r1")));
        assert_eq!(cache.get_known(&path, "http://other"), None);
        cache.evict_known(&path, BASE);
        assert_eq!(cache.get_known(&path, BASE), None);
    }

    #[test]
    fn test_persists_across_instances() {
        let tmp = TempDir::new().unwrap();
        let book = tmp.path().join("book.xlsx");
        std::fs::write(&book, b"bytes").unwrap();

        let first = ContentCache::in_dir(tmp.path().join("cache"));
        assert!(first.dir().is_some());
        first.put("sha256:abc@x", entry("f1", "r1"));
        first.put_known(&book, BASE, entry("f1", "r1"));

        let second = ContentCache::in_dir(tmp.path().join("cache"));
        assert_eq!(second.get("sha256:abc@x"), Some(entry("f1", "r1")));
        assert_eq!(second.get_known(&book, BASE), Some(entry("f1", "r1")));

        let text = std::fs::read_to_string(tmp.path().join("cache").join("cache.json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["v"], 2);
        assert_eq!(json["files"]["sha256:abc@x"]["file_id"], "f1");
        assert_eq!(json["files"]["sha256:abc@x"]["revision_id"], "r1");
    }

    #[test]
    fn test_malformed_file_is_empty_and_recovers() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("cache");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("cache.json"), b"{ this is not json").unwrap();

        let cache = ContentCache::in_dir(&dir);
        assert_eq!(cache.get("k"), None);
        cache.put("k", entry("f2", "r2"));

        let fresh = ContentCache::in_dir(&dir);
        assert_eq!(fresh.get("k"), Some(entry("f2", "r2")));
    }

    #[test]
    fn test_version_one_is_upgraded() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("cache");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("cache.json"),
            br#"{"v":1,"files":{"k":{"file_id":"f1","revision_id":"r1"}}}"#,
        )
        .unwrap();

        let cache = ContentCache::in_dir(&dir);
        assert_eq!(cache.get("k"), Some(CacheEntry::new("f1", "r1", 0, "")));
        cache.put("other", entry("f2", "r2"));
        let text = std::fs::read_to_string(dir.join("cache.json")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["v"], 2);
    }

    #[test]
    fn test_unknown_version_is_discarded() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("cache");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("cache.json"),
            br#"{"v":9,"files":{"k":{"file_id":"f1","revision_id":"r1"}}}"#,
        )
        .unwrap();
        assert_eq!(ContentCache::in_dir(&dir).get("k"), None);
    }

    #[test]
    fn test_unwritable_dir_falls_back_to_memory() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let cache = ContentCache::in_dir(blocker.join("cache"));
        assert_eq!(cache.dir(), None);
        cache.put("k", entry("f1", "r1"));
        assert_eq!(cache.get("k"), Some(entry("f1", "r1")));
    }
}

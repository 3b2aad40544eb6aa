//! Keeps local workbooks and their remote copies in step.
//!
//! [`SyncCoordinator::ensure_uploaded`] answers "which remote file and revision hold the bytes
//! of this local workbook?" with as little traffic as possible:
//!
//! 1. If the exact bytes were uploaded before, reuse that revision without any request.
//! 2. If this path was uploaded before, add a revision to that remote file (`PUT`).
//! 3. Otherwise create a new remote file (`POST`).
//!
//! A `PUT` that proves the remembered identity is stale (404, filename or content-type mismatch)
//! falls through to step 3. Every other error is returned.

use crate::api::{Client, RemoteFile};
use crate::cache::{content_key, CacheEntry, ContentCache};
use crate::error::{is_not_found, is_stale_identity};
use crate::{utils, Result};
use anyhow::Context;
use std::future::Future;
use std::path::Path;
use tracing::{debug, info, warn};

impl From<&CacheEntry> for RemoteFile {
    fn from(entry: &CacheEntry) -> Self {
        RemoteFile::new(entry.file_id(), entry.revision_id())
    }
}

#[derive(Debug)]
pub struct SyncCoordinator {
    client: Client,
    cache: ContentCache,
}

impl SyncCoordinator {
    pub fn new(client: Client, cache: ContentCache) -> Self {
        Self { client, cache }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    fn base_url(&self) -> &str {
        self.client.base_url()
    }

    /// Returns the remote file and revision holding the current bytes of `path`, uploading only
    /// when the service does not have them yet.
    ///
    /// # Errors
    /// - When `path` cannot be read.
    /// - When an upload fails for any reason other than a stale remembered identity.
    pub async fn ensure_uploaded(&self, path: &Path) -> Result<RemoteFile> {
        let key = content_key(path, self.base_url())?;

        if let Some(entry) = self.cache.get(&key) {
            debug!(
                "{} is already uploaded as {} at {}",
                path.display(),
                entry.file_id(),
                entry.revision_id()
            );
            let remote = RemoteFile::from(&entry);
            self.cache.put_known(path, self.base_url(), entry);
            return Ok(remote);
        }

        if let Some(known) = self.cache.get_known(path, self.base_url()) {
            match self.client.upload_file_version(known.file_id(), path).await {
                Ok(response) => {
                    debug!(
                        "Uploaded {} as revision {} of {}",
                        path.display(),
                        response.revision_id,
                        response.id
                    );
                    return Ok(self.remember(&key, path, CacheEntry::from(response)));
                }
                Err(e) if is_stale_identity(&e) => {
                    info!(
                        "Remote file {} can no longer be updated ({e}), uploading {} as a new file",
                        known.file_id(),
                        path.display()
                    );
                }
                Err(e) => return Err(e),
            }
        }

        let response = self.client.upload_file(path).await?;
        debug!(
            "Uploaded {} as new file {} at {}",
            path.display(),
            response.id,
            response.revision_id
        );
        Ok(self.remember(&key, path, CacheEntry::from(response)))
    }

    /// Forgets everything cached for `path` and uploads it again.
    pub async fn reupload(&self, path: &Path) -> Result<RemoteFile> {
        if let Ok(key) = content_key(path, self.base_url()) {
            self.cache.evict(&key);
        }
        self.cache.evict_known(path, self.base_url());
        self.ensure_uploaded(path).await
    }

    /// Records that the bytes now at `path` are `revision_id` of `file_id`. Call this after
    /// writing a server-produced revision to disk, so the next run needs no upload.
    pub fn record_new_revision(
        &self,
        path: &Path,
        file_id: &str,
        revision_id: &str,
    ) -> Result<RemoteFile> {
        let key = content_key(path, self.base_url())?;
        let bytes = std::fs::metadata(path)
            .with_context(|| format!("Unable to stat {}", path.display()))?
            .len();
        let entry = CacheEntry::new(file_id, revision_id, bytes, utils::file_name(path));
        Ok(self.remember(&key, path, entry))
    }

    /// Runs `operation` against the remote copy of `path`. When the remote file turns out to be
    /// gone (404), uploads again and retries the operation once.
    pub async fn with_remote_file<T, F, Fut>(
        &self,
        path: &Path,
        mut operation: F,
    ) -> Result<(RemoteFile, T)>
    where
        F: FnMut(RemoteFile) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let remote = self.ensure_uploaded(path).await?;
        match operation(remote.clone()).await {
            Ok(value) => Ok((remote, value)),
            Err(e) if is_not_found(&e) => {
                warn!(
                    "Remote file {} was not found, uploading {} again",
                    remote.file_id(),
                    path.display()
                );
                let remote = self.reupload(path).await?;
                let value = operation(remote.clone()).await?;
                Ok((remote, value))
            }
            Err(e) => Err(e),
        }
    }

    fn remember(&self, key: &str, path: &Path, entry: CacheEntry) -> RemoteFile {
        let remote = RemoteFile::from(&entry);
        self.cache.put(key, entry.clone());
        self.cache.put_known(path, self.base_url(), entry);
        remote
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::test_transport::{FakeFileServer, RecordingSleeper};
    use crate::api::{RequestExecutor, RetryPolicy, Transport};
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::TempDir;

    pub(crate) const BASE: &str = "http://api.test";

    pub(crate) fn coordinator(transport: Arc<dyn Transport>, cache: ContentCache) -> SyncCoordinator {
        let executor = RequestExecutor::with_transport(
            reqwest::Client::new(),
            transport,
            RetryPolicy::default(),
        )
        .with_sleeper(Arc::new(RecordingSleeper::default()));
        SyncCoordinator::new(
            Client::with_executor(BASE, Some("sk-test".to_string()), executor),
            cache,
        )
    }

    fn write(dir: &TempDir, name: &str, contents: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[tokio::test]
    async fn test_unchanged_file_is_uploaded_once() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "book.xlsx", b"v1");
        let server = Arc::new(FakeFileServer::new());
        let sync = coordinator(server.clone(), ContentCache::in_memory());

        let first = sync.ensure_uploaded(&path).await.unwrap();
        let second = sync.ensure_uploaded(&path).await.unwrap();
        assert_eq!(first, RemoteFile::new("f1", "r1"));
        assert_eq!(first, second);
        assert_eq!(server.lines(), vec!["POST /v0/files"]);
    }

    #[tokio::test]
    async fn test_identical_bytes_at_another_path_need_no_upload() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "a.xlsx", b"same");
        let b = write(&dir, "b.xlsx", b"same");
        let server = Arc::new(FakeFileServer::new());
        let sync = coordinator(server.clone(), ContentCache::in_memory());

        let first = sync.ensure_uploaded(&a).await.unwrap();
        let second = sync.ensure_uploaded(&b).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(server.lines(), vec!["POST /v0/files"]);
        assert_eq!(
            sync.cache().get_known(&b, BASE).map(|e| e.file_id().to_string()),
            Some("f1".to_string())
        );
    }

    #[tokio::test]
    async fn test_changed_file_becomes_a_new_revision() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "book.xlsx", b"v1");
        let server = Arc::new(FakeFileServer::new());
        let sync = coordinator(server.clone(), ContentCache::in_memory());

        sync.ensure_uploaded(&path).await.unwrap();
        std::fs::write(&path, b"v2").unwrap();
        let remote = sync.ensure_uploaded(&path).await.unwrap();
        assert_eq!(remote, RemoteFile::new("f1", "r2"));
        assert_eq!(server.lines(), vec!["POST /v0/files", "PUT /v0/files/f1"]);
    }

    #[tokio::test]
    async fn test_purged_file_falls_back_to_create() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "book.xlsx", b"v1");
        let server = Arc::new(FakeFileServer::new());
        let sync = coordinator(server.clone(), ContentCache::in_memory());

        sync.ensure_uploaded(&path).await.unwrap();
        server.forget("f1");
        std::fs::write(&path, b"v2").unwrap();
        let remote = sync.ensure_uploaded(&path).await.unwrap();
        assert_eq!(remote, RemoteFile::new("f2", "r2"));
        assert_eq!(
            server.lines(),
            vec!["POST /v0/files", "PUT /v0/files/f1", "POST /v0/files"]
        );
    }

    #[tokio::test]
    async fn test_mismatch_falls_back_to_create() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "book.xlsx", b"v1");
        let server = Arc::new(FakeFileServer::new());
        let sync = coordinator(server.clone(), ContentCache::in_memory());

        sync.ensure_uploaded(&path).await.unwrap();
        server.override_route(
            "PUT",
            "/v0/files/f1",
            409,
            r#"{"error":{"code":"filename_mismatch","message":"filename differs"}}"#,
        );
        std::fs::write(&path, b"v2").unwrap();
        let remote = sync.ensure_uploaded(&path).await.unwrap();
        assert_eq!(remote.file_id(), "f2");
    }

    #[tokio::test]
    async fn test_other_put_errors_are_returned() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "book.xlsx", b"v1");
        let server = Arc::new(FakeFileServer::new());
        let sync = coordinator(server.clone(), ContentCache::in_memory());

        sync.ensure_uploaded(&path).await.unwrap();
        server.override_route(
            "PUT",
            "/v0/files/f1",
            403,
            r#"{"error":{"code":"forbidden","message":"no access"}}"#,
        );
        std::fs::write(&path, b"v2").unwrap();
        let err = sync.ensure_uploaded(&path).await.unwrap_err();
        assert_eq!(err.to_string(), "API error 403: forbidden: no access");
        assert_eq!(server.lines(), vec!["POST /v0/files", "PUT /v0/files/f1"]);
    }

    #[tokio::test]
    async fn test_recorded_revision_needs_no_upload() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "book.xlsx", b"v1");
        let server = Arc::new(FakeFileServer::new());
        let sync = coordinator(server.clone(), ContentCache::in_memory());

        sync.ensure_uploaded(&path).await.unwrap();
        std::fs::write(&path, b"server-produced").unwrap();
        sync.record_new_revision(&path, "f1", "r7").unwrap();
        server.clear_requests();

        let remote = sync.ensure_uploaded(&path).await.unwrap();
        assert_eq!(remote, RemoteFile::new("f1", "r7"));
        assert!(server.lines().is_empty());
    }

    #[tokio::test]
    async fn test_with_remote_file_reuploads_on_not_found() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "book.xlsx", b"v1");
        let server = Arc::new(FakeFileServer::new());
        let sync = coordinator(server.clone(), ContentCache::in_memory());

        sync.ensure_uploaded(&path).await.unwrap();
        server.forget("f1");
        server.clear_requests();

        let client = sync.client();
        let (remote, result) = sync
            .with_remote_file(&path, |remote| async move {
                client.files_calc(&remote, &[]).await
            })
            .await
            .unwrap();
        assert_eq!(remote, RemoteFile::new("f2", "r2"));
        assert!(result.errors.is_empty());
        assert_eq!(
            server.lines(),
            vec![
                "GET /v0/files/f1/xlsx/calc",
                "POST /v0/files",
                "GET /v0/files/f2/xlsx/calc",
            ]
        );
    }

    #[tokio::test]
    async fn test_with_remote_file_returns_other_errors() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "book.xlsx", b"v1");
        let server = Arc::new(FakeFileServer::new());
        server.override_route(
            "GET",
            "/v0/files/f1/xlsx/lint",
            400,
            r#"{"error":{"code":"INVALID_ARG","message":"bad range"}}"#,
        );
        let sync = coordinator(server.clone(), ContentCache::in_memory());

        let client = sync.client();
        let err = sync
            .with_remote_file(&path, |remote| async move {
                client.files_lint(&remote, &[]).await
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "bad range");
        assert_eq!(
            server.lines(),
            vec!["POST /v0/files", "GET /v0/files/f1/xlsx/lint"]
        );
    }

    #[tokio::test]
    async fn test_end_to_end_across_processes() {
        let dir = TempDir::new().unwrap();
        let cache_dir = dir.path().join("cache");
        let path = write(&dir, "book.xlsx", b"v1");
        let server = Arc::new(FakeFileServer::new());

        // First run creates the file.
        let sync = coordinator(server.clone(), ContentCache::in_dir(&cache_dir));
        assert_eq!(
            sync.ensure_uploaded(&path).await.unwrap(),
            RemoteFile::new("f1", "r1")
        );

        // The workbook changes between runs: a new revision of the same file.
        std::fs::write(&path, b"v2").unwrap();
        let sync = coordinator(server.clone(), ContentCache::in_dir(&cache_dir));
        assert_eq!(
            sync.ensure_uploaded(&path).await.unwrap(),
            RemoteFile::new("f1", "r2")
        );

        // Nothing changed: no requests at all.
        server.clear_requests();
        let sync = coordinator(server.clone(), ContentCache::in_dir(&cache_dir));
        assert_eq!(
            sync.ensure_uploaded(&path).await.unwrap(),
            RemoteFile::new("f1", "r2")
        );
        assert!(server.lines().is_empty());
    }
}

//! Disk-backed blob store.
//!
//! Stores file payloads beneath `base_path/{key}` and virtual-folder markers
//! as directories (their keys end with `/`). The store knows nothing about
//! file records; it deals purely in keys handed down by the path resolver.

use crate::errors::{AppError, AppResult};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

const MAX_KEY_LEN: usize = 1024;

/// Metadata returned by `stat`.
#[derive(Debug, Clone)]
pub struct BlobStat {
    pub size: u64,
    pub is_marker: bool,
}

#[derive(Clone)]
pub struct BlobStore {
    base_path: PathBuf,
    public_url: String,
    presign_secret: String,
}

impl BlobStore {
    pub fn new(
        base_path: impl Into<PathBuf>,
        public_url: impl Into<String>,
        presign_secret: impl Into<String>,
    ) -> Self {
        Self {
            base_path: base_path.into(),
            public_url: public_url.into(),
            presign_secret: presign_secret.into(),
        }
    }

    /// Root directory of the store; probes write beneath it.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    fn ensure_key_safe(key: &str) -> AppResult<()> {
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(AppError::Storage("invalid blob key".into()));
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(AppError::Storage("invalid blob key".into()));
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(AppError::Storage("invalid blob key".into()));
        }
        Ok(())
    }

    fn blob_path(&self, key: &str) -> AppResult<PathBuf> {
        Self::ensure_key_safe(key)?;
        let mut path = self.base_path.clone();
        for segment in key.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        Ok(path)
    }

    fn is_marker_key(key: &str) -> bool {
        key.ends_with('/')
    }

    /// Write a payload durably: temp file, fsync, then rename into place.
    pub async fn put(&self, key: &str, bytes: &[u8]) -> AppResult<()> {
        if Self::is_marker_key(key) {
            return Err(AppError::Storage(
                "marker keys carry no payload; use put_marker".into(),
            ));
        }
        let file_path = self.blob_path(key)?;
        let parent = file_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| AppError::Storage("blob key missing parent directory".into()))?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;
        if let Err(err) = write_durably(&mut file, bytes).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err.into());
            }
        }
        Ok(())
    }

    /// Create a zero-byte folder marker (a directory on disk).
    pub async fn put_marker(&self, key: &str) -> AppResult<()> {
        if !Self::is_marker_key(key) {
            return Err(AppError::Storage("folder marker keys must end with /".into()));
        }
        let dir = self.blob_path(key.trim_end_matches('/'))?;
        fs::create_dir_all(&dir).await?;
        Ok(())
    }

    /// Open a payload for streaming out. Returns its length and a file handle.
    pub async fn get(&self, key: &str) -> AppResult<(u64, File)> {
        let file_path = self.blob_path(key)?;
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                AppError::NotFound(format!("blob `{key}`"))
            } else {
                AppError::Io(err)
            }
        })?;
        let len = file.metadata().await?.len();
        Ok((len, file))
    }

    /// Metadata lookup; `Ok(None)` when the key does not exist.
    pub async fn stat(&self, key: &str) -> AppResult<Option<BlobStat>> {
        let path = if Self::is_marker_key(key) {
            self.blob_path(key.trim_end_matches('/'))?
        } else {
            self.blob_path(key)?
        };
        match fs::metadata(&path).await {
            Ok(meta) => Ok(Some(BlobStat {
                size: if meta.is_dir() { 0 } else { meta.len() },
                is_marker: meta.is_dir(),
            })),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Copy a payload (or marker) to a new key.
    pub async fn copy(&self, src_key: &str, dest_key: &str) -> AppResult<()> {
        if Self::is_marker_key(src_key) {
            return self.put_marker(dest_key).await;
        }
        let src = self.blob_path(src_key)?;
        let dest = self.blob_path(dest_key)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(&src, &dest).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                AppError::NotFound(format!("blob `{src_key}`"))
            } else {
                AppError::Io(err)
            }
        })?;
        Ok(())
    }

    /// Remove a payload or marker. Returns `false` when it was already gone.
    ///
    /// Deleting a marker removes the subtree beneath it; callers only delete
    /// markers whose contents are already condemned (bin cleanup).
    pub async fn delete(&self, key: &str) -> AppResult<bool> {
        if Self::is_marker_key(key) {
            let dir = self.blob_path(key.trim_end_matches('/'))?;
            return match fs::remove_dir_all(&dir).await {
                Ok(()) => Ok(true),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
                Err(err) => Err(err.into()),
            };
        }

        let file_path = self.blob_path(key)?;
        let removed = match fs::remove_file(&file_path).await {
            Ok(()) => true,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("blob {} already missing", file_path.display());
                false
            }
            Err(err) => return Err(err.into()),
        };

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(removed)
    }

    /// Best-effort bulk delete; returns (removed, failed) counts. Keys that
    /// were already gone count as neither.
    pub async fn delete_many(&self, keys: &[String]) -> (usize, usize) {
        let mut removed = 0;
        let mut failed = 0;
        for key in keys {
            match self.delete(key).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(err) => {
                    failed += 1;
                    tracing::warn!(key = %key, error = %err, "failed to delete blob");
                }
            }
        }
        (removed, failed)
    }

    /// Recursively list payload keys under a prefix.
    pub async fn list(&self, prefix: &str) -> AppResult<Vec<String>> {
        let root = self.blob_path(prefix.trim_end_matches('/'))?;
        let mut keys = Vec::new();
        let mut stack = vec![root];
        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    stack.push(path);
                } else if let Some(key) = self.key_for(&path) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.base_path).ok()?;
        let segments: Vec<&str> = rel.iter().filter_map(|s| s.to_str()).collect();
        Some(segments.join("/"))
    }

    /// Build a presigned download URL valid for `ttl_secs`.
    pub fn presign(&self, key: &str, ttl_secs: i64) -> AppResult<String> {
        Self::ensure_key_safe(key)?;
        let expires = Utc::now().timestamp() + ttl_secs.max(1);
        let sig = self.signature(key, expires);
        Ok(format!(
            "{}/dl?key={}&expires={}&sig={}",
            self.public_url.trim_end_matches('/'),
            urlencoding::encode(key),
            expires,
            sig
        ))
    }

    /// Check a presigned request: signature must match and not be expired.
    pub fn verify_presigned(&self, key: &str, expires: i64, sig: &str) -> bool {
        if Self::ensure_key_safe(key).is_err() {
            return false;
        }
        if expires < Utc::now().timestamp() {
            return false;
        }
        self.signature(key, expires) == sig
    }

    fn signature(&self, key: &str, expires: i64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.presign_secret.as_bytes());
        hasher.update(b"\n");
        hasher.update(key.as_bytes());
        hasher.update(b"\n");
        hasher.update(expires.to_string().as_bytes());
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }

    /// Remove empty directories up to the store root after a delete.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(()) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

async fn write_durably(file: &mut File, bytes: &[u8]) -> io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &tempfile::TempDir) -> BlobStore {
        BlobStore::new(dir.path(), "http://localhost:3000", "test-secret")
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        store
            .put("Local Users/u1/Drive/notes.txt", b"hello")
            .await
            .unwrap();
        let (len, _file) = store.get("Local Users/u1/Drive/notes.txt").await.unwrap();
        assert_eq!(len, 5);

        let stat = store
            .stat("Local Users/u1/Drive/notes.txt")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stat.size, 5);
        assert!(!stat.is_marker);
    }

    #[tokio::test]
    async fn test_markers() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        store.put_marker("Local Users/u1/Drive/").await.unwrap();
        let stat = store.stat("Local Users/u1/Drive/").await.unwrap().unwrap();
        assert!(stat.is_marker);

        assert!(store.put("Local Users/u1/Drive/", b"x").await.is_err());
        assert!(store.put_marker("Local Users/u1/Drive").await.is_err());
    }

    #[tokio::test]
    async fn test_copy_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        store.put("u/Drive/a.txt", b"payload").await.unwrap();
        store.copy("u/Drive/a.txt", "u/Bin/a.txt").await.unwrap();

        assert!(store.delete("u/Drive/a.txt").await.unwrap());
        assert!(!store.delete("u/Drive/a.txt").await.unwrap());
        assert!(store.stat("u/Bin/a.txt").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_list_under_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        store.put("u/Bin/a.txt", b"1").await.unwrap();
        store.put("u/Bin/docs/b.txt", b"2").await.unwrap();
        store.put("u/Drive/c.txt", b"3").await.unwrap();

        let keys = store.list("u/Bin/").await.unwrap();
        assert_eq!(keys, vec!["u/Bin/a.txt", "u/Bin/docs/b.txt"]);

        assert!(store.list("u/Missing/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_key_safety() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        assert!(store.put("../escape", b"x").await.is_err());
        assert!(store.put("/rooted", b"x").await.is_err());
        assert!(store.get("a\\b").await.is_err());
    }

    #[test]
    fn test_presign_verify() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        let url = store.presign("u/Drive/a b.txt", 60).unwrap();
        assert!(url.starts_with("http://localhost:3000/dl?key=u%2FDrive%2Fa%20b.txt&expires="));

        let expires = Utc::now().timestamp() + 60;
        let sig = store.signature("u/Drive/a b.txt", expires);
        assert!(store.verify_presigned("u/Drive/a b.txt", expires, &sig));
        assert!(!store.verify_presigned("u/Drive/other.txt", expires, &sig));
        assert!(!store.verify_presigned("u/Drive/a b.txt", expires - 120, &sig));
    }
}

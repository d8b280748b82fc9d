//! File Lifecycle Engine.
//!
//! Orchestrates the metadata store, the blob store, and the cache across
//! upload, rename, duplicate, move-to-bin, restore, permanent delete,
//! empty-bin, and folder bootstrap. There is no cross-store transaction: each
//! operation is written to tolerate one store failing mid-flight, with the
//! metadata store as the authoritative outcome and the cache as purely
//! advisory.

use crate::{
    errors::{AppError, AppResult},
    models::{
        file_record::{FileRecord, Location},
        outcome::{DeclineReason, EmptyBinReport, Outcome},
        user::{AuthProvider, User},
    },
    repositories::{FileRepository, UserRepository},
    services::{
        blob_store::BlobStore,
        cache::{CacheService, FILE_TTL_SECS, LISTING_TTL_SECS, STATS_TTL_SECS},
        path,
        quota::{DEFAULT_STORAGE_LIMIT, QuotaAccountant},
    },
};
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// In-process mutual exclusion keyed by record id (or a composite key for
/// operations that have no record yet). Entries are never reclaimed; the map
/// is bounded by the set of keys touched since startup.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    inner: Arc<AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl KeyedLocks {
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut map = self.inner.lock().await;
            map.entry(key.to_string()).or_default().clone()
        };
        slot.lock_owned().await
    }
}

/// Input for uploading a new file.
pub struct UploadInput {
    pub name: String,
    pub path: String,
    pub mime_type: String,
    /// Caller-supplied metadata entries, merged with computed ones (md5).
    pub metadata: Option<serde_json::Value>,
    pub data: Bytes,
}

/// Usage aggregate served to clients and cached under
/// `user:{owner}:storage_stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageStats {
    pub used: i64,
    pub limit: i64,
}

#[derive(Clone)]
pub struct FileLifecycleService {
    files: FileRepository,
    users: UserRepository,
    blobs: BlobStore,
    quota: QuotaAccountant,
    cache: Option<CacheService>,
    locks: KeyedLocks,
}

impl FileLifecycleService {
    pub fn new(
        files: FileRepository,
        users: UserRepository,
        blobs: BlobStore,
        quota: QuotaAccountant,
        cache: Option<CacheService>,
    ) -> Self {
        Self {
            files,
            users,
            blobs,
            quota,
            cache,
            locks: KeyedLocks::default(),
        }
    }

    // === Account provisioning ===

    /// Registration hook: create the user row with the default quota, then
    /// bootstrap the folder structure.
    pub async fn provision_user(&self, user_id: &str, provider: AuthProvider) -> AppResult<User> {
        let now = Utc::now();
        let user = self
            .users
            .create(&User {
                id: user_id.to_string(),
                auth_provider: provider,
                storage_limit: DEFAULT_STORAGE_LIMIT,
                storage_used: 0,
                created_at: now,
                updated_at: now,
            })
            .await?;
        self.bootstrap_folders(user_id).await?;
        Ok(user)
    }

    /// Create the Drive/Bin blob markers and root records. Idempotent:
    /// re-running never duplicates the root records.
    pub async fn bootstrap_folders(&self, owner_id: &str) -> AppResult<()> {
        let user = self.users.get_by_id(owner_id).await?;
        for location in [Location::Drive, Location::Bin] {
            let marker = path::resolve_key(owner_id, user.auth_provider, location, "/", "", true)?;
            self.blobs.put_marker(&marker).await?;

            if self
                .files
                .find_by_name_and_path(owner_id, "", "/", location)
                .await?
                .is_none()
            {
                let now = Utc::now();
                match self
                    .files
                    .insert(&FileRecord {
                        id: Uuid::new_v4(),
                        owner_id: owner_id.to_string(),
                        object_name: String::new(),
                        object_path: "/".to_string(),
                        object_type: "folder".to_string(),
                        mime_type: "inode/directory".to_string(),
                        size: 0,
                        is_folder: true,
                        location,
                        metadata: None,
                        last_modified: now,
                        created_at: now,
                        updated_at: now,
                    })
                    .await
                {
                    Ok(_) => {}
                    // concurrent bootstrap already inserted the marker
                    Err(AppError::Conflict(_)) => {}
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(())
    }

    // === Mutating operations ===

    /// Upload a new file into the Drive.
    ///
    /// Name conflicts and capacity violations are declines, not errors; both
    /// are checked before any blob write.
    pub async fn upload(&self, owner_id: &str, input: UploadInput) -> AppResult<Outcome<FileRecord>> {
        let name = input.name.trim().to_string();
        path::validate_name(&name)?;
        let object_path = path::normalize_path(&input.path)?;
        let user = self.users.get_by_id(owner_id).await?;
        let size = input.data.len() as i64;

        let _guard = self
            .locks
            .acquire(&format!("upload:{owner_id}:drive:{object_path}{name}"))
            .await;

        if self
            .files
            .find_by_name_and_path(owner_id, &name, &object_path, Location::Drive)
            .await?
            .is_some()
        {
            return Ok(Outcome::Declined(DeclineReason::NameTaken));
        }
        if let Some(reason) = self.quota.check_upload(&user, size).await? {
            return Ok(Outcome::Declined(reason));
        }

        let key = path::resolve_key(
            owner_id,
            user.auth_provider,
            Location::Drive,
            &object_path,
            &name,
            false,
        )?;
        self.blobs.put(&key, &input.data).await?;

        let now = Utc::now();
        let record = FileRecord {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            object_name: name,
            object_path,
            object_type: classify_mime(&input.mime_type).to_string(),
            mime_type: input.mime_type,
            size,
            is_folder: false,
            location: Location::Drive,
            metadata: Some(metadata_bag(input.metadata, &input.data)),
            last_modified: now,
            created_at: now,
            updated_at: now,
        };
        let inserted = match self.files.insert(&record).await {
            Ok(inserted) => inserted,
            Err(err) => {
                if let Err(cleanup) = self.blobs.delete(&key).await {
                    tracing::warn!(key = %key, error = %cleanup, "failed to remove blob after insert failure");
                }
                return Err(err);
            }
        };

        self.quota.sync_usage(owner_id).await?;
        self.invalidate_caches(owner_id, &[Location::Drive], &[inserted.id], true)
            .await;
        Ok(Outcome::Done(inserted))
    }

    /// Create a virtual folder in the Drive.
    pub async fn create_folder(
        &self,
        owner_id: &str,
        raw_path: &str,
        name: &str,
    ) -> AppResult<Outcome<FileRecord>> {
        let name = name.trim().to_string();
        path::validate_name(&name)?;
        let object_path = path::normalize_path(raw_path)?;
        let user = self.users.get_by_id(owner_id).await?;

        let _guard = self
            .locks
            .acquire(&format!("upload:{owner_id}:drive:{object_path}{name}"))
            .await;

        if self
            .files
            .find_by_name_and_path(owner_id, &name, &object_path, Location::Drive)
            .await?
            .is_some()
        {
            return Ok(Outcome::Declined(DeclineReason::NameTaken));
        }

        let key = path::resolve_key(
            owner_id,
            user.auth_provider,
            Location::Drive,
            &object_path,
            &name,
            true,
        )?;
        self.blobs.put_marker(&key).await?;

        let now = Utc::now();
        let inserted = self
            .files
            .insert(&FileRecord {
                id: Uuid::new_v4(),
                owner_id: owner_id.to_string(),
                object_name: name,
                object_path,
                object_type: "folder".to_string(),
                mime_type: "inode/directory".to_string(),
                size: 0,
                is_folder: true,
                location: Location::Drive,
                metadata: None,
                last_modified: now,
                created_at: now,
                updated_at: now,
            })
            .await?;

        self.invalidate_caches(owner_id, &[Location::Drive], &[inserted.id], false)
            .await;
        Ok(Outcome::Done(inserted))
    }

    /// Rename a record in place, carrying the original extension when the new
    /// name omits a recognizable one.
    pub async fn rename(
        &self,
        owner_id: &str,
        file_id: Uuid,
        new_name: &str,
    ) -> AppResult<Outcome<FileRecord>> {
        let _guard = self.locks.acquire(&file_id.to_string()).await;
        let user = self.users.get_by_id(owner_id).await?;
        let record = self.get_mutable_record(owner_id, file_id).await?;

        let final_name = carry_extension(&record.object_name, new_name.trim());
        path::validate_name(&final_name)?;
        if final_name == record.object_name {
            return Ok(Outcome::Done(record));
        }
        if self
            .files
            .find_by_name_and_path(owner_id, &final_name, &record.object_path, record.location)
            .await?
            .is_some()
        {
            return Ok(Outcome::Declined(DeclineReason::NameTaken));
        }

        if !record.is_folder {
            let src = Self::record_key(&record, user.auth_provider)?;
            let dest = path::resolve_key(
                owner_id,
                user.auth_provider,
                record.location,
                &record.object_path,
                &final_name,
                false,
            )?;
            match self.blobs.copy(&src, &dest).await {
                Ok(()) => {
                    if let Err(err) = self.blobs.delete(&src).await {
                        tracing::warn!(file_id = %file_id, key = %src, error = %err,
                            "failed to remove old blob after rename");
                    }
                }
                Err(err) => {
                    // partial failure: metadata proceeds, blob stays at the
                    // old key until a later reconciliation pass
                    tracing::warn!(file_id = %file_id, src = %src, dest = %dest, error = %err,
                        "blob copy failed during rename");
                }
            }
        }

        let updated = self
            .files
            .update_name(file_id, &final_name, Utc::now())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("file `{file_id}`")))?;

        self.invalidate_caches(owner_id, &[record.location], &[file_id], false)
            .await;
        Ok(Outcome::Done(updated))
    }

    /// Duplicate a file under the next available "name (n)" suffix.
    pub async fn duplicate(&self, owner_id: &str, file_id: Uuid) -> AppResult<Outcome<FileRecord>> {
        let _guard = self.locks.acquire(&file_id.to_string()).await;
        let user = self.users.get_by_id(owner_id).await?;
        let record = self.get_mutable_record(owner_id, file_id).await?;
        if record.is_folder {
            return Ok(Outcome::Declined(DeclineReason::DuplicateOfFolder));
        }

        let siblings = self
            .files
            .find_by_path(owner_id, &record.object_path, record.location)
            .await?;
        let names: Vec<String> = siblings.into_iter().map(|r| r.object_name).collect();
        let new_name = next_duplicate_name(&names, &record.object_name);

        let now = Utc::now();
        let inserted = self
            .files
            .insert(&FileRecord {
                id: Uuid::new_v4(),
                owner_id: owner_id.to_string(),
                object_name: new_name,
                object_path: record.object_path.clone(),
                object_type: record.object_type.clone(),
                mime_type: record.mime_type.clone(),
                size: record.size,
                is_folder: false,
                location: record.location,
                metadata: record.metadata.clone(),
                last_modified: now,
                created_at: now,
                updated_at: now,
            })
            .await?;

        let src = Self::record_key(&record, user.auth_provider)?;
        let dest = Self::record_key(&inserted, user.auth_provider)?;
        if let Err(err) = self.blobs.copy(&src, &dest).await {
            tracing::error!(file_id = %inserted.id, src = %src, error = %err,
                "blob copy failed; rolling back duplicate record");
            self.roll_back_duplicate(inserted.id).await;
            return Err(err);
        }

        self.quota.sync_usage(owner_id).await?;
        self.invalidate_caches(
            owner_id,
            &[record.location],
            &[record.id, inserted.id],
            true,
        )
        .await;
        Ok(Outcome::Done(inserted))
    }

    /// Compensating action for `duplicate`: the one place a true rollback is
    /// attempted across stores.
    async fn roll_back_duplicate(&self, record_id: Uuid) {
        if let Err(err) = self.files.delete(record_id).await {
            tracing::error!(file_id = %record_id, error = %err,
                "failed to roll back duplicate record; metadata and blob store have diverged");
        }
    }

    /// Move a Drive record to the Bin. No-op when already in the Bin.
    pub async fn move_to_bin(&self, owner_id: &str, file_id: Uuid) -> AppResult<Outcome<FileRecord>> {
        self.relocate(owner_id, file_id, Location::Bin).await
    }

    /// Restore a Bin record to the Drive. No-op when already in the Drive.
    pub async fn restore(&self, owner_id: &str, file_id: Uuid) -> AppResult<Outcome<FileRecord>> {
        self.relocate(owner_id, file_id, Location::Drive).await
    }

    async fn relocate(
        &self,
        owner_id: &str,
        file_id: Uuid,
        target: Location,
    ) -> AppResult<Outcome<FileRecord>> {
        let _guard = self.locks.acquire(&file_id.to_string()).await;
        let user = self.users.get_by_id(owner_id).await?;
        let record = self.get_mutable_record(owner_id, file_id).await?;

        if record.location == target {
            return Ok(Outcome::Done(record));
        }
        if self
            .files
            .find_by_name_and_path(owner_id, &record.object_name, &record.object_path, target)
            .await?
            .is_some()
        {
            return Ok(Outcome::Declined(DeclineReason::NameTaken));
        }

        // folder markers stay put; only file payloads move between prefixes
        if !record.is_folder {
            let src = Self::record_key(&record, user.auth_provider)?;
            let dest = path::resolve_key(
                owner_id,
                user.auth_provider,
                target,
                &record.object_path,
                &record.object_name,
                false,
            )?;
            match self.blobs.copy(&src, &dest).await {
                Ok(()) => {
                    if let Err(err) = self.blobs.delete(&src).await {
                        tracing::warn!(file_id = %file_id, key = %src, error = %err,
                            "failed to remove source blob after move");
                    }
                }
                Err(AppError::NotFound(_)) => {
                    tracing::warn!(file_id = %file_id, key = %src,
                        "source blob missing during move; continuing with metadata");
                }
                Err(err) => return Err(err),
            }
        }

        let updated = self
            .files
            .update_location(file_id, target, Utc::now())
            .await?
            .ok_or_else(|| AppError::NotFound(format!("file `{file_id}`")))?;

        self.invalidate_caches(owner_id, &[record.location, target], &[file_id], false)
            .await;
        Ok(Outcome::Done(updated))
    }

    /// Permanently remove a record. Only reachable through the Bin.
    pub async fn delete_forever(
        &self,
        owner_id: &str,
        file_id: Uuid,
    ) -> AppResult<Outcome<FileRecord>> {
        let _guard = self.locks.acquire(&file_id.to_string()).await;
        let user = self.users.get_by_id(owner_id).await?;
        let record = self.get_mutable_record(owner_id, file_id).await?;

        if record.location != Location::Bin {
            return Ok(Outcome::Declined(DeclineReason::NotInBin));
        }

        if record.is_folder {
            // only the Bin-side marker is condemned; the Drive-side one may
            // still shelter live children that kept their paths
            let key = Self::record_key(&record, user.auth_provider)?;
            if let Err(err) = self.blobs.delete(&key).await {
                tracing::warn!(file_id = %file_id, key = %key, error = %err,
                    "failed to delete folder marker");
            }
        } else {
            let key = Self::record_key(&record, user.auth_provider)?;
            match self.blobs.delete(&key).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!(file_id = %file_id, key = %key, "blob already gone");
                }
                Err(err) => {
                    tracing::warn!(file_id = %file_id, key = %key, error = %err,
                        "failed to delete blob; removing metadata anyway");
                }
            }
        }

        self.files.delete(file_id).await?;
        self.quota.sync_usage(owner_id).await?;
        self.invalidate_caches(owner_id, &[Location::Bin], &[file_id], true)
            .await;
        Ok(Outcome::Done(record))
    }

    /// Delete everything in the owner's bin: best-effort blob deletes, bulk
    /// metadata delete (keeping the Bin root marker), an orphan sweep under
    /// the Bin prefix, then a quota resync.
    pub async fn empty_bin(&self, owner_id: &str) -> AppResult<EmptyBinReport> {
        let _guard = self.locks.acquire(&format!("bin:{owner_id}")).await;
        let user = self.users.get_by_id(owner_id).await?;
        let entries = self.files.find_bin_entries(owner_id).await?;
        let freed_bytes: i64 = entries.iter().map(|r| r.size).sum();

        // payloads first, folder markers afterwards
        let mut keys = Vec::with_capacity(entries.len());
        for record in entries.iter().filter(|r| !r.is_folder) {
            keys.push(Self::record_key(record, user.auth_provider)?);
        }
        for record in entries.iter().filter(|r| r.is_folder) {
            keys.push(Self::record_key(record, user.auth_provider)?);
        }
        let (_removed, failed) = self.blobs.delete_many(&keys).await;

        let deleted_count = self.files.delete_bin_entries(owner_id).await?;

        let bin_prefix = format!("{}Bin/", path::user_prefix(owner_id, user.auth_provider));
        match self.blobs.list(&bin_prefix).await {
            Ok(orphans) if !orphans.is_empty() => {
                tracing::warn!(owner = %owner_id, count = orphans.len(),
                    "sweeping orphaned bin blobs");
                let _ = self.blobs.delete_many(&orphans).await;
            }
            Ok(_) => {}
            Err(err) => {
                tracing::warn!(owner = %owner_id, error = %err, "bin orphan sweep failed");
            }
        }
        // directory pruning may have taken the bin root marker with it
        self.blobs.put_marker(&bin_prefix).await?;

        self.quota.sync_usage(owner_id).await?;
        let file_ids: Vec<Uuid> = entries.iter().map(|r| r.id).collect();
        self.invalidate_caches(owner_id, &[Location::Bin], &file_ids, true)
            .await;

        Ok(EmptyBinReport {
            deleted_count,
            freed_bytes,
            blob_failures: failed as u64,
        })
    }

    // === Read paths ===

    /// List records at an exact normalized path. Root markers never leak into
    /// listings. Results are cached per (owner, location, path).
    pub async fn files_by_path(
        &self,
        owner_id: &str,
        raw_path: &str,
        location: Location,
    ) -> AppResult<Vec<FileRecord>> {
        let object_path = path::normalize_path(raw_path)?;
        let cache_key = CacheService::listing_key(owner_id, location, &object_path);
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get_json::<Vec<FileRecord>>(&cache_key).await {
                return Ok(hit);
            }
        }

        let records: Vec<FileRecord> = self
            .files
            .find_by_path(owner_id, &object_path, location)
            .await?
            .into_iter()
            .filter(|r| !r.object_name.is_empty())
            .collect();

        if let Some(cache) = &self.cache {
            cache.set_json(&cache_key, &records, LISTING_TTL_SECS).await;
        }
        Ok(records)
    }

    /// Cache-first record lookup. Mutations invalidate `file:{id}` so a
    /// subsequent read observes the write.
    pub async fn file_by_id(&self, owner_id: &str, file_id: Uuid) -> AppResult<FileRecord> {
        let cache_key = CacheService::file_key(file_id);
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get_json::<FileRecord>(&cache_key).await {
                if hit.owner_id != owner_id {
                    return Err(AppError::Forbidden("not your file".into()));
                }
                return Ok(hit);
            }
        }

        let record = self
            .files
            .find_by_id(file_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("file `{file_id}`")))?;
        if record.owner_id != owner_id {
            return Err(AppError::Forbidden("not your file".into()));
        }

        if let Some(cache) = &self.cache {
            cache.set_json(&cache_key, &record, FILE_TTL_SECS).await;
        }
        Ok(record)
    }

    /// Open a file payload for streaming out.
    pub async fn download(
        &self,
        owner_id: &str,
        file_id: Uuid,
    ) -> AppResult<(FileRecord, u64, tokio::fs::File)> {
        let record = self.file_by_id(owner_id, file_id).await?;
        if record.is_folder {
            return Err(AppError::BadRequest("folders have no payload".into()));
        }
        let user = self.users.get_by_id(owner_id).await?;
        let key = Self::record_key(&record, user.auth_provider)?;
        let (len, file) = self.blobs.get(&key).await?;
        Ok((record, len, file))
    }

    /// Build a presigned download URL for a file.
    pub async fn presign_download(
        &self,
        owner_id: &str,
        file_id: Uuid,
        ttl_secs: i64,
    ) -> AppResult<String> {
        let record = self.file_by_id(owner_id, file_id).await?;
        if record.is_folder {
            return Err(AppError::BadRequest("folders have no payload".into()));
        }
        let user = self.users.get_by_id(owner_id).await?;
        let key = Self::record_key(&record, user.auth_provider)?;
        self.blobs.presign(&key, ttl_secs)
    }

    /// Redeem a presigned download link.
    pub async fn open_presigned(
        &self,
        key: &str,
        expires: i64,
        sig: &str,
    ) -> AppResult<(u64, tokio::fs::File)> {
        if !self.blobs.verify_presigned(key, expires, sig) {
            return Err(AppError::Forbidden("invalid or expired link".into()));
        }
        self.blobs.get(key).await
    }

    /// Usage aggregate, cached with a bounded TTL.
    pub async fn storage_stats(&self, owner_id: &str) -> AppResult<StorageStats> {
        let cache_key = CacheService::stats_key(owner_id);
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get_json::<StorageStats>(&cache_key).await {
                return Ok(hit);
            }
        }

        let user = self.users.get_by_id(owner_id).await?;
        let stats = StorageStats {
            used: self.quota.calculate_usage(owner_id).await?,
            limit: user.storage_limit,
        };
        if let Some(cache) = &self.cache {
            cache.set_json(&cache_key, &stats, STATS_TTL_SECS).await;
        }
        Ok(stats)
    }

    // === Internals ===

    /// Fetch a record for mutation: must exist, belong to the caller, and not
    /// be a root marker.
    async fn get_mutable_record(&self, owner_id: &str, file_id: Uuid) -> AppResult<FileRecord> {
        let record = self
            .files
            .find_by_id(file_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("file `{file_id}`")))?;
        if record.owner_id != owner_id {
            return Err(AppError::Forbidden("not your file".into()));
        }
        if record.is_root_marker() {
            return Err(AppError::BadRequest("root folders cannot be modified".into()));
        }
        Ok(record)
    }

    fn record_key(record: &FileRecord, provider: AuthProvider) -> AppResult<String> {
        path::resolve_key(
            &record.owner_id,
            provider,
            record.location,
            &record.object_path,
            &record.object_name,
            record.is_folder,
        )
    }

    /// Fire-and-forget invalidation: per-file keys, the stats aggregate when
    /// bytes changed, and the touched owner/location listing prefixes.
    async fn invalidate_caches(
        &self,
        owner_id: &str,
        locations: &[Location],
        file_ids: &[Uuid],
        bytes_changed: bool,
    ) {
        let Some(cache) = &self.cache else {
            return;
        };
        let mut keys: Vec<String> = file_ids.iter().map(|id| CacheService::file_key(*id)).collect();
        if bytes_changed {
            keys.push(CacheService::stats_key(owner_id));
        }
        cache.del(&keys).await;
        for location in locations {
            cache
                .del_pattern(&CacheService::listing_pattern(owner_id, *location))
                .await;
        }
    }
}

/// Coarse object classification from the MIME type.
fn classify_mime(mime_type: &str) -> &'static str {
    for family in ["image", "video", "audio", "text"] {
        if mime_type.starts_with(family) {
            return family;
        }
    }
    "file"
}

/// Merge caller metadata with computed entries (md5 of the payload).
fn metadata_bag(extra: Option<serde_json::Value>, data: &[u8]) -> String {
    let mut bag = match extra {
        Some(serde_json::Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };
    bag.insert(
        "md5".to_string(),
        serde_json::Value::String(format!("{:x}", md5::compute(data))),
    );
    serde_json::Value::Object(bag).to_string()
}

/// Extract a recognizable extension: short, alphanumeric, after a non-leading
/// dot.
fn file_extension(name: &str) -> Option<&str> {
    let pos = name.rfind('.')?;
    if pos == 0 || pos + 1 == name.len() {
        return None;
    }
    let ext = &name[pos + 1..];
    (ext.len() <= 10 && ext.chars().all(char::is_alphanumeric)).then_some(ext)
}

/// Carry the old extension onto a new name that omits one.
fn carry_extension(old_name: &str, new_name: &str) -> String {
    if file_extension(new_name).is_some() {
        return new_name.to_string();
    }
    match file_extension(old_name) {
        Some(ext) => format!("{new_name}.{ext}"),
        None => new_name.to_string(),
    }
}

/// Next available `"name (n)"` suffix: n is one past the highest suffix among
/// sibling names sharing the base stem and extension.
fn next_duplicate_name(existing: &[String], source: &str) -> String {
    let (stem, ext) = match file_extension(source) {
        Some(ext) => (&source[..source.len() - ext.len() - 1], format!(".{ext}")),
        None => (source, String::new()),
    };

    let mut max_suffix = 0u32;
    for name in existing {
        let Some(rest) = name.strip_prefix(stem) else {
            continue;
        };
        let Some(rest) = rest.strip_suffix(ext.as_str()) else {
            continue;
        };
        let Some(inner) = rest.strip_prefix(" (").and_then(|r| r.strip_suffix(')')) else {
            continue;
        };
        if let Ok(n) = inner.parse::<u32>() {
            max_suffix = max_suffix.max(n);
        }
    }
    format!("{stem} ({}){ext}", max_suffix + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::quota::MAX_FILE_SIZE;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup() -> (FileLifecycleService, tempfile::TempDir) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        for stmt in include_str!("../../migrations/0001_init.sql")
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            sqlx::query(stmt).execute(&pool).await.unwrap();
        }

        let db = Arc::new(pool);
        let files = FileRepository::new(db.clone());
        let users = UserRepository::new(db.clone());
        let dir = tempfile::tempdir().unwrap();
        let blobs = BlobStore::new(dir.path(), "http://localhost:3000", "test-secret");
        let quota = QuotaAccountant::new(files.clone(), users.clone());
        let service = FileLifecycleService::new(files, users, blobs, quota, None);
        (service, dir)
    }

    fn upload_input(name: &str, path: &str, bytes: &[u8]) -> UploadInput {
        UploadInput {
            name: name.to_string(),
            path: path.to_string(),
            mime_type: "text/plain".to_string(),
            metadata: None,
            data: Bytes::copy_from_slice(bytes),
        }
    }

    async fn usage(service: &FileLifecycleService, owner: &str) -> i64 {
        service.users.get_by_id(owner).await.unwrap().storage_used
    }

    #[tokio::test]
    async fn test_upload_creates_record_blob_and_usage() {
        let (service, _dir) = setup().await;
        service
            .provision_user("u1", AuthProvider::Local)
            .await
            .unwrap();

        let record = service
            .upload("u1", upload_input("notes.txt", "/", &[7u8; 500]))
            .await
            .unwrap()
            .unwrap_done();

        assert_eq!(record.object_path, "/");
        assert_eq!(record.size, 500);
        assert_eq!(record.location, Location::Drive);
        assert_eq!(usage(&service, "u1").await, 500);

        let stat = service
            .blobs
            .stat("Local Users/u1/Drive/notes.txt")
            .await
            .unwrap()
            .expect("blob should exist");
        assert_eq!(stat.size, 500);
    }

    #[tokio::test]
    async fn test_upload_declines_name_conflict() {
        let (service, _dir) = setup().await;
        service
            .provision_user("u1", AuthProvider::Local)
            .await
            .unwrap();

        service
            .upload("u1", upload_input("a.txt", "/", b"one"))
            .await
            .unwrap()
            .unwrap_done();
        let second = service
            .upload("u1", upload_input("a.txt", "/", b"two"))
            .await
            .unwrap();
        assert!(matches!(
            second,
            Outcome::Declined(DeclineReason::NameTaken)
        ));
    }

    #[tokio::test]
    async fn test_upload_admission_control_leaves_stores_untouched() {
        let (service, _dir) = setup().await;
        let now = Utc::now();
        service
            .users
            .create(&User {
                id: "tiny".to_string(),
                auth_provider: AuthProvider::Local,
                storage_limit: 1000,
                storage_used: 0,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        service.bootstrap_folders("tiny").await.unwrap();

        service
            .upload("tiny", upload_input("a.bin", "/", &[0u8; 600]))
            .await
            .unwrap()
            .unwrap_done();

        let over_quota = service
            .upload("tiny", upload_input("b.bin", "/", &[0u8; 600]))
            .await
            .unwrap();
        assert!(matches!(
            over_quota,
            Outcome::Declined(DeclineReason::QuotaExceeded)
        ));
        assert!(
            service
                .files
                .find_by_name_and_path("tiny", "b.bin", "/", Location::Drive)
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            service
                .blobs
                .stat("Local Users/tiny/Drive/b.bin")
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(usage(&service, "tiny").await, 600);

        let oversized = service
            .upload(
                "tiny",
                upload_input("huge.bin", "/", &vec![0u8; (MAX_FILE_SIZE + 1) as usize]),
            )
            .await
            .unwrap();
        assert!(matches!(
            oversized,
            Outcome::Declined(DeclineReason::FileTooLarge)
        ));
    }

    #[tokio::test]
    async fn test_rename_carries_extension_and_moves_blob() {
        let (service, _dir) = setup().await;
        service
            .provision_user("u1", AuthProvider::Local)
            .await
            .unwrap();

        let record = service
            .upload("u1", upload_input("notes.txt", "/", b"hello"))
            .await
            .unwrap()
            .unwrap_done();

        let renamed = service
            .rename("u1", record.id, "ideas")
            .await
            .unwrap()
            .unwrap_done();
        assert_eq!(renamed.object_name, "ideas.txt");

        assert!(
            service
                .blobs
                .stat("Local Users/u1/Drive/notes.txt")
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            service
                .blobs
                .stat("Local Users/u1/Drive/ideas.txt")
                .await
                .unwrap()
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_rename_declines_collision() {
        let (service, _dir) = setup().await;
        service
            .provision_user("u1", AuthProvider::Local)
            .await
            .unwrap();

        service
            .upload("u1", upload_input("a.txt", "/", b"a"))
            .await
            .unwrap()
            .unwrap_done();
        let b = service
            .upload("u1", upload_input("b.txt", "/", b"b"))
            .await
            .unwrap()
            .unwrap_done();

        let outcome = service.rename("u1", b.id, "a").await.unwrap();
        assert!(matches!(
            outcome,
            Outcome::Declined(DeclineReason::NameTaken)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_naming_sequence_and_usage() {
        let (service, _dir) = setup().await;
        service
            .provision_user("u1", AuthProvider::Local)
            .await
            .unwrap();

        let original = service
            .upload("u1", upload_input("report.pdf", "/", b"pdf-bytes"))
            .await
            .unwrap()
            .unwrap_done();

        let mut names = Vec::new();
        for _ in 0..3 {
            let copy = service
                .duplicate("u1", original.id)
                .await
                .unwrap()
                .unwrap_done();
            names.push(copy.object_name);
        }
        assert_eq!(
            names,
            vec!["report (1).pdf", "report (2).pdf", "report (3).pdf"]
        );
        assert_eq!(usage(&service, "u1").await, 9 * 4);

        let listing = service
            .files_by_path("u1", "/", Location::Drive)
            .await
            .unwrap();
        assert_eq!(listing.len(), 4);
    }

    #[tokio::test]
    async fn test_duplicate_declined_for_folders() {
        let (service, _dir) = setup().await;
        service
            .provision_user("u1", AuthProvider::Local)
            .await
            .unwrap();

        let folder = service
            .create_folder("u1", "/", "docs")
            .await
            .unwrap()
            .unwrap_done();
        let outcome = service.duplicate("u1", folder.id).await.unwrap();
        assert!(matches!(
            outcome,
            Outcome::Declined(DeclineReason::DuplicateOfFolder)
        ));
    }

    #[tokio::test]
    async fn test_bin_round_trip_and_collisions() {
        let (service, _dir) = setup().await;
        service
            .provision_user("u1", AuthProvider::Local)
            .await
            .unwrap();

        let first = service
            .upload("u1", upload_input("notes.txt", "/", &[1u8; 500]))
            .await
            .unwrap()
            .unwrap_done();

        let binned = service
            .move_to_bin("u1", first.id)
            .await
            .unwrap()
            .unwrap_done();
        assert_eq!(binned.location, Location::Bin);
        assert!(
            service
                .blobs
                .stat("Local Users/u1/Bin/notes.txt")
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            service
                .blobs
                .stat("Local Users/u1/Drive/notes.txt")
                .await
                .unwrap()
                .is_none()
        );

        // the Bin copy does not block a fresh Drive upload
        let second = service
            .upload("u1", upload_input("notes.txt", "/", b"new"))
            .await
            .unwrap()
            .unwrap_done();

        // but restoring now collides with the new Drive file
        let blocked = service.restore("u1", first.id).await.unwrap();
        assert!(matches!(
            blocked,
            Outcome::Declined(DeclineReason::NameTaken)
        ));

        service
            .rename("u1", second.id, "notes-v2")
            .await
            .unwrap()
            .unwrap_done();
        let restored = service.restore("u1", first.id).await.unwrap().unwrap_done();
        assert_eq!(restored.location, Location::Drive);
        assert_eq!(restored.id, first.id);
        assert_eq!(restored.size, first.size);
        assert_eq!(restored.object_path, first.object_path);
    }

    #[tokio::test]
    async fn test_move_to_bin_twice_is_noop() {
        let (service, _dir) = setup().await;
        service
            .provision_user("u1", AuthProvider::Local)
            .await
            .unwrap();

        let record = service
            .upload("u1", upload_input("a.txt", "/", b"a"))
            .await
            .unwrap()
            .unwrap_done();
        service
            .move_to_bin("u1", record.id)
            .await
            .unwrap()
            .unwrap_done();
        let again = service
            .move_to_bin("u1", record.id)
            .await
            .unwrap()
            .unwrap_done();
        assert_eq!(again.location, Location::Bin);
    }

    #[tokio::test]
    async fn test_folder_bin_round_trip() {
        let (service, _dir) = setup().await;
        service
            .provision_user("u1", AuthProvider::Local)
            .await
            .unwrap();

        let folder = service
            .create_folder("u1", "/", "docs")
            .await
            .unwrap()
            .unwrap_done();
        let binned = service
            .move_to_bin("u1", folder.id)
            .await
            .unwrap()
            .unwrap_done();
        assert_eq!(binned.location, Location::Bin);

        let restored = service
            .restore("u1", folder.id)
            .await
            .unwrap()
            .unwrap_done();
        assert_eq!(restored.location, Location::Drive);
    }

    #[tokio::test]
    async fn test_delete_forever_only_from_bin() {
        let (service, _dir) = setup().await;
        service
            .provision_user("u1", AuthProvider::Local)
            .await
            .unwrap();

        let record = service
            .upload("u1", upload_input("a.txt", "/", &[1u8; 100]))
            .await
            .unwrap()
            .unwrap_done();

        let blocked = service.delete_forever("u1", record.id).await.unwrap();
        assert!(matches!(
            blocked,
            Outcome::Declined(DeclineReason::NotInBin)
        ));

        service
            .move_to_bin("u1", record.id)
            .await
            .unwrap()
            .unwrap_done();
        service
            .delete_forever("u1", record.id)
            .await
            .unwrap()
            .unwrap_done();

        assert!(service.files.find_by_id(record.id).await.unwrap().is_none());
        assert_eq!(usage(&service, "u1").await, 0);
    }

    #[tokio::test]
    async fn test_empty_bin_keeps_root_marker() {
        let (service, _dir) = setup().await;
        service
            .provision_user("u1", AuthProvider::Local)
            .await
            .unwrap();

        let mut total = 0i64;
        for (name, size) in [("a.txt", 100usize), ("b.txt", 200), ("c.txt", 300)] {
            let record = service
                .upload("u1", upload_input(name, "/", &vec![1u8; size]))
                .await
                .unwrap()
                .unwrap_done();
            service
                .move_to_bin("u1", record.id)
                .await
                .unwrap()
                .unwrap_done();
            total += size as i64;
        }
        assert_eq!(usage(&service, "u1").await, total);

        let report = service.empty_bin("u1").await.unwrap();
        assert_eq!(report.deleted_count, 3);
        assert_eq!(report.freed_bytes, total);
        assert_eq!(report.blob_failures, 0);
        assert_eq!(usage(&service, "u1").await, 0);

        // bin root marker survives, both as a record and as a blob marker
        assert!(
            service
                .files
                .find_by_name_and_path("u1", "", "/", Location::Bin)
                .await
                .unwrap()
                .is_some()
        );
        let stat = service
            .blobs
            .stat("Local Users/u1/Bin/")
            .await
            .unwrap()
            .expect("bin marker should survive");
        assert!(stat.is_marker);
    }

    #[tokio::test]
    async fn test_bootstrap_is_idempotent_and_markers_hidden() {
        let (service, _dir) = setup().await;
        service
            .provision_user("u1", AuthProvider::Local)
            .await
            .unwrap();
        service.bootstrap_folders("u1").await.unwrap();

        assert!(
            service
                .files_by_path("u1", "/", Location::Drive)
                .await
                .unwrap()
                .is_empty()
        );
        assert!(
            service
                .files_by_path("u1", "/", Location::Bin)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_uploads_into_subfolder() {
        let (service, _dir) = setup().await;
        service
            .provision_user("u1", AuthProvider::Local)
            .await
            .unwrap();

        service
            .create_folder("u1", "/", "docs")
            .await
            .unwrap()
            .unwrap_done();
        let record = service
            .upload("u1", upload_input("deep.txt", "/docs", b"deep"))
            .await
            .unwrap()
            .unwrap_done();
        assert_eq!(record.object_path, "/docs/");
        assert!(
            service
                .blobs
                .stat("Local Users/u1/Drive/docs/deep.txt")
                .await
                .unwrap()
                .is_some()
        );

        let listing = service
            .files_by_path("u1", "/docs", Location::Drive)
            .await
            .unwrap();
        assert_eq!(listing.len(), 1);
    }

    #[tokio::test]
    async fn test_ownership_is_checked() {
        let (service, _dir) = setup().await;
        service
            .provision_user("u1", AuthProvider::Local)
            .await
            .unwrap();

        let record = service
            .upload("u1", upload_input("a.txt", "/", b"a"))
            .await
            .unwrap()
            .unwrap_done();

        assert!(matches!(
            service.file_by_id("intruder", record.id).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(
            service.rename("intruder", record.id, "x").await,
            Err(AppError::NotFound(_)) | Err(AppError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_google_users_prefix() {
        let (service, _dir) = setup().await;
        service
            .provision_user("g1", AuthProvider::Google)
            .await
            .unwrap();

        service
            .upload("g1", upload_input("pic.png", "/", b"png"))
            .await
            .unwrap()
            .unwrap_done();
        assert!(
            service
                .blobs
                .stat("Google Users/g1/Drive/pic.png")
                .await
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn test_carry_extension() {
        assert_eq!(carry_extension("notes.txt", "ideas"), "ideas.txt");
        assert_eq!(carry_extension("notes.txt", "ideas.md"), "ideas.md");
        assert_eq!(carry_extension("README", "readme2"), "readme2");
        assert_eq!(carry_extension("archive.tar.gz", "backup"), "backup.gz");
    }

    #[test]
    fn test_next_duplicate_name() {
        let existing = vec!["report.pdf".to_string()];
        assert_eq!(next_duplicate_name(&existing, "report.pdf"), "report (1).pdf");

        let existing = vec![
            "report.pdf".to_string(),
            "report (1).pdf".to_string(),
            "report (4).pdf".to_string(),
            "reporting.pdf".to_string(),
        ];
        assert_eq!(next_duplicate_name(&existing, "report.pdf"), "report (5).pdf");

        let existing = vec!["README".to_string(), "README (2)".to_string()];
        assert_eq!(next_duplicate_name(&existing, "README"), "README (3)");
    }
}

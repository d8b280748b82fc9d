//! Quota Accountant — recomputes and persists per-user storage usage.
//!
//! `users.storage_used` is a cached aggregate; the authoritative value is
//! always the sum of the owner's record sizes. Usage is recomputed from
//! scratch after every byte-changing operation, never incremented blindly.

use crate::{
    errors::AppResult,
    models::{outcome::DeclineReason, user::User},
    repositories::{FileRepository, UserRepository},
};
use chrono::Utc;

/// Per-file upload cap (25 MB).
pub const MAX_FILE_SIZE: i64 = 25 * 1024 * 1024;

/// Default storage limit per user (5 GB).
pub const DEFAULT_STORAGE_LIMIT: i64 = 5 * 1024 * 1024 * 1024;

#[derive(Clone)]
pub struct QuotaAccountant {
    files: FileRepository,
    users: UserRepository,
}

impl QuotaAccountant {
    pub fn new(files: FileRepository, users: UserRepository) -> Self {
        Self { files, users }
    }

    /// Authoritative usage: sum over all records, Drive and Bin alike —
    /// trashed files occupy space until the bin is emptied.
    pub async fn calculate_usage(&self, owner_id: &str) -> AppResult<i64> {
        self.files.sum_size(owner_id).await
    }

    /// Recompute usage and persist it into the user row. Returns the fresh
    /// value.
    pub async fn sync_usage(&self, owner_id: &str) -> AppResult<i64> {
        let used = self.calculate_usage(owner_id).await?;
        self.users
            .update_storage_used(owner_id, used, Utc::now())
            .await?;
        Ok(used)
    }

    /// Upload admission control. Both checks run before any blob write: the
    /// per-file cap first, then the projected total against the user's limit.
    pub async fn check_upload(&self, user: &User, size: i64) -> AppResult<Option<DeclineReason>> {
        if size > MAX_FILE_SIZE {
            return Ok(Some(DeclineReason::FileTooLarge));
        }
        let current = self.calculate_usage(&user.id).await?;
        if current + size > user.storage_limit {
            return Ok(Some(DeclineReason::QuotaExceeded));
        }
        Ok(None)
    }
}

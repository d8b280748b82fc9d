//! File-record repository.

use crate::{
    errors::{AppError, AppResult},
    models::file_record::{FileRecord, Location},
    repositories::is_unique_violation,
};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

const COLUMNS: &str = "id, owner_id, object_name, object_path, object_type, mime_type, size, \
                       is_folder, location, metadata, last_modified, created_at, updated_at";

/// Repository for `file_records` rows.
#[derive(Clone)]
pub struct FileRepository {
    db: Arc<SqlitePool>,
}

impl FileRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Insert a record. A racing insert on the same
    /// (owner, path, name, location) surfaces as `Conflict`.
    pub async fn insert(&self, record: &FileRecord) -> AppResult<FileRecord> {
        let sql = format!(
            "INSERT INTO file_records ({COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, FileRecord>(&sql)
            .bind(record.id)
            .bind(&record.owner_id)
            .bind(&record.object_name)
            .bind(&record.object_path)
            .bind(&record.object_type)
            .bind(&record.mime_type)
            .bind(record.size)
            .bind(record.is_folder)
            .bind(record.location)
            .bind(&record.metadata)
            .bind(record.last_modified)
            .bind(record.created_at)
            .bind(record.updated_at)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    AppError::Conflict(format!(
                        "`{}` already exists at {}",
                        record.object_name, record.object_path
                    ))
                } else {
                    AppError::Database(err)
                }
            })
    }

    pub async fn find_by_id(&self, id: Uuid) -> AppResult<Option<FileRecord>> {
        let sql = format!("SELECT {COLUMNS} FROM file_records WHERE id = ?");
        Ok(sqlx::query_as::<_, FileRecord>(&sql)
            .bind(id)
            .fetch_optional(&*self.db)
            .await?)
    }

    /// All records at an exact normalized path within one location,
    /// folders first.
    pub async fn find_by_path(
        &self,
        owner_id: &str,
        object_path: &str,
        location: Location,
    ) -> AppResult<Vec<FileRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM file_records
             WHERE owner_id = ? AND object_path = ? AND location = ?
             ORDER BY is_folder DESC, object_name ASC"
        );
        Ok(sqlx::query_as::<_, FileRecord>(&sql)
            .bind(owner_id)
            .bind(object_path)
            .bind(location)
            .fetch_all(&*self.db)
            .await?)
    }

    pub async fn find_by_name_and_path(
        &self,
        owner_id: &str,
        object_name: &str,
        object_path: &str,
        location: Location,
    ) -> AppResult<Option<FileRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM file_records
             WHERE owner_id = ? AND object_name = ? AND object_path = ? AND location = ?"
        );
        Ok(sqlx::query_as::<_, FileRecord>(&sql)
            .bind(owner_id)
            .bind(object_name)
            .bind(object_path)
            .bind(location)
            .fetch_optional(&*self.db)
            .await?)
    }

    /// Everything in the owner's bin except the root marker.
    pub async fn find_bin_entries(&self, owner_id: &str) -> AppResult<Vec<FileRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM file_records
             WHERE owner_id = ? AND location = ? AND object_name != ''
             ORDER BY is_folder ASC, object_path ASC"
        );
        Ok(sqlx::query_as::<_, FileRecord>(&sql)
            .bind(owner_id)
            .bind(Location::Bin)
            .fetch_all(&*self.db)
            .await?)
    }

    pub async fn update_name(
        &self,
        id: Uuid,
        object_name: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Option<FileRecord>> {
        let sql = format!(
            "UPDATE file_records
             SET object_name = ?, last_modified = ?, updated_at = ?
             WHERE id = ?
             RETURNING {COLUMNS}"
        );
        Ok(sqlx::query_as::<_, FileRecord>(&sql)
            .bind(object_name)
            .bind(now)
            .bind(now)
            .bind(id)
            .fetch_optional(&*self.db)
            .await?)
    }

    pub async fn update_location(
        &self,
        id: Uuid,
        location: Location,
        now: DateTime<Utc>,
    ) -> AppResult<Option<FileRecord>> {
        let sql = format!(
            "UPDATE file_records
             SET location = ?, updated_at = ?
             WHERE id = ?
             RETURNING {COLUMNS}"
        );
        Ok(sqlx::query_as::<_, FileRecord>(&sql)
            .bind(location)
            .bind(now)
            .bind(id)
            .fetch_optional(&*self.db)
            .await?)
    }

    pub async fn delete(&self, id: Uuid) -> AppResult<()> {
        sqlx::query("DELETE FROM file_records WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    /// Bulk-delete the owner's bin, keeping the bin root marker. Returns the
    /// number of removed rows.
    pub async fn delete_bin_entries(&self, owner_id: &str) -> AppResult<u64> {
        let result = sqlx::query(
            "DELETE FROM file_records
             WHERE owner_id = ? AND location = ? AND object_name != ''",
        )
        .bind(owner_id)
        .bind(Location::Bin)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected())
    }

    /// Authoritative storage usage: sum of sizes over all of the owner's
    /// records, Drive and Bin alike.
    pub async fn sum_size(&self, owner_id: &str) -> AppResult<i64> {
        let total: i64 =
            sqlx::query_scalar("SELECT COALESCE(SUM(size), 0) FROM file_records WHERE owner_id = ?")
                .bind(owner_id)
                .fetch_one(&*self.db)
                .await?;
        Ok(total)
    }
}

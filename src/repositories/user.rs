//! User repository.
//!
//! The auth subsystem owns these rows; the file-lifecycle core reads them and
//! writes back only the cached `storage_used` aggregate.

use crate::{
    errors::{AppError, AppResult},
    models::user::User,
    repositories::is_unique_violation,
};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;

const COLUMNS: &str = "id, auth_provider, storage_limit, storage_used, created_at, updated_at";

#[derive(Clone)]
pub struct UserRepository {
    db: Arc<SqlitePool>,
}

impl UserRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub async fn create(&self, user: &User) -> AppResult<User> {
        let sql = format!(
            "INSERT INTO users ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?) RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(&user.id)
            .bind(user.auth_provider)
            .bind(user.storage_limit)
            .bind(user.storage_used)
            .bind(user.created_at)
            .bind(user.updated_at)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    AppError::Conflict(format!("user `{}` already exists", user.id))
                } else {
                    AppError::Database(err)
                }
            })
    }

    pub async fn find_by_id(&self, id: &str) -> AppResult<Option<User>> {
        let sql = format!("SELECT {COLUMNS} FROM users WHERE id = ?");
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&*self.db)
            .await?)
    }

    /// Like `find_by_id` but missing users are an error.
    pub async fn get_by_id(&self, id: &str) -> AppResult<User> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("user `{id}`")))
    }

    pub async fn update_storage_used(
        &self,
        id: &str,
        storage_used: i64,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query("UPDATE users SET storage_used = ?, updated_at = ? WHERE id = ?")
            .bind(storage_used)
            .bind(now)
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(())
    }
}

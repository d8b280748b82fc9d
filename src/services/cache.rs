//! Redis cache layer for hot file records, listings, and storage stats.
//!
//! The cache is derived, disposable, and never authoritative. Every call here
//! is fire-and-forget: failures are logged locally and never fail the
//! surrounding operation — the engine behaves identically with no cache
//! configured.
//!
//! Key scheme:
//! - `file:{id}` — one serialized record
//! - `files:{owner}:{location}:{path}` — one serialized listing; invalidated
//!   by owner/location prefix (`files:{owner}:{location}:*`)
//! - `user:{owner}:storage_stats` — usage aggregate

use crate::{
    errors::{AppError, AppResult},
    models::file_record::Location,
};
use redis::AsyncCommands;
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, warn};
use uuid::Uuid;

/// TTL for single-record entries.
pub const FILE_TTL_SECS: u64 = 5 * 60;

/// TTL for per-path listings; short, they churn with every mutation.
pub const LISTING_TTL_SECS: u64 = 60;

/// TTL for the storage-stats aggregate.
pub const STATS_TTL_SECS: u64 = 5 * 60;

#[derive(Clone)]
pub struct CacheService {
    conn: redis::aio::MultiplexedConnection,
}

impl CacheService {
    /// Connect to Redis. Callers treat a failure here as "run without cache".
    pub async fn connect(url: &str) -> AppResult<Self> {
        let client = redis::Client::open(url).map_err(|e| AppError::Cache(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::Cache(e.to_string()))?;
        Ok(Self { conn })
    }

    pub fn file_key(id: Uuid) -> String {
        format!("file:{id}")
    }

    pub fn listing_key(owner_id: &str, location: Location, path: &str) -> String {
        format!("files:{owner_id}:{}:{path}", location.as_str())
    }

    /// Pattern matching every cached listing for one owner + location.
    pub fn listing_pattern(owner_id: &str, location: Location) -> String {
        format!("files:{owner_id}:{}:*", location.as_str())
    }

    pub fn stats_key(owner_id: &str) -> String {
        format!("user:{owner_id}:storage_stats")
    }

    /// Fetch and deserialize a cached value; any failure reads as a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut conn = self.conn.clone();
        match conn.get::<_, Option<String>>(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    debug!(key = %key, "cache hit");
                    Some(value)
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "dropping undecodable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(key = %key, error = %err, "cache read failed");
                None
            }
        }
    }

    /// Store a value with a TTL, best-effort.
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(key = %key, error = %err, "failed to serialize cache value");
                return;
            }
        };
        let mut conn = self.conn.clone();
        if let Err(err) = conn.set_ex::<_, _, ()>(key, raw, ttl_secs).await {
            warn!(key = %key, error = %err, "cache write failed");
        }
    }

    /// Delete specific keys, best-effort.
    pub async fn del(&self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        let mut conn = self.conn.clone();
        if let Err(err) = conn.del::<_, ()>(keys.to_vec()).await {
            warn!(error = %err, "cache invalidation failed");
        }
    }

    /// Delete every key matching a pattern, best-effort.
    pub async fn del_pattern(&self, pattern: &str) {
        let mut conn = self.conn.clone();
        let keys = match conn.keys::<_, Vec<String>>(pattern).await {
            Ok(keys) => keys,
            Err(err) => {
                warn!(pattern = %pattern, error = %err, "cache key scan failed");
                return;
            }
        };
        if keys.is_empty() {
            return;
        }
        if let Err(err) = conn.del::<_, ()>(keys).await {
            warn!(pattern = %pattern, error = %err, "cache invalidation failed");
        }
    }

    /// Liveness check for the readiness probe.
    pub async fn ping(&self) -> bool {
        let mut conn = self.conn.clone();
        let pong: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
        match pong {
            Ok(_) => true,
            Err(err) => {
                warn!(error = %err, "cache ping failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_key_generation() {
        let id = Uuid::nil();
        assert_eq!(
            CacheService::file_key(id),
            "file:00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_listing_keys() {
        assert_eq!(
            CacheService::listing_key("u1", Location::Drive, "/docs/"),
            "files:u1:drive:/docs/"
        );
        assert_eq!(
            CacheService::listing_pattern("u1", Location::Bin),
            "files:u1:bin:*"
        );
    }

    #[test]
    fn test_stats_key() {
        assert_eq!(CacheService::stats_key("u1"), "user:u1:storage_stats");
    }
}

//! HTTP handlers. Thin by design: they parse, delegate to the lifecycle
//! engine, and shape responses.

pub mod file_handlers;
pub mod health_handlers;

use crate::services::{blob_store::BlobStore, cache::CacheService, lifecycle::FileLifecycleService};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Shared state carried by the router.
#[derive(Clone)]
pub struct AppState {
    pub files: FileLifecycleService,
    pub db: Arc<SqlitePool>,
    pub blobs: BlobStore,
    pub cache: Option<CacheService>,
}

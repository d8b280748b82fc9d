//! Core data models for the cloud-drive backend.
//!
//! These entities represent the per-user virtual file tree and its owners.
//! They map cleanly to database tables via `sqlx::FromRow` and serialize
//! naturally as JSON via `serde`.

pub mod file_record;
pub mod outcome;
pub mod user;

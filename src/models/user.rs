//! Represents a user account as seen by the file-lifecycle core.
//!
//! Accounts are owned by the (excluded) auth subsystem; the core reads them
//! and writes back only `storage_used`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// How the account was created; decides the blob-key base prefix.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    Local,
    Google,
}

impl AuthProvider {
    /// Top-level blob-store segment for this provider's users.
    pub fn prefix_segment(self) -> &'static str {
        match self {
            Self::Local => "Local Users",
            Self::Google => "Google Users",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "local" => Some(Self::Local),
            "google" => Some(Self::Google),
            _ => None,
        }
    }
}

/// A user row. `storage_used` is a cached aggregate, never authoritative —
/// the authoritative value is always the sum of the owner's record sizes.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct User {
    pub id: String,

    pub auth_provider: AuthProvider,

    /// Total bytes this user may store (Drive + Bin).
    pub storage_limit: i64,

    /// Cached aggregate, recomputed after every byte-changing operation.
    pub storage_used: i64,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

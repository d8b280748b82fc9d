//! Represents a file or folder record in a user's virtual drive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Logical partition of a user's tree: active files or the trash bin.
///
/// This is the trash *state*, not a physical store — moving a record to the
/// bin keeps its virtual path and only switches the blob-key prefix.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Location {
    Drive,
    Bin,
}

impl Location {
    /// Segment used in blob-store keys (`.../Drive/...`, `.../Bin/...`).
    pub fn key_segment(self) -> &'static str {
        match self {
            Self::Drive => "Drive",
            Self::Bin => "Bin",
        }
    }

    /// Lowercase form used in cache keys and query parameters.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Drive => "drive",
            Self::Bin => "bin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "drive" => Some(Self::Drive),
            "bin" => Some(Self::Bin),
            _ => None,
        }
    }
}

/// A single file or folder owned by one user.
///
/// The record is the authoritative description of the entry; the blob store
/// holds the payload at a key derived purely from
/// (owner, provider, location, path, name).
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct FileRecord {
    /// Opaque unique identifier, generated at creation, immutable.
    pub id: Uuid,

    /// Owning user id; never changes after creation.
    pub owner_id: String,

    /// Leaf name. Empty only for the two root markers created at bootstrap.
    pub object_name: String,

    /// Normalized virtual directory path; starts and ends with `/`.
    pub object_path: String,

    /// Free-form classification (e.g. "file", "folder", "image").
    pub object_type: String,

    /// MIME type reported at upload time.
    pub mime_type: String,

    /// Size in bytes; 0 for folders.
    pub size: i64,

    /// Folders never have payload bytes, only a path marker.
    pub is_folder: bool,

    /// Drive (active) or Bin (trashed).
    pub location: Location,

    /// Open JSON bag for mime hints and provenance flags.
    pub metadata: Option<String>,

    /// Timestamp of the last content change.
    pub last_modified: DateTime<Utc>,

    pub created_at: DateTime<Utc>,

    /// Bumped on every mutation.
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    /// Whether this record is one of the per-location root markers.
    pub fn is_root_marker(&self) -> bool {
        self.object_name.is_empty() && self.object_path == "/"
    }
}

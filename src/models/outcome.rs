//! Operation outcomes for the file-lifecycle engine.
//!
//! Every mutating operation resolves to either a success value or an explicit
//! declined result; expected user-facing conditions (name collisions, caps)
//! are declines, not errors.

use serde::Serialize;

/// Result of a lifecycle operation that can be declined.
#[derive(Debug)]
pub enum Outcome<T> {
    Done(T),
    Declined(DeclineReason),
}

impl<T> Outcome<T> {
    #[cfg(test)]
    pub fn unwrap_done(self) -> T {
        match self {
            Self::Done(value) => value,
            Self::Declined(reason) => panic!("operation declined: {reason:?}"),
        }
    }
}

/// Why an operation was declined before any side effect took place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclineReason {
    /// A non-deleted record with the same name exists at the target
    /// (path, location).
    NameTaken,
    /// Upload exceeds the per-file size cap.
    FileTooLarge,
    /// Upload would push the owner's usage past the storage limit.
    QuotaExceeded,
    /// Permanent deletion is only reachable through the bin.
    NotInBin,
    /// Duplicate is defined on files, not folders.
    DuplicateOfFolder,
}

impl DeclineReason {
    pub fn message(self) -> &'static str {
        match self {
            Self::NameTaken => "an entry with this name already exists at the target location",
            Self::FileTooLarge => "file exceeds the per-file size cap",
            Self::QuotaExceeded => "storage quota exceeded",
            Self::NotInBin => "only records in the bin can be deleted forever",
            Self::DuplicateOfFolder => "folders cannot be duplicated",
        }
    }
}

/// Summary returned by empty-bin.
#[derive(Debug, Clone, Serialize)]
pub struct EmptyBinReport {
    /// Metadata records removed.
    pub deleted_count: u64,
    /// Bytes released from the owner's usage.
    pub freed_bytes: i64,
    /// Blob objects that could not be removed (left for a later sweep).
    pub blob_failures: u64,
}

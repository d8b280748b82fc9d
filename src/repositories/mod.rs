//! SQLite-backed repositories for file records and users.
//!
//! Repositories own all SQL; services above them never see `sqlx` directly.

pub mod file;
pub mod user;

pub use file::FileRepository;
pub use user::UserRepository;

/// Return true if a SQLx error indicates a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

//! Path Resolver — pure mapping from logical file identity to blob-store key.
//!
//! No hidden state and no randomness: the same (owner, provider, location,
//! path, name) tuple always resolves to the same key, and distinct tuples for
//! the same owner never collide.

use crate::{
    errors::{AppError, AppResult},
    models::{file_record::Location, user::AuthProvider},
};

const MAX_PATH_LEN: usize = 1024;
const MAX_NAME_LEN: usize = 255;

/// Normalize a virtual directory path.
///
/// - must not contain `..` segments, control characters, or `\`
/// - duplicate slashes collapse
/// - result starts and ends with `/`; the root is `/`
pub fn normalize_path(raw: &str) -> AppResult<String> {
    let trimmed = raw.trim();
    if trimmed.len() > MAX_PATH_LEN {
        return Err(AppError::BadRequest("path too long".into()));
    }
    ensure_clean(trimmed)?;

    let mut normalized = String::with_capacity(trimmed.len() + 2);
    normalized.push('/');
    for segment in trimmed.split('/') {
        if segment.is_empty() {
            continue;
        }
        if segment == "." || segment == ".." {
            return Err(AppError::BadRequest("path traversal is not allowed".into()));
        }
        normalized.push_str(segment);
        normalized.push('/');
    }
    Ok(normalized)
}

/// Validate a leaf name (file or folder).
pub fn validate_name(name: &str) -> AppResult<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(AppError::BadRequest("invalid object name".into()));
    }
    if name.contains('/') || name == "." || name == ".." {
        return Err(AppError::BadRequest("invalid object name".into()));
    }
    ensure_clean(name)
}

/// Reject control characters and backslashes anywhere in a path or name.
fn ensure_clean(value: &str) -> AppResult<()> {
    if value
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(AppError::BadRequest("invalid characters in path".into()));
    }
    Ok(())
}

/// Base blob-store prefix for a user: `{provider segment}/{owner}/`.
pub fn user_prefix(owner_id: &str, provider: AuthProvider) -> String {
    format!("{}/{}/", provider.prefix_segment(), owner_id)
}

/// Full blob-store key for a record.
///
/// `object_path` must already be normalized (leading and trailing `/`); the
/// resolver refuses to resolve anything else. Folder keys carry a trailing
/// `/` so they map to marker objects.
pub fn resolve_key(
    owner_id: &str,
    provider: AuthProvider,
    location: Location,
    object_path: &str,
    object_name: &str,
    is_folder: bool,
) -> AppResult<String> {
    if !object_path.starts_with('/') || !object_path.ends_with('/') || object_path.contains("..") {
        return Err(AppError::Internal(format!(
            "refusing to resolve unnormalized path `{object_path}`"
        )));
    }

    let mut key = user_prefix(owner_id, provider);
    key.push_str(location.key_segment());
    key.push_str(object_path);
    key.push_str(object_name);
    if is_folder && !key.ends_with('/') {
        key.push('/');
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_root() {
        assert_eq!(normalize_path("").unwrap(), "/");
        assert_eq!(normalize_path("/").unwrap(), "/");
        assert_eq!(normalize_path("///").unwrap(), "/");
    }

    #[test]
    fn test_normalize_path_segments() {
        assert_eq!(normalize_path("docs").unwrap(), "/docs/");
        assert_eq!(normalize_path("/docs/work").unwrap(), "/docs/work/");
        assert_eq!(normalize_path("//docs///work//").unwrap(), "/docs/work/");
    }

    #[test]
    fn test_normalize_path_rejects_traversal() {
        assert!(normalize_path("/docs/../etc").is_err());
        assert!(normalize_path("..").is_err());
        assert!(normalize_path("/docs/./x").is_err());
        assert!(normalize_path("/docs\\x").is_err());
        assert!(normalize_path("/docs\u{0}").is_err());
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("report.pdf").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("..").is_err());
    }

    #[test]
    fn test_user_prefix_per_provider() {
        assert_eq!(user_prefix("u1", AuthProvider::Local), "Local Users/u1/");
        assert_eq!(user_prefix("u1", AuthProvider::Google), "Google Users/u1/");
    }

    #[test]
    fn test_resolve_key_files_and_folders() {
        let key = resolve_key(
            "u1",
            AuthProvider::Local,
            Location::Drive,
            "/",
            "notes.txt",
            false,
        )
        .unwrap();
        assert_eq!(key, "Local Users/u1/Drive/notes.txt");

        let key = resolve_key(
            "u1",
            AuthProvider::Local,
            Location::Bin,
            "/docs/",
            "notes.txt",
            false,
        )
        .unwrap();
        assert_eq!(key, "Local Users/u1/Bin/docs/notes.txt");

        let key = resolve_key(
            "u1",
            AuthProvider::Google,
            Location::Drive,
            "/docs/",
            "work",
            true,
        )
        .unwrap();
        assert_eq!(key, "Google Users/u1/Drive/docs/work/");
    }

    #[test]
    fn test_resolve_key_root_marker() {
        let key = resolve_key("u1", AuthProvider::Local, Location::Bin, "/", "", true).unwrap();
        assert_eq!(key, "Local Users/u1/Bin/");
    }

    #[test]
    fn test_resolve_key_refuses_unnormalized() {
        assert!(resolve_key("u1", AuthProvider::Local, Location::Drive, "docs", "a", false).is_err());
        assert!(
            resolve_key("u1", AuthProvider::Local, Location::Drive, "/docs", "a", false).is_err()
        );
        assert!(
            resolve_key("u1", AuthProvider::Local, Location::Drive, "/../", "a", false).is_err()
        );
    }

    #[test]
    fn test_resolve_key_deterministic_and_injective() {
        let tuples = [
            (Location::Drive, "/", "a.txt", false),
            (Location::Bin, "/", "a.txt", false),
            (Location::Drive, "/x/", "a.txt", false),
            (Location::Drive, "/", "b.txt", false),
            (Location::Drive, "/", "a", true),
            (Location::Drive, "/", "", true),
        ];

        let mut keys = Vec::new();
        for (location, path, name, folder) in tuples {
            let first =
                resolve_key("u1", AuthProvider::Local, location, path, name, folder).unwrap();
            let second =
                resolve_key("u1", AuthProvider::Local, location, path, name, folder).unwrap();
            assert_eq!(first, second);
            keys.push(first);
        }

        for (i, a) in keys.iter().enumerate() {
            for b in keys.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }
}

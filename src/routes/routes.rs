//! Defines routes for all cloud-drive operations.
//!
//! ## Structure
//! - **Account-level endpoints**
//!   - `POST   /users` — provision an account + bootstrap folders
//!   - `GET    /users/{user}/storage` — storage stats
//!   - `DELETE /users/{user}/bin` — empty the bin
//!
//! - **File-level endpoints**
//!   - `GET    /users/{user}/files` — list by path (`?path=&location=`)
//!   - `POST   /users/{user}/files` — multipart upload
//!   - `POST   /users/{user}/folders` — create a virtual folder
//!   - `GET    /users/{user}/files/{id}` — record metadata
//!   - `PATCH  /users/{user}/files/{id}` — rename
//!   - `DELETE /users/{user}/files/{id}` — delete forever (bin only)
//!   - `GET    /users/{user}/files/{id}/download` — stream payload
//!   - `GET    /users/{user}/files/{id}/presign` — presigned link
//!   - `POST   /users/{user}/files/{id}/duplicate`
//!   - `POST   /users/{user}/files/{id}/trash`
//!   - `POST   /users/{user}/files/{id}/restore`
//!
//! - `GET /dl` redeems presigned links without an account context.

use crate::handlers::{
    AppState,
    file_handlers::{
        create_folder, delete_file_forever, download_file, duplicate_file, empty_bin, get_file,
        list_files, presign_file, provision_user, redeem_presigned, rename_file, restore_file,
        storage_stats, trash_file, upload_file,
    },
    health_handlers::{healthz, readyz},
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
};

/// Multipart bodies carry up to the 25 MB per-file cap plus field overhead.
const MAX_UPLOAD_BODY_BYTES: usize = 32 * 1024 * 1024;

/// Build and return the router for all cloud-drive routes.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // presigned-link redemption
        .route("/dl", get(redeem_presigned))
        // account-level routes
        .route("/users", post(provision_user))
        .route("/users/{user}/storage", get(storage_stats))
        .route("/users/{user}/bin", delete(empty_bin))
        // file-level routes
        .route("/users/{user}/files", get(list_files).post(upload_file))
        .route("/users/{user}/folders", post(create_folder))
        .route(
            "/users/{user}/files/{id}",
            get(get_file)
                .patch(rename_file)
                .delete(delete_file_forever),
        )
        .route("/users/{user}/files/{id}/download", get(download_file))
        .route("/users/{user}/files/{id}/presign", get(presign_file))
        .route("/users/{user}/files/{id}/duplicate", post(duplicate_file))
        .route("/users/{user}/files/{id}/trash", post(trash_file))
        .route("/users/{user}/files/{id}/restore", post(restore_file))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BODY_BYTES))
}

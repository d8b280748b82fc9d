//! HTTP handlers for user provisioning and file-lifecycle operations.
//! Streams download bodies to avoid buffering in memory and delegates all
//! business rules to `FileLifecycleService`.

use crate::{
    errors::AppError,
    handlers::AppState,
    models::{
        file_record::Location,
        outcome::{DeclineReason, Outcome},
        user::AuthProvider,
    },
    services::lifecycle::UploadInput,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

const DEFAULT_PRESIGN_TTL_SECS: i64 = 15 * 60;

#[derive(Debug, Deserialize)]
pub struct ProvisionUserReq {
    pub id: String,
    pub auth_provider: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub path: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RenameReq {
    pub new_name: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateFolderReq {
    pub path: Option<String>,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct PresignQuery {
    pub ttl: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RedeemQuery {
    pub key: String,
    pub expires: i64,
    pub sig: String,
}

/// Map an explicit decline to its HTTP shape.
fn declined(reason: DeclineReason) -> Response {
    let status = match reason {
        DeclineReason::NameTaken | DeclineReason::NotInBin => StatusCode::CONFLICT,
        DeclineReason::FileTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        DeclineReason::QuotaExceeded => StatusCode::INSUFFICIENT_STORAGE,
        DeclineReason::DuplicateOfFolder => StatusCode::BAD_REQUEST,
    };
    (
        status,
        Json(json!({ "declined": reason, "message": reason.message() })),
    )
        .into_response()
}

fn outcome_response<T: serde::Serialize>(outcome: Outcome<T>, status: StatusCode) -> Response {
    match outcome {
        Outcome::Done(value) => (status, Json(value)).into_response(),
        Outcome::Declined(reason) => declined(reason),
    }
}

fn parse_location(raw: Option<&str>) -> Result<Location, AppError> {
    match raw {
        None => Ok(Location::Drive),
        Some(value) => Location::parse(value)
            .ok_or_else(|| AppError::BadRequest(format!("unknown location `{value}`"))),
    }
}

/// POST `/users` — provision an account and bootstrap its folder structure.
pub async fn provision_user(
    State(state): State<AppState>,
    Json(payload): Json<ProvisionUserReq>,
) -> Result<Response, AppError> {
    let provider = match payload.auth_provider.as_deref() {
        None => AuthProvider::Local,
        Some(value) => AuthProvider::parse(value)
            .ok_or_else(|| AppError::BadRequest(format!("unknown auth provider `{value}`")))?,
    };
    let user = state.files.provision_user(&payload.id, provider).await?;
    Ok((StatusCode::CREATED, Json(user)).into_response())
}

/// GET `/users/{user}/storage`
pub async fn storage_stats(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response, AppError> {
    let stats = state.files.storage_stats(&user_id).await?;
    Ok(Json(stats).into_response())
}

/// GET `/users/{user}/files?path=&location=`
pub async fn list_files(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Response, AppError> {
    let location = parse_location(query.location.as_deref())?;
    let records = state
        .files
        .files_by_path(&user_id, query.path.as_deref().unwrap_or("/"), location)
        .await?;
    Ok(Json(records).into_response())
}

/// POST `/users/{user}/files` — multipart upload.
///
/// Fields: `file` (required), `path` (optional, defaults to `/`),
/// `metadata` (optional JSON object).
pub async fn upload_file(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut path = "/".to_string();
    let mut metadata: Option<serde_json::Value> = None;
    let mut file: Option<(String, String, Bytes)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::BadRequest(format!("malformed multipart body: {err}")))?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("path") => {
                path = field
                    .text()
                    .await
                    .map_err(|err| AppError::BadRequest(err.to_string()))?;
            }
            Some("metadata") => {
                let raw = field
                    .text()
                    .await
                    .map_err(|err| AppError::BadRequest(err.to_string()))?;
                metadata = Some(
                    serde_json::from_str(&raw)
                        .map_err(|err| AppError::BadRequest(format!("invalid metadata: {err}")))?,
                );
            }
            Some("file") => {
                let name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| AppError::BadRequest("file field needs a filename".into()))?;
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|err| AppError::BadRequest(format!("failed to read upload: {err}")))?;
                file = Some((name, mime_type, data));
            }
            _ => {}
        }
    }

    let (name, mime_type, data) =
        file.ok_or_else(|| AppError::BadRequest("missing `file` field".into()))?;
    let outcome = state
        .files
        .upload(
            &user_id,
            UploadInput {
                name,
                path,
                mime_type,
                metadata,
                data,
            },
        )
        .await?;
    Ok(outcome_response(outcome, StatusCode::CREATED))
}

/// POST `/users/{user}/folders`
pub async fn create_folder(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(payload): Json<CreateFolderReq>,
) -> Result<Response, AppError> {
    let outcome = state
        .files
        .create_folder(&user_id, payload.path.as_deref().unwrap_or("/"), &payload.name)
        .await?;
    Ok(outcome_response(outcome, StatusCode::CREATED))
}

/// GET `/users/{user}/files/{id}`
pub async fn get_file(
    State(state): State<AppState>,
    Path((user_id, file_id)): Path<(String, Uuid)>,
) -> Result<Response, AppError> {
    let record = state.files.file_by_id(&user_id, file_id).await?;
    Ok(Json(record).into_response())
}

/// GET `/users/{user}/files/{id}/download` — streaming response.
pub async fn download_file(
    State(state): State<AppState>,
    Path((user_id, file_id)): Path<(String, Uuid)>,
) -> Result<Response, AppError> {
    let (record, len, file) = state.files.download(&user_id, file_id).await?;
    let stream = ReaderStream::new(file);

    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&record.mime_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&len.to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );
    let disposition = format!("attachment; filename=\"{}\"", record.object_name);
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

/// GET `/users/{user}/files/{id}/presign?ttl=`
pub async fn presign_file(
    State(state): State<AppState>,
    Path((user_id, file_id)): Path<(String, Uuid)>,
    Query(query): Query<PresignQuery>,
) -> Result<Response, AppError> {
    let ttl = query.ttl.unwrap_or(DEFAULT_PRESIGN_TTL_SECS);
    let url = state.files.presign_download(&user_id, file_id, ttl).await?;
    Ok(Json(json!({ "url": url })).into_response())
}

/// GET `/dl?key=&expires=&sig=` — redeem a presigned link.
pub async fn redeem_presigned(
    State(state): State<AppState>,
    Query(query): Query<RedeemQuery>,
) -> Result<Response, AppError> {
    let (len, file) = state
        .files
        .open_presigned(&query.key, query.expires, &query.sig)
        .await?;
    let stream = ReaderStream::new(file);

    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&len.to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );
    Ok(response)
}

/// PATCH `/users/{user}/files/{id}` — rename.
pub async fn rename_file(
    State(state): State<AppState>,
    Path((user_id, file_id)): Path<(String, Uuid)>,
    Json(payload): Json<RenameReq>,
) -> Result<Response, AppError> {
    let outcome = state
        .files
        .rename(&user_id, file_id, &payload.new_name)
        .await?;
    Ok(outcome_response(outcome, StatusCode::OK))
}

/// POST `/users/{user}/files/{id}/duplicate`
pub async fn duplicate_file(
    State(state): State<AppState>,
    Path((user_id, file_id)): Path<(String, Uuid)>,
) -> Result<Response, AppError> {
    let outcome = state.files.duplicate(&user_id, file_id).await?;
    Ok(outcome_response(outcome, StatusCode::CREATED))
}

/// POST `/users/{user}/files/{id}/trash`
pub async fn trash_file(
    State(state): State<AppState>,
    Path((user_id, file_id)): Path<(String, Uuid)>,
) -> Result<Response, AppError> {
    let outcome = state.files.move_to_bin(&user_id, file_id).await?;
    Ok(outcome_response(outcome, StatusCode::OK))
}

/// POST `/users/{user}/files/{id}/restore`
pub async fn restore_file(
    State(state): State<AppState>,
    Path((user_id, file_id)): Path<(String, Uuid)>,
) -> Result<Response, AppError> {
    let outcome = state.files.restore(&user_id, file_id).await?;
    Ok(outcome_response(outcome, StatusCode::OK))
}

/// DELETE `/users/{user}/files/{id}` — delete forever (bin only).
pub async fn delete_file_forever(
    State(state): State<AppState>,
    Path((user_id, file_id)): Path<(String, Uuid)>,
) -> Result<Response, AppError> {
    let outcome = state.files.delete_forever(&user_id, file_id).await?;
    Ok(outcome_response(outcome, StatusCode::OK))
}

/// DELETE `/users/{user}/bin`
pub async fn empty_bin(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response, AppError> {
    let report = state.files.empty_bin(&user_id).await?;
    Ok(Json(report).into_response())
}

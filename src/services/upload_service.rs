use axum::{body::Bytes, extract::Multipart};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, sea_query::Expr};

use crate::{
    audit,
    dto::uploads::{DeleteUploadQuery, UploadResponse},
    entity::cart_items::{Column as CartCol, Entity as CartItems},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    response::{ApiResponse, Meta},
    state::AppState,
    storage::{
        IMAGE_EXTENSIONS, PRINT_FILE_EXTENSIONS, StoredObject, extension_of, image_key,
        is_pending_key_of, pending_order_file_key,
    },
};

pub const FILE_FIELD: &str = "file";

#[derive(Debug)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Bytes,
}

/// Pull the `file` part out of a multipart body, ignoring other fields.
pub async fn read_file_field(multipart: &mut Multipart) -> AppResult<UploadedFile> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| AppError::BadRequest("file part has no filename".into()))?;
        let bytes = field.bytes().await?;
        return Ok(UploadedFile { filename, bytes });
    }
    Err(AppError::BadRequest(format!(
        "multipart field `{FILE_FIELD}` is required"
    )))
}

pub fn check_upload(file: &UploadedFile, allowed: &[&str], max_bytes: usize) -> AppResult<()> {
    if file.bytes.is_empty() {
        return Err(AppError::BadRequest("uploaded file is empty".into()));
    }
    if file.bytes.len() > max_bytes {
        return Err(AppError::PayloadTooLarge);
    }
    match extension_of(&file.filename) {
        Some(ext) if allowed.contains(&ext.as_str()) => Ok(()),
        _ => Err(AppError::Validation(format!(
            "unsupported file type; allowed: {}",
            allowed.join(", ")
        ))),
    }
}

fn to_response(state: &AppState, stored: StoredObject) -> AppResult<UploadResponse> {
    let presigned = state.storage.presign_get(&stored.key)?;
    Ok(UploadResponse {
        key: stored.key,
        url: presigned.url,
        url_expires_at: presigned.expires_at,
        size: stored.size,
        content_type: stored.content_type.to_string(),
    })
}

pub async fn upload_image(
    state: &AppState,
    user: &AuthUser,
    mut multipart: Multipart,
) -> AppResult<ApiResponse<UploadResponse>> {
    ensure_admin(user)?;
    let file = read_file_field(&mut multipart).await?;
    check_upload(&file, IMAGE_EXTENSIONS, state.config.max_upload_bytes)?;

    let stored = state
        .storage
        .put(&image_key(&file.filename), &file.bytes)
        .await?;

    audit::record(
        state,
        Some(user.user_id),
        "image_uploaded",
        "uploads",
        serde_json::json!({ "key": stored.key, "size": stored.size }),
    )
    .await;

    Ok(ApiResponse::success(
        "Uploaded",
        to_response(state, stored)?,
        Some(Meta::empty()),
    ))
}

pub async fn upload_order_file(
    state: &AppState,
    user: &AuthUser,
    mut multipart: Multipart,
) -> AppResult<ApiResponse<UploadResponse>> {
    let file = read_file_field(&mut multipart).await?;
    check_upload(&file, PRINT_FILE_EXTENSIONS, state.config.max_upload_bytes)?;

    let key = pending_order_file_key(user.user_id, &file.filename);
    let stored = state.storage.put(&key, &file.bytes).await?;
    tracing::debug!(user_id = %user.user_id, key = %stored.key, "print file uploaded");

    Ok(ApiResponse::success(
        "Uploaded",
        to_response(state, stored)?,
        Some(Meta::empty()),
    ))
}

pub async fn delete_order_file(
    state: &AppState,
    user: &AuthUser,
    query: DeleteUploadQuery,
) -> AppResult<ApiResponse<serde_json::Value>> {
    if !is_pending_key_of(&query.key, user.user_id) {
        return Err(AppError::Forbidden);
    }

    state.storage.delete(&query.key).await?;

    // Cart lines pointing at the removed file lose their attachment.
    CartItems::update_many()
        .col_expr(CartCol::PrintFileKey, Expr::value(Option::<String>::None))
        .filter(CartCol::UserId.eq(user.user_id))
        .filter(CartCol::PrintFileKey.eq(query.key.as_str()))
        .exec(&state.orm)
        .await?;

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({ "key": query.key }),
        Some(Meta::empty()),
    ))
}

/// Resolve a presigned token and read the object it names.
pub async fn download(state: &AppState, token: &str) -> AppResult<(Vec<u8>, &'static str)> {
    let key = state.storage.verify_token(token)?;
    Ok(state.storage.get(&key).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, bytes: &'static [u8]) -> UploadedFile {
        UploadedFile {
            filename: name.to_string(),
            bytes: Bytes::from_static(bytes),
        }
    }

    #[test]
    fn empty_upload_is_bad_request() {
        let err = check_upload(&file("a.png", b""), IMAGE_EXTENSIONS, 1024).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn oversized_upload_is_rejected() {
        let err = check_upload(&file("a.png", b"0123456789"), IMAGE_EXTENSIONS, 4).unwrap_err();
        assert!(matches!(err, AppError::PayloadTooLarge));
    }

    #[test]
    fn extension_must_be_allowed() {
        let err = check_upload(&file("design.pdf", b"%PDF"), IMAGE_EXTENSIONS, 1024).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        assert!(check_upload(&file("design.PDF", b"%PDF"), PRINT_FILE_EXTENSIONS, 1024).is_ok());
        assert!(check_upload(&file("noext", b"data"), PRINT_FILE_EXTENSIONS, 1024).is_err());
    }
}

use axum::{
    Json, Router,
    extract::{Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};

use crate::{
    dto::uploads::{DeleteUploadQuery, UploadResponse},
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    services::upload_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/images", post(upload_image))
        .route(
            "/order-files",
            post(upload_order_file).delete(delete_order_file),
        )
}

pub fn files_router() -> Router<AppState> {
    Router::new().route("/{token}", get(download_file))
}

#[utoipa::path(
    post,
    path = "/api/uploads/images",
    request_body(content_type = "multipart/form-data", description = "Multipart body with a `file` part"),
    responses(
        (status = 201, description = "Image stored under images/", body = ApiResponse<UploadResponse>),
        (status = 400, description = "Missing or empty file"),
        (status = 403, description = "Admin only"),
        (status = 413, description = "File too large"),
        (status = 422, description = "Unsupported image type")
    ),
    security(("bearer_auth" = [])),
    tag = "Uploads"
)]
pub async fn upload_image(
    State(state): State<AppState>,
    user: AuthUser,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<ApiResponse<UploadResponse>>)> {
    let resp = upload_service::upload_image(&state, &user, multipart).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

#[utoipa::path(
    post,
    path = "/api/uploads/order-files",
    request_body(content_type = "multipart/form-data", description = "Multipart body with a `file` part"),
    responses(
        (status = 201, description = "Print file stored as a pending upload", body = ApiResponse<UploadResponse>),
        (status = 400, description = "Missing or empty file"),
        (status = 413, description = "File too large"),
        (status = 422, description = "Unsupported print file type")
    ),
    security(("bearer_auth" = [])),
    tag = "Uploads"
)]
pub async fn upload_order_file(
    State(state): State<AppState>,
    user: AuthUser,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<ApiResponse<UploadResponse>>)> {
    let resp = upload_service::upload_order_file(&state, &user, multipart).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

#[utoipa::path(
    delete,
    path = "/api/uploads/order-files",
    params(("key" = String, Query, description = "Key returned by the upload")),
    responses(
        (status = 200, description = "Pending print file removed", body = ApiResponse<serde_json::Value>),
        (status = 403, description = "Not your pending upload")
    ),
    security(("bearer_auth" = [])),
    tag = "Uploads"
)]
pub async fn delete_order_file(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<DeleteUploadQuery>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let resp = upload_service::delete_order_file(&state, &user, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/files/{token}",
    params(("token" = String, Path, description = "Presigned download token")),
    responses(
        (status = 200, description = "Object bytes", content_type = "application/octet-stream"),
        (status = 401, description = "Invalid or expired token"),
        (status = 404, description = "Object not found")
    ),
    tag = "Uploads"
)]
pub async fn download_file(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> AppResult<impl IntoResponse> {
    let (bytes, content_type) = upload_service::download(&state, &token).await?;
    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, "private, max-age=300"),
        ],
        bytes,
    ))
}

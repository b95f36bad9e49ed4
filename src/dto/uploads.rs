use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct UploadResponse {
    pub key: String,
    pub url: String,
    pub url_expires_at: DateTime<Utc>,
    pub size: u64,
    pub content_type: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct DeleteUploadQuery {
    pub key: String,
}

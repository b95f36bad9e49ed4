//! Filesystem-backed object store.
//!
//! Objects are addressed by `/`-separated keys under two prefixes:
//! `images/` for catalog images and `orders-file/` for customer print files.
//! Downloads go through short-lived presigned URLs whose token is an HS256 JWT
//! carrying the object key.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

pub const IMAGES_PREFIX: &str = "images/";
pub const ORDER_FILES_PREFIX: &str = "orders-file/";
pub const PENDING_ORDER_FILES_PREFIX: &str = "orders-file/pending/";

pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif", "svg"];
pub const PRINT_FILE_EXTENSIONS: &[&str] = &[
    "pdf", "png", "jpg", "jpeg", "svg", "tif", "tiff", "ai", "eps", "psd", "zip",
];

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid or expired download token")]
    InvalidToken,

    #[error("token signing failed: {0}")]
    Signing(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredObject {
    pub key: String,
    pub size: u64,
    pub content_type: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct PresignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DownloadClaims {
    key: String,
    exp: usize,
}

pub struct FileStorage {
    root: PathBuf,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    public_base_url: String,
    presign_ttl: Duration,
}

impl FileStorage {
    pub fn new(root: impl AsRef<Path>, secret: &str, public_base_url: &str, ttl_secs: i64) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
            presign_ttl: Duration::seconds(ttl_secs.max(1)),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |path, seg| path.join(seg)))
    }

    pub async fn put(&self, key: &str, bytes: &[u8]) -> Result<StoredObject, StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut tmp = path.clone().into_os_string();
        tmp.push(".part");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &path).await?;
        tracing::debug!(key, size = bytes.len(), "object stored");

        Ok(StoredObject {
            key: key.to_string(),
            size: bytes.len() as u64,
            content_type: content_type_for(key),
        })
    }

    /// Deleting a missing object is not an error.
    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn copy(&self, from: &str, to: &str) -> Result<StoredObject, StorageError> {
        let src = self.path_for(from)?;
        let dst = self.path_for(to)?;
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).await?;
        }
        let size = fs::copy(&src, &dst).await.map_err(|err| not_found_or(err, from))?;
        Ok(StoredObject {
            key: to.to_string(),
            size,
            content_type: content_type_for(to),
        })
    }

    pub async fn get(&self, key: &str) -> Result<(Vec<u8>, &'static str), StorageError> {
        let path = self.path_for(key)?;
        let bytes = fs::read(&path).await.map_err(|err| not_found_or(err, key))?;
        Ok((bytes, content_type_for(key)))
    }

    pub async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        Ok(fs::try_exists(&path).await?)
    }

    pub fn presign_get(&self, key: &str) -> Result<PresignedUrl, StorageError> {
        validate_key(key)?;
        let expires_at = Utc::now() + self.presign_ttl;
        let claims = DownloadClaims {
            key: key.to_string(),
            exp: expires_at.timestamp() as usize,
        };
        let token = encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| StorageError::Signing(e.to_string()))?;
        Ok(PresignedUrl {
            url: format!("{}/api/files/{}", self.public_base_url, token),
            expires_at,
        })
    }

    /// Resolve a presigned download token back to its object key.
    pub fn verify_token(&self, token: &str) -> Result<String, StorageError> {
        let data = decode::<DownloadClaims>(token, &self.decoding_key, &Validation::default())
            .map_err(|_| StorageError::InvalidToken)?;
        validate_key(&data.claims.key)?;
        Ok(data.claims.key)
    }

    pub fn presign_url_or_none(&self, key: &str) -> Option<String> {
        match self.presign_get(key) {
            Ok(presigned) => Some(presigned.url),
            Err(err) => {
                tracing::warn!(error = %err, key, "presign failed");
                None
            }
        }
    }
}

fn not_found_or(err: std::io::Error, key: &str) -> StorageError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(key.to_string())
    } else {
        StorageError::Io(err)
    }
}

pub fn validate_key(key: &str) -> Result<(), StorageError> {
    if !(key.starts_with(IMAGES_PREFIX) || key.starts_with(ORDER_FILES_PREFIX)) {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    let bad_segment = key
        .split('/')
        .any(|seg| seg.is_empty() || seg == "." || seg == ".." || seg.contains('\\'));
    if bad_segment {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Reduce an uploaded file name to `[A-Za-z0-9._-]`, keeping the extension.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(|c| c == '/' || c == '\\').next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches(|c| c == '.' || c == '-');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.chars().take(100).collect()
    }
}

pub fn extension_of(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

pub fn content_type_for(key: &str) -> &'static str {
    match extension_of(key).as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("tif") | Some("tiff") => "image/tiff",
        Some("pdf") => "application/pdf",
        Some("ai") | Some("eps") => "application/postscript",
        Some("psd") => "image/vnd.adobe.photoshop",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
}

pub fn image_key(filename: &str) -> String {
    format!("{IMAGES_PREFIX}{}-{}", Uuid::new_v4(), sanitize_filename(filename))
}

pub fn pending_order_file_key(user_id: Uuid, filename: &str) -> String {
    format!(
        "{PENDING_ORDER_FILES_PREFIX}{user_id}/{}-{}",
        Uuid::new_v4(),
        sanitize_filename(filename)
    )
}

pub fn is_pending_key_of(key: &str, user_id: Uuid) -> bool {
    key.strip_prefix(PENDING_ORDER_FILES_PREFIX)
        .and_then(|rest| rest.split_once('/'))
        .is_some_and(|(owner, name)| owner == user_id.to_string() && !name.is_empty())
}

/// Final location of a print file once its order exists.
pub fn order_file_key(order_number: &str, pending_key: &str) -> String {
    let file = pending_key.rsplit('/').next().unwrap_or("file");
    format!("{ORDER_FILES_PREFIX}{order_number}/{file}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_storage() -> FileStorage {
        let root = std::env::temp_dir().join(format!("pod-shop-storage-{}", Uuid::new_v4()));
        FileStorage::new(root, "secret", "http://localhost:3000/", 60)
    }

    #[test]
    fn rejects_keys_outside_known_prefixes_or_with_traversal() {
        assert!(validate_key("images/a.png").is_ok());
        assert!(validate_key("orders-file/pending/u/a.pdf").is_ok());
        assert!(validate_key("secrets/a.txt").is_err());
        assert!(validate_key("images/../etc/passwd").is_err());
        assert!(validate_key("images//a.png").is_err());
        assert!(validate_key("images/").is_err());
    }

    #[test]
    fn sanitizes_file_names() {
        assert_eq!(sanitize_filename("My Poster (final).PDF"), "My-Poster--final-.PDF");
        assert_eq!(sanitize_filename("../../evil.png"), "evil.png");
        assert_eq!(sanitize_filename("..."), "file");
        assert_eq!(sanitize_filename("C:\\dir\\shirt.svg"), "shirt.svg");
    }

    #[test]
    fn guesses_content_type_from_extension() {
        assert_eq!(content_type_for("images/x.JPG"), "image/jpeg");
        assert_eq!(content_type_for("orders-file/1/x.pdf"), "application/pdf");
        assert_eq!(content_type_for("orders-file/1/noext"), "application/octet-stream");
        assert_eq!(extension_of(".bashrc"), None);
    }

    #[test]
    fn pending_keys_are_owned_by_their_user() {
        let user = Uuid::new_v4();
        let key = pending_order_file_key(user, "art.pdf");
        assert!(is_pending_key_of(&key, user));
        assert!(!is_pending_key_of(&key, Uuid::new_v4()));
        assert!(key.ends_with("-art.pdf"));

        let moved = order_file_key("ORD-20260101-ABCDEF12", &key);
        assert!(moved.starts_with("orders-file/ORD-20260101-ABCDEF12/"));
        assert!(moved.ends_with("-art.pdf"));
    }

    #[test]
    fn presigned_token_round_trips_to_key() {
        let storage = temp_storage();
        let presigned = storage.presign_get("images/a.png").unwrap();
        assert!(presigned.url.starts_with("http://localhost:3000/api/files/"));
        let token = presigned.url.rsplit('/').next().unwrap();
        assert_eq!(storage.verify_token(token).unwrap(), "images/a.png");

        let other = FileStorage::new(std::env::temp_dir(), "other", "http://x", 60);
        assert!(matches!(other.verify_token(token), Err(StorageError::InvalidToken)));
    }

    #[tokio::test]
    async fn put_get_copy_delete() {
        let storage = temp_storage();
        let stored = storage.put("images/a.png", b"png-bytes").await.unwrap();
        assert_eq!(stored.size, 9);
        assert_eq!(stored.content_type, "image/png");

        let (bytes, content_type) = storage.get("images/a.png").await.unwrap();
        assert_eq!(bytes, b"png-bytes");
        assert_eq!(content_type, "image/png");

        storage.copy("images/a.png", "images/b.png").await.unwrap();
        assert!(storage.exists("images/b.png").await.unwrap());

        storage.delete("images/a.png").await.unwrap();
        storage.delete("images/a.png").await.unwrap();
        assert!(matches!(
            storage.get("images/a.png").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            storage.copy("images/missing.png", "images/c.png").await,
            Err(StorageError::NotFound(_))
        ));
    }
}

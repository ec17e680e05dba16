//! Image uploads to the platform's object storage.
//!
//! Files are stored under a fresh `<uuid>.<ext>` key, so re-uploading the
//! same file name never overwrites an image another row still points at.

use std::path::Path;

use tracing::{info, instrument};
use uuid::Uuid;

use kundura_storefront::config::BackendConfig;

use crate::context::AdminContext;
use crate::error::{AdminError, Result};

/// Bucket used when none is configured.
pub const DEFAULT_BUCKET: &str = "product-images";

/// Content type for an image file extension.
#[must_use]
pub fn image_content_type(extension: &str) -> Option<&'static str> {
    match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "avif" => Some("image/avif"),
        "svg" => Some("image/svg+xml"),
        _ => None,
    }
}

/// Uploads catalog, brand and slider images.
#[derive(Debug, Clone)]
pub struct ImageUploader {
    ctx: AdminContext,
    bucket: String,
}

impl ImageUploader {
    #[must_use]
    pub fn new(ctx: &AdminContext, bucket: impl Into<String>) -> Self {
        Self {
            ctx: ctx.clone(),
            bucket: bucket.into(),
        }
    }

    #[must_use]
    pub fn from_config(ctx: &AdminContext, config: &BackendConfig) -> Self {
        Self::new(ctx, config.image_bucket.clone())
    }

    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Upload an image and return its public URL.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::Validation`] for an empty file or one that is
    /// not a known image type, or the backend error if the upload fails.
    #[instrument(skip(self, bytes), fields(bucket = %self.bucket, size = bytes.len()))]
    pub async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> Result<String> {
        const ACTION: &str = "upload image";
        let (key, content_type) = match storage_key(file_name) {
            Ok(key) => key,
            Err(e) => return self.ctx.fail(ACTION, e),
        };
        if bytes.is_empty() {
            return self
                .ctx
                .fail(ACTION, AdminError::Validation("The file is empty".to_string()));
        }

        match self
            .ctx
            .backend()
            .upload(&self.bucket, &key, bytes, content_type)
            .await
        {
            Ok(url) => {
                info!(key, "Image uploaded");
                self.ctx.succeed("Image uploaded");
                Ok(url)
            }
            Err(e) => self.ctx.fail(ACTION, e),
        }
    }
}

/// A fresh object key keeping the file's extension, with its content type.
fn storage_key(file_name: &str) -> Result<(String, &'static str)> {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();
    let content_type = image_content_type(extension).ok_or_else(|| {
        AdminError::Validation(format!("'{file_name}' is not a supported image"))
    })?;
    let key = format!("{}.{}", Uuid::new_v4(), extension.to_ascii_lowercase());
    Ok((key, content_type))
}

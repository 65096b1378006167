//! Media upload validation and storage
//!
//! Uploads pass a MIME whitelist, a size cap per class, and a magic-byte
//! sniff that must agree with the declared type before the blob reaches
//! the object store.

use crate::objects::{ObjectStore, StoredObject};
use error_types::{AppError, AppResult};
use snowflake_id::SnowflakeGenerator;
use std::sync::Arc;
use tracing::debug;

pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
pub const MAX_VIDEO_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaClass {
    Image,
    Video,
}

#[derive(Debug, Clone)]
pub struct StoredMedia {
    pub key: String,
    pub url: String,
    pub content_type: String,
}

#[derive(Clone)]
pub struct MediaService {
    objects: Arc<dyn ObjectStore>,
    ids: Arc<SnowflakeGenerator>,
}

impl MediaService {
    pub fn new(objects: Arc<dyn ObjectStore>, ids: Arc<SnowflakeGenerator>) -> Self {
        Self { objects, ids }
    }

    /// Validate and store an upload; returns the public key and URL.
    pub async fn store_upload(
        &self,
        declared_type: &str,
        bytes: Vec<u8>,
    ) -> AppResult<StoredMedia> {
        let parsed: mime::Mime = declared_type
            .parse()
            .map_err(|_| AppError::validation("Invalid media type"))?;
        let declared_type = parsed.essence_str().to_ascii_lowercase();
        let (class, extension) = classify(&declared_type)
            .ok_or_else(|| AppError::validation("Unsupported media type"))?;

        let cap = match class {
            MediaClass::Image => MAX_IMAGE_BYTES,
            MediaClass::Video => MAX_VIDEO_BYTES,
        };
        if bytes.len() > cap {
            return Err(AppError::PayloadTooLarge);
        }
        if bytes.is_empty() {
            return Err(AppError::validation("Empty upload"));
        }

        if !magic_bytes_match(&declared_type, &bytes) {
            return Err(AppError::validation(
                "File contents do not match the declared media type",
            ));
        }

        let id = self
            .ids
            .generate()
            .map_err(|e| AppError::internal(format!("id generation failed: {}", e)))?;
        let key = format!("media/{}.{}", id, extension);
        self.objects.put(&key, bytes, &declared_type).await?;

        debug!(key = %key, content_type = %declared_type, "media stored");
        Ok(StoredMedia {
            url: format!("/{}", key),
            key,
            content_type: declared_type,
        })
    }

    pub async fn serve(&self, key: &str) -> AppResult<StoredObject> {
        self.objects
            .get(key)
            .await?
            .ok_or_else(|| AppError::not_found("Media not found"))
    }
}

fn classify(content_type: &str) -> Option<(MediaClass, &'static str)> {
    match content_type {
        "image/jpeg" => Some((MediaClass::Image, "jpg")),
        "image/png" => Some((MediaClass::Image, "png")),
        "image/gif" => Some((MediaClass::Image, "gif")),
        "image/webp" => Some((MediaClass::Image, "webp")),
        "video/mp4" => Some((MediaClass::Video, "mp4")),
        "video/webm" => Some((MediaClass::Video, "webm")),
        _ => None,
    }
}

/// The stored bytes must carry the signature of the declared type.
fn magic_bytes_match(content_type: &str, bytes: &[u8]) -> bool {
    match content_type {
        "image/jpeg" => bytes.starts_with(&[0xFF, 0xD8, 0xFF]),
        "image/png" => bytes.starts_with(&[0x89, b'P', b'N', b'G']),
        "image/gif" => bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a"),
        "image/webp" => {
            bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP"
        }
        // ISO BMFF: size box then "ftyp".
        "video/mp4" => bytes.len() >= 8 && &bytes[4..8] == b"ftyp",
        // EBML header.
        "video/webm" => bytes.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]),
        _ => false,
    }
}

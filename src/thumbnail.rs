//! Derived artifacts for uploads
//!
//! An `ArtifactTransform` turns an uploaded body into a secondary object
//! (a preview thumbnail). The image implementation decodes with the `image`
//! crate off the async runtime and re-encodes a bounded JPEG.

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use thiserror::Error;

/// Refuse to decode inputs larger than this (50 MB)
const MAX_INPUT_BYTES: usize = 50 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Unsupported input: {0}")]
    Unsupported(String),

    #[error("Input too large: {0} bytes")]
    TooLarge(usize),

    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("Encode failed: {0}")]
    Encode(String),
}

/// A derived object ready to be stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

#[async_trait]
pub trait ArtifactTransform: Send + Sync {
    /// Whether this transform applies to the file
    fn accepts(&self, name: &str, content_type: &str) -> bool;

    /// Derive the artifact from the uploaded body
    async fn derive(&self, name: &str, body: &[u8]) -> Result<Artifact, TransformError>;
}

/// JPEG thumbnail generator
#[derive(Debug, Clone, Copy)]
pub struct ImageThumbnailer {
    /// Longest edge of the thumbnail in pixels
    pub max_dimension: u32,
    /// JPEG quality (1-100)
    pub quality: u8,
}

impl Default for ImageThumbnailer {
    fn default() -> Self {
        Self {
            max_dimension: 256,
            quality: 80,
        }
    }
}

impl ImageThumbnailer {
    pub fn new(max_dimension: u32, quality: u8) -> Self {
        Self {
            max_dimension: max_dimension.max(1),
            quality: quality.clamp(1, 100),
        }
    }
}

#[async_trait]
impl ArtifactTransform for ImageThumbnailer {
    fn accepts(&self, _name: &str, content_type: &str) -> bool {
        content_type.starts_with("image/") && content_type != "image/svg+xml"
    }

    async fn derive(&self, name: &str, body: &[u8]) -> Result<Artifact, TransformError> {
        if body.len() > MAX_INPUT_BYTES {
            return Err(TransformError::TooLarge(body.len()));
        }
        if body.is_empty() {
            return Err(TransformError::Unsupported(format!("{} is empty", name)));
        }

        let body = body.to_vec();
        let max = self.max_dimension;
        let quality = self.quality;

        let bytes = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, TransformError> {
            let img = image::load_from_memory(&body)
                .map_err(|e| TransformError::Decode(e.to_string()))?;
            let thumb = img.thumbnail(max, max).to_rgb8();

            let mut out = Vec::new();
            let encoder = JpegEncoder::new_with_quality(&mut out, quality);
            thumb
                .write_with_encoder(encoder)
                .map_err(|e| TransformError::Encode(e.to_string()))?;
            Ok(out)
        })
        .await
        .map_err(|e| TransformError::Encode(format!("Task failed: {}", e)))??;

        tracing::debug!("[Thumbnail] {} -> {} bytes", name, bytes.len());
        Ok(Artifact {
            bytes,
            content_type: "image/jpeg".to_string(),
        })
    }
}

use image::{DynamicImage, ImageError, RgbImage};
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 over the decoded, RGB8-normalized pixel buffer.
///
/// Hashing decoded pixels instead of file bytes means re-encodings of the
/// same visual content collide, which is what deduplication wants.
pub type ContentHash = String;

#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("image decode error: {0}")]
    Decode(ImageError),
}

impl From<ImageError> for HashError {
    fn from(err: ImageError) -> Self {
        match err {
            ImageError::Unsupported(e) => HashError::UnsupportedFormat(e.to_string()),
            other => HashError::Decode(other),
        }
    }
}

/// Decode `bytes` and normalize to RGB8, dropping alpha and exotic color models.
pub fn normalize_pixels(bytes: &[u8]) -> Result<RgbImage, HashError> {
    let img: DynamicImage = image::load_from_memory(bytes)?;
    Ok(img.to_rgb8())
}

/// Content identifier for an image's pixel data.
///
/// Dimensions are hashed alongside the raw buffer so that images whose pixel
/// bytes happen to concatenate identically at different shapes stay distinct.
pub fn hash_pixels(pixels: &RgbImage) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(pixels.width().to_le_bytes());
    hasher.update(pixels.height().to_le_bytes());
    hasher.update(pixels.as_raw());
    format!("{:x}", hasher.finalize())
}

pub fn hash_image_content(bytes: &[u8]) -> Result<(ContentHash, RgbImage), HashError> {
    let pixels = normalize_pixels(bytes)?;
    let hash = hash_pixels(&pixels);
    Ok((hash, pixels))
}

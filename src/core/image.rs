use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageReader};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Invalid image: {reason}")]
    InvalidImage { reason: String },

    #[error("Image decode error: {0}")]
    Decode(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ImageError {
    pub fn code(&self) -> &'static str {
        match self {
            ImageError::InvalidImage { .. } => "invalid_image",
            ImageError::Decode(_) | ImageError::Io(_) => "decode_error",
        }
    }
}

/// Rejects images with a zero width or height.
pub fn ensure_non_empty(image: &DynamicImage) -> Result<(), ImageError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(ImageError::InvalidImage {
            reason: format!("dimensions must be non-zero (got {}x{})", width, height),
        });
    }
    Ok(())
}

/// Decode an in-memory image, sniffing the format from its bytes.
pub fn decode_bytes(bytes: &[u8]) -> Result<DynamicImage, ImageError> {
    if bytes.is_empty() {
        return Err(ImageError::InvalidImage {
            reason: "no image data".to_string(),
        });
    }
    let image = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .decode()?;
    ensure_non_empty(&image)?;
    Ok(image)
}

/// Decode an image file from disk.
pub fn open_image(path: &Path) -> Result<DynamicImage, ImageError> {
    let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
    ensure_non_empty(&image)?;
    Ok(image)
}

/// Resizes a subject image to a reference image's exact dimensions so that
/// fingerprints of the two are taken over the same geometry.
#[derive(Debug, Clone, Copy)]
pub struct ImageNormalizer {
    filter: FilterType,
}

impl ImageNormalizer {
    pub fn new(filter: FilterType) -> Self {
        Self { filter }
    }

    /// Returns a copy of `subject` resized to `reference`'s width and height.
    /// A subject that already has those dimensions is returned unchanged, so
    /// normalizing twice is the same as normalizing once.
    pub fn normalize(
        &self,
        reference: &DynamicImage,
        subject: &DynamicImage,
    ) -> Result<DynamicImage, ImageError> {
        ensure_non_empty(reference)?;
        ensure_non_empty(subject)?;

        let (width, height) = reference.dimensions();
        if subject.dimensions() == (width, height) {
            return Ok(subject.clone());
        }

        log::debug!(
            "Resizing {}x{} -> {}x{}",
            subject.width(),
            subject.height(),
            width,
            height
        );
        Ok(subject.resize_exact(width, height, self.filter))
    }
}

impl Default for ImageNormalizer {
    fn default() -> Self {
        Self::new(FilterType::Triangle)
    }
}

//! Image fingerprinting and uniqueness engine.
//!
//! This module provides functionality for:
//! - Decoding images with their embedded orientation applied
//! - Perceptual hashing (aHash, dHash, pHash) and Hamming distances
//! - Structural augmentation (mirror, crop, rotate, re-compose)
//! - Color grading
//! - The bounded search that pushes an image past a similarity threshold
//!
//! # Architecture
//!
//! The imaging engine is divided into submodules:
//! - [`perceptual`]: fixed-size perceptual hashes
//! - [`augment`]: randomized structural transforms
//! - [`grade`]: color grading and pixel difference ratio
//! - [`uniqueness`]: generate-and-test search over augmentations
//! - [`pipeline`]: end-to-end processing of a post's images
//!
//! # Example
//!
//! ```no_run
//! use rand::SeedableRng;
//! use uniqpost::imaging::{ImageBuffer, UniquenessConfig, UniquenessEnsurer};
//!
//! let bytes = std::fs::read("photo.jpg").unwrap();
//! let original = ImageBuffer::from_bytes(bytes).unwrap();
//!
//! let ensurer = UniquenessEnsurer::new(UniquenessConfig::default());
//! let mut rng = rand::rngs::StdRng::seed_from_u64(7);
//! let outcome = ensurer
//!     .ensure(&original, original.width(), original.height(), &mut rng)
//!     .unwrap();
//!
//! if !outcome.is_satisfied() {
//!     eprintln!("best effort only: {}", outcome.candidate().distances);
//! }
//! std::fs::write("photo.png", outcome.into_image().bytes()).unwrap();
//! ```

pub mod augment;
pub mod grade;
pub mod perceptual;
pub mod pipeline;
pub mod uniqueness;

use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader};
use std::io::Cursor;
use thiserror::Error;

// Re-export main types
pub use augment::{AugmentConfig, AugmentProfile, StructuralAugmenter};
pub use grade::{diff_ratio, ColorGrader, GradeStrength, GradeStyle};
pub use perceptual::{
    HashDistanceSet, ImageFingerprint, PerceptualAlgorithm, PerceptualHash, PerceptualHasher,
};
pub use pipeline::{GradePolicy, ImagePipeline, PipelineConfig, ProcessedImage, SearchSummary};
pub use uniqueness::{Candidate, Outcome, Thresholds, UniquenessConfig, UniquenessEnsurer};

/// Errors that can occur while decoding, transforming or encoding an image.
///
/// Every variant is fatal to the single image it concerns only.
#[derive(Debug, Error)]
pub enum ImageError {
    /// The bytes could not be interpreted as an image.
    #[error("Failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    /// The image format could not be detected from the bytes.
    #[error("Failed to detect image format: {0}")]
    Format(#[source] std::io::Error),

    /// The processed image could not be re-encoded.
    #[error("Failed to encode image: {0}")]
    Encode(#[source] image::ImageError),

    /// A zero-sized source or target was requested.
    #[error("Invalid image dimensions {width}x{height}")]
    InvalidDimensions {
        /// Requested width
        width: u32,
        /// Requested height
        height: u32,
    },
}

/// Encoded image bytes together with their decoded dimensions.
///
/// The dimensions are the ones after the embedded orientation has been
/// applied, so a portrait photo stored sideways reports its upright size.
/// An `ImageBuffer` is never mutated; every processing step produces a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuffer {
    bytes: Vec<u8>,
    width: u32,
    height: u32,
}

impl ImageBuffer {
    /// Wrap encoded bytes, decoding them once to learn the upright dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::Decode`] if the bytes are not a supported image.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ImageError> {
        let image = decode_oriented(&bytes)?;
        ensure_dimensions(image.width(), image.height())?;
        Ok(Self {
            width: image.width(),
            height: image.height(),
            bytes,
        })
    }

    /// Encode a decoded image as PNG.
    ///
    /// PNG is lossless, so decoding the result yields exactly `image`'s pixels.
    pub fn from_image(image: &DynamicImage) -> Result<Self, ImageError> {
        ensure_dimensions(image.width(), image.height())?;
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(ImageError::Encode)?;
        Ok(Self {
            bytes,
            width: image.width(),
            height: image.height(),
        })
    }

    /// Decode the buffer with its orientation applied.
    pub fn decode(&self) -> Result<DynamicImage, ImageError> {
        decode_oriented(&self.bytes)
    }

    /// Transcode to PNG at the same (upright) size.
    pub fn to_png(&self) -> Result<Self, ImageError> {
        Self::from_image(&self.decode()?)
    }

    /// The encoded bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the buffer, returning the encoded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }
}

/// Decode image bytes and apply the EXIF orientation stored in them.
///
/// Hashes are computed on the result, so an image stored rotated with an
/// orientation tag hashes the same as its corrected version.
pub fn decode_oriented(bytes: &[u8]) -> Result<DynamicImage, ImageError> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(ImageError::Format)?;
    let mut decoder = reader.into_decoder().map_err(ImageError::Decode)?;
    let orientation = decoder.orientation().map_err(ImageError::Decode)?;
    let mut image = DynamicImage::from_decoder(decoder).map_err(ImageError::Decode)?;
    image.apply_orientation(orientation);
    Ok(image)
}

pub(crate) fn ensure_dimensions(width: u32, height: u32) -> Result<(), ImageError> {
    if width == 0 || height == 0 {
        return Err(ImageError::InvalidDimensions { width, height });
    }
    Ok(())
}

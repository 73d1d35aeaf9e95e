//! Perceptual image hashing for similarity detection.
//!
//! This module provides the `PerceptualHasher` which computes three
//! independent fingerprints of an image. They stay stable under re-encoding
//! and mild resizing but move when the composition changes, which is exactly
//! what the uniqueness search measures.
//!
//! Every algorithm first normalizes the input to a small fixed grayscale grid,
//! so hash length depends only on the algorithm:
//!
//! | Algorithm | Grid  | Bits |
//! |-----------|-------|------|
//! | aHash     | 8×8   | 64   |
//! | dHash     | 9×8   | 64   |
//! | pHash     | 32×32 | 63   |

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;

use super::{decode_oriented, ImageBuffer, ImageError};

/// Side of the pHash input grid.
const DCT_INPUT: usize = 32;
/// Side of the retained low-frequency block.
const DCT_KEEP: usize = 8;

/// Supported perceptual hashing algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerceptualAlgorithm {
    /// aHash (Average Hash) - threshold against the mean brightness.
    #[serde(alias = "average")]
    Ahash,
    /// dHash (Difference Hash) - horizontal gradient signs.
    #[serde(alias = "difference")]
    Dhash,
    /// pHash (Perceptual Hash) - DCT-based, thresholded at the median.
    #[serde(alias = "frequency")]
    Phash,
}

impl PerceptualAlgorithm {
    /// All algorithms, in the order fingerprints report them.
    pub const ALL: [PerceptualAlgorithm; 3] = [Self::Ahash, Self::Dhash, Self::Phash];

    /// Number of bits produced by this algorithm.
    #[must_use]
    pub fn bit_len(self) -> u32 {
        match self {
            Self::Ahash | Self::Dhash => 64,
            Self::Phash => (DCT_KEEP * DCT_KEEP - 1) as u32,
        }
    }

    /// Get the default minimum distance a re-posted image must reach.
    #[must_use]
    pub fn default_threshold(self) -> u32 {
        match self {
            Self::Ahash => 10,
            Self::Dhash => 12,
            Self::Phash => 10,
        }
    }
}

impl fmt::Display for PerceptualAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ahash => write!(f, "aHash"),
            Self::Dhash => write!(f, "dHash"),
            Self::Phash => write!(f, "pHash"),
        }
    }
}

/// A fixed-length perceptual hash.
///
/// Bits are stored in the low `bit_len` bits of a `u64`; bit 0 of the hash
/// (the first grid cell, row-major) is the most significant of those.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PerceptualHash {
    algorithm: PerceptualAlgorithm,
    bits: u64,
}

impl PerceptualHash {
    /// Build a hash from raw bits; bits above the algorithm's length are dropped.
    #[must_use]
    pub fn from_bits(algorithm: PerceptualAlgorithm, bits: u64) -> Self {
        let len = algorithm.bit_len();
        let mask = if len == 64 { u64::MAX } else { (1u64 << len) - 1 };
        Self {
            algorithm,
            bits: bits & mask,
        }
    }

    fn from_flags(algorithm: PerceptualAlgorithm, flags: impl IntoIterator<Item = bool>) -> Self {
        let bits = flags
            .into_iter()
            .fold(0u64, |acc, bit| (acc << 1) | u64::from(bit));
        Self::from_bits(algorithm, bits)
    }

    #[must_use]
    pub fn algorithm(&self) -> PerceptualAlgorithm {
        self.algorithm
    }

    #[must_use]
    pub fn bits(&self) -> u64 {
        self.bits
    }

    /// Number of bits in this hash.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.algorithm.bit_len()
    }

    /// Always false; hashes have a fixed non-zero length.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Hamming distance to `other`.
    ///
    /// Hashes of different algorithms are not comparable; their distance is
    /// reported as the longer of the two lengths.
    #[must_use]
    pub fn distance(&self, other: &Self) -> u32 {
        if self.algorithm != other.algorithm {
            return self.len().max(other.len());
        }
        (self.bits ^ other.bits).count_ones()
    }

    /// Hexadecimal rendering (16 digits).
    #[must_use]
    pub fn to_hex(&self) -> String {
        format!("{:016x}", self.bits)
    }
}

impl fmt::Display for PerceptualHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.to_hex())
    }
}

/// The three perceptual hashes of one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFingerprint {
    pub ahash: PerceptualHash,
    pub dhash: PerceptualHash,
    pub phash: PerceptualHash,
}

impl ImageFingerprint {
    /// Per-algorithm Hamming distances to `other`.
    #[must_use]
    pub fn distance(&self, other: &Self) -> HashDistanceSet {
        HashDistanceSet {
            ahash: self.ahash.distance(&other.ahash),
            dhash: self.dhash.distance(&other.dhash),
            phash: self.phash.distance(&other.phash),
        }
    }

    #[must_use]
    pub fn get(&self, algorithm: PerceptualAlgorithm) -> PerceptualHash {
        match algorithm {
            PerceptualAlgorithm::Ahash => self.ahash,
            PerceptualAlgorithm::Dhash => self.dhash,
            PerceptualAlgorithm::Phash => self.phash,
        }
    }
}

/// Hamming distances between two fingerprints, one per algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HashDistanceSet {
    pub ahash: u32,
    pub dhash: u32,
    pub phash: u32,
}

impl HashDistanceSet {
    #[must_use]
    pub fn get(&self, algorithm: PerceptualAlgorithm) -> u32 {
        match algorithm {
            PerceptualAlgorithm::Ahash => self.ahash,
            PerceptualAlgorithm::Dhash => self.dhash,
            PerceptualAlgorithm::Phash => self.phash,
        }
    }
}

impl fmt::Display for HashDistanceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "aHash={} dHash={} pHash={}",
            self.ahash, self.dhash, self.phash
        )
    }
}

/// Computes perceptual hashes for images.
///
/// Hashing is a pure function of the decoded pixels: the same input always
/// yields the same bits.
#[derive(Debug, Clone)]
pub struct PerceptualHasher {
    filter: FilterType,
    dct_basis: Vec<f64>,
}

impl PerceptualHasher {
    /// Create a new `PerceptualHasher` using a triangle (bilinear) resampling filter.
    pub fn new() -> Self {
        Self::with_filter(FilterType::Triangle)
    }

    /// Create a hasher with a specific downscaling filter.
    pub fn with_filter(filter: FilterType) -> Self {
        Self {
            filter,
            dct_basis: dct_basis(),
        }
    }

    /// Compute one hash of a decoded image.
    pub fn hash(&self, algorithm: PerceptualAlgorithm, image: &DynamicImage) -> PerceptualHash {
        match algorithm {
            PerceptualAlgorithm::Ahash => self.average_hash(image),
            PerceptualAlgorithm::Dhash => self.difference_hash(image),
            PerceptualAlgorithm::Phash => self.frequency_hash(image),
        }
    }

    /// Compute all three hashes of a decoded image.
    pub fn fingerprint(&self, image: &DynamicImage) -> ImageFingerprint {
        ImageFingerprint {
            ahash: self.average_hash(image),
            dhash: self.difference_hash(image),
            phash: self.frequency_hash(image),
        }
    }

    /// Decode `bytes` (applying orientation) and compute one hash.
    pub fn hash_bytes(
        &self,
        algorithm: PerceptualAlgorithm,
        bytes: &[u8],
    ) -> Result<PerceptualHash, ImageError> {
        let image = decode_oriented(bytes)?;
        Ok(self.hash(algorithm, &image))
    }

    /// Decode a buffer and compute all three hashes.
    pub fn fingerprint_buffer(&self, buffer: &ImageBuffer) -> Result<ImageFingerprint, ImageError> {
        Ok(self.fingerprint(&buffer.decode()?))
    }

    fn grid(&self, image: &DynamicImage, width: u32, height: u32) -> GrayImage {
        image.resize_exact(width, height, self.filter).to_luma8()
    }

    fn average_hash(&self, image: &DynamicImage) -> PerceptualHash {
        let grid = self.grid(image, 8, 8);
        let pixels = grid.as_raw();
        let sum: u32 = pixels.iter().map(|&p| u32::from(p)).sum();
        let count = pixels.len() as u32;
        // p >= sum / count, kept in integers
        PerceptualHash::from_flags(
            PerceptualAlgorithm::Ahash,
            pixels.iter().map(|&p| u32::from(p) * count >= sum),
        )
    }

    fn difference_hash(&self, image: &DynamicImage) -> PerceptualHash {
        let grid = self.grid(image, 9, 8);
        let flags = (0..8).flat_map(|y| {
            let grid = &grid;
            (0..8).map(move |x| grid.get_pixel(x, y)[0] > grid.get_pixel(x + 1, y)[0])
        });
        PerceptualHash::from_flags(PerceptualAlgorithm::Dhash, flags)
    }

    fn frequency_hash(&self, image: &DynamicImage) -> PerceptualHash {
        let grid = self.grid(image, DCT_INPUT as u32, DCT_INPUT as u32);
        let input: Vec<f64> = grid.as_raw().iter().map(|&p| f64::from(p) / 255.0).collect();

        let mut coefficients = Vec::with_capacity(DCT_KEEP * DCT_KEEP - 1);
        for v in 0..DCT_KEEP {
            for u in 0..DCT_KEEP {
                if u == 0 && v == 0 {
                    continue;
                }
                coefficients.push(self.dct_coefficient(&input, u, v));
            }
        }

        let mut sorted = coefficients.clone();
        sorted.sort_by(f64::total_cmp);
        let median = sorted[sorted.len() / 2];

        PerceptualHash::from_flags(
            PerceptualAlgorithm::Phash,
            coefficients.iter().map(|&c| c > median),
        )
    }

    /// DCT-II coefficient (u horizontal, v vertical) with orthonormal scaling.
    fn dct_coefficient(&self, input: &[f64], u: usize, v: usize) -> f64 {
        let row_u = &self.dct_basis[u * DCT_INPUT..(u + 1) * DCT_INPUT];
        let row_v = &self.dct_basis[v * DCT_INPUT..(v + 1) * DCT_INPUT];
        let mut sum = 0.0;
        for (y, &cv) in row_v.iter().enumerate() {
            let line = &input[y * DCT_INPUT..(y + 1) * DCT_INPUT];
            let inner: f64 = line.iter().zip(row_u).map(|(&f, &cu)| f * cu).sum();
            sum += cv * inner;
        }
        sum
    }
}

impl Default for PerceptualHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Scaled cosine table: `basis[k * N + x] = c(k) * cos((2x + 1) k π / 2N)`.
fn dct_basis() -> Vec<f64> {
    let n = DCT_INPUT as f64;
    let mut basis = Vec::with_capacity(DCT_KEEP * DCT_INPUT);
    for k in 0..DCT_KEEP {
        let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
        for x in 0..DCT_INPUT {
            let angle = (2.0 * x as f64 + 1.0) * k as f64 * PI / (2.0 * n);
            basis.push(scale * angle.cos());
        }
    }
    basis
}

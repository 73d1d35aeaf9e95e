//! Bounded generate-and-test search for a sufficiently different image.
//!
//! The search hashes the original once, then draws augmented candidates until
//! one is at least the configured Hamming distance away from the original on
//! every checked hash family, or the try budget runs out.

use super::augment::{AugmentConfig, StructuralAugmenter};
use super::grade::ColorGrader;
use super::perceptual::{HashDistanceSet, PerceptualAlgorithm, PerceptualHasher};
use super::{ensure_dimensions, ImageBuffer, ImageError};
use image::DynamicImage;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Minimum Hamming distance per hash family.
///
/// A family left at `None` is not checked. All checked families must pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub ahash: Option<u32>,
    pub dhash: Option<u32>,
    pub phash: Option<u32>,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            ahash: Some(PerceptualAlgorithm::Ahash.default_threshold()),
            dhash: Some(PerceptualAlgorithm::Dhash.default_threshold()),
            phash: Some(PerceptualAlgorithm::Phash.default_threshold()),
        }
    }
}

impl Thresholds {
    /// No family checked; the first candidate always passes.
    #[must_use]
    pub fn none() -> Self {
        Self {
            ahash: None,
            dhash: None,
            phash: None,
        }
    }

    #[must_use]
    pub fn get(&self, algorithm: PerceptualAlgorithm) -> Option<u32> {
        match algorithm {
            PerceptualAlgorithm::Ahash => self.ahash,
            PerceptualAlgorithm::Dhash => self.dhash,
            PerceptualAlgorithm::Phash => self.phash,
        }
    }

    /// Whether `distances` meets every configured threshold.
    #[must_use]
    pub fn meets(&self, distances: &HashDistanceSet) -> bool {
        PerceptualAlgorithm::ALL.iter().all(|&alg| {
            self.get(alg)
                .is_none_or(|threshold| distances.get(alg) >= threshold)
        })
    }
}

/// Settings for [`UniquenessEnsurer`].
#[derive(Debug, Clone, PartialEq)]
pub struct UniquenessConfig {
    /// Upper bound on candidates drawn. Zero behaves as one.
    pub max_tries: u32,
    pub thresholds: Thresholds,
    pub augment: AugmentConfig,
    /// Grade applied to every candidate after augmentation.
    pub grade: Option<ColorGrader>,
}

impl Default for UniquenessConfig {
    fn default() -> Self {
        Self {
            max_tries: 3,
            thresholds: Thresholds::default(),
            augment: AugmentConfig::default(),
            grade: None,
        }
    }
}

impl UniquenessConfig {
    #[must_use]
    pub fn with_max_tries(mut self, max_tries: u32) -> Self {
        self.max_tries = max_tries;
        self
    }

    #[must_use]
    pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    #[must_use]
    pub fn with_augment(mut self, augment: AugmentConfig) -> Self {
        self.augment = augment;
        self
    }

    #[must_use]
    pub fn with_grade(mut self, grade: Option<ColorGrader>) -> Self {
        self.grade = grade;
        self
    }
}

/// One augmented image with its distances from the original.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// PNG-encoded candidate.
    pub image: ImageBuffer,
    pub distances: HashDistanceSet,
    /// 1-based number of the try that produced it.
    pub attempt: u32,
}

/// Result of a uniqueness search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A candidate met every threshold.
    Satisfied(Candidate),
    /// The try budget ran out; holds the last candidate drawn.
    Exhausted(Candidate),
}

impl Outcome {
    #[must_use]
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied(_))
    }

    #[must_use]
    pub fn candidate(&self) -> &Candidate {
        match self {
            Self::Satisfied(c) | Self::Exhausted(c) => c,
        }
    }

    #[must_use]
    pub fn into_candidate(self) -> Candidate {
        match self {
            Self::Satisfied(c) | Self::Exhausted(c) => c,
        }
    }

    #[must_use]
    pub fn into_image(self) -> ImageBuffer {
        self.into_candidate().image
    }
}

/// Drives the augment → hash → compare loop.
#[derive(Debug, Clone)]
pub struct UniquenessEnsurer {
    config: UniquenessConfig,
    augmenter: StructuralAugmenter,
    hasher: PerceptualHasher,
}

impl UniquenessEnsurer {
    pub fn new(config: UniquenessConfig) -> Self {
        Self {
            augmenter: StructuralAugmenter::new(config.augment),
            hasher: PerceptualHasher::new(),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &UniquenessConfig {
        &self.config
    }

    /// Search for a variant of `original` that is far enough from it.
    ///
    /// # Arguments
    ///
    /// * `original` - Image the candidates must differ from, and are drawn from
    /// * `width`, `height` - Size of every candidate
    /// * `rng` - Random source for the augmentations and grain
    ///
    /// # Errors
    ///
    /// Fails only if the original cannot be decoded, the target size is zero,
    /// or a candidate cannot be encoded. Running out of tries is not an error.
    pub fn ensure<R: Rng + ?Sized>(
        &self,
        original: &ImageBuffer,
        width: u32,
        height: u32,
        rng: &mut R,
    ) -> Result<Outcome, ImageError> {
        let decoded = original.decode()?;
        self.ensure_decoded(&decoded, &decoded, width, height, rng)
    }

    /// Like [`ensure`](Self::ensure), but draws candidates from `source`
    /// while still measuring them against `original`.
    pub fn ensure_from<R: Rng + ?Sized>(
        &self,
        original: &ImageBuffer,
        source: &ImageBuffer,
        width: u32,
        height: u32,
        rng: &mut R,
    ) -> Result<Outcome, ImageError> {
        let original = original.decode()?;
        let source = source.decode()?;
        self.ensure_decoded(&original, &source, width, height, rng)
    }

    pub(crate) fn ensure_decoded<R: Rng + ?Sized>(
        &self,
        original: &DynamicImage,
        source: &DynamicImage,
        width: u32,
        height: u32,
        rng: &mut R,
    ) -> Result<Outcome, ImageError> {
        ensure_dimensions(width, height)?;
        let baseline = self.hasher.fingerprint(original);
        let tries = self.config.max_tries.max(1);

        let mut last = None;
        for attempt in 1..=tries {
            let mut canvas = self.augmenter.augment(source, width, height, rng)?;
            if let Some(grader) = &self.config.grade {
                canvas = grader.grade(&canvas, rng);
            }
            let candidate_image = DynamicImage::ImageRgba8(canvas);
            let distances = baseline.distance(&self.hasher.fingerprint(&candidate_image));
            log::debug!("Uniqueness try {attempt}/{tries}: {distances}");

            let candidate = Candidate {
                image: ImageBuffer::from_image(&candidate_image)?,
                distances,
                attempt,
            };
            if self.config.thresholds.meets(&distances) {
                return Ok(Outcome::Satisfied(candidate));
            }
            last = Some(candidate);
        }

        match last {
            Some(candidate) => {
                log::warn!(
                    "Uniqueness thresholds not met after {tries} tries, keeping last candidate ({})",
                    candidate.distances
                );
                Ok(Outcome::Exhausted(candidate))
            }
            None => Err(ImageError::InvalidDimensions { width, height }),
        }
    }
}

//! End-to-end processing of the images attached to one post.
//!
//! For each image: decode the original, optionally swap in an externally
//! edited version, grade it when it is too close to the original, then run
//! the uniqueness search against the original. The result is always a PNG of
//! the original's upright size.

use super::grade::{diff_ratio, ColorGrader};
use super::perceptual::HashDistanceSet;
use super::uniqueness::{Outcome, UniquenessConfig, UniquenessEnsurer};
use super::{decode_oriented, ImageBuffer, ImageError};
use image::imageops::FilterType;
use image::DynamicImage;
use rand::Rng;

/// Default cap on images per post.
pub const DEFAULT_MAX_IMAGES: usize = 10;

/// When and how the pipeline grades a source image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradePolicy {
    pub grader: ColorGrader,
    /// Grade even when the source already differs enough.
    pub always: bool,
    /// Grade when `diff_ratio(original, source)` is below this.
    pub diff_threshold: f64,
}

impl Default for GradePolicy {
    fn default() -> Self {
        Self {
            grader: ColorGrader::default(),
            always: false,
            diff_threshold: 0.04,
        }
    }
}

/// Settings for [`ImagePipeline`].
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub max_images: usize,
    /// `None` disables grading.
    pub grade: Option<GradePolicy>,
    /// `None` disables the uniqueness search.
    pub uniqueness: Option<UniquenessConfig>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_images: DEFAULT_MAX_IMAGES,
            grade: Some(GradePolicy::default()),
            uniqueness: Some(UniquenessConfig::default()),
        }
    }
}

/// How the uniqueness search ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchSummary {
    pub satisfied: bool,
    pub attempts: u32,
    pub distances: HashDistanceSet,
}

/// Output of the pipeline for one image.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedImage {
    /// Final PNG, at the original's upright size unless another size was requested.
    pub image: ImageBuffer,
    /// Whether a color grade was applied before the search.
    pub graded: bool,
    /// `None` when the search is disabled.
    pub search: Option<SearchSummary>,
}

impl ProcessedImage {
    /// True when the search ran out of tries.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.search.is_some_and(|s| !s.satisfied)
    }
}

/// Runs grading and the uniqueness search over a post's images.
#[derive(Debug, Clone)]
pub struct ImagePipeline {
    config: PipelineConfig,
    ensurer: Option<UniquenessEnsurer>,
}

impl ImagePipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let ensurer = config.uniqueness.clone().map(UniquenessEnsurer::new);
        Self { config, ensurer }
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process one image.
    ///
    /// # Arguments
    ///
    /// * `original` - Encoded original image
    /// * `edited` - Encoded externally edited version, stretched to the original's size
    /// * `rng` - Random source for grain and augmentation
    ///
    /// # Errors
    ///
    /// Returns an [`ImageError`] when either image cannot be decoded or the
    /// result cannot be encoded.
    pub fn process<R: Rng + ?Sized>(
        &self,
        original: &[u8],
        edited: Option<&[u8]>,
        rng: &mut R,
    ) -> Result<ProcessedImage, ImageError> {
        self.process_sized(original, edited, None, rng)
    }

    /// Like [`process`](Self::process), but produces an image of `size`
    /// instead of the original's size when given.
    pub fn process_sized<R: Rng + ?Sized>(
        &self,
        original: &[u8],
        edited: Option<&[u8]>,
        size: Option<(u32, u32)>,
        rng: &mut R,
    ) -> Result<ProcessedImage, ImageError> {
        let original = decode_oriented(original)?;
        let (orig_w, orig_h) = (original.width(), original.height());
        super::ensure_dimensions(orig_w, orig_h)?;
        let (width, height) = size.unwrap_or((orig_w, orig_h));
        super::ensure_dimensions(width, height)?;

        let mut source = match edited {
            Some(bytes) => stretch(decode_oriented(bytes)?, orig_w, orig_h),
            None => original.clone(),
        };

        let mut graded = false;
        if let Some(policy) = &self.config.grade {
            let ratio = diff_ratio(&original, &source);
            if policy.always || ratio < policy.diff_threshold {
                log::debug!("Grading source (diff ratio {ratio:.4})");
                source = DynamicImage::ImageRgba8(policy.grader.grade(&source.to_rgba8(), rng));
                graded = true;
            }
        }

        let Some(ensurer) = &self.ensurer else {
            return Ok(ProcessedImage {
                image: ImageBuffer::from_image(&stretch(source, width, height))?,
                graded,
                search: None,
            });
        };

        let outcome = ensurer.ensure_decoded(&original, &source, width, height, rng)?;
        let satisfied = outcome.is_satisfied();
        let candidate = match outcome {
            Outcome::Satisfied(c) | Outcome::Exhausted(c) => c,
        };
        Ok(ProcessedImage {
            search: Some(SearchSummary {
                satisfied,
                attempts: candidate.attempt,
                distances: candidate.distances,
            }),
            image: candidate.image,
            graded,
        })
    }

    /// Process up to `max_images` images, skipping the ones that fail.
    ///
    /// Each item is an original plus an optional edited version.
    pub fn process_batch<'a, I, R>(&self, images: I, rng: &mut R) -> Vec<ProcessedImage>
    where
        I: IntoIterator<Item = (&'a [u8], Option<&'a [u8]>)>,
        R: Rng + ?Sized,
    {
        images
            .into_iter()
            .take(self.config.max_images)
            .enumerate()
            .filter_map(|(index, (original, edited))| {
                match self.process(original, edited, &mut *rng) {
                    Ok(processed) => Some(processed),
                    Err(e) => {
                        log::warn!("Skipping image {}: {}", index + 1, e);
                        None
                    }
                }
            })
            .collect()
    }
}

/// Resize to exactly `width` × `height`, ignoring the aspect ratio.
fn stretch(image: DynamicImage, width: u32, height: u32) -> DynamicImage {
    if image.width() == width && image.height() == height {
        image
    } else {
        image.resize_exact(width, height, FilterType::Triangle)
    }
}

impl Default for ImagePipeline {
    fn default() -> Self {
        Self::new(PipelineConfig::default())
    }
}

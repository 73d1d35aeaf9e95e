//! Structural augmentation of images.
//!
//! Color changes alone barely move a perceptual hash, so the augmenter changes
//! the *composition*: it mirrors, crops, tilts and re-frames the subject on a
//! blurred copy of itself. The subject stays recognisable; the 8×8 and 32×32
//! grids the hashes look at do not.
//!
//! Every random draw comes from the caller's RNG, so a seeded RNG reproduces
//! the exact same output.

use image::imageops::{self, FilterType};
use image::{DynamicImage, Rgba, RgbaImage};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{ensure_dimensions, ImageError};

/// Smallest crop side in pixels.
const MIN_CROP_SIDE: u32 = 8;
/// Longest side the background is blurred at before being scaled up.
const BACKGROUND_WORK_SIDE: u32 = 256;

/// Named presets for how hard the augmenter pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AugmentProfile {
    /// Light touch: large crops, tiny tilt.
    Gentle,
    /// Middle ground.
    Balanced,
    /// Small crops and the widest tilt.
    #[default]
    Aggressive,
}

impl fmt::Display for AugmentProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gentle => write!(f, "gentle"),
            Self::Balanced => write!(f, "balanced"),
            Self::Aggressive => write!(f, "aggressive"),
        }
    }
}

/// Parameters of one augmentation draw.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentConfig {
    /// Smallest fraction of each side kept by the crop.
    pub crop_min: f64,
    /// Largest fraction of each side kept by the crop.
    pub crop_max: f64,
    /// Maximum tilt in degrees, applied in either direction.
    pub rotate_max_deg: f64,
    /// Probability of mirroring horizontally.
    pub flip_probability: f64,
    /// Gaussian sigma of the background blur, in target pixels.
    pub background_blur: f32,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self::from_profile(AugmentProfile::default())
    }
}

impl AugmentConfig {
    /// Settings for a named profile.
    #[must_use]
    pub fn from_profile(profile: AugmentProfile) -> Self {
        let (crop_min, crop_max, rotate_max_deg, flip_probability) = match profile {
            AugmentProfile::Gentle => (0.90, 0.98, 1.5, 0.3),
            AugmentProfile::Balanced => (0.80, 0.92, 2.5, 0.5),
            AugmentProfile::Aggressive => (0.72, 0.88, 3.0, 0.5),
        };
        Self {
            crop_min,
            crop_max,
            rotate_max_deg,
            flip_probability,
            background_blur: 12.0,
        }
    }

    /// Set the mirror probability (clamped to `[0, 1]`).
    #[must_use]
    pub fn with_flip_probability(mut self, probability: f64) -> Self {
        self.flip_probability = probability.clamp(0.0, 1.0);
        self
    }

    /// Set the crop range; the bounds are ordered and clamped to `(0, 1]`.
    #[must_use]
    pub fn with_crop_range(mut self, min: f64, max: f64) -> Self {
        let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
        self.crop_min = lo.clamp(f64::EPSILON, 1.0);
        self.crop_max = hi.clamp(self.crop_min, 1.0);
        self
    }

    #[must_use]
    pub fn with_rotate_max_deg(mut self, degrees: f64) -> Self {
        self.rotate_max_deg = degrees.abs();
        self
    }
}

/// Produces structurally different variants of an image at a fixed size.
#[derive(Debug, Clone, Default)]
pub struct StructuralAugmenter {
    config: AugmentConfig,
}

impl StructuralAugmenter {
    pub fn new(config: AugmentConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &AugmentConfig {
        &self.config
    }

    /// Produce one augmented variant of `source`, exactly `width` × `height`.
    ///
    /// # Arguments
    ///
    /// * `source` - Decoded, upright source image
    /// * `width`, `height` - Target canvas size
    /// * `rng` - Random source for every draw in this call
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::InvalidDimensions`] if the target or the source
    /// has a zero side.
    pub fn augment<R: Rng + ?Sized>(
        &self,
        source: &DynamicImage,
        width: u32,
        height: u32,
        rng: &mut R,
    ) -> Result<RgbaImage, ImageError> {
        ensure_dimensions(width, height)?;
        ensure_dimensions(source.width(), source.height())?;
        let mut working = source.to_rgba8();

        if rng.random_bool(self.config.flip_probability.clamp(0.0, 1.0)) {
            imageops::flip_horizontal_in_place(&mut working);
        }

        let cropped = self.random_crop(&working, rng);

        let max_deg = self.config.rotate_max_deg.abs();
        let angle = if max_deg > 0.0 {
            rng.random_range(-max_deg..=max_deg)
        } else {
            0.0
        };
        let tilted = rotate_about_center(&cropped, angle);

        let (fit_w, fit_h) = fit_within(tilted.width(), tilted.height(), width, height);
        let foreground = imageops::resize(&tilted, fit_w, fit_h, FilterType::Triangle);

        let mut canvas = self.blurred_background(&working, width, height);

        let ox = thirds_offset(width - fit_w, rng);
        let oy = thirds_offset(height - fit_h, rng);
        imageops::overlay(&mut canvas, &foreground, i64::from(ox), i64::from(oy));
        for pixel in canvas.pixels_mut() {
            pixel[3] = u8::MAX;
        }

        apply_vignette(&mut canvas);
        Ok(canvas)
    }

    fn random_crop<R: Rng + ?Sized>(&self, image: &RgbaImage, rng: &mut R) -> RgbaImage {
        let (lo, hi) = ordered(self.config.crop_min, self.config.crop_max);
        let fraction = if hi > lo {
            rng.random_range(lo..=hi)
        } else {
            lo
        };

        let (w, h) = image.dimensions();
        let cw = crop_side(w, fraction);
        let ch = crop_side(h, fraction);
        let x = rng.random_range(0..=w - cw);
        let y = rng.random_range(0..=h - ch);
        imageops::crop_imm(image, x, y, cw, ch).to_image()
    }

    /// Cover-fill the canvas with the whole source and blur it.
    fn blurred_background(&self, source: &RgbaImage, width: u32, height: u32) -> RgbaImage {
        // Blur at a reduced size; the result is scaled up anyway.
        let scale = (f64::from(BACKGROUND_WORK_SIDE) / f64::from(width.max(height))).min(1.0);
        let work_w = ((f64::from(width) * scale).round() as u32).max(1);
        let work_h = ((f64::from(height) * scale).round() as u32).max(1);

        let covered = cover_fill(source, work_w, work_h);
        let sigma = (self.config.background_blur * scale as f32).max(0.0);
        let blurred = if sigma > 0.0 {
            imageops::blur(&covered, sigma)
        } else {
            covered
        };

        imageops::resize(&blurred, width, height, FilterType::Triangle)
    }
}

fn ordered(a: f64, b: f64) -> (f64, f64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn crop_side(side: u32, fraction: f64) -> u32 {
    let wanted = (f64::from(side) * fraction).floor() as u32;
    wanted.max(MIN_CROP_SIDE).min(side).max(1)
}

/// Largest size with the aspect ratio of `w`×`h` that fits in `max_w`×`max_h`.
fn fit_within(w: u32, h: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    let k = (f64::from(max_w) / f64::from(w)).min(f64::from(max_h) / f64::from(h));
    // Tolerate k * side landing one ulp below an exact integer.
    let fit_w = ((f64::from(w) * k + 1e-9).floor() as u32).clamp(1, max_w);
    let fit_h = ((f64::from(h) * k + 1e-9).floor() as u32).clamp(1, max_h);
    (fit_w, fit_h)
}

/// Random offset within `free` pixels, kept in the middle half (thirds bias).
fn thirds_offset<R: Rng + ?Sized>(free: u32, rng: &mut R) -> u32 {
    let t = 0.25 + rng.random::<f64>() * 0.5;
    ((f64::from(free) * t).floor() as u32).min(free)
}

/// Scale `source` to cover `width`×`height` and center-crop the overflow.
fn cover_fill(source: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let (sw, sh) = source.dimensions();
    let k = (f64::from(width) / f64::from(sw)).max(f64::from(height) / f64::from(sh));
    let scaled_w = ((f64::from(sw) * k).ceil() as u32).max(width);
    let scaled_h = ((f64::from(sh) * k).ceil() as u32).max(height);
    let scaled = imageops::resize(source, scaled_w, scaled_h, FilterType::Triangle);
    let x = (scaled_w - width) / 2;
    let y = (scaled_h - height) / 2;
    imageops::crop_imm(&scaled, x, y, width, height).to_image()
}

/// Rotate by `degrees` about the image center without growing the canvas.
///
/// Pixels whose source falls outside the image become fully transparent.
pub fn rotate_about_center(image: &RgbaImage, degrees: f64) -> RgbaImage {
    if degrees == 0.0 {
        return image.clone();
    }

    let (w, h) = image.dimensions();
    let cx = (f64::from(w) - 1.0) / 2.0;
    let cy = (f64::from(h) - 1.0) / 2.0;
    let (sin, cos) = degrees.to_radians().sin_cos();

    RgbaImage::from_fn(w, h, |x, y| {
        let dx = f64::from(x) - cx;
        let dy = f64::from(y) - cy;
        // Inverse rotation: where did this output pixel come from?
        let sx = cos * dx + sin * dy + cx;
        let sy = -sin * dx + cos * dy + cy;
        sample_bilinear(image, sx, sy)
    })
}

fn sample_bilinear(image: &RgbaImage, x: f64, y: f64) -> Rgba<u8> {
    let (w, h) = image.dimensions();
    let max_x = f64::from(w) - 1.0;
    let max_y = f64::from(h) - 1.0;
    if x < -0.5 || y < -0.5 || x > max_x + 0.5 || y > max_y + 0.5 {
        return Rgba([0, 0, 0, 0]);
    }

    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - f64::from(x0);
    let fy = y - f64::from(y0);

    let p00 = image.get_pixel(x0, y0);
    let p10 = image.get_pixel(x1, y0);
    let p01 = image.get_pixel(x0, y1);
    let p11 = image.get_pixel(x1, y1);

    let mut out = [0u8; 4];
    for (c, slot) in out.iter_mut().enumerate() {
        let top = f64::from(p00[c]) * (1.0 - fx) + f64::from(p10[c]) * fx;
        let bottom = f64::from(p01[c]) * (1.0 - fx) + f64::from(p11[c]) * fx;
        *slot = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgba(out)
}

/// Darken toward the edges: up to 80/255 opacity of black past 60% of the radius.
pub fn apply_vignette(canvas: &mut RgbaImage) {
    let (w, h) = canvas.dimensions();
    let half_edge = f64::from(w.max(h)) / 2.0;
    let cx = f64::from(w) / 2.0;
    let cy = f64::from(h) / 2.0;

    for (x, y, pixel) in canvas.enumerate_pixels_mut() {
        let dx = f64::from(x) - cx;
        let dy = f64::from(y) - cy;
        let r = (dx * dx + dy * dy).sqrt() / half_edge;
        let alpha = ((r - 0.6) * 220.0).floor().clamp(0.0, 80.0) / 255.0;
        if alpha > 0.0 {
            for c in 0..3 {
                pixel[c] = (f64::from(pixel[c]) * (1.0 - alpha)).round() as u8;
            }
        }
    }
}

//! Color grading and pixel difference measurement.
//!
//! A grade makes a repost *look* different (tone, palette, grain) but leaves
//! the composition alone, so on its own it rarely moves a structural hash far
//! enough. The pipeline uses it as a finishing pass on top of the structural
//! augmentation, or as the first pass when an image is nearly identical to its
//! source by [`diff_ratio`].

use image::imageops::FilterType;
use image::{DynamicImage, Rgba, RgbaImage};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Side of the grid [`diff_ratio`] compares at.
const DIFF_GRID: u32 = 64;

/// Minimum similarity for a "did you mean" suggestion.
const SUGGESTION_THRESHOLD: f64 = 0.7;

/// Visual style of the grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GradeStyle {
    /// Teal shadows, orange highlights.
    #[default]
    Cinematic,
    /// Saturated with a slight hue spin.
    Vivid,
    /// Lifted, muted film look.
    Matte,
    /// High-contrast black and white.
    Noir,
    /// Plain black and white.
    Bw,
}

impl GradeStyle {
    pub const ALL: [GradeStyle; 5] = [
        Self::Cinematic,
        Self::Vivid,
        Self::Matte,
        Self::Noir,
        Self::Bw,
    ];

    fn name(self) -> &'static str {
        match self {
            Self::Cinematic => "cinematic",
            Self::Vivid => "vivid",
            Self::Matte => "matte",
            Self::Noir => "noir",
            Self::Bw => "bw",
        }
    }

    fn is_monochrome(self) -> bool {
        matches!(self, Self::Noir | Self::Bw)
    }
}

impl fmt::Display for GradeStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How strong the grade is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GradeStrength {
    Low,
    #[default]
    Medium,
    High,
}

impl GradeStrength {
    pub const ALL: [GradeStrength; 3] = [Self::Low, Self::Medium, Self::High];

    fn name(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    fn params(self) -> GradeParams {
        match self {
            Self::Low => GradeParams {
                contrast: 0.12,
                brightness: 0.02,
                saturation: 12.0,
                primary_overlay: 0.18,
                secondary_overlay: 0.12,
                noise: 4,
            },
            Self::Medium => GradeParams {
                contrast: 0.20,
                brightness: 0.03,
                saturation: 18.0,
                primary_overlay: 0.22,
                secondary_overlay: 0.15,
                noise: 6,
            },
            Self::High => GradeParams {
                contrast: 0.28,
                brightness: 0.05,
                saturation: 26.0,
                primary_overlay: 0.28,
                secondary_overlay: 0.22,
                noise: 8,
            },
        }
    }
}

impl fmt::Display for GradeStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A style or strength name that did not parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{given}'{}", suggestion_suffix(.suggestion))]
pub struct UnknownNameError {
    /// What was being parsed ("style" or "strength").
    pub kind: &'static str,
    /// The rejected input.
    pub given: String,
    /// Closest valid name, if any is close enough.
    pub suggestion: Option<&'static str>,
}

fn suggestion_suffix(suggestion: &Option<&'static str>) -> String {
    suggestion
        .map(|s| format!(", did you mean '{s}'?"))
        .unwrap_or_default()
}

fn parse_named<T: Copy>(
    kind: &'static str,
    input: &str,
    all: &[T],
    name: fn(T) -> &'static str,
) -> Result<T, UnknownNameError> {
    let wanted = input.trim().to_lowercase();
    if let Some(found) = all.iter().copied().find(|v| name(*v) == wanted) {
        return Ok(found);
    }
    let suggestion = all
        .iter()
        .map(|v| name(*v))
        .map(|candidate| (candidate, strsim::jaro_winkler(&wanted, candidate)))
        .filter(|(_, score)| *score >= SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(candidate, _)| candidate);
    Err(UnknownNameError {
        kind,
        given: input.to_string(),
        suggestion,
    })
}

impl FromStr for GradeStyle {
    type Err = UnknownNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_named("style", s, &Self::ALL, Self::name)
    }
}

impl FromStr for GradeStrength {
    type Err = UnknownNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_named("strength", s, &Self::ALL, Self::name)
    }
}

#[derive(Debug, Clone, Copy)]
struct GradeParams {
    contrast: f64,
    brightness: f64,
    saturation: f64,
    primary_overlay: f64,
    secondary_overlay: f64,
    noise: i16,
}

const TEAL: [f64; 3] = [14.0, 58.0, 89.0];
const ORANGE: [f64; 3] = [255.0, 138.0, 0.0];
const MATTE_GREY: [f64; 3] = [43.0, 43.0, 43.0];

/// Applies a color grade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColorGrader {
    pub style: GradeStyle,
    pub strength: GradeStrength,
}

impl ColorGrader {
    pub fn new(style: GradeStyle, strength: GradeStrength) -> Self {
        Self { style, strength }
    }

    /// Grade `image`, returning a new image of the same size.
    ///
    /// Grain is drawn from `rng`.
    pub fn grade<R: Rng + ?Sized>(&self, image: &RgbaImage, rng: &mut R) -> RgbaImage {
        let p = self.strength.params();
        let mut out = image.clone();

        for pixel in out.pixels_mut() {
            let mut rgb = [
                f64::from(pixel[0]),
                f64::from(pixel[1]),
                f64::from(pixel[2]),
            ];

            rgb = rgb.map(|c| brightness(contrast(c, p.contrast), p.brightness));
            if !self.style.is_monochrome() {
                rgb = adjust_hsl(rgb, p.saturation / 100.0, 0.0);
            }

            rgb = match self.style {
                GradeStyle::Cinematic => {
                    let teal = mix_blend(rgb, TEAL, p.primary_overlay, overlay);
                    mix_blend(teal, ORANGE, p.secondary_overlay, soft_light)
                }
                GradeStyle::Vivid => adjust_hsl(rgb, p.saturation / 100.0, 8.0),
                GradeStyle::Matte => {
                    let muted = adjust_hsl(rgb, -0.10, 0.0).map(|c| contrast(c, -0.05));
                    mix_blend(muted, MATTE_GREY, 0.15, soft_light)
                }
                GradeStyle::Noir => [luma(rgb); 3].map(|c| contrast(c, 0.25)),
                GradeStyle::Bw => [luma(rgb); 3].map(|c| contrast(c, 0.18)),
            };

            let grain = if p.noise > 0 {
                f64::from(rng.random_range(-p.noise..=p.noise))
            } else {
                0.0
            };

            *pixel = Rgba([
                to_channel(rgb[0] + grain),
                to_channel(rgb[1] + grain),
                to_channel(rgb[2] + grain),
                pixel[3],
            ]);
        }
        out
    }
}

fn to_channel(value: f64) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// Contrast in `[-1, 1]`; 0 is identity.
fn contrast(c: f64, amount: f64) -> f64 {
    let factor = (amount + 1.0) / (1.0 - amount);
    (factor * (c - 127.5) + 127.5).clamp(0.0, 255.0)
}

/// Brightness in `[-1, 1]`; positive values move toward white.
fn brightness(c: f64, amount: f64) -> f64 {
    if amount < 0.0 {
        c * (1.0 + amount)
    } else {
        c + (255.0 - c) * amount
    }
}

fn luma(rgb: [f64; 3]) -> f64 {
    0.2126 * rgb[0] + 0.7152 * rgb[1] + 0.0722 * rgb[2]
}

/// Blend a flat color over `base` with `opacity`.
fn mix_blend(
    base: [f64; 3],
    color: [f64; 3],
    opacity: f64,
    mode: fn(f64, f64) -> f64,
) -> [f64; 3] {
    let mut out = [0.0; 3];
    for c in 0..3 {
        let a = base[c] / 255.0;
        let b = color[c] / 255.0;
        let blended = mode(a, b);
        out[c] = (a * (1.0 - opacity) + blended * opacity) * 255.0;
    }
    out
}

fn overlay(a: f64, b: f64) -> f64 {
    if a < 0.5 {
        2.0 * a * b
    } else {
        1.0 - 2.0 * (1.0 - a) * (1.0 - b)
    }
}

fn soft_light(a: f64, b: f64) -> f64 {
    if b <= 0.5 {
        a - (1.0 - 2.0 * b) * a * (1.0 - a)
    } else {
        let d = if a <= 0.25 {
            ((16.0 * a - 12.0) * a + 4.0) * a
        } else {
            a.sqrt()
        };
        a + (2.0 * b - 1.0) * (d - a)
    }
}

/// Shift saturation by `ds` (in `[−1, 1]`) and hue by `dh` degrees.
fn adjust_hsl(rgb: [f64; 3], ds: f64, dh: f64) -> [f64; 3] {
    let (h, s, l) = rgb_to_hsl(rgb);
    let h = (h + dh).rem_euclid(360.0);
    let s = (s + ds).clamp(0.0, 1.0);
    hsl_to_rgb(h, s, l)
}

fn rgb_to_hsl(rgb: [f64; 3]) -> (f64, f64, f64) {
    let [r, g, b] = rgb.map(|c| c / 255.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let l = (max + min) / 2.0;
    if max == min {
        return (0.0, 0.0, l);
    }
    let d = max - min;
    let s = if l > 0.5 {
        d / (2.0 - max - min)
    } else {
        d / (max + min)
    };
    let h = if max == r {
        (g - b) / d + if g < b { 6.0 } else { 0.0 }
    } else if max == g {
        (b - r) / d + 2.0
    } else {
        (r - g) / d + 4.0
    };
    (h * 60.0, s, l)
}

fn hsl_to_rgb(h: f64, s: f64, l: f64) -> [f64; 3] {
    if s == 0.0 {
        return [l * 255.0; 3];
    }
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    let h = h / 360.0;
    [h + 1.0 / 3.0, h, h - 1.0 / 3.0].map(|t| hue_to_channel(p, q, t) * 255.0)
}

fn hue_to_channel(p: f64, q: f64, t: f64) -> f64 {
    let t = t.rem_euclid(1.0);
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 0.5 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
        p
    }
}

/// How different two images look, from 0 (identical) to 1.
///
/// Both are resized to 64×64 and the absolute RGB differences are summed and
/// normalized by the largest possible sum.
pub fn diff_ratio(a: &DynamicImage, b: &DynamicImage) -> f64 {
    let a = a
        .resize_exact(DIFF_GRID, DIFF_GRID, FilterType::Triangle)
        .to_rgb8();
    let b = b
        .resize_exact(DIFF_GRID, DIFF_GRID, FilterType::Triangle)
        .to_rgb8();

    let diff: u64 = a
        .as_raw()
        .iter()
        .zip(b.as_raw())
        .map(|(&x, &y)| u64::from(x.abs_diff(y)))
        .sum();
    let max = u64::from(DIFF_GRID * DIFF_GRID) * 255 * 3;
    diff as f64 / max as f64
}

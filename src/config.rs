//! Application configuration management.
//!
//! Settings are layered, later layers overriding earlier ones:
//!
//! 1. Built-in defaults
//! 2. The TOML config file (`<config dir>/uniqpost/config.toml` unless a path
//!    is given)
//! 3. Environment variables prefixed `UNIQPOST_`, with `__` separating
//!    nested keys (`UNIQPOST_UNIQUENESS__MAX_TRIES=5`)
//! 4. Command-line flags, applied by the binary after loading

use crate::imaging::pipeline::{GradePolicy, DEFAULT_MAX_IMAGES};
use crate::imaging::{
    AugmentConfig, ColorGrader, GradeStrength, GradeStyle, PerceptualAlgorithm, PipelineConfig,
    Thresholds, UniquenessConfig,
};
use crate::store::StoreBackend;
use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Prefix of environment variables read by [`Config::figment`].
pub const ENV_PREFIX: &str = "UNIQPOST_";

/// Largest tilt the config accepts, in degrees.
const MAX_ROTATION_DEG: f64 = 45.0;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A layer could not be read or did not match the expected shape.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    /// A value is outside its allowed range.
    #[error("Invalid configuration value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },

    /// The effective configuration could not be rendered as TOML.
    #[error("Failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Where dedup records are kept.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    /// Defaults to a file in the platform data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Uniqueness search settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UniquenessSettings {
    pub enabled: bool,
    pub max_tries: u32,
    pub thresholds: Thresholds,
}

impl Default for UniquenessSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_tries: 3,
            thresholds: Thresholds::default(),
        }
    }
}

/// Color grade settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradeSettings {
    pub enabled: bool,
    pub style: GradeStyle,
    pub strength: GradeStrength,
    /// Grade every image, not only those too close to the original.
    pub always: bool,
    pub diff_threshold: f64,
}

impl Default for GradeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            style: GradeStyle::default(),
            strength: GradeStrength::default(),
            always: false,
            diff_threshold: 0.04,
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Most images processed per post.
    pub max_images: usize,
    pub store: StoreSettings,
    pub augment: AugmentConfig,
    pub uniqueness: UniquenessSettings,
    pub grade: GradeSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_images: DEFAULT_MAX_IMAGES,
            store: StoreSettings::default(),
            augment: AugmentConfig::default(),
            uniqueness: UniquenessSettings::default(),
            grade: GradeSettings::default(),
        }
    }
}

impl Config {
    /// The layered provider: defaults, then the TOML file, then environment.
    ///
    /// A missing file is skipped silently.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path.map(Path::to_path_buf).or_else(default_config_path) {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Load`] if a layer is malformed and
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config: Config = Self::figment(path).extract().map_err(Box::new)?;
        config.validate()?;
        log::debug!("Configuration loaded: {:?}", config);
        Ok(config)
    }

    /// Check every value against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let a = &self.augment;
        if !(a.crop_min > 0.0 && a.crop_min <= 1.0) {
            return Err(invalid("augment.crop_min", format!("{} is not in (0, 1]", a.crop_min)));
        }
        if !(a.crop_max > 0.0 && a.crop_max <= 1.0) {
            return Err(invalid("augment.crop_max", format!("{} is not in (0, 1]", a.crop_max)));
        }
        if a.crop_min > a.crop_max {
            return Err(invalid(
                "augment.crop_min",
                format!("{} is larger than crop_max {}", a.crop_min, a.crop_max),
            ));
        }
        if !(0.0..=1.0).contains(&a.flip_probability) {
            return Err(invalid(
                "augment.flip_probability",
                format!("{} is not in [0, 1]", a.flip_probability),
            ));
        }
        if !(0.0..=MAX_ROTATION_DEG).contains(&a.rotate_max_deg) {
            return Err(invalid(
                "augment.rotate_max_deg",
                format!("{} is not in [0, {MAX_ROTATION_DEG}]", a.rotate_max_deg),
            ));
        }
        if !(a.background_blur >= 0.0 && a.background_blur.is_finite()) {
            return Err(invalid(
                "augment.background_blur",
                format!("{} must be a non-negative number", a.background_blur),
            ));
        }

        for algorithm in PerceptualAlgorithm::ALL {
            if let Some(threshold) = self.uniqueness.thresholds.get(algorithm) {
                if threshold > algorithm.bit_len() {
                    return Err(invalid(
                        "uniqueness.thresholds",
                        format!(
                            "{algorithm} threshold {threshold} exceeds the hash length {}",
                            algorithm.bit_len()
                        ),
                    ));
                }
            }
        }

        if !(0.0..=1.0).contains(&self.grade.diff_threshold) {
            return Err(invalid(
                "grade.diff_threshold",
                format!("{} is not in [0, 1]", self.grade.diff_threshold),
            ));
        }
        Ok(())
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Path of the dedup store, falling back to the platform data directory.
    #[must_use]
    pub fn store_path(&self) -> PathBuf {
        self.store
            .path
            .clone()
            .unwrap_or_else(|| default_store_path(self.store.backend))
    }

    #[must_use]
    pub fn uniqueness_config(&self) -> UniquenessConfig {
        UniquenessConfig::default()
            .with_max_tries(self.uniqueness.max_tries)
            .with_thresholds(self.uniqueness.thresholds)
            .with_augment(self.augment)
    }

    /// Pipeline settings equivalent to this configuration.
    #[must_use]
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_images: self.max_images.max(1),
            grade: self.grade.enabled.then(|| GradePolicy {
                grader: ColorGrader::new(self.grade.style, self.grade.strength),
                always: self.grade.always,
                diff_threshold: self.grade.diff_threshold,
            }),
            uniqueness: self.uniqueness.enabled.then(|| self.uniqueness_config()),
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "uniqpost", "uniqpost")
}

/// Default platform-specific configuration file.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Default store file for `backend` in the platform data directory, or the
/// working directory if no home directory is known.
#[must_use]
pub fn default_store_path(backend: StoreBackend) -> PathBuf {
    let file = backend.default_file_name();
    match project_dirs() {
        Some(dirs) => dirs.data_dir().join(file),
        None => PathBuf::from(file),
    }
}

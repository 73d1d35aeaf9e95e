use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use std::fs;
use tempfile::tempdir;
use uniqpost::config::{Config, ConfigError};
use uniqpost::imaging::{GradeStrength, GradeStyle};
use uniqpost::store::StoreBackend;

#[test]
fn test_config_load_defaults() {
    // Use figment directly without Env to avoid interference from other tests
    let figment = Figment::from(Serialized::defaults(Config::default()));
    let config: Config = figment.extract().unwrap();
    assert_eq!(config, Config::default());
    assert_eq!(config.max_images, 10);
    assert_eq!(config.uniqueness.max_tries, 3);
    assert_eq!(config.uniqueness.thresholds.ahash, Some(10));
    assert_eq!(config.uniqueness.thresholds.dhash, Some(12));
    assert_eq!(config.uniqueness.thresholds.phash, Some(10));
    assert_eq!(config.store.backend, StoreBackend::Json);
}

#[test]
fn test_config_load_from_toml() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(
        &config_path,
        r#"
max_images = 4

[store]
backend = "sqlite"
path = "/var/lib/uniqpost/posted.db"

[augment]
flip_probability = 1.0

[uniqueness]
max_tries = 6

[uniqueness.thresholds]
ahash = 20

[grade]
style = "noir"
strength = "high"
always = true
"#,
    )
    .unwrap();

    let config = Config::load(Some(&config_path)).unwrap();
    assert_eq!(config.max_images, 4);
    assert_eq!(config.store.backend, StoreBackend::Sqlite);
    assert_eq!(
        config.store_path(),
        std::path::PathBuf::from("/var/lib/uniqpost/posted.db")
    );
    assert_eq!(config.augment.flip_probability, 1.0);
    // Unset augment fields keep their defaults.
    assert_eq!(config.augment.crop_min, Config::default().augment.crop_min);
    assert_eq!(config.uniqueness.max_tries, 6);
    assert_eq!(config.uniqueness.thresholds.ahash, Some(20));
    assert_eq!(config.uniqueness.thresholds.dhash, Some(12));
    assert_eq!(config.grade.style, GradeStyle::Noir);
    assert_eq!(config.grade.strength, GradeStrength::High);
    assert!(config.grade.always);
}

#[test]
fn test_env_overrides_file() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, "[uniqueness]\nmax_tries = 6\n").unwrap();

    // A private prefix keeps this test independent of the real environment.
    std::env::set_var("UPTEST_UNIQUENESS__MAX_TRIES", "9");
    std::env::set_var("UPTEST_GRADE__STYLE", "vivid");

    let figment = Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::file(&config_path))
        .merge(Env::prefixed("UPTEST_").split("__"));
    let config: Config = figment.extract().unwrap();

    assert_eq!(config.uniqueness.max_tries, 9);
    assert_eq!(config.grade.style, GradeStyle::Vivid);

    std::env::remove_var("UPTEST_UNIQUENESS__MAX_TRIES");
    std::env::remove_var("UPTEST_GRADE__STYLE");
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let temp_dir = tempdir().unwrap();
    let figment = Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::file(temp_dir.path().join("absent.toml")));
    let config: Config = figment.extract().unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_invalid_values_are_rejected() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, "[augment]\ncrop_min = 0.9\ncrop_max = 0.5\n").unwrap();

    let err = Config::load(Some(&config_path)).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { field: "augment.crop_min", .. }));
}

#[test]
fn test_malformed_file_is_a_load_error() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, "[grade]\nstyle = \"sepia\"\n").unwrap();

    let err = Config::load(Some(&config_path)).unwrap_err();
    assert!(matches!(err, ConfigError::Load(_)));
}

#[test]
fn test_rendered_toml_loads_back() {
    let mut config = Config::default();
    config.max_images = 3;
    config.grade.enabled = false;
    // Zero is always met, which is how a file switches a family off.
    config.uniqueness.thresholds.phash = Some(0);

    let rendered = config.to_toml().unwrap();
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, rendered).unwrap();

    let figment = Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::file(&config_path));
    let loaded: Config = figment.extract().unwrap();
    assert_eq!(loaded.max_images, 3);
    assert!(!loaded.grade.enabled);
    assert_eq!(loaded.uniqueness.thresholds.phash, Some(0));
}

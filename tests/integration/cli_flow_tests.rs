use clap::Parser;
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use std::fs;
use std::path::Path;
use tempfile::{tempdir, TempDir};
use uniqpost::cli::Cli;
use uniqpost::error::ExitCode;
use uniqpost::run_app;

/// An empty config file so the user's own configuration is not picked up.
fn config_file(dir: &TempDir) -> String {
    let path = dir.path().join("config.toml");
    fs::write(&path, "").unwrap();
    path.to_string_lossy().into_owned()
}

fn run(dir: &TempDir, args: &[&str]) -> ExitCode {
    let config = config_file(dir);
    let mut argv = vec!["uniqpost", "--quiet", "--config", config.as_str()];
    argv.extend_from_slice(args);
    run_app(Cli::try_parse_from(argv).unwrap()).unwrap()
}

fn write_png(path: &Path) {
    let img = RgbImage::from_fn(96, 64, |x, y| {
        Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x ^ y) * 5 % 256) as u8])
    });
    DynamicImage::ImageRgb8(img).save(path).unwrap();
}

fn s(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn test_check_mark_check() {
    let dir = tempdir().unwrap();
    let item = dir.path().join("item.json");
    fs::write(
        &item,
        r#"{"link": "https://example.com/a?utm_source=x", "title": "A", "isoDate": "2024-01-01T00:00:00Z"}"#,
    )
    .unwrap();
    let store = dir.path().join("posted.json");

    assert_eq!(
        run(&dir, &["check", s(&item), "--store", s(&store)]),
        ExitCode::Success
    );
    assert_eq!(
        run(&dir, &["mark", s(&item), "--status", "posted", "--store", s(&store)]),
        ExitCode::Success
    );
    assert_eq!(
        run(&dir, &["check", s(&item), "--store", s(&store)]),
        ExitCode::AlreadySeen
    );
}

#[test]
fn test_pick_until_exhausted() {
    let dir = tempdir().unwrap();
    let items = dir.path().join("items.json");
    fs::write(
        &items,
        r#"{"items": [{"link": "https://example.com/1"}, {"link": "https://example.com/2"}]}"#,
    )
    .unwrap();
    let store = dir.path().join("posted.db");
    let args = ["pick", s(&items), "--store", s(&store), "--backend", "sqlite"];

    assert_eq!(run(&dir, &args), ExitCode::Success);
    assert_eq!(run(&dir, &args), ExitCode::Success);
    assert_eq!(run(&dir, &args), ExitCode::AlreadySeen);
}

#[test]
fn test_uniquify_writes_png_of_requested_size() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("in.png");
    let output = dir.path().join("out.png");
    write_png(&input);

    let code = run(
        &dir,
        &[
            "uniquify",
            s(&input),
            "-o",
            s(&output),
            "--seed",
            "7",
            "--width",
            "80",
            "--tries",
            "5",
        ],
    );
    assert!(matches!(code, ExitCode::Success | ExitCode::Degraded));

    let written = image::open(&output).unwrap();
    assert_eq!(written.dimensions(), (80, 64));
}

#[test]
fn test_hash_and_compare() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.png");
    write_png(&a);

    assert_eq!(
        run(&dir, &["hash", s(&a), "--output", "json"]),
        ExitCode::Success
    );
    assert_eq!(run(&dir, &["compare", s(&a), s(&a)]), ExitCode::Success);
}

#[test]
fn test_missing_input_is_an_error() {
    let dir = tempdir().unwrap();
    let config = config_file(&dir);
    let missing = dir.path().join("missing.json");
    let cli = Cli::try_parse_from([
        "uniqpost",
        "--quiet",
        "--config",
        config.as_str(),
        "keys",
        s(&missing),
    ])
    .unwrap();

    let err = run_app(cli).unwrap_err();
    assert!(format!("{err:#}").contains("missing.json"));
}

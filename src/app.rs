//! Command dispatch for the `uniqpost` binary.

use crate::cli::{
    CheckArgs, Cli, Commands, CompareArgs, ConfigArgs, HashArgs, ItemArgs, MarkArgs, OutputFormat,
    PickArgs, StoreArgs, UniquifyArgs,
};
use crate::config::{default_config_path, Config};
use crate::dedup::{self, make_keys, ContentItem};
use crate::error::ExitCode;
use crate::imaging::{AugmentConfig, ImageBuffer, ImagePipeline, PerceptualHasher};
use crate::logging::init_logging;
use crate::store::{open_store, KeyStore};
use anyhow::{Context, Result};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

/// Run the command described by `cli`.
///
/// Returns the exit code for outcomes that are not errors (an item already
/// seen, a degraded image).
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or the command
/// fails.
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    init_logging(cli.verbose, cli.quiet);

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Hash(args) => run_hash(&args),
        Commands::Compare(args) => run_compare(&args),
        Commands::Uniquify(args) => run_uniquify(config, &args),
        Commands::Keys(args) => run_keys(&args),
        Commands::Check(args) => run_check(&config, &args),
        Commands::Mark(args) => run_mark(&config, &args),
        Commands::Pick(args) => run_pick(&config, &args),
        Commands::Config(args) => run_config(&config, &args),
    }
}

fn read_image(path: &Path) -> Result<ImageBuffer> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    ImageBuffer::from_bytes(bytes).with_context(|| format!("Failed to load {}", path.display()))
}

/// Read a file, or stdin when the path is `-`.
fn read_input(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut input = String::new();
        std::io::stdin()
            .read_to_string(&mut input)
            .context("Failed to read stdin")?;
        return Ok(input);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn read_item(args: &ItemArgs) -> Result<ContentItem> {
    let raw = read_input(&args.item)?;
    serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a content item", args.item.display()))
}

/// Items from a JSON array, or from the `items` array of an object.
fn parse_items(raw: &str) -> Result<Vec<ContentItem>> {
    let value: serde_json::Value = serde_json::from_str(raw).context("Invalid JSON")?;
    let list = match value {
        serde_json::Value::Object(mut map) => map
            .remove("items")
            .context("Expected an array or an object with an \"items\" array")?,
        other => other,
    };
    serde_json::from_value(list).context("Expected a list of content items")
}

fn open_configured_store(config: &Config, args: &StoreArgs) -> Result<Arc<dyn KeyStore>> {
    let backend = args.backend.map_or(config.store.backend, Into::into);
    let path = args.store.clone().unwrap_or_else(|| {
        if args.backend.is_some() && config.store.path.is_none() {
            crate::config::default_store_path(backend)
        } else {
            config.store_path()
        }
    });
    open_store(backend, &path).with_context(|| format!("Failed to open store {}", path.display()))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to render JSON")?
    );
    Ok(())
}

fn run_hash(args: &HashArgs) -> Result<ExitCode> {
    let image = read_image(&args.image)?;
    let fingerprint = PerceptualHasher::new().fingerprint_buffer(&image)?;
    match args.output {
        OutputFormat::Text => {
            println!("size:  {}x{}", image.width(), image.height());
            println!("aHash: {}", fingerprint.ahash.to_hex());
            println!("dHash: {}", fingerprint.dhash.to_hex());
            println!("pHash: {}", fingerprint.phash.to_hex());
        }
        OutputFormat::Json => print_json(&json!({
            "width": image.width(),
            "height": image.height(),
            "ahash": fingerprint.ahash.to_hex(),
            "dhash": fingerprint.dhash.to_hex(),
            "phash": fingerprint.phash.to_hex(),
        }))?,
    }
    Ok(ExitCode::Success)
}

fn run_compare(args: &CompareArgs) -> Result<ExitCode> {
    let hasher = PerceptualHasher::new();
    let a = hasher.fingerprint_buffer(&read_image(&args.a)?)?;
    let b = hasher.fingerprint_buffer(&read_image(&args.b)?)?;
    let distances = a.distance(&b);
    match args.output {
        OutputFormat::Text => println!("{distances}"),
        OutputFormat::Json => print_json(&distances)?,
    }
    Ok(ExitCode::Success)
}

/// Apply the `uniquify` flags on top of the loaded configuration.
fn apply_uniquify_overrides(mut config: Config, args: &UniquifyArgs) -> Result<Config> {
    if let Some(profile) = args.profile {
        config.augment = AugmentConfig::from_profile(profile);
    }
    if let Some(tries) = args.tries {
        config.uniqueness.max_tries = tries;
    }
    if let Some(style) = args.style {
        config.grade.style = style;
    }
    if let Some(strength) = args.strength {
        config.grade.strength = strength;
    }
    if args.no_grade {
        config.grade.enabled = false;
    }
    if args.always_grade {
        config.grade.enabled = true;
        config.grade.always = true;
    }
    if args.no_search {
        config.uniqueness.enabled = false;
    }
    config.validate()?;
    Ok(config)
}

fn run_uniquify(config: Config, args: &UniquifyArgs) -> Result<ExitCode> {
    let config = apply_uniquify_overrides(config, args)?;
    let original = read_image(&args.input)?;
    let edited = args
        .edited
        .as_deref()
        .map(|p| std::fs::read(p).with_context(|| format!("Failed to read {}", p.display())))
        .transpose()?;

    let size = match (args.width, args.height) {
        (None, None) => None,
        (w, h) => Some((
            w.unwrap_or(original.width()),
            h.unwrap_or(original.height()),
        )),
    };

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let pipeline = ImagePipeline::new(config.pipeline_config());
    let processed = pipeline
        .process_sized(original.bytes(), edited.as_deref(), size, &mut rng)
        .with_context(|| format!("Failed to process {}", args.input.display()))?;

    std::fs::write(&args.output, processed.image.bytes())
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    log::info!(
        "Wrote {} ({}x{}{})",
        args.output.display(),
        processed.image.width(),
        processed.image.height(),
        if processed.graded { ", graded" } else { "" }
    );
    if let Some(search) = processed.search {
        println!(
            "{} after {} tries: {}",
            if search.satisfied { "unique" } else { "best effort" },
            search.attempts,
            search.distances
        );
    }

    Ok(if processed.is_degraded() {
        ExitCode::Degraded
    } else {
        ExitCode::Success
    })
}

fn run_keys(args: &ItemArgs) -> Result<ExitCode> {
    let item = read_item(args)?;
    print_json(&make_keys(&item))?;
    Ok(ExitCode::Success)
}

fn run_check(config: &Config, args: &CheckArgs) -> Result<ExitCode> {
    let item = read_item(&args.item)?;
    let store = open_configured_store(config, &args.store)?;
    let keys = make_keys(&item);
    if dedup::seen(&keys, store.as_ref())? {
        println!("seen {}", keys.id);
        Ok(ExitCode::AlreadySeen)
    } else {
        println!("fresh {}", keys.id);
        Ok(ExitCode::Success)
    }
}

fn run_mark(config: &Config, args: &MarkArgs) -> Result<ExitCode> {
    let item = read_item(&args.item)?;
    let store = open_configured_store(config, &args.store)?;
    let keys = make_keys(&item);
    let record = dedup::mark(&item, &keys, args.status, Utc::now(), store.as_ref())?;
    print_json(&record)?;
    Ok(ExitCode::Success)
}

/// Exits with [`ExitCode::AlreadySeen`] when every item has been seen.
fn run_pick(config: &Config, args: &PickArgs) -> Result<ExitCode> {
    let items = parse_items(&read_input(&args.items)?)
        .with_context(|| format!("Failed to read items from {}", args.items.display()))?;
    let store = open_configured_store(config, &args.store)?;
    match dedup::pick_fresh(&items, store.as_ref())? {
        Some(pick) => {
            print_json(&json!({ "item": pick.item, "keys": pick.keys }))?;
            Ok(ExitCode::Success)
        }
        None => {
            log::info!("All {} items have been seen", items.len());
            Ok(ExitCode::AlreadySeen)
        }
    }
}

fn run_config(config: &Config, args: &ConfigArgs) -> Result<ExitCode> {
    if args.path {
        match default_config_path() {
            Some(path) => println!("{}", path.display()),
            None => anyhow::bail!("No configuration directory is available on this platform"),
        }
    } else {
        print!("{}", config.to_toml()?);
    }
    Ok(ExitCode::Success)
}

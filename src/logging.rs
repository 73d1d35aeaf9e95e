//! Logging setup for the `uniqpost` binary.
//!
//! The library only emits records through the `log` facade; this module
//! installs the `env_logger` backend once at startup. The level comes from,
//! in priority order:
//!
//! 1. `RUST_LOG`, when set
//! 2. `--quiet` (errors only) or `--verbose` (`-v` debug, `-vv` trace)
//! 3. Info otherwise
//!
//! Debug builds prefix each line with a timestamp and, when verbose, the
//! module path. Release builds print the level and message only.
//!
//! # Example
//!
//! ```rust,no_run
//! use uniqpost::logging::init_logging;
//!
//! init_logging(1, false);
//! log::debug!("visible with -v");
//! ```

use env_logger::Builder;
use log::LevelFilter;
use std::env;
use std::io::Write;

/// Install the logger.
///
/// Returns `false` if a logger was already installed (for example by a test
/// harness); the existing logger is kept.
///
/// # Arguments
///
/// * `verbose` - Count of `-v` flags
/// * `quiet` - Errors only, unless `RUST_LOG` says otherwise
pub fn init_logging(verbose: u8, quiet: bool) -> bool {
    let from_env = env::var("RUST_LOG").is_ok();

    let mut builder = Builder::new();
    if from_env {
        builder.parse_default_env();
    } else {
        builder.filter_level(level_for(verbose, quiet));
    }
    apply_format(&mut builder, verbose);

    let installed = builder.try_init().is_ok();
    if installed {
        log::debug!(
            "Logging at {} ({})",
            current_level_name(),
            if from_env { "RUST_LOG" } else { "flags" }
        );
    }
    installed
}

fn level_for(verbose: u8, quiet: bool) -> LevelFilter {
    match (quiet, verbose) {
        (true, _) => LevelFilter::Error,
        (false, 0) => LevelFilter::Info,
        (false, 1) => LevelFilter::Debug,
        (false, _) => LevelFilter::Trace,
    }
}

#[cfg(debug_assertions)]
fn apply_format(builder: &mut Builder, verbose: u8) {
    builder.format(move |buf, record| {
        let style = buf.default_level_style(record.level());
        let timestamp = buf.timestamp_seconds();
        if verbose >= 1 {
            writeln!(
                buf,
                "{timestamp} {style}{:<5}{style:#} [{}] {}",
                record.level(),
                record.module_path().unwrap_or("unknown"),
                record.args()
            )
        } else {
            writeln!(
                buf,
                "{timestamp} {style}{:<5}{style:#} {}",
                record.level(),
                record.args()
            )
        }
    });
}

#[cfg(not(debug_assertions))]
fn apply_format(builder: &mut Builder, _verbose: u8) {
    builder.format(|buf, record| {
        let style = buf.default_level_style(record.level());
        writeln!(buf, "{style}{:<5}{style:#} {}", record.level(), record.args())
    });
}

/// Name of the most verbose level currently enabled.
pub fn current_level_name() -> &'static str {
    match log::max_level() {
        LevelFilter::Off => "off",
        LevelFilter::Error => "error",
        LevelFilter::Warn => "warn",
        LevelFilter::Info => "info",
        LevelFilter::Debug => "debug",
        LevelFilter::Trace => "trace",
    }
}

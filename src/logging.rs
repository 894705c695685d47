//! Structured logging setup
//!
//! Logs go to stderr so command output on stdout stays machine readable.
//! `RUST_LOG` still wins over the configured level when it is set.

use anyhow::{Context, Result};
use tracing::{Level, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

fn env_filter(config: &LoggingConfig, verbose: bool) -> Result<EnvFilter> {
    let level = if verbose {
        Level::DEBUG
    } else {
        config.log_level()?
    };
    Ok(EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy())
}

/// Build a subscriber for `config` that writes to `writer`
pub fn build_subscriber<W>(
    config: &LoggingConfig,
    verbose: bool,
    writer: W,
) -> Result<Box<dyn Subscriber + Send + Sync>>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config, verbose)?)
        .with_writer(writer)
        .with_target(false);

    Ok(match config.format.to_lowercase().as_str() {
        "json" => Box::new(builder.json().finish()),
        "pretty" => Box::new(builder.pretty().finish()),
        _ => Box::new(builder.compact().finish()),
    })
}

/// Install the global subscriber; `verbose` forces debug output
pub fn init(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let subscriber = build_subscriber(config, verbose, std::io::stderr)?;
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install tracing subscriber")
}

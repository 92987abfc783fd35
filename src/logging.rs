//! Tracing setup for the `bk_psu` binary and other tools built on the driver.
//!
//! The driver only emits `tracing` events: wire traffic at `trace`, reply repairs at
//! `debug`, link lifecycle at `info`, unreadable replies and threshold breaches at
//! `warn`. Installing a subscriber is left to the application. [`init`] renders events
//! to stderr in the configured [`LogFormat`], filtered by `RUST_LOG` when set and by
//! `application.log_level` otherwise.
//!
//! # Example
//! ```no_run
//! use bk_psu::{config::PsuConfig, logging};
//!
//! # fn main() -> bk_psu::error::PsuResult<()> {
//! let config = PsuConfig::load()?;
//! logging::init_from_config(&config)?;
//! tracing::info!("supply tool started");
//! # Ok(())
//! # }
//! ```

use crate::config::{ApplicationConfig, LogFormat, PsuConfig};
use crate::error::{PsuError, PsuResult};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber described by the `application` section.
pub fn init_from_config(config: &PsuConfig) -> PsuResult<()> {
    init(&config.application)
}

/// Install the global subscriber.
///
/// The level is always validated. Installing is skipped if a subscriber is already
/// in place, so a host application or test harness keeps its own.
pub fn init(app: &ApplicationConfig) -> PsuResult<()> {
    let level = parse_log_level(&app.log_level)?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    // fails only when a global subscriber or `log` logger is already installed
    if let Err(e) = tracing_subscriber::registry()
        .with(format_layer(app.log_format, std::io::stderr).with_filter(filter))
        .try_init()
    {
        tracing::debug!("Keeping the existing subscriber: {}", e);
    }
    Ok(())
}

/// Formatting layer for `format`, writing through `writer`.
fn format_layer<W>(format: LogFormat, writer: W) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer().with_writer(writer).with_thread_names(true);
    match format {
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Compact => layer.compact().with_ansi(false).boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

/// Parse a level name, case-insensitively.
pub fn parse_log_level(level: &str) -> PsuResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(PsuError::Configuration(format!(
            "Invalid log_level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        ))),
    }
}

//! Tracing subscriber set-up from the `logging` config section.

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use echolens_core::config::LoggingConfig;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber. `-v` forces debug over everything else.
pub fn init(config: Option<&LoggingConfig>, verbose: bool) -> anyhow::Result<()> {
    let level = config
        .and_then(|c| c.level.as_deref())
        .unwrap_or("info");

    let mut filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };
    for directive in config.map(|c| c.filters.as_slice()).unwrap_or_default() {
        filter = filter.add_directive(
            directive
                .parse()
                .with_context(|| format!("Invalid log filter '{directive}'"))?,
        );
    }

    let json = config.is_some_and(|c| c.format == "json");
    let stdout = config.is_some_and(|c| c.output == "stdout");
    let layer: BoxedLayer = match (json, stdout) {
        (true, true) => fmt::layer().json().with_writer(std::io::stdout).boxed(),
        (true, false) => fmt::layer().json().with_writer(std::io::stderr).boxed(),
        (false, true) => fmt::layer().with_writer(std::io::stdout).boxed(),
        (false, false) => fmt::layer().with_writer(std::io::stderr).boxed(),
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(())
}

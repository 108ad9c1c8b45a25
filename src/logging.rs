use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::PipelineError;

/// Installs a global subscriber printing events to stderr, with the progress
/// bars of the `pipeline` and `task` spans drawn below them.
///
/// Uses the `RUST_LOG` env var if set, otherwise logs at `info` level. Fails
/// if a global subscriber is already installed.
pub fn init() -> Result<(), PipelineError> {
    let indicatif = IndicatifLayer::new();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(indicatif.get_stderr_writer()),
        )
        .with(indicatif)
        .try_init()?;

    Ok(())
}

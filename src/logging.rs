//! Tracing subscriber setup for the binary.
//!
//! Logs go to stderr so they never interleave with the rendered tree on
//! stdout. `RUST_LOG` takes precedence over the configured level.

use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, fmt};

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging(level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::registry().with(filter(level)).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .compact(),
    );
    tracing::subscriber::set_global_default(subscriber).context("Failed to install logger")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        assert!(init_logging("debug").is_ok());
        assert!(init_logging("debug").is_err());
        tracing::debug!(generation = 1, "logging installed");
    }
}

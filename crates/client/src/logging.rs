//! Tracing bootstrap for the console shell

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "robodeck_client=info,robodeck_protocol=info";

/// Install the global subscriber: `RUST_LOG` if set, `default_filter` otherwise.
pub fn init_logging(default_filter: &str) -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("Failed to install tracing subscriber")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_an_error_not_a_panic() {
        // Another test may have installed a subscriber first
        let _ = init_logging(DEFAULT_LOG_FILTER);
        assert!(init_logging(DEFAULT_LOG_FILTER).is_err());
    }
}

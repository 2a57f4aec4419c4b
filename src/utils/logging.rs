//! Structured logging setup.

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};
use tracing::info;

/// Install a global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over `config.log_level`. Calling this twice
/// returns `ConfigError` instead of panicking.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_ascii_lowercase()));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_format {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to init logging: {e}")))?;
    } else {
        subscriber
            .with(fmt::layer().with_ansi(config.color))
            .try_init()
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to init logging: {e}")))?;
    }

    info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_an_error() {
        let config = LoggingConfig::default();
        let first = init_logging(&config);
        let second = init_logging(&config);
        // another test may already own the global subscriber
        assert!(first.is_err() || second.is_err());
        assert!(matches!(second, Err(ProtocolError::ConfigError(_))));
    }
}

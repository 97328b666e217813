//! Tracing subscriber setup for hosts embedding Briefwise.

use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{LogFormat, LoggingConfig};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured filter. Calling this twice is a no-op
/// for the second call, so hosts and tests can both invoke it.
pub fn init_tracing(config: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let result = match config.format {
        LogFormat::Text => fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .try_init(),
        LogFormat::Json => fmt().json().with_env_filter(env_filter).try_init(),
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_does_not_panic() {
        let config = LoggingConfig::default();
        init_tracing(&config);
        init_tracing(&LoggingConfig {
            format: LogFormat::Json,
            ..config
        });
    }
}

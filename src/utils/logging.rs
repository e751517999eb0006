//! Structured logging setup.
//!
//! One `tracing-subscriber` registration honoring [`LoggingConfig`]:
//! level from the config unless `RUST_LOG` overrides it, plain or JSON
//! formatting, console or file output. When both console and file are
//! enabled the file wins; log shipping belongs to the operator, not this
//! crate.

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};
use std::fs::OpenOptions;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber for this process.
///
/// Errors if a subscriber is already installed or the log file cannot be
/// opened. With both outputs disabled this is a no-op, which is what the
/// test harness wants.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    if !config.log_to_console && !config.log_to_file {
        return Ok(());
    }

    let filter = EnvFilter::from_default_env().add_directive(config.log_level.into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let file = if config.log_to_file {
        let path = config.log_file_path.as_deref().ok_or_else(|| {
            ProtocolError::ConfigError("log_to_file set without log_file_path".to_string())
        })?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Cannot open log file {path}: {e}")))?;
        Some(Arc::new(file))
    } else {
        None
    };

    let installed = match (config.json_format, file) {
        (true, Some(writer)) => builder.json().with_writer(writer).try_init(),
        (true, None) => builder.json().try_init(),
        (false, Some(writer)) => builder.with_writer(writer).try_init(),
        (false, None) => builder.try_init(),
    };
    installed.map_err(|e| ProtocolError::ConfigError(format!("Logging setup failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_outputs_are_a_noop() {
        let config = LoggingConfig {
            log_to_console: false,
            log_to_file: false,
            ..LoggingConfig::default()
        };

        assert!(init_logging(&config).is_ok());
        assert!(init_logging(&config).is_ok());
    }

    #[test]
    fn file_output_requires_a_path() {
        let config = LoggingConfig {
            log_to_console: false,
            log_to_file: true,
            log_file_path: None,
            ..LoggingConfig::default()
        };

        assert!(matches!(
            init_logging(&config),
            Err(ProtocolError::ConfigError(_))
        ));
    }
}

//! Structured logging configuration.
//!
//! When JSON formatting is enabled, log entries are output as JSON objects:
//!
//! ```json
//! {"timestamp":"2026-01-15T10:30:00.000Z","level":"INFO","target":"permweave_server::service","fields":{"message":"groups loaded","count":12}}
//! ```
//!
//! `RUST_LOG` takes precedence over the configured level.

use std::str::FromStr;

use tracing::{Level, Subscriber};
use tracing_subscriber::{fmt, fmt::MakeWriter, prelude::*, EnvFilter};

use crate::config::LoggingSettings;

/// Logging options resolved from the `logging` section of
/// [`crate::ServerConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub json_format: bool,
    /// Used when `RUST_LOG` is not set.
    pub default_level: Level,
}

impl LoggingConfig {
    /// An unknown level falls back to INFO; `ServerConfig::validate`
    /// rejects those before startup.
    pub fn from_settings(settings: &LoggingSettings) -> Self {
        Self {
            json_format: settings.json,
            default_level: Level::from_str(&settings.level).unwrap_or(Level::INFO),
        }
    }
}

/// Installs the global subscriber writing to stdout. Later calls have no
/// effect.
pub fn init_logging(config: LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_level.to_string()));
    let _ = tracing::subscriber::set_global_default(subscriber(&config, filter, std::io::stdout));
}

fn subscriber<W>(
    config: &LoggingConfig,
    filter: EnvFilter,
    writer: W,
) -> Box<dyn Subscriber + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let registry = tracing_subscriber::registry().with(filter);
    if config.json_format {
        Box::new(
            registry.with(
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_current_span(true)
                    .with_target(true),
            ),
        )
    } else {
        Box::new(registry.with(fmt::layer().with_writer(writer).with_target(true)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture(json: bool, emit: impl FnOnce()) -> String {
        let buffer = SharedBuffer::default();
        let writer = buffer.clone();
        let config = LoggingConfig {
            json_format: json,
            default_level: Level::INFO,
        };
        let subscriber = subscriber(&config, EnvFilter::new("info"), move || writer.clone());

        tracing::subscriber::with_default(subscriber, emit);
        buffer.contents()
    }

    #[test]
    fn test_logging_config_from_settings() {
        let settings = LoggingSettings {
            level: "warn".to_string(),
            json: true,
        };

        let config = LoggingConfig::from_settings(&settings);

        assert!(config.json_format);
        assert_eq!(config.default_level, Level::WARN);
    }

    #[test]
    fn test_unknown_level_falls_back_to_info() {
        let settings = LoggingSettings {
            level: "chatty".to_string(),
            json: false,
        };

        assert_eq!(LoggingConfig::from_settings(&settings).default_level, Level::INFO);
    }

    #[test]
    fn test_json_output_carries_structured_fields() {
        let output = capture(true, || {
            tracing::info!(holder = "group:admin", changed = 2, "holder saved");
        });

        let line = output.lines().find(|l| !l.is_empty()).unwrap();
        let json: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(json["level"], "INFO");
        assert_eq!(json["fields"]["holder"], "group:admin");
        assert_eq!(json["fields"]["message"], "holder saved");
    }

    #[test]
    fn test_text_output_respects_filter() {
        let output = capture(false, || {
            tracing::debug!("hidden");
            tracing::info!("groups loaded");
        });

        assert!(output.contains("groups loaded"));
        assert!(!output.contains("hidden"));
        assert!(serde_json::from_str::<serde_json::Value>(output.trim()).is_err());
    }
}

//! Process-wide logging setup for spotter.
//!
//! Every decision the control loop makes is emitted as a `tracing` event. This module installs the
//! global subscriber, configured from the environment:
//!
//! * `TRACING_FILTER_DIRECTIVE` - an `EnvFilter` directive, `info` when unset.
//! * `LOGGING_FORMATTER` - one of `full`, `compact`, `pretty` or `json`.
//! * `LOGGING_ANSI_ENABLED` - `true` to colorize output.
use serde::Deserialize;
use snafu::ResultExt;
use std::env;
use tracing::Subscriber;
use tracing_subscriber::{filter::LevelFilter, fmt, layer::SubscriberExt, EnvFilter, Registry};

const DEFAULT_TRACING_FILTER_DIRECTIVE: LevelFilter = LevelFilter::INFO;

const TRACING_FILTER_DIRECTIVE_ENV_VAR: &str = "TRACING_FILTER_DIRECTIVE";
const LOGGING_FORMATTER_ENV_VAR: &str = "LOGGING_FORMATTER";
const LOGGING_ANSI_ENABLED_ENV_VAR: &str = "LOGGING_ANSI_ENABLED";

/// The message format for logging tracing events.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    /// Human-readable, single-line logs for each event.
    #[default]
    Full,
    /// A variant of the default formatter optimized for short line lengths.
    Compact,
    /// Multi-line logs, easier to read when iterating locally.
    Pretty,
    /// Newline-delimited JSON logs, for log shippers.
    Json,
}

/// Controls the format of log lines as well as whether or not to enable ANSI colors.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct LogFormatter {
    message_format: MessageFormat,
    ansi_enabled: bool,
}

impl LogFormatter {
    pub fn try_from_env() -> Result<Self> {
        Self::from_values(
            env::var(LOGGING_FORMATTER_ENV_VAR).ok(),
            env::var(LOGGING_ANSI_ENABLED_ENV_VAR).ok(),
        )
    }

    fn from_values(formatter: Option<String>, ansi_enabled: Option<String>) -> Result<Self> {
        let message_format = match formatter {
            Some(formatter) => serde_plain::from_str(&formatter.to_lowercase())
                .context(error::LogFormatterEnvSnafu {
                    env_value: formatter,
                })?,
            None => MessageFormat::default(),
        };

        let ansi_enabled = match ansi_enabled {
            Some(ansi_enabled) => {
                ansi_enabled
                    .to_lowercase()
                    .parse()
                    .context(error::LogAnsiEnvSnafu {
                        env_value: ansi_enabled,
                    })?
            }
            None => false,
        };

        Ok(Self {
            message_format,
            ansi_enabled,
        })
    }

    /// Adds a formatting layer to a tracing event subscriber.
    fn add_format_layer<S>(&self, event_subscriber: S) -> Box<dyn Subscriber + Send + Sync>
    where
        S: SubscriberExt + Send + Sync + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    {
        // Each format produces a distinct layer type, so the subscriber is boxed per arm.
        let layer = fmt::layer().with_ansi(self.ansi_enabled);
        match self.message_format {
            MessageFormat::Full => Box::new(event_subscriber.with(layer)),
            MessageFormat::Compact => Box::new(event_subscriber.with(layer.compact())),
            MessageFormat::Pretty => Box::new(event_subscriber.with(layer.pretty())),
            MessageFormat::Json => Box::new(event_subscriber.with(layer.json())),
        }
    }
}

/// Installs the global tracing subscriber. Must be called once, before the control loop starts.
pub fn init_telemetry_from_env() -> Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(DEFAULT_TRACING_FILTER_DIRECTIVE.into())
        .with_env_var(TRACING_FILTER_DIRECTIVE_ENV_VAR)
        .from_env_lossy();

    let subscriber = Registry::default().with(env_filter);
    let subscriber = LogFormatter::try_from_env()?.add_format_layer(subscriber);

    tracing::subscriber::set_global_default(subscriber)
        .context(error::TracingConfigurationSnafu)?;

    Ok(())
}

pub mod error {
    use std::str::ParseBoolError;

    use super::*;
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub))]
    pub enum TelemetryConfigError {
        #[snafu(display("Error configuring tracing: '{}'", source))]
        TracingConfiguration {
            source: tracing::subscriber::SetGlobalDefaultError,
        },

        #[snafu(display(
            "Could not parse formatter from environment variable '{}={}': '{}'",
            LOGGING_FORMATTER_ENV_VAR,
            env_value,
            source
        ))]
        LogFormatterEnv {
            source: serde_plain::Error,
            env_value: String,
        },

        #[snafu(display(
            "Could not parse ANSI enablement from environment variable '{}={}': '{}'",
            LOGGING_ANSI_ENABLED_ENV_VAR,
            env_value,
            source
        ))]
        LogAnsiEnv {
            source: ParseBoolError,
            env_value: String,
        },
    }
}

type Result<T> = std::result::Result<T, TelemetryConfigError>;
pub use error::TelemetryConfigError;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_log_formatter_from_values() {
        let test_cases = vec![
            (None, None, MessageFormat::Full, false),
            (Some("json"), None, MessageFormat::Json, false),
            (Some("Compact"), Some("TRUE"), MessageFormat::Compact, true),
            (Some("pretty"), Some("false"), MessageFormat::Pretty, false),
        ];

        for (formatter, ansi, expected_format, expected_ansi) in test_cases {
            let log_formatter = LogFormatter::from_values(
                formatter.map(String::from),
                ansi.map(String::from),
            )
            .unwrap();
            assert_eq!(log_formatter.message_format, expected_format);
            assert_eq!(log_formatter.ansi_enabled, expected_ansi);
        }
    }

    #[test]
    fn test_log_formatter_rejects_garbage() {
        assert!(LogFormatter::from_values(Some("xml".to_string()), None).is_err());
        assert!(LogFormatter::from_values(None, Some("yes please".to_string())).is_err());
    }
}

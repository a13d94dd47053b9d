//! Runtime settings for the drain controller, read from the environment.
use crate::deadline::DrainMode;

use snafu::{ensure, ResultExt};
use std::env;
use tokio::time::Duration;
use tracing::{event, Level};

// Enables short drain deadlines for exercising the controller against a test cluster.
const DEBUG_MODE_ENV_VAR: &str = "SPOTTER_DEBUG";
const MAX_CONCURRENT_NODES_ENV_VAR: &str = "SPOTTER_MAX_CONCURRENT_NODES";
const OPERATION_TIMEOUT_ENV_VAR: &str = "SPOTTER_OPERATION_TIMEOUT_SECS";

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_MAX_CONCURRENT_NODES: usize = 32;
pub const DEFAULT_OPERATION_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// The module-wide result type.
type Result<T> = std::result::Result<T, config_error::Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Time between two monitoring cycles.
    pub poll_interval: Duration,
    pub drain_mode: DrainMode,
    /// Upper bound on the number of instances processed at the same time within a cycle.
    pub max_concurrent_nodes: usize,
    /// Time between two status checks of a pending zone operation.
    pub operation_poll_interval: Duration,
    /// How long to wait on a zone operation before giving up. `None` waits indefinitely.
    pub operation_timeout: Option<Duration>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            poll_interval: DEFAULT_POLL_INTERVAL,
            drain_mode: DrainMode::Normal,
            max_concurrent_nodes: DEFAULT_MAX_CONCURRENT_NODES,
            operation_poll_interval: DEFAULT_OPERATION_POLL_INTERVAL,
            operation_timeout: None,
        }
    }
}

impl ControllerConfig {
    pub fn from_environment() -> Result<Self> {
        let drain_mode = match env::var(DEBUG_MODE_ENV_VAR) {
            Ok(value) if value == "1" => {
                event!(
                    Level::WARN,
                    "Debug mode enabled, nodes will be drained within minutes."
                );
                DrainMode::Debug
            }
            _ => DrainMode::Normal,
        };

        let max_concurrent_nodes = match env::var(MAX_CONCURRENT_NODES_ENV_VAR) {
            Ok(value) => {
                let max_concurrent_nodes: usize =
                    value.parse().context(config_error::InvalidNumberSnafu {
                        variable: MAX_CONCURRENT_NODES_ENV_VAR,
                        value: value.clone(),
                    })?;
                ensure!(
                    max_concurrent_nodes >= 1,
                    config_error::InvalidConcurrencySnafu {
                        max_concurrent_nodes
                    }
                );
                max_concurrent_nodes
            }
            Err(_) => DEFAULT_MAX_CONCURRENT_NODES,
        };

        let operation_timeout = match env::var(OPERATION_TIMEOUT_ENV_VAR) {
            Ok(value) => {
                let seconds: u64 = value.parse().context(config_error::InvalidNumberSnafu {
                    variable: OPERATION_TIMEOUT_ENV_VAR,
                    value: value.clone(),
                })?;
                // Zero keeps the default of waiting indefinitely.
                Some(seconds)
                    .filter(|seconds| *seconds > 0)
                    .map(Duration::from_secs)
            }
            Err(_) => None,
        };

        Ok(ControllerConfig {
            drain_mode,
            max_concurrent_nodes,
            operation_timeout,
            ..Default::default()
        })
    }

    pub fn with_poll_interval(self, poll_interval: Duration) -> Self {
        ControllerConfig {
            poll_interval,
            ..self
        }
    }

    pub fn debug_mode(&self) -> bool {
        self.drain_mode == DrainMode::Debug
    }
}

pub mod config_error {
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub))]
    pub enum Error {
        #[snafu(display("Unable to parse '{}' value '{}': '{}'", variable, value, source))]
        InvalidNumber {
            variable: String,
            value: String,
            source: std::num::ParseIntError,
        },

        #[snafu(display(
            "At least one node must be processed at a time, got '{}'",
            max_concurrent_nodes
        ))]
        InvalidConcurrency { max_concurrent_nodes: usize },
    }
}

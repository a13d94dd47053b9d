use models::compute::{locator::LocatorError, ComputeError};

use snafu::Snafu;
use tokio::time::Duration;

/// The crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// The crate-wide error type.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Unable to list node pools of cluster '{}': '{}'", cluster, source))]
    ListNodePools {
        cluster: String,
        source: ComputeError,
    },

    #[snafu(display("Unable to parse instance group url of node pool '{}': '{}'", node_pool, source))]
    ParseInstanceGroupUrl {
        node_pool: String,
        source: LocatorError,
    },

    #[snafu(display("Unable to list managed instances of group '{}': '{}'", group, source))]
    ListManagedInstances {
        group: String,
        source: ComputeError,
    },

    #[snafu(display("Unable to parse instance url: '{}'", source))]
    ParseInstanceUrl { source: LocatorError },

    #[snafu(display("Unable to fetch instance '{}': '{}'", instance, source))]
    FetchInstance {
        instance: String,
        source: ComputeError,
    },

    #[snafu(display("Setting labels on instance '{}' failed: '{}'", instance, source))]
    SetLabels {
        instance: String,
        source: ComputeError,
    },

    /// Another writer changed the instance's labels since they were read. The next cycle re-reads them.
    #[snafu(display(
        "Labels of instance '{}' changed concurrently, skipping until the next cycle: '{}'",
        instance,
        source
    ))]
    LabelFingerprintConflict {
        instance: String,
        source: ComputeError,
    },

    #[snafu(display("Deleting instance '{}' failed: '{}'", instance, source))]
    DeleteInstance {
        instance: String,
        source: ComputeError,
    },

    #[snafu(display("Fetching operation '{}' failed: '{}'", operation, source))]
    FetchOperation {
        operation: String,
        source: ComputeError,
    },

    #[snafu(display("{}[{}] failed: {}", operation, operation_type, body))]
    OperationFailed {
        operation: String,
        operation_type: String,
        body: String,
    },

    #[snafu(display(
        "Operation '{}' did not finish in the time allocated ({:.2}s).",
        operation,
        max_wait.as_secs_f64()
    ))]
    OperationTimeout {
        operation: String,
        max_wait: Duration,
    },

    #[snafu(display("Processing was cancelled by shutdown."))]
    Cancelled,
}

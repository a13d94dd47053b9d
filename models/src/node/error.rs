use super::drain::error::DrainError;

use snafu::Snafu;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display(
        "Error getting node '{}' before setting unschedulable state: '{}'",
        node_name,
        source
    ))]
    GetNode {
        node_name: String,
        source: kube::Error,
    },

    #[snafu(display(
        "Unable to set unschedulable={} on node '{}': '{}'",
        unschedulable,
        node_name,
        source
    ))]
    UpdateNode {
        node_name: String,
        unschedulable: bool,
        source: kube::Error,
    },

    #[snafu(display("Unable to drain node '{}': '{}'", node_name, source))]
    DrainNode {
        node_name: String,
        source: DrainError,
    },
}

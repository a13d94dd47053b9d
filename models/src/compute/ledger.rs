//! The drain deadline of an instance, stored in one reserved instance label.
//!
//! spotter keeps no local state between polling cycles. Instead, the deadline by which an instance
//! should be drained is written into the [`DRAIN_AT_LABEL`] label as base-10 epoch seconds. An
//! absent label means no deadline has been assigned yet.
use crate::constants::DRAIN_AT_LABEL;

use chrono::{DateTime, TimeZone, Utc};
use snafu::{OptionExt, ResultExt};
use std::collections::BTreeMap;

/// Reads the drain deadline from a set of instance labels.
///
/// Returns `Ok(None)` if no deadline has been assigned.
pub fn read_deadline(labels: &BTreeMap<String, String>) -> Result<Option<DateTime<Utc>>> {
    labels
        .get(DRAIN_AT_LABEL)
        .map(|value| decode_deadline(value))
        .transpose()
}

/// Returns a copy of `labels` with the drain deadline set to `deadline`, truncated to whole seconds.
pub fn write_deadline(
    labels: &BTreeMap<String, String>,
    deadline: DateTime<Utc>,
) -> BTreeMap<String, String> {
    let mut labels = labels.clone();
    labels.insert(DRAIN_AT_LABEL.to_string(), encode_deadline(deadline));
    labels
}

fn encode_deadline(deadline: DateTime<Utc>) -> String {
    deadline.timestamp().to_string()
}

fn decode_deadline(value: &str) -> Result<DateTime<Utc>> {
    let seconds: i64 = value.parse().context(error::InvalidDeadlineEncodingSnafu {
        value: value.to_string(),
    })?;

    Utc.timestamp_opt(seconds, 0)
        .single()
        .context(error::DeadlineOutOfRangeSnafu { seconds })
}

pub mod error {
    use crate::constants::DRAIN_AT_LABEL;
    use snafu::Snafu;
    use std::num::ParseIntError;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub))]
    pub enum LedgerError {
        #[snafu(display(
            "Label '{}' has invalid drain deadline '{}': '{}'",
            DRAIN_AT_LABEL,
            value,
            source
        ))]
        InvalidDeadlineEncoding {
            source: ParseIntError,
            value: String,
        },

        #[snafu(display(
            "Label '{}' holds a drain deadline out of range: '{}'",
            DRAIN_AT_LABEL,
            seconds
        ))]
        DeadlineOutOfRange { seconds: i64 },
    }
}

pub use error::LedgerError;
type Result<T> = std::result::Result<T, LedgerError>;
